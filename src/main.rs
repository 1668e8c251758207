use blocker::{
    cli::{Args, execute},
    error::BlockerError,
};
use clap::Parser;

#[tokio::main]
async fn main() -> Result<(), BlockerError> {
    env_logger::init();

    let args = Args::parse();

    let exit_code = execute(args).await?;
    std::process::exit(exit_code);
}
