use std::path::PathBuf;

use clap::{Parser, Subcommand};

use super::config::BackendKind;
use crate::model::{ComponentType, ControllerMethod};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Disable or enable Android app components via the package manager or the intent firewall"
)]
pub struct Args {
    /// Path to configuration file (TOML)
    #[arg(long = "config", value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Privileged backend used to run commands
    #[arg(long = "backend", value_enum, global = true)]
    pub backend: Option<BackendKind>,

    /// Directory holding the intent firewall rule files
    #[arg(long = "ifw-dir", value_name = "DIR", global = true)]
    pub ifw_dir: Option<PathBuf>,

    /// Android user whose component states are changed
    #[arg(long = "user", value_name = "ID", global = true)]
    pub user: Option<u32>,

    /// Do not check that components exist on the device before changing them
    #[arg(long = "no-verify", global = true)]
    pub no_verify: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Disable (PM) or block (IFW) a component
    Block(Target),
    /// Enable (PM) or unblock (IFW) a component
    Unblock(Target),
    /// Print whether a component is enabled under the given method
    Status(Target),
    /// Apply a JSON rule bundle
    Apply {
        /// Rule bundle file
        bundle: PathBuf,
    },
    /// Export the PM and IFW state of a package as a JSON rule bundle
    Export {
        package: String,
        /// Write to this file instead of stdout
        #[arg(short = 'o', long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
        /// Only export the components currently blocked by the intent firewall
        #[arg(long = "ifw-only")]
        ifw_only: bool,
    },
    /// Apply the blocks listed in a raw intent firewall XML file or a directory of them
    ImportIfw {
        path: PathBuf,
        /// Package the rules belong to (defaults to the file name without `.xml`)
        #[arg(long = "package")]
        package: Option<String>,
    },
    /// Delete the intent firewall rules of a package, or of every package
    Clear {
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        package: Option<String>,
        /// Delete every rule file in the IFW directory
        #[arg(long = "all")]
        all: bool,
    },
}

#[derive(clap::Args, Debug)]
pub struct Target {
    /// Component as package/class
    pub component: String,

    /// Component type: activity, service, receiver or provider
    #[arg(long = "type", value_name = "TYPE")]
    pub component_type: ComponentType,

    /// Controller method: pm or ifw
    #[arg(long = "method", default_value = "ifw")]
    pub method: ControllerMethod,
}
