pub mod document;
pub mod fs;
pub mod lock;
pub mod store;

pub use document::IfwRuleDocument;
pub use fs::{DEFAULT_IFW_DIR, IfwFileSystem, LocalFileSystem, ShellFileSystem};
pub use lock::PackageLocks;
pub use store::IfwRuleStore;
