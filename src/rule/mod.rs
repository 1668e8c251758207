pub mod bundle;
pub mod export;

pub use bundle::{RuleBundle, decode, encode};
pub use export::{bundle_from_ifw_xml, export_declared, export_ifw_blocks, export_package};
