pub mod component;
pub mod result;

pub use component::{Component, ComponentRule, ComponentType, ControllerMethod};
pub use result::{ApplyTally, RuleApplyResult};
