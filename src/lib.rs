pub mod apply;
pub mod cli;
pub mod controller;
pub mod error;
pub mod ifw;
pub mod model;
pub mod rule;
pub mod shell;
