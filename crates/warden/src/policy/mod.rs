//! Policy evaluation for governed memory operations
//!
//! Rules come from YAML files, built-in packs, or runtime additions. Each
//! proposed action is checked against them before it is allowed to execute.

pub mod engine;
pub mod packs;
pub mod types;

pub use engine::PolicyEngine;
pub use types::{Action, CheckResult, Decision, Mode, Policy};
