//! Warden - Policy-gated governance for LLM agent memory
//!
//! Every memory operation is checked against an ordered rule set before it
//! reaches storage, and every decision is recorded in a hash-chained audit
//! log whose integrity can be verified after the fact.

pub mod audit;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod policy;
pub mod storage;
pub mod testing;

pub use audit::{AuditEvent, AuditLog, ChainVerification};
pub use client::MemoryClient;
pub use config::Config;
pub use error::{Result, WardenError};
pub use policy::{Action, CheckResult, Decision, Mode, Policy, PolicyEngine};
pub use storage::{LocalMemoryStore, MemoryStore, NewMemory, RecallQuery, RecalledMemory, RemoteMemoryStore};
