//! Tamper-evident audit trail
//!
//! Every governance decision, allowed or not, lands here as a hash-chained
//! event that `AuditLog::verify_chain` can check after the fact.

pub mod event;
pub mod log;

pub use event::{AuditEvent, GENESIS_HASH};
pub use log::{AuditLog, ChainVerification};
