//! Built-in policy packs
//!
//! Each pack is a YAML document in the same schema as user policy files and
//! goes through the same validation path when loaded.

/// Baseline rules for code execution and data changes in production
pub const BASIC_SAFETY: &str = r#"
policies:
  - name: block-prod-code-exec
    match:
      action.type: code.execute
      context.env: prod
    decision: deny
    mode: enforce
    priority: 10
    active: true
    reason: Code execution is blocked in production environments
  - name: review-prod-data-delete
    match:
      action.type: data.delete
      context.env: prod
    decision: review
    mode: enforce
    priority: 20
    active: true
    reason: Deleting data in production requires human approval
  - name: observe-data-write
    match:
      action.type: data.write
    decision: review
    mode: monitor
    priority: 100
    active: true
    reason: Data writes are being trialed for review
"#;

/// Keeps credentials and personal data out of agent memory
pub const SENSITIVE_DATA: &str = r#"
policies:
  - name: deny-pii-memory-write
    match:
      action.type: memory.write
      context.data_class: pii
    decision: deny
    mode: enforce
    priority: 10
    active: true
    reason: Personal data must not be persisted to agent memory
  - name: deny-credential-write
    match:
      action.type: memory.write
      action.data.namespace: credentials
    decision: deny
    mode: enforce
    priority: 10
    active: true
    reason: Credentials must not be stored in agent memory
  - name: review-credential-read
    match:
      action.type: memory.read
      action.data.namespace: credentials
    decision: review
    mode: enforce
    priority: 20
    active: true
    reason: Reading the credentials namespace requires approval
  - name: observe-pii-read
    match:
      action.type: memory.read
      context.data_class: pii
    decision: deny
    mode: monitor
    priority: 50
    active: true
    reason: Reads of personal data are being trialed for denial
"#;

/// Payment execution guard rails
pub const PAYMENTS_GUARD: &str = r#"
policies:
  - name: deny-unverified-payment
    match:
      action.type: payment.execute
      context.verified: false
    decision: deny
    mode: enforce
    priority: 5
    active: true
    reason: Payments require a verified counterparty
  - name: review-prod-payment
    match:
      action.type: payment.execute
      context.env: prod
    decision: review
    mode: enforce
    priority: 10
    active: true
    reason: Production payments require human approval
  - name: observe-refunds
    match:
      action.type: payment.refund
    decision: review
    mode: monitor
    priority: 50
    active: true
    reason: Refunds are being trialed for review
"#;

/// Rules for the memory operations issued by `MemoryClient`
pub const MEMORY_HYGIENE: &str = r#"
policies:
  - name: deny-system-namespace-write
    match:
      action.type: memory.write
      action.data.namespace: system
    decision: deny
    mode: enforce
    priority: 10
    active: true
    reason: The system namespace is reserved
  - name: review-prod-memory-delete
    match:
      action.type: memory.delete
      context.env: prod
    decision: review
    mode: enforce
    priority: 20
    active: true
    reason: Deleting memories in production requires approval
  - name: observe-memory-delete
    match:
      action.type: memory.delete
    decision: deny
    mode: monitor
    priority: 100
    active: true
    reason: Memory deletions are being trialed for denial
"#;

/// Names accepted by `PolicyEngine::load_pack`
pub const PACK_NAMES: [&str; 4] = ["basic-safety", "sensitive-data", "payments-guard", "memory-hygiene"];

/// YAML source of a built-in pack
pub fn pack_source(name: &str) -> Option<&'static str> {
    match name {
        "basic-safety" => Some(BASIC_SAFETY),
        "sensitive-data" => Some(SENSITIVE_DATA),
        "payments-guard" => Some(PAYMENTS_GUARD),
        "memory-hygiene" => Some(MEMORY_HYGIENE),
        _ => None,
    }
}
