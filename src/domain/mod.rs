//! Domain records for the Moat gateway.
//!
//! Everything in this module is frozen after creation: records are
//! constructed once, carry UTC timestamps with millisecond precision, and
//! have no mutators. Equality is structural.

mod manifest;
mod policy;
mod receipt;
mod stats;
mod types;

pub use manifest::CapabilityManifest;
pub use policy::{
    ApprovalState, BudgetSnapshot, Decision, PolicyBundle, PolicyDecision, RuleHit,
};
pub use receipt::{ExecuteRejection, ExecuteRequest, ExecuteResult, OutcomeEvent, Receipt};
pub use stats::CapabilityStats;
pub use types::{
    CapabilityId, CapabilityStatus, CapabilityVersion, DecisionId, DomainError, ErrorCode,
    IdempotencyKey, Provider, ReceiptId, ReceiptStatus, RequestId, RiskClass, RoutingStatus,
    Scope, SecretRef, TenantId, MAX_IDEMPOTENCY_KEY_BYTES,
};
