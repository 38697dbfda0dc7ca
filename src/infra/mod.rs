//! Infrastructure layer for the Moat gateway.
//!
//! Contains the trait seams to external collaborators (registry, vault,
//! stores) plus in-memory implementations for development and tests:
//! - Capability lookup cache (read-through, TTL-bounded)
//! - Idempotency store (single-flight coalescing, TTL sweep)
//! - Budget counters (UTC period keys)
//! - Write-once receipt and decision stores

mod capability_cache;
mod counters;
mod error;
mod idempotency;
mod memory;
mod traits;

pub use capability_cache::{CachedManifest, CacheStats, CapabilityCache};
pub use counters::{daily_period_key, monthly_period_key, InMemoryBudgetCounters};
pub use error::{GatewayError, Result};
pub use idempotency::{spawn_sweeper, InMemoryIdempotencyStore};
pub use memory::{
    ApprovalRecord, InMemoryApprovalStore, InMemoryConnectionStore, InMemoryDecisionStore,
    InMemoryOutcomeEventStore, InMemoryPolicyStore, InMemoryRegistry, InMemoryReceiptStore,
    InMemoryStatsStore, InMemoryVault, LoggingReceiptPublisher,
};
pub use traits::*;
