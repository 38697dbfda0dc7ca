//! Trust plane: rolling reliability scoring and routing advice.
//!
//! The scorer consumes outcome events and periodically writes
//! [`crate::domain::CapabilityStats`] snapshots; the advisor turns each
//! batch of snapshots into routing status transitions that the execute
//! pipeline's liveness guard observes.

mod advisor;
mod scorer;

pub use advisor::{RoutingAdvisor, RoutingTransition};
pub use scorer::{event_weight, TrustScorer};
