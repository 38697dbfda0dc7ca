//! Rolling reliability aggregates per capability version.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{CapabilityId, CapabilityVersion};

/// Snapshot of a capability's rolling 7-day reliability window.
///
/// Written only by the trust scorer; read by the routing advisor and the
/// stats API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityStats {
    pub capability_id: CapabilityId,
    pub capability_version: CapabilityVersion,
    /// `None` below minimum volume: no scored verdict is exposed
    pub weighted_success_rate_7d: Option<f64>,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub total_calls_7d: u64,
    pub last_synthetic_check_at: Option<DateTime<Utc>>,
    /// `Some(true)` = last synthetic probe succeeded
    pub last_synthetic_status: Option<bool>,
    pub computed_at: DateTime<Utc>,
}

impl CapabilityStats {
    /// An empty window: no events recorded in the last 7 days.
    pub fn empty(
        capability_id: CapabilityId,
        capability_version: CapabilityVersion,
        computed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            capability_id,
            capability_version,
            weighted_success_rate_7d: None,
            p50_latency_ms: 0.0,
            p95_latency_ms: 0.0,
            total_calls_7d: 0,
            last_synthetic_check_at: None,
            last_synthetic_status: None,
            computed_at,
        }
    }
}
