//! Routing advisor.
//!
//! Applies threshold rules to each scorer batch and pushes the resulting
//! routing status back onto the capability row, where the execute
//! pipeline's liveness guard reads it. Rules are evaluated in a fixed
//! order and the first match wins; a hidden capability only returns to
//! active once its recovery conditions hold. Every transition is recorded
//! as an audit event.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::GatewayConfig;
use crate::domain::{CapabilityId, CapabilityStats, CapabilityVersion, RoutingStatus};
use crate::infra::{CapabilityCache, CapabilityRegistry, Result, RoutingStatusSink};

/// Audit record of one routing status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingTransition {
    pub capability_id: CapabilityId,
    pub capability_version: CapabilityVersion,
    pub from: RoutingStatus,
    pub to: RoutingStatus,
    /// The rule that produced the transition
    pub rule: String,
    pub at: DateTime<Utc>,
}

/// Per-capability watermarks for the sustained-window rules.
#[derive(Debug, Default, Clone, Copy)]
struct SustainState {
    /// Since when the weighted rate has been below the hide threshold
    below_since: Option<DateTime<Utc>>,
    /// Since when the weighted rate has been at or above it
    healthy_since: Option<DateTime<Utc>>,
}

/// Threshold rules over scorer snapshots.
pub struct RoutingAdvisor {
    registry: Arc<dyn CapabilityRegistry>,
    sink: Arc<dyn RoutingStatusSink>,
    /// Invalidated after a transition so the liveness guard sees it promptly
    cache: Option<Arc<CapabilityCache>>,
    config: GatewayConfig,
    state: Mutex<HashMap<(CapabilityId, CapabilityVersion), SustainState>>,
    transitions: Mutex<Vec<RoutingTransition>>,
}

impl RoutingAdvisor {
    pub fn new(
        registry: Arc<dyn CapabilityRegistry>,
        sink: Arc<dyn RoutingStatusSink>,
        cache: Option<Arc<CapabilityCache>>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            registry,
            sink,
            cache,
            config,
            state: Mutex::new(HashMap::new()),
            transitions: Mutex::new(Vec::new()),
        }
    }

    /// The audit trail of status changes, oldest first.
    pub async fn transitions(&self) -> Vec<RoutingTransition> {
        self.transitions.lock().await.clone()
    }

    /// Apply the rules to a whole scorer batch. Per-capability failures are
    /// logged and do not block the rest of the batch.
    pub async fn apply_batch(&self, snapshots: &[CapabilityStats], now: DateTime<Utc>) {
        for stats in snapshots {
            if let Err(e) = self.apply(stats, now).await {
                warn!(
                    capability_id = %stats.capability_id,
                    error = %e,
                    "Routing advice failed for capability"
                );
            }
        }
    }

    /// Apply the rules to one snapshot and push any resulting transition.
    pub async fn apply(&self, stats: &CapabilityStats, now: DateTime<Utc>) -> Result<RoutingStatus> {
        let manifest = match self
            .registry
            .get_manifest(&stats.capability_id, Some(stats.capability_version.clone()))
            .await?
        {
            Some(manifest) => manifest,
            None => {
                // The capability left the registry; nothing to advise.
                return Ok(RoutingStatus::Active);
            }
        };
        let current = manifest.routing_status;

        let (next, rule) = {
            let mut state = self.state.lock().await;
            let sustain = state
                .entry((stats.capability_id.clone(), stats.capability_version.clone()))
                .or_default();
            self.decide(stats, manifest.verified, current, sustain, now)
        };

        if next != current {
            self.sink
                .apply_routing_status(&stats.capability_id, &stats.capability_version, next)
                .await?;
            if let Some(cache) = &self.cache {
                cache.invalidate(&stats.capability_id).await;
            }
            info!(
                capability_id = %stats.capability_id,
                version = %stats.capability_version,
                from = %current,
                to = %next,
                rule,
                "Routing status transition"
            );
            self.transitions.lock().await.push(RoutingTransition {
                capability_id: stats.capability_id.clone(),
                capability_version: stats.capability_version.clone(),
                from: current,
                to: next,
                rule: rule.to_string(),
                at: now,
            });
        }
        Ok(next)
    }

    /// Rule evaluation; first match wins.
    fn decide(
        &self,
        stats: &CapabilityStats,
        verified: bool,
        current: RoutingStatus,
        sustain: &mut SustainState,
        now: DateTime<Utc>,
    ) -> (RoutingStatus, &'static str) {
        // Below minimum volume there is no scored verdict and the
        // capability is treated as active regardless of threshold rules.
        let Some(rate) = stats.weighted_success_rate_7d else {
            *sustain = SustainState::default();
            return (RoutingStatus::Active, "MIN_VOLUME_DEFAULT");
        };

        let sustained = chrono::Duration::seconds(self.config.hide_sustained_s);

        // Update the watermarks before judging.
        if rate < self.config.hide_success_threshold {
            sustain.below_since.get_or_insert(now);
            sustain.healthy_since = None;
        } else {
            sustain.healthy_since.get_or_insert(now);
            sustain.below_since = None;
        }

        // Recovery gate: a hidden capability stays hidden until the rate
        // has been healthy for the sustained window AND the last synthetic
        // probe succeeded.
        if current == RoutingStatus::Hidden {
            let healthy_long_enough = sustain
                .healthy_since
                .map(|since| now - since >= sustained)
                .unwrap_or(false);
            if !(healthy_long_enough && stats.last_synthetic_status == Some(true)) {
                return (RoutingStatus::Hidden, "RECOVERY_PENDING");
            }
        }

        // Rule 1: sustained low success rate.
        if rate < self.config.hide_success_threshold {
            let below_long_enough = sustain
                .below_since
                .map(|since| now - since >= sustained)
                .unwrap_or(false);
            if below_long_enough {
                return (RoutingStatus::Hidden, "HIDE_LOW_SUCCESS_RATE");
            }
        }

        // Rule 2: the last synthetic probe failed and has gone stale.
        if stats.last_synthetic_status == Some(false) {
            let stale = stats
                .last_synthetic_check_at
                .map(|at| at < now - chrono::Duration::hours(2))
                .unwrap_or(false);
            if stale {
                return (RoutingStatus::Hidden, "HIDE_SYNTHETIC_FAILURE");
            }
        }

        // Rule 3: excessive tail latency.
        if stats.p95_latency_ms > self.config.throttle_p95_ms {
            return (RoutingStatus::Throttled, "THROTTLE_HIGH_LATENCY");
        }

        // Rule 4: verified and demonstrably healthy.
        if verified
            && rate >= self.config.preferred_success_threshold
            && stats.p95_latency_ms <= self.config.preferred_p95_ms
        {
            return (RoutingStatus::Preferred, "PREFERRED_VERIFIED_HEALTHY");
        }

        (RoutingStatus::Active, "DEFAULT_ACTIVE")
    }
}
