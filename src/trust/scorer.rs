//! Rolling-window trust scorer.
//!
//! Consumes the outcome event stream and maintains per
//! `(capability_id, capability_version)` statistics over a 7-day window:
//! weighted success rate, latency percentiles, and the state of the last
//! synthetic probe. Recomputation is deterministic and idempotent: the
//! same event set and instant always produce identical snapshots, so a
//! crashed batch can simply re-run.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::config::GatewayConfig;
use crate::domain::{
    CapabilityId, CapabilityStats, CapabilityVersion, ErrorCode, OutcomeEvent,
};
use crate::infra::{OutcomeEventStore, Result, StatsStore};

/// Concurrent per-capability recomputations per batch.
const SCORER_CONCURRENCY: usize = 8;

/// Scoring weight for one outcome, keyed by its error taxonomy.
///
/// `None` excludes the event from scoring entirely: gateway-internal
/// faults, policy denials, and caller-side input errors say nothing about
/// the capability's reliability.
pub fn event_weight(event: &OutcomeEvent) -> Option<f64> {
    match event.error_taxonomy {
        None => Some(1.0),
        Some(ErrorCode::ProviderRateLimited) => Some(0.5),
        Some(ErrorCode::ProviderInvalidInput) => Some(0.7),
        Some(ErrorCode::ProviderNotFound) => Some(0.2),
        Some(
            ErrorCode::ProviderServerError
            | ErrorCode::Timeout
            | ErrorCode::NetworkError
            | ErrorCode::ProviderAuthFailure,
        ) => Some(0.0),
        // Everything else reflects the gateway or the caller, not the
        // provider.
        Some(_) => None,
    }
}

/// Linear-interpolation percentile over a sorted slice.
fn percentile(sorted_values: &[f64], pct: f64) -> f64 {
    if sorted_values.is_empty() {
        return 0.0;
    }
    if sorted_values.len() == 1 {
        return sorted_values[0];
    }
    let k = (sorted_values.len() - 1) as f64 * pct / 100.0;
    let lo = k.floor() as usize;
    let hi = lo + 1;
    if hi >= sorted_values.len() {
        return sorted_values[sorted_values.len() - 1];
    }
    let frac = k - lo as f64;
    sorted_values[lo] + frac * (sorted_values[hi] - sorted_values[lo])
}

/// The rolling-window aggregator.
#[derive(Clone)]
pub struct TrustScorer {
    events: Arc<dyn OutcomeEventStore>,
    stats: Arc<dyn StatsStore>,
    config: GatewayConfig,
}

impl TrustScorer {
    pub fn new(
        events: Arc<dyn OutcomeEventStore>,
        stats: Arc<dyn StatsStore>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            events,
            stats,
            config,
        }
    }

    /// Pure aggregation of one capability's window.
    fn compute(
        &self,
        capability_id: CapabilityId,
        capability_version: CapabilityVersion,
        events: &[OutcomeEvent],
        now: DateTime<Utc>,
    ) -> CapabilityStats {
        let included: Vec<(&OutcomeEvent, f64)> = events
            .iter()
            .filter_map(|e| event_weight(e).map(|w| (e, w)))
            .collect();

        let total = included.len();
        let weighted_success_rate = if total >= self.config.scorer_min_volume {
            let sum: f64 = included.iter().map(|(_, w)| w).sum();
            Some(sum / total as f64)
        } else {
            // Below minimum volume no scored verdict is exposed.
            None
        };

        let mut latencies: Vec<f64> = included
            .iter()
            .map(|(e, _)| e.latency_ms as f64)
            .collect();
        latencies.sort_by(|a, b| a.total_cmp(b));

        // Synthetic probes drive their own freshness tracking, whatever
        // their taxonomy.
        let last_synthetic = events
            .iter()
            .filter(|e| e.is_synthetic)
            .max_by_key(|e| e.timestamp);

        CapabilityStats {
            capability_id,
            capability_version,
            weighted_success_rate_7d: weighted_success_rate,
            p50_latency_ms: percentile(&latencies, 50.0),
            p95_latency_ms: percentile(&latencies, 95.0),
            total_calls_7d: total as u64,
            last_synthetic_check_at: last_synthetic.map(|e| e.timestamp),
            last_synthetic_status: last_synthetic.map(|e| e.success),
            computed_at: now,
        }
    }

    /// Recompute stats for one capability version at the given instant.
    pub async fn recompute_capability(
        &self,
        capability_id: &CapabilityId,
        capability_version: &CapabilityVersion,
        now: DateTime<Utc>,
    ) -> Result<CapabilityStats> {
        let since = now - self.config.scorer_window();
        let window = self
            .events
            .window(capability_id, capability_version, since)
            .await?;
        let stats = self.compute(
            capability_id.clone(),
            capability_version.clone(),
            &window,
            now,
        );
        self.stats.put(stats.clone()).await?;
        Ok(stats)
    }

    /// Recompute every known capability over a bounded worker pool.
    /// Partial failure of one capability does not block the others.
    #[instrument(skip(self))]
    pub async fn recompute_at(&self, now: DateTime<Utc>) -> Result<Vec<CapabilityStats>> {
        let mut keys = self.events.capability_keys().await?;
        // Deterministic batch order.
        keys.sort_by(|a, b| (a.0.as_str(), a.1.as_str()).cmp(&(b.0.as_str(), b.1.as_str())));

        let semaphore = Arc::new(Semaphore::new(SCORER_CONCURRENCY));
        let mut join_set = JoinSet::new();
        for (id, version) in keys {
            let scorer = self.clone();
            let semaphore = semaphore.clone();
            join_set.spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore never closed");
                let result = scorer.recompute_capability(&id, &version, now).await;
                (id, version, result)
            });
        }

        let mut snapshots = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((_, _, Ok(stats))) => snapshots.push(stats),
                Ok((id, version, Err(e))) => {
                    warn!(capability_id = %id, version = %version, error = %e, "Scoring failed for capability");
                }
                Err(e) => warn!(error = %e, "Scoring worker panicked"),
            }
        }
        // Stable output order regardless of completion order.
        snapshots.sort_by(|a, b| {
            (a.capability_id.as_str(), a.capability_version.as_str())
                .cmp(&(b.capability_id.as_str(), b.capability_version.as_str()))
        });
        debug!(capabilities = snapshots.len(), "Scorer batch complete");
        Ok(snapshots)
    }

    /// Spawn the periodic scoring loop, feeding each batch to the advisor.
    pub fn spawn_loop(
        self: Arc<Self>,
        advisor: Arc<super::RoutingAdvisor>,
    ) -> tokio::task::JoinHandle<()> {
        let period = std::time::Duration::from_secs(self.config.scorer_interval_s);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let now = Utc::now();
                match self.recompute_at(now).await {
                    Ok(snapshots) => {
                        info!(capabilities = snapshots.len(), "Scorer batch written");
                        advisor.apply_batch(&snapshots, now).await;
                    }
                    Err(e) => warn!(error = %e, "Scorer batch failed"),
                }
            }
        })
    }
}
