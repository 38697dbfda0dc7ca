//! Gateway configuration.
//!
//! Defaults carry the production contract values; `from_env` lets a
//! deployment override them with `MOAT_*` environment variables.

use std::net::SocketAddr;
use std::time::Duration;

/// All tunable knobs of the gateway core.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Server listen address
    pub listen_addr: SocketAddr,
    /// Hard adapter deadline unless the adapter overrides it
    pub adapter_default_timeout_ms: u64,
    /// TTL for successful receipts in the idempotency store
    pub idempotency_ttl_success_s: u64,
    /// TTL for failure receipts; zero means failures are never cached
    pub idempotency_ttl_failure_s: u64,
    /// Idempotency sweep period; must not exceed 60 seconds
    pub idempotency_sweep_period_s: u64,
    pub capability_cache_ttl_s: u64,
    pub capability_cache_negative_ttl_s: u64,
    pub scorer_window_days: i64,
    /// Below this event count no scored verdict is exposed
    pub scorer_min_volume: usize,
    pub scorer_interval_s: u64,
    pub hide_success_threshold: f64,
    /// How long a below-threshold rate must persist before hiding
    pub hide_sustained_s: i64,
    pub throttle_p95_ms: f64,
    pub preferred_success_threshold: f64,
    pub preferred_p95_ms: f64,
    pub output_size_limit_bytes: usize,
    /// Bounded outcome fan-out channel capacity
    pub outcome_channel_capacity: usize,
    /// Flat per-call spend until a pricing table exists
    pub cost_per_call_cents: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".parse().expect("valid default listen addr"),
            adapter_default_timeout_ms: 30_000,
            idempotency_ttl_success_s: 86_400,
            idempotency_ttl_failure_s: 0,
            idempotency_sweep_period_s: 60,
            capability_cache_ttl_s: 300,
            capability_cache_negative_ttl_s: 30,
            scorer_window_days: 7,
            scorer_min_volume: 10,
            scorer_interval_s: 900,
            hide_success_threshold: 0.80,
            hide_sustained_s: 86_400,
            throttle_p95_ms: 10_000.0,
            preferred_success_threshold: 0.99,
            preferred_p95_ms: 2_000.0,
            output_size_limit_bytes: 1_048_576,
            outcome_channel_capacity: 1_024,
            cost_per_call_cents: 1,
        }
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

impl GatewayConfig {
    /// Load configuration from environment variables, falling back to the
    /// defaults above.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port: u16 = env_parsed("PORT").unwrap_or(8080);
        if let Ok(addr) = format!("{host}:{port}").parse() {
            config.listen_addr = addr;
        }

        if let Some(v) = env_parsed("MOAT_ADAPTER_TIMEOUT_MS") {
            config.adapter_default_timeout_ms = v;
        }
        if let Some(v) = env_parsed("MOAT_IDEMPOTENCY_TTL_SUCCESS_S") {
            config.idempotency_ttl_success_s = v;
        }
        if let Some(v) = env_parsed("MOAT_CAPABILITY_CACHE_TTL_S") {
            config.capability_cache_ttl_s = v;
        }
        if let Some(v) = env_parsed("MOAT_SCORER_INTERVAL_S") {
            config.scorer_interval_s = v;
        }
        if let Some(v) = env_parsed("MOAT_HIDE_SUCCESS_THRESHOLD") {
            config.hide_success_threshold = v;
        }
        if let Some(v) = env_parsed("MOAT_THROTTLE_P95_MS") {
            config.throttle_p95_ms = v;
        }
        if let Some(v) = env_parsed("MOAT_OUTPUT_SIZE_LIMIT_BYTES") {
            config.output_size_limit_bytes = v;
        }

        config
    }

    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_millis(self.adapter_default_timeout_ms)
    }

    /// How long a barrier waiter blocks before giving up: the adapter
    /// deadline plus one second of slack.
    pub fn barrier_wait(&self) -> Duration {
        self.adapter_timeout() + Duration::from_secs(1)
    }

    /// Wall-clock bound on an in-flight idempotency marker: the adapter
    /// deadline plus five seconds of slack.
    pub fn in_flight_deadline(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.adapter_default_timeout_ms as i64 + 5_000)
    }

    pub fn scorer_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.scorer_window_days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_contract() {
        let config = GatewayConfig::default();
        assert_eq!(config.adapter_default_timeout_ms, 30_000);
        assert_eq!(config.idempotency_ttl_success_s, 86_400);
        assert_eq!(config.idempotency_ttl_failure_s, 0);
        assert_eq!(config.capability_cache_ttl_s, 300);
        assert_eq!(config.capability_cache_negative_ttl_s, 30);
        assert_eq!(config.scorer_window_days, 7);
        assert_eq!(config.scorer_min_volume, 10);
        assert_eq!(config.scorer_interval_s, 900);
        assert_eq!(config.hide_success_threshold, 0.80);
        assert_eq!(config.hide_sustained_s, 86_400);
        assert_eq!(config.throttle_p95_ms, 10_000.0);
        assert_eq!(config.preferred_success_threshold, 0.99);
        assert_eq!(config.preferred_p95_ms, 2_000.0);
        assert_eq!(config.output_size_limit_bytes, 1_048_576);
    }

    #[test]
    fn test_derived_windows() {
        let config = GatewayConfig::default();
        assert_eq!(config.barrier_wait(), Duration::from_secs(31));
        assert_eq!(
            config.in_flight_deadline(),
            chrono::Duration::milliseconds(35_000)
        );
    }
}
