//! Stub adapter for development and testing.
//!
//! Simulates a successful provider response without any network call,
//! echoing the submitted params back and sleeping 100-500 ms to exercise
//! latency accounting. Also serves as the registry fallback for providers
//! with no registered adapter; its receipts are marked via the output
//! annotation so stub results are never mistaken for real ones.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde_json::{json, Value};
use tracing::debug;

use crate::domain::CapabilityManifest;
use crate::infra::Credential;

use super::{Adapter, AdapterOutput, AdapterResult};

const MIN_LATENCY_MS: u64 = 100;
const MAX_LATENCY_MS: u64 = 500;

/// Annotation copied onto receipts produced through the stub.
pub const STUB_ANNOTATION: &str = "stub";

/// Fake provider adapter returning a synthetic success response.
pub struct StubAdapter;

impl StubAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StubAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adapter for StubAdapter {
    fn provider_name(&self) -> &str {
        "stub"
    }

    async fn execute(
        &self,
        params: &Value,
        credential: Option<&Credential>,
        manifest: &CapabilityManifest,
    ) -> AdapterResult {
        let latency_ms = rand::thread_rng().gen_range(MIN_LATENCY_MS..=MAX_LATENCY_MS);
        tokio::time::sleep(Duration::from_millis(latency_ms)).await;

        debug!(
            capability_id = %manifest.id,
            simulated_latency_ms = latency_ms,
            has_credential = credential.is_some(),
            // credential value is intentionally not logged
            "Stub adapter executed"
        );

        Ok(AdapterOutput::with_annotation(
            json!({
                "status": "success",
                "capability_id": manifest.id.as_str(),
                "echo_params": params,
                "simulated_latency_ms": latency_ms,
                "executed_at": Utc::now().to_rfc3339(),
            }),
            STUB_ANNOTATION,
        ))
    }
}
