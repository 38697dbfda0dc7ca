//! Provider adapters and dispatch.
//!
//! Each adapter wraps one external provider behind a uniform async
//! `execute` interface. The registry maps provider names to shared adapter
//! singletons; adapters must be re-entrant. Dispatch owns the obligations
//! every adapter shares: input-schema validation, the hard timeout, the
//! output size cap, and normalization of failures into the closed error
//! taxonomy.

pub mod host_guard;
mod stub;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jsonschema::JSONSchema;
use serde_json::Value;
use tracing::warn;

use crate::domain::{CapabilityManifest, ErrorCode};
use crate::infra::Credential;

pub use stub::StubAdapter;

/// Successful adapter output.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterOutput {
    pub output: Value,
    /// Marker copied onto the receipt, e.g. the stub adapter's flag
    pub annotation: Option<String>,
}

impl AdapterOutput {
    pub fn new(output: Value) -> Self {
        Self {
            output,
            annotation: None,
        }
    }

    pub fn with_annotation(output: Value, annotation: impl Into<String>) -> Self {
        Self {
            output,
            annotation: Some(annotation.into()),
        }
    }
}

/// Normalized adapter failure.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterFailure {
    pub code: ErrorCode,
    pub http_status: Option<u16>,
    pub detail: String,
}

impl AdapterFailure {
    pub fn new(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            http_status: None,
            detail: detail.into(),
        }
    }

    /// Map a provider HTTP error onto the taxonomy.
    pub fn from_http_status(status: u16, detail: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::from_http_status(status),
            http_status: Some(status),
            detail: detail.into(),
        }
    }
}

/// Result of one adapter invocation.
pub type AdapterResult = Result<AdapterOutput, AdapterFailure>;

/// A provider integration.
///
/// Implementations must perform all I/O asynchronously, validate outbound
/// hosts through [`host_guard`], and never log or persist the raw
/// credential.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Canonical provider name this adapter serves (e.g. `slack`).
    fn provider_name(&self) -> &str;

    /// Per-adapter timeout override; the dispatch default applies when
    /// `None`.
    fn timeout_override(&self) -> Option<Duration> {
        None
    }

    async fn execute(
        &self,
        params: &Value,
        credential: Option<&Credential>,
        manifest: &CapabilityManifest,
    ) -> AdapterResult;
}

/// Registry mapping provider names to adapter singletons.
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn Adapter>>,
    fallback: Arc<dyn Adapter>,
}

impl AdapterRegistry {
    /// An empty registry with the stub adapter as development fallback.
    pub fn new() -> Self {
        let fallback: Arc<dyn Adapter> = Arc::new(StubAdapter::new());
        let mut adapters = HashMap::new();
        adapters.insert(fallback.provider_name().to_string(), fallback.clone());
        Self { adapters, fallback }
    }

    /// Register an adapter under its provider name, replacing any existing
    /// registration (allows hot-swap in tests).
    pub fn register(&mut self, adapter: Arc<dyn Adapter>) {
        let name = adapter.provider_name().to_string();
        if self.adapters.insert(name.clone(), adapter).is_some() {
            warn!(provider = %name, "Replacing existing adapter registration");
        }
    }

    pub fn get(&self, provider: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(provider).cloned()
    }

    /// The adapter for `provider`, falling back to the stub for providers
    /// with no registered adapter.
    pub fn get_or_stub(&self, provider: &str) -> Arc<dyn Adapter> {
        match self.adapters.get(provider) {
            Some(adapter) => adapter.clone(),
            None => {
                warn!(provider, "No adapter registered; using stub fallback");
                self.fallback.clone()
            }
        }
    }

    pub fn registered_providers(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Dispatch wrapper enforcing the shared adapter obligations.
pub struct AdapterDispatcher {
    registry: AdapterRegistry,
    default_timeout: Duration,
    output_size_limit_bytes: usize,
}

impl AdapterDispatcher {
    pub fn new(
        registry: AdapterRegistry,
        default_timeout: Duration,
        output_size_limit_bytes: usize,
    ) -> Self {
        Self {
            registry,
            default_timeout,
            output_size_limit_bytes,
        }
    }

    /// The effective timeout for the given provider.
    pub fn timeout_for(&self, provider: &str) -> Duration {
        self.registry
            .get(provider)
            .and_then(|a| a.timeout_override())
            .unwrap_or(self.default_timeout)
    }

    /// Validate params, select the adapter, and invoke it under the hard
    /// timeout. A panicking or overrunning adapter is cancelled and
    /// normalized into the taxonomy; this function itself never fails the
    /// task it runs on.
    pub async fn dispatch(
        &self,
        manifest: &CapabilityManifest,
        params: &Value,
        credential: Option<Credential>,
    ) -> AdapterResult {
        if let Err(failure) = validate_params(&manifest.input_schema, params) {
            return Err(failure);
        }

        let adapter = self.registry.get_or_stub(manifest.provider.as_str());
        let timeout = adapter.timeout_override().unwrap_or(self.default_timeout);

        let task_manifest = manifest.clone();
        let task_params = params.clone();
        let handle = tokio::spawn(async move {
            adapter
                .execute(&task_params, credential.as_ref(), &task_manifest)
                .await
        });
        let abort = handle.abort_handle();

        let result = match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => {
                // Adapter panicked; the pipeline still owes a receipt.
                warn!(provider = %manifest.provider, error = %join_error, "Adapter task failed");
                Err(AdapterFailure::new(
                    ErrorCode::GatewayError,
                    "adapter task failed",
                ))
            }
            Err(_) => {
                abort.abort();
                Err(AdapterFailure::new(
                    ErrorCode::Timeout,
                    format!("adapter exceeded {}ms deadline", timeout.as_millis()),
                ))
            }
        };

        match result {
            Ok(output) => {
                let size = serde_json::to_vec(&output.output)
                    .map(|bytes| bytes.len())
                    .unwrap_or(usize::MAX);
                if size > self.output_size_limit_bytes {
                    return Err(AdapterFailure::new(
                        ErrorCode::GatewayError,
                        format!(
                            "adapter output of {size} bytes exceeds the {} byte limit",
                            self.output_size_limit_bytes
                        ),
                    ));
                }
                Ok(output)
            }
            Err(failure) => Err(failure),
        }
    }
}

/// Validate params against the manifest's input schema (JSON Schema
/// Draft 7). An empty schema accepts everything.
fn validate_params(schema: &Value, params: &Value) -> Result<(), AdapterFailure> {
    if schema.is_null() {
        return Ok(());
    }
    let compiled = JSONSchema::compile(schema).map_err(|e| {
        AdapterFailure::new(
            ErrorCode::GatewayError,
            format!("manifest input schema does not compile: {e}"),
        )
    })?;
    if let Err(errors) = compiled.validate(params) {
        let detail = errors
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(AdapterFailure::new(
            ErrorCode::ParamsSchemaViolation,
            detail,
        ));
    }
    Ok(())
}
