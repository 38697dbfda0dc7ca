//! Common fixtures for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use moat_gateway::adapters::{
    Adapter, AdapterDispatcher, AdapterFailure, AdapterOutput, AdapterRegistry, AdapterResult,
};
use moat_gateway::domain::{
    CapabilityId, CapabilityManifest, CapabilityStatus, CapabilityVersion, ExecuteRequest,
    IdempotencyKey, PolicyBundle, Provider, RequestId, RiskClass, RoutingStatus, Scope, TenantId,
};
use moat_gateway::infra::{
    BeginOutcome, CapabilityCache, Credential, GatewayError, IdempotencyStore,
    InMemoryApprovalStore, InMemoryBudgetCounters, InMemoryConnectionStore, InMemoryDecisionStore,
    InMemoryIdempotencyStore, InMemoryOutcomeEventStore, InMemoryPolicyStore, InMemoryRegistry,
    InMemoryReceiptStore, InMemoryStatsStore, InMemoryVault,
};
use moat_gateway::pipeline::{OutcomeEmitter, OutcomeSubscriber, TrustPlaneSink};
use moat_gateway::{ExecutePipeline, GatewayConfig, PipelineDeps};

/// Stable test tenant.
pub fn test_tenant_id() -> TenantId {
    TenantId::from_uuid(Uuid::parse_str("11111111-1111-1111-1111-111111111111").unwrap())
}

pub fn cap_id() -> CapabilityId {
    CapabilityId::parse("slack.post_message").unwrap()
}

pub fn cap_version() -> CapabilityVersion {
    CapabilityVersion::parse("1.0.0").unwrap()
}

/// What the test adapter does on each invocation.
#[derive(Clone)]
pub enum AdapterBehavior {
    /// Return this output immediately
    Succeed(Value),
    /// Sleep this long, then succeed
    Sleep(Duration),
    /// Fail with this provider HTTP status
    FailHttp(u16),
}

/// Adapter double that counts invocations.
pub struct CountingAdapter {
    pub behavior: AdapterBehavior,
    pub calls: Arc<AtomicU64>,
}

impl CountingAdapter {
    pub fn new(behavior: AdapterBehavior) -> (Arc<Self>, Arc<AtomicU64>) {
        let calls = Arc::new(AtomicU64::new(0));
        (
            Arc::new(Self {
                behavior,
                calls: calls.clone(),
            }),
            calls,
        )
    }
}

#[async_trait]
impl Adapter for CountingAdapter {
    fn provider_name(&self) -> &str {
        "slack"
    }

    async fn execute(
        &self,
        _params: &Value,
        _credential: Option<&Credential>,
        _manifest: &CapabilityManifest,
    ) -> AdapterResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            AdapterBehavior::Succeed(output) => Ok(AdapterOutput::new(output.clone())),
            AdapterBehavior::Sleep(duration) => {
                tokio::time::sleep(*duration).await;
                Ok(AdapterOutput::new(json!({"ok": true, "ts": "1.0"})))
            }
            AdapterBehavior::FailHttp(status) => {
                Err(AdapterFailure::from_http_status(*status, "provider error"))
            }
        }
    }
}

/// Idempotency store double whose every operation fails.
pub struct FailingIdempotencyStore;

#[async_trait]
impl IdempotencyStore for FailingIdempotencyStore {
    async fn begin(
        &self,
        _tenant_id: &TenantId,
        _key: &IdempotencyKey,
        _deadline: DateTime<Utc>,
    ) -> moat_gateway::Result<BeginOutcome> {
        Err(GatewayError::IdempotencyUnavailable("connection refused".to_string()))
    }

    async fn commit(
        &self,
        _tenant_id: &TenantId,
        _key: &IdempotencyKey,
        _receipt: moat_gateway::Receipt,
        _ttl_seconds: u64,
    ) -> moat_gateway::Result<()> {
        Err(GatewayError::IdempotencyUnavailable("connection refused".to_string()))
    }

    async fn abandon(
        &self,
        _tenant_id: &TenantId,
        _key: &IdempotencyKey,
    ) -> moat_gateway::Result<()> {
        Err(GatewayError::IdempotencyUnavailable("connection refused".to_string()))
    }

    async fn sweep(&self, _now: DateTime<Utc>) -> moat_gateway::Result<usize> {
        Err(GatewayError::IdempotencyUnavailable("connection refused".to_string()))
    }
}

/// Everything an end-to-end pipeline test touches.
pub struct Harness {
    pub tenant: TenantId,
    pub pipeline: ExecutePipeline,
    pub registry: Arc<InMemoryRegistry>,
    pub cache: Arc<CapabilityCache>,
    pub policy_store: Arc<InMemoryPolicyStore>,
    pub receipts: Arc<InMemoryReceiptStore>,
    pub decisions: Arc<InMemoryDecisionStore>,
    pub idempotency: Arc<InMemoryIdempotencyStore>,
    pub counters: Arc<InMemoryBudgetCounters>,
    pub outcome_events: Arc<InMemoryOutcomeEventStore>,
    pub stats: Arc<InMemoryStatsStore>,
    pub config: GatewayConfig,
}

impl Harness {
    /// Harness with the default config and a counting adapter.
    pub async fn new(behavior: AdapterBehavior) -> (Self, Arc<AtomicU64>) {
        Self::with_config(behavior, GatewayConfig::default(), None).await
    }

    pub async fn with_config(
        behavior: AdapterBehavior,
        config: GatewayConfig,
        idempotency_override: Option<Arc<dyn IdempotencyStore>>,
    ) -> (Self, Arc<AtomicU64>) {
        let registry = Arc::new(InMemoryRegistry::new());
        let cache = Arc::new(CapabilityCache::new(
            registry.clone(),
            Duration::from_secs(config.capability_cache_ttl_s),
            Duration::from_secs(config.capability_cache_negative_ttl_s),
        ));
        let policy_store = Arc::new(InMemoryPolicyStore::new());
        let receipts = Arc::new(InMemoryReceiptStore::new());
        let decisions = Arc::new(InMemoryDecisionStore::new());
        let idempotency = Arc::new(InMemoryIdempotencyStore::new());
        let counters = Arc::new(InMemoryBudgetCounters::new());
        let outcome_events = Arc::new(InMemoryOutcomeEventStore::new());
        let stats = Arc::new(InMemoryStatsStore::new());

        let (adapter, calls) = CountingAdapter::new(behavior);
        let mut adapters = AdapterRegistry::new();
        adapters.register(adapter);
        let dispatcher = Arc::new(AdapterDispatcher::new(
            adapters,
            config.adapter_timeout(),
            config.output_size_limit_bytes,
        ));

        let subscribers: Vec<Arc<dyn OutcomeSubscriber>> =
            vec![Arc::new(TrustPlaneSink::new(outcome_events.clone()))];
        let (emitter, _worker) = OutcomeEmitter::spawn(64, subscribers);

        let pipeline = ExecutePipeline::new(PipelineDeps {
            cache: cache.clone(),
            policy_store: policy_store.clone(),
            approvals: Arc::new(InMemoryApprovalStore::new()),
            decisions: decisions.clone(),
            receipts: receipts.clone(),
            idempotency: idempotency_override.unwrap_or_else(|| idempotency.clone()),
            connections: Arc::new(InMemoryConnectionStore::new()),
            vault: Arc::new(InMemoryVault::new()),
            dispatcher,
            counters: counters.clone(),
            emitter,
            config: config.clone(),
        });

        let harness = Self {
            tenant: test_tenant_id(),
            pipeline,
            registry,
            cache,
            policy_store,
            receipts,
            decisions,
            idempotency,
            counters,
            outcome_events,
            stats,
            config,
        };
        (harness, calls)
    }

    /// Register the standard `slack.post_message@1.0.0` manifest.
    pub async fn register_manifest(&self) {
        self.registry.register(manifest()).await.unwrap();
    }

    /// Grant the standard scope with an optional daily call limit.
    pub async fn grant_bundle(&self, daily_calls_limit: Option<u64>) {
        let mut bundle = PolicyBundle::permissive(
            self.tenant,
            cap_id(),
            cap_version(),
            vec![Scope::from("slack.post_message")],
            vec!["api.slack.com".to_string()],
        );
        bundle.daily_calls_limit = daily_calls_limit;
        self.policy_store.put(bundle).await;
    }

    pub fn request(&self, key: &str) -> ExecuteRequest {
        ExecuteRequest {
            capability_id: cap_id(),
            capability_version: Some(cap_version()),
            tenant_id: self.tenant,
            params: json!({"channel": "#g", "text": "hi"}),
            idempotency_key: IdempotencyKey::parse(key).unwrap(),
            is_synthetic: false,
            approval_token: None,
            request_id: RequestId::new(),
        }
    }

    /// Wait until the outcome fan-out worker has delivered `count` events.
    pub async fn wait_for_outcome_events(&self, count: usize) {
        for _ in 0..100 {
            if self.outcome_events.total_events().await >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "expected {count} outcome events, saw {}",
            self.outcome_events.total_events().await
        );
    }

    /// Give the fan-out worker a beat, then assert the event count.
    pub async fn assert_outcome_events(&self, count: usize) {
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(self.outcome_events.total_events().await, count);
    }
}

/// The standard test manifest.
pub fn manifest() -> CapabilityManifest {
    CapabilityManifest {
        id: cap_id(),
        version: cap_version(),
        provider: Provider::from("slack"),
        method: "POST /api/chat.postMessage".to_string(),
        scopes: vec![Scope::from("slack.post_message")],
        input_schema: json!({
            "type": "object",
            "properties": {"channel": {"type": "string"}, "text": {"type": "string"}},
            "required": ["channel", "text"]
        }),
        output_schema: json!({"type": "object"}),
        risk_class: RiskClass::Low,
        domain_allowlist: vec!["api.slack.com".to_string()],
        status: CapabilityStatus::Published,
        routing_status: RoutingStatus::Active,
        verified: false,
    }
}
