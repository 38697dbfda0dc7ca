//! HTTP server bootstrap for the Moat gateway.
//!
//! Wires together configuration, the in-memory collaborator
//! implementations, the execute pipeline, the trust plane's background
//! loops, and the Axum router.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::adapters::{AdapterDispatcher, AdapterRegistry};
use crate::auth::{auth_middleware, ApiKeyRecord, ApiKeyValidator, AuthMiddlewareState};
use crate::config::GatewayConfig;
use crate::domain::{
    CapabilityId, CapabilityManifest, CapabilityStatus, CapabilityVersion, PolicyBundle, Provider,
    RiskClass, RoutingStatus, Scope, TenantId,
};
use crate::infra::{
    spawn_sweeper, CapabilityCache, IdempotencyStore, InMemoryApprovalStore,
    InMemoryBudgetCounters, InMemoryConnectionStore, InMemoryDecisionStore,
    InMemoryIdempotencyStore, InMemoryOutcomeEventStore, InMemoryPolicyStore, InMemoryRegistry,
    InMemoryReceiptStore, InMemoryStatsStore, InMemoryVault, LoggingReceiptPublisher, StatsStore,
};
use crate::pipeline::{
    ExecutePipeline, OutcomeEmitter, OutcomeSubscriber, PipelineDeps, ReceiptPublisherSink,
    TrustPlaneSink,
};
use crate::trust::{RoutingAdvisor, TrustScorer};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ExecutePipeline>,
    pub stats: Arc<dyn StatsStore>,
    pub cache: Arc<CapabilityCache>,
}

/// Start the HTTP server.
pub async fn run() -> anyhow::Result<()> {
    init_tracing();
    info!("Starting Moat gateway v{}", env!("CARGO_PKG_VERSION"));

    let config = GatewayConfig::from_env();
    info!("Configuration loaded");
    info!("  Listen address: {}", config.listen_addr);
    info!("  Adapter timeout: {}ms", config.adapter_default_timeout_ms);

    // Collaborators. The in-memory variants serve development and
    // single-process deployments; durable backends plug in through the
    // same traits.
    let registry = Arc::new(InMemoryRegistry::new());
    let cache = Arc::new(CapabilityCache::new(
        registry.clone(),
        std::time::Duration::from_secs(config.capability_cache_ttl_s),
        std::time::Duration::from_secs(config.capability_cache_negative_ttl_s),
    ));
    let policy_store = Arc::new(InMemoryPolicyStore::new());
    let approvals = Arc::new(InMemoryApprovalStore::new());
    let connections = Arc::new(InMemoryConnectionStore::new());
    let vault = Arc::new(InMemoryVault::new());
    let receipts = Arc::new(InMemoryReceiptStore::new());
    let decisions = Arc::new(InMemoryDecisionStore::new());
    let idempotency: Arc<InMemoryIdempotencyStore> = Arc::new(InMemoryIdempotencyStore::new());
    let counters = Arc::new(InMemoryBudgetCounters::new());
    let outcome_events = Arc::new(InMemoryOutcomeEventStore::new());
    let stats_store: Arc<dyn StatsStore> = Arc::new(InMemoryStatsStore::new());

    // Outcome fan-out: trust plane sink plus the on-chain publisher hook.
    let subscribers: Vec<Arc<dyn OutcomeSubscriber>> = vec![
        Arc::new(TrustPlaneSink::new(outcome_events.clone())),
        Arc::new(ReceiptPublisherSink::new(Arc::new(LoggingReceiptPublisher))),
    ];
    let (emitter, _emitter_worker) =
        OutcomeEmitter::spawn(config.outcome_channel_capacity, subscribers);

    let dispatcher = Arc::new(AdapterDispatcher::new(
        AdapterRegistry::new(),
        config.adapter_timeout(),
        config.output_size_limit_bytes,
    ));

    let pipeline = Arc::new(ExecutePipeline::new(PipelineDeps {
        cache: cache.clone(),
        policy_store: policy_store.clone(),
        approvals,
        decisions,
        receipts,
        idempotency: idempotency.clone(),
        connections,
        vault,
        dispatcher,
        counters,
        emitter,
        config: config.clone(),
    }));

    // Background loops: idempotency sweep and the scorer/advisor cadence.
    let sweep_store: Arc<dyn IdempotencyStore> = idempotency;
    let _sweeper = spawn_sweeper(
        sweep_store,
        std::time::Duration::from_secs(config.idempotency_sweep_period_s),
    );
    let scorer = Arc::new(TrustScorer::new(
        outcome_events,
        stats_store.clone(),
        config.clone(),
    ));
    let advisor = Arc::new(RoutingAdvisor::new(
        registry.clone(),
        registry.clone(),
        Some(cache.clone()),
        config.clone(),
    ));
    let _scorer_loop = scorer.spawn_loop(advisor);

    // Auth bootstrap.
    let validator = Arc::new(ApiKeyValidator::new());
    let bootstrap_key = std::env::var("BOOTSTRAP_API_KEY").map_err(|_| {
        anyhow::anyhow!("BOOTSTRAP_API_KEY is not set; refusing to start without auth")
    })?;
    let tenant_id = std::env::var("BOOTSTRAP_TENANT_ID")
        .ok()
        .and_then(|v| v.parse::<Uuid>().ok())
        .map(TenantId::from_uuid)
        .unwrap_or_default();
    validator.register_key(ApiKeyRecord {
        key_hash: ApiKeyValidator::hash_key(&bootstrap_key),
        tenant_id,
        active: true,
    });
    info!(tenant_id = %tenant_id, "Bootstrap API key registered");

    if std::env::var("MOAT_DEV_SEED").is_ok() {
        seed_dev_fixtures(&registry, &policy_store, tenant_id).await?;
        info!("Development fixtures seeded (stub.echo)");
    }

    let state = AppState {
        pipeline,
        stats: stats_store,
        cache,
    };
    let app = build_router(AuthMiddlewareState { validator }).with_state(state);

    info!("Starting HTTP server on {}", config.listen_addr);
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!("Moat gateway is ready to accept connections");
    axum::serve(listener, app).await?;

    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();
}

fn build_router(auth_state: AuthMiddlewareState) -> Router<AppState> {
    let api = crate::api::router().layer(axum::middleware::from_fn_with_state(
        auth_state,
        auth_middleware,
    ));

    Router::new()
        .merge(api)
        .route("/health", get(crate::api::handlers::health::health_check))
        .layer(TraceLayer::new_for_http())
}

/// Register a development capability and a permissive bundle for the
/// bootstrap tenant so the pipeline can be exercised end to end with no
/// external registry.
async fn seed_dev_fixtures(
    registry: &InMemoryRegistry,
    policy_store: &InMemoryPolicyStore,
    tenant_id: TenantId,
) -> anyhow::Result<()> {
    let id = CapabilityId::parse("stub.echo")?;
    let version = CapabilityVersion::parse("1.0.0")?;

    registry
        .register(CapabilityManifest {
            id: id.clone(),
            version: version.clone(),
            provider: Provider::from("stub"),
            method: "POST /echo".to_string(),
            scopes: vec![Scope::from("stub.echo")],
            input_schema: serde_json::json!({"type": "object"}),
            output_schema: serde_json::json!({"type": "object"}),
            risk_class: RiskClass::Low,
            domain_allowlist: vec!["example.com".to_string()],
            status: CapabilityStatus::Published,
            routing_status: RoutingStatus::Active,
            verified: false,
        })
        .await?;

    policy_store
        .put(PolicyBundle::permissive(
            tenant_id,
            id,
            version,
            vec![Scope::from("stub.echo")],
            vec!["example.com".to_string()],
        ))
        .await;

    Ok(())
}
