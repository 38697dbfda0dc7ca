//! In-memory implementations of the gateway's collaborator traits.
//!
//! Suitable for local development, unit tests, and single-process
//! deployments. Durable backends live outside the core and plug in through
//! the same traits.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::info;

use crate::domain::{
    ApprovalState, CapabilityId, CapabilityManifest, CapabilityStats, CapabilityStatus,
    CapabilityVersion, DecisionId, OutcomeEvent, PolicyBundle, PolicyDecision, Provider, Receipt,
    ReceiptId, RequestId, RoutingStatus, SecretRef, TenantId,
};

use super::error::{GatewayError, Result};
use super::traits::{
    ApprovalStore, CapabilityRegistry, ConnectionStore, Credential, DecisionStore,
    OutcomeEventStore, PolicyStore, ReceiptPublisher, ReceiptStore, RoutingStatusSink, StatsStore,
    Vault,
};

/// Sort key for picking the latest published version: `(major, minor,
/// patch, is_release)`. Pre-release versions order below the release with
/// the same triple.
fn semver_key(version: &CapabilityVersion) -> (u64, u64, u64, bool) {
    let raw = version.as_str();
    let (triple, pre) = match raw.split_once('-') {
        Some((t, _)) => (t, true),
        None => (raw, false),
    };
    let mut parts = triple.split('.').map(|p| p.parse::<u64>().unwrap_or(0));
    (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        !pre,
    )
}

// ============================================================================
// Capability registry
// ============================================================================

/// In-memory capability registry, also the routing-status write path.
pub struct InMemoryRegistry {
    manifests: RwLock<HashMap<(CapabilityId, CapabilityVersion), CapabilityManifest>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self {
            manifests: RwLock::new(HashMap::new()),
        }
    }

    /// Register a manifest after validating its field constraints.
    ///
    /// A manifest whose stored status is not `draft` is immutable; behavior
    /// changes ship as a new version.
    pub async fn register(&self, manifest: CapabilityManifest) -> Result<()> {
        manifest.validate()?;
        let key = (manifest.id.clone(), manifest.version.clone());
        let mut manifests = self.manifests.write().await;
        if let Some(existing) = manifests.get(&key) {
            if existing.status != CapabilityStatus::Draft {
                return Err(GatewayError::Internal(format!(
                    "manifest {}@{} is {} and immutable; publish a new version",
                    manifest.id, manifest.version, existing.status
                )));
            }
        }
        manifests.insert(key, manifest);
        Ok(())
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CapabilityRegistry for InMemoryRegistry {
    async fn get_manifest(
        &self,
        id: &CapabilityId,
        version: Option<CapabilityVersion>,
    ) -> Result<Option<CapabilityManifest>> {
        let manifests = self.manifests.read().await;
        match version {
            Some(version) => Ok(manifests.get(&(id.clone(), version)).cloned()),
            None => {
                // Latest published version wins.
                let latest = manifests
                    .values()
                    .filter(|m| m.id == *id && m.status == CapabilityStatus::Published)
                    .max_by_key(|m| semver_key(&m.version));
                Ok(latest.cloned())
            }
        }
    }
}

#[async_trait]
impl RoutingStatusSink for InMemoryRegistry {
    async fn apply_routing_status(
        &self,
        id: &CapabilityId,
        version: &CapabilityVersion,
        status: RoutingStatus,
    ) -> Result<()> {
        let mut manifests = self.manifests.write().await;
        match manifests.get_mut(&(id.clone(), version.clone())) {
            Some(manifest) => {
                manifest.routing_status = status;
                Ok(())
            }
            None => Err(GatewayError::ManifestNotFound {
                capability_id: id.to_string(),
            }),
        }
    }
}

// ============================================================================
// Policy bundles and approvals
// ============================================================================

/// In-memory policy bundle store.
pub struct InMemoryPolicyStore {
    bundles: RwLock<HashMap<(TenantId, CapabilityId, CapabilityVersion), PolicyBundle>>,
}

impl InMemoryPolicyStore {
    pub fn new() -> Self {
        Self {
            bundles: RwLock::new(HashMap::new()),
        }
    }

    pub async fn put(&self, bundle: PolicyBundle) {
        let key = (
            bundle.tenant_id,
            bundle.capability_id.clone(),
            bundle.capability_version.clone(),
        );
        self.bundles.write().await.insert(key, bundle);
    }

    pub async fn remove(
        &self,
        tenant_id: &TenantId,
        capability_id: &CapabilityId,
        capability_version: &CapabilityVersion,
    ) {
        self.bundles.write().await.remove(&(
            *tenant_id,
            capability_id.clone(),
            capability_version.clone(),
        ));
    }
}

impl Default for InMemoryPolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn get_bundle(
        &self,
        tenant_id: &TenantId,
        capability_id: &CapabilityId,
        capability_version: &CapabilityVersion,
    ) -> Result<Option<PolicyBundle>> {
        let bundles = self.bundles.read().await;
        Ok(bundles
            .get(&(
                *tenant_id,
                capability_id.clone(),
                capability_version.clone(),
            ))
            .cloned())
    }
}

/// Approval token record held by the in-memory approval store.
#[derive(Debug, Clone)]
pub struct ApprovalRecord {
    pub tenant_id: TenantId,
    pub capability_id: CapabilityId,
    pub state: ApprovalState,
}

/// In-memory approval token store.
pub struct InMemoryApprovalStore {
    tokens: RwLock<HashMap<String, ApprovalRecord>>,
}

impl InMemoryApprovalStore {
    pub fn new() -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
        }
    }

    pub async fn put(&self, token: impl Into<String>, record: ApprovalRecord) {
        self.tokens.write().await.insert(token.into(), record);
    }
}

impl Default for InMemoryApprovalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ApprovalStore for InMemoryApprovalStore {
    async fn resolve_token(
        &self,
        token: &str,
        tenant_id: &TenantId,
        capability_id: &CapabilityId,
    ) -> Result<ApprovalState> {
        let tokens = self.tokens.read().await;
        match tokens.get(token) {
            Some(record)
                if record.tenant_id == *tenant_id && record.capability_id == *capability_id =>
            {
                Ok(record.state)
            }
            // Unknown or mismatched tokens are treated as denied.
            _ => Ok(ApprovalState::Denied),
        }
    }
}

// ============================================================================
// Connections and vault
// ============================================================================

/// In-memory tenant → provider connection records.
pub struct InMemoryConnectionStore {
    connections: RwLock<HashMap<(TenantId, Provider), SecretRef>>,
}

impl InMemoryConnectionStore {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    pub async fn connect(&self, tenant_id: TenantId, provider: Provider, secret_ref: SecretRef) {
        self.connections
            .write()
            .await
            .insert((tenant_id, provider), secret_ref);
    }
}

impl Default for InMemoryConnectionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionStore for InMemoryConnectionStore {
    async fn secret_ref(
        &self,
        tenant_id: &TenantId,
        provider: &Provider,
    ) -> Result<Option<SecretRef>> {
        let connections = self.connections.read().await;
        Ok(connections.get(&(*tenant_id, provider.clone())).cloned())
    }
}

/// In-memory credential vault.
pub struct InMemoryVault {
    secrets: RwLock<HashMap<SecretRef, String>>,
}

impl InMemoryVault {
    pub fn new() -> Self {
        Self {
            secrets: RwLock::new(HashMap::new()),
        }
    }

    pub async fn store(&self, secret_ref: SecretRef, raw: impl Into<String>) {
        self.secrets.write().await.insert(secret_ref, raw.into());
    }
}

impl Default for InMemoryVault {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Vault for InMemoryVault {
    async fn resolve(&self, secret_ref: &SecretRef) -> Result<Credential> {
        let secrets = self.secrets.read().await;
        secrets
            .get(secret_ref)
            .map(|raw| Credential::new(raw.clone()))
            .ok_or_else(|| {
                GatewayError::VaultUnavailable(format!("unknown secret ref: {secret_ref}"))
            })
    }
}

// ============================================================================
// Audit stores
// ============================================================================

/// In-memory write-once receipt store.
pub struct InMemoryReceiptStore {
    receipts: RwLock<HashMap<ReceiptId, Receipt>>,
}

impl InMemoryReceiptStore {
    pub fn new() -> Self {
        Self {
            receipts: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.receipts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryReceiptStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReceiptStore for InMemoryReceiptStore {
    async fn append(&self, receipt: Receipt) -> Result<()> {
        let mut receipts = self.receipts.write().await;
        if receipts.contains_key(&receipt.id) {
            return Err(GatewayError::Internal(format!(
                "receipt {} already exists; receipts are write-once",
                receipt.id
            )));
        }
        receipts.insert(receipt.id, receipt);
        Ok(())
    }

    async fn get(&self, id: &ReceiptId) -> Result<Option<Receipt>> {
        Ok(self.receipts.read().await.get(id).cloned())
    }

    async fn find_by_request(&self, request_id: &RequestId) -> Result<Vec<Receipt>> {
        let receipts = self.receipts.read().await;
        Ok(receipts
            .values()
            .filter(|r| r.request_id == *request_id)
            .cloned()
            .collect())
    }
}

/// In-memory write-once policy decision store.
pub struct InMemoryDecisionStore {
    decisions: RwLock<HashMap<DecisionId, PolicyDecision>>,
}

impl InMemoryDecisionStore {
    pub fn new() -> Self {
        Self {
            decisions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.decisions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryDecisionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DecisionStore for InMemoryDecisionStore {
    async fn append(&self, decision: PolicyDecision) -> Result<()> {
        let mut decisions = self.decisions.write().await;
        if decisions.contains_key(&decision.id) {
            return Err(GatewayError::Internal(format!(
                "policy decision {} already exists; decisions are write-once",
                decision.id
            )));
        }
        decisions.insert(decision.id, decision);
        Ok(())
    }

    async fn get(&self, id: &DecisionId) -> Result<Option<PolicyDecision>> {
        Ok(self.decisions.read().await.get(id).cloned())
    }
}

/// In-memory append-only outcome event store.
pub struct InMemoryOutcomeEventStore {
    events: RwLock<HashMap<(CapabilityId, CapabilityVersion), Vec<OutcomeEvent>>>,
}

impl InMemoryOutcomeEventStore {
    pub fn new() -> Self {
        Self {
            events: RwLock::new(HashMap::new()),
        }
    }

    pub async fn total_events(&self) -> usize {
        self.events.read().await.values().map(Vec::len).sum()
    }
}

impl Default for InMemoryOutcomeEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutcomeEventStore for InMemoryOutcomeEventStore {
    async fn append(&self, event: OutcomeEvent) -> Result<()> {
        let key = (event.capability_id.clone(), event.capability_version.clone());
        self.events.write().await.entry(key).or_default().push(event);
        Ok(())
    }

    async fn window(
        &self,
        capability_id: &CapabilityId,
        capability_version: &CapabilityVersion,
        since: DateTime<Utc>,
    ) -> Result<Vec<OutcomeEvent>> {
        let events = self.events.read().await;
        let mut window: Vec<OutcomeEvent> = events
            .get(&(capability_id.clone(), capability_version.clone()))
            .map(|v| v.iter().filter(|e| e.timestamp >= since).cloned().collect())
            .unwrap_or_default();
        window.sort_by_key(|e| e.timestamp);
        Ok(window)
    }

    async fn capability_keys(&self) -> Result<Vec<(CapabilityId, CapabilityVersion)>> {
        Ok(self.events.read().await.keys().cloned().collect())
    }
}

/// In-memory stats snapshot store.
pub struct InMemoryStatsStore {
    stats: RwLock<HashMap<(CapabilityId, CapabilityVersion), CapabilityStats>>,
}

impl InMemoryStatsStore {
    pub fn new() -> Self {
        Self {
            stats: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStatsStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatsStore for InMemoryStatsStore {
    async fn put(&self, stats: CapabilityStats) -> Result<()> {
        let key = (stats.capability_id.clone(), stats.capability_version.clone());
        self.stats.write().await.insert(key, stats);
        Ok(())
    }

    async fn fetch_stats(
        &self,
        capability_id: &CapabilityId,
        capability_version: &CapabilityVersion,
    ) -> Result<Option<CapabilityStats>> {
        let stats = self.stats.read().await;
        Ok(stats
            .get(&(capability_id.clone(), capability_version.clone()))
            .cloned())
    }
}

/// Receipt publisher that records the publication in the log instead of
/// posting on-chain. The production publisher is an external collaborator.
pub struct LoggingReceiptPublisher;

#[async_trait]
impl ReceiptPublisher for LoggingReceiptPublisher {
    async fn publish(&self, receipt: &Receipt) -> Result<()> {
        info!(
            receipt_id = %receipt.id,
            capability_id = %receipt.capability_id,
            status = %receipt.status,
            "Receipt available for on-chain publication"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RiskClass, Scope};
    use serde_json::json;

    fn manifest(version: &str, status: CapabilityStatus) -> CapabilityManifest {
        CapabilityManifest {
            id: CapabilityId::parse("slack.post_message").unwrap(),
            version: CapabilityVersion::parse(version).unwrap(),
            provider: Provider::from("slack"),
            method: "POST /api/chat.postMessage".to_string(),
            scopes: vec![Scope::from("slack.post_message")],
            input_schema: json!({"type": "object"}),
            output_schema: json!({"type": "object"}),
            risk_class: RiskClass::Low,
            domain_allowlist: vec!["api.slack.com".to_string()],
            status,
            routing_status: RoutingStatus::Active,
            verified: false,
        }
    }

    #[tokio::test]
    async fn test_registry_lookup_by_version() {
        let registry = InMemoryRegistry::new();
        registry
            .register(manifest("1.0.0", CapabilityStatus::Published))
            .await
            .unwrap();

        let id = CapabilityId::parse("slack.post_message").unwrap();
        let version = CapabilityVersion::parse("1.0.0").unwrap();

        let found = registry.get_manifest(&id, Some(version.clone())).await.unwrap();
        assert!(found.is_some());

        let missing_version = CapabilityVersion::parse("2.0.0").unwrap();
        let missing = registry
            .get_manifest(&id, Some(missing_version))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_registry_latest_published_resolution() {
        let registry = InMemoryRegistry::new();
        registry
            .register(manifest("1.0.0", CapabilityStatus::Published))
            .await
            .unwrap();
        registry
            .register(manifest("1.2.0", CapabilityStatus::Published))
            .await
            .unwrap();
        // Draft versions never win the latest-published resolution.
        registry
            .register(manifest("2.0.0", CapabilityStatus::Draft))
            .await
            .unwrap();

        let id = CapabilityId::parse("slack.post_message").unwrap();
        let latest = registry.get_manifest(&id, None).await.unwrap().unwrap();
        assert_eq!(latest.version.as_str(), "1.2.0");
    }

    #[tokio::test]
    async fn test_published_manifest_is_immutable() {
        let registry = InMemoryRegistry::new();
        registry
            .register(manifest("1.0.0", CapabilityStatus::Published))
            .await
            .unwrap();

        // Replacing a published version is refused; drafts may be updated.
        assert!(registry
            .register(manifest("1.0.0", CapabilityStatus::Published))
            .await
            .is_err());

        registry
            .register(manifest("2.0.0", CapabilityStatus::Draft))
            .await
            .unwrap();
        registry
            .register(manifest("2.0.0", CapabilityStatus::Published))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_registry_rejects_invalid_manifest() {
        let registry = InMemoryRegistry::new();
        let mut bad = manifest("1.0.0", CapabilityStatus::Published);
        bad.domain_allowlist = vec!["*.slack.com".to_string()];
        assert!(registry.register(bad).await.is_err());
    }

    #[tokio::test]
    async fn test_routing_status_sink_updates_manifest() {
        let registry = InMemoryRegistry::new();
        registry
            .register(manifest("1.0.0", CapabilityStatus::Published))
            .await
            .unwrap();

        let id = CapabilityId::parse("slack.post_message").unwrap();
        let version = CapabilityVersion::parse("1.0.0").unwrap();

        registry
            .apply_routing_status(&id, &version, RoutingStatus::Hidden)
            .await
            .unwrap();

        let m = registry
            .get_manifest(&id, Some(version))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(m.routing_status, RoutingStatus::Hidden);
    }

    #[tokio::test]
    async fn test_receipt_store_is_write_once() {
        let store = InMemoryReceiptStore::new();
        let receipt = crate::domain::Receipt {
            id: ReceiptId::generate(),
            capability_id: CapabilityId::parse("slack.post_message").unwrap(),
            capability_version: CapabilityVersion::parse("1.0.0").unwrap(),
            tenant_id: TenantId::new(),
            request_id: RequestId::new(),
            idempotency_key: crate::domain::IdempotencyKey::parse("k1").unwrap(),
            input_hash: "ab".repeat(32),
            output_hash: None,
            latency_ms: 10,
            status: crate::domain::ReceiptStatus::Success,
            error_code: None,
            error_detail: None,
            output_annotation: None,
            policy_decision_id: DecisionId::generate(),
            is_synthetic: false,
            timestamp: Utc::now(),
        };

        store.append(receipt.clone()).await.unwrap();
        assert!(store.append(receipt.clone()).await.is_err());
        assert_eq!(store.len().await, 1);

        let found = store.get(&receipt.id).await.unwrap();
        assert_eq!(found.unwrap().id, receipt.id);
    }

    #[tokio::test]
    async fn test_vault_round_trip_and_unknown_ref() {
        let vault = InMemoryVault::new();
        let secret_ref = SecretRef::new("vault://tenants/t1/slack");
        vault.store(secret_ref.clone(), "xoxb-token").await;

        let credential = vault.resolve(&secret_ref).await.unwrap();
        assert_eq!(credential.expose(), "xoxb-token");

        let unknown = SecretRef::new("vault://missing");
        assert!(vault.resolve(&unknown).await.is_err());
    }

    #[tokio::test]
    async fn test_approval_store_token_resolution() {
        let store = InMemoryApprovalStore::new();
        let tenant = TenantId::new();
        let id = CapabilityId::parse("payments.transfer").unwrap();

        store
            .put(
                "tok-1",
                ApprovalRecord {
                    tenant_id: tenant,
                    capability_id: id.clone(),
                    state: ApprovalState::Valid,
                },
            )
            .await;

        assert_eq!(
            store.resolve_token("tok-1", &tenant, &id).await.unwrap(),
            ApprovalState::Valid
        );
        // Unknown tokens and cross-tenant tokens resolve as denied.
        assert_eq!(
            store.resolve_token("tok-2", &tenant, &id).await.unwrap(),
            ApprovalState::Denied
        );
        let other_tenant = TenantId::new();
        assert_eq!(
            store
                .resolve_token("tok-1", &other_tenant, &id)
                .await
                .unwrap(),
            ApprovalState::Denied
        );
    }
}
