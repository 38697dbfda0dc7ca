//! The execute pipeline.
//!
//! One logical task per [`ExecuteRequest`], running the ordered sequence:
//! manifest resolution, liveness guard, tenant guard, policy evaluation,
//! idempotency gate, credential resolution, adapter dispatch, receipt
//! build, idempotency commit, outcome emission, spend recording. No step
//! is skipped or reordered.
//!
//! Failure isolation: the pre-execution steps emit at most a policy
//! decision and no receipt. Once the idempotency gate installs an
//! in-flight marker, a receipt is produced on every path, including
//! adapter panics and caller cancellation; the execution phase runs on a
//! detached task so a disconnecting caller cannot unwind it.

mod emitter;

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::adapters::AdapterDispatcher;
use crate::config::GatewayConfig;
use crate::domain::{
    ApprovalState, CapabilityManifest, CapabilityStatus, DecisionId, ErrorCode, ExecuteRequest,
    ExecuteResult, PolicyDecision, Provider, Receipt, ReceiptId, ReceiptStatus, RoutingStatus,
    RuleHit, TenantId,
};
use crate::infra::{
    ApprovalStore, BeginOutcome, BudgetCounters, CapabilityCache, ConnectionStore, Credential,
    DecisionStore, IdempotencyStore, PolicyStore, ReceiptStore, Vault,
};
use crate::policy;
use crate::redact::hash_redacted;

pub use emitter::{
    EmitterStats, OutcomeEmitter, OutcomeSubscriber, ReceiptPublisherSink, TrustPlaneSink,
};

/// Collaborators the pipeline is wired with.
pub struct PipelineDeps {
    pub cache: Arc<CapabilityCache>,
    pub policy_store: Arc<dyn PolicyStore>,
    pub approvals: Arc<dyn ApprovalStore>,
    pub decisions: Arc<dyn DecisionStore>,
    pub receipts: Arc<dyn ReceiptStore>,
    pub idempotency: Arc<dyn IdempotencyStore>,
    pub connections: Arc<dyn ConnectionStore>,
    pub vault: Arc<dyn Vault>,
    pub dispatcher: Arc<AdapterDispatcher>,
    pub counters: Arc<dyn BudgetCounters>,
    pub emitter: OutcomeEmitter,
    pub config: GatewayConfig,
}

/// The synchronous execution choke-point.
#[derive(Clone)]
pub struct ExecutePipeline {
    cache: Arc<CapabilityCache>,
    policy_store: Arc<dyn PolicyStore>,
    approvals: Arc<dyn ApprovalStore>,
    decisions: Arc<dyn DecisionStore>,
    receipts: Arc<dyn ReceiptStore>,
    idempotency: Arc<dyn IdempotencyStore>,
    connections: Arc<dyn ConnectionStore>,
    vault: Arc<dyn Vault>,
    dispatcher: Arc<AdapterDispatcher>,
    counters: Arc<dyn BudgetCounters>,
    emitter: OutcomeEmitter,
    config: GatewayConfig,
}

impl ExecutePipeline {
    pub fn new(deps: PipelineDeps) -> Self {
        Self {
            cache: deps.cache,
            policy_store: deps.policy_store,
            approvals: deps.approvals,
            decisions: deps.decisions,
            receipts: deps.receipts,
            idempotency: deps.idempotency,
            connections: deps.connections,
            vault: deps.vault,
            dispatcher: deps.dispatcher,
            counters: deps.counters,
            emitter: deps.emitter,
            config: deps.config,
        }
    }

    /// Execute a capability invocation for the authenticated tenant.
    #[instrument(skip(self, request), fields(
        request_id = %request.request_id,
        capability_id = %request.capability_id,
        tenant_id = %request.tenant_id,
    ))]
    pub async fn execute(&self, auth_tenant: TenantId, request: ExecuteRequest) -> ExecuteResult {
        let entry = Instant::now();
        let request_id = request.request_id;

        // Step 1: resolve the manifest through the lookup cache.
        let cached = match self
            .cache
            .get(&request.capability_id, request.capability_version.as_ref())
            .await
        {
            Ok(Some(cached)) => cached,
            Ok(None) => {
                return ExecuteResult::rejected(
                    ErrorCode::CapabilityNotPublished,
                    format!("capability '{}' not found", request.capability_id),
                    request_id,
                );
            }
            Err(e) => {
                // No principal identified yet; no decision is written.
                return ExecuteResult::rejected(e.boundary_code(), e.to_string(), request_id);
            }
        };
        let manifest = cached.manifest;
        let stale_manifest = cached.stale;

        // Step 2: liveness guard. Rejections here are audited as denied
        // decisions so a hidden capability leaves the same trail as a
        // policy deny.
        if manifest.status != CapabilityStatus::Published {
            let decision = policy::liveness_denial(
                &manifest,
                &request,
                RuleHit::CapabilityNotPublished,
                stale_manifest,
            );
            return self.deny(decision).await;
        }
        if manifest.routing_status == RoutingStatus::Hidden {
            let decision = policy::liveness_denial(
                &manifest,
                &request,
                RuleHit::CapabilityHidden,
                stale_manifest,
            );
            return self.deny(decision).await;
        }

        // Step 3: tenant identity guard (confused-deputy defense). Last
        // check before policy evaluation.
        if auth_tenant != request.tenant_id {
            warn!(
                auth_tenant = %auth_tenant,
                body_tenant = %request.tenant_id,
                "Tenant id in request does not match authenticated tenant"
            );
            return ExecuteResult::rejected(
                ErrorCode::Unauthorized,
                "tenant id in request does not match authenticated tenant",
                request_id,
            );
        }

        // Step 4: policy evaluation. Any infrastructure fault on this path
        // fails closed as a POLICY_ENGINE_ERROR denial.
        let bundle = match self
            .policy_store
            .get_bundle(&request.tenant_id, &manifest.id, &manifest.version)
            .await
        {
            Ok(bundle) => bundle,
            Err(e) => {
                warn!(error = %e, "Policy bundle fetch failed; denying fail-closed");
                let decision =
                    policy::engine_error_decision(&manifest, &request, Vec::new(), stale_manifest);
                return self.deny(decision).await;
            }
        };

        let approval = match &request.approval_token {
            None => ApprovalState::NotPresented,
            Some(token) => {
                match self
                    .approvals
                    .resolve_token(token, &request.tenant_id, &manifest.id)
                    .await
                {
                    Ok(state) => state,
                    Err(e) => {
                        warn!(error = %e, "Approval token resolution failed; denying fail-closed");
                        let decision = policy::engine_error_decision(
                            &manifest,
                            &request,
                            bundle.map(|b| b.granted_scopes).unwrap_or_default(),
                            stale_manifest,
                        );
                        return self.deny(decision).await;
                    }
                }
            }
        };

        let budget = match self
            .counters
            .snapshot(&request.tenant_id, &manifest.id, Utc::now())
            .await
        {
            Ok(budget) => budget,
            Err(e) => {
                warn!(error = %e, "Budget counter snapshot failed; denying fail-closed");
                let decision = policy::engine_error_decision(
                    &manifest,
                    &request,
                    bundle.map(|b| b.granted_scopes).unwrap_or_default(),
                    stale_manifest,
                );
                return self.deny(decision).await;
            }
        };

        let decision = policy::evaluate(policy::EvaluationContext {
            bundle: bundle.as_ref(),
            manifest: &manifest,
            request: &request,
            budget,
            approval,
            stale_manifest,
        });
        if !decision.is_allowed() {
            if let Err(e) = self.decisions.append(decision.clone()).await {
                return ExecuteResult::rejected(e.boundary_code(), e.to_string(), request_id);
            }
            info!(rule_hit = ?decision.rule_hit, "Policy denied execution");
            return ExecuteResult::PolicyDenied(decision);
        }
        // An allowed decision is persisted once the idempotency gate
        // confirms a fresh execution: an idempotent hit reuses the original
        // decision and produces no new one.

        // Step 5: idempotency gate. Running without the store would break a
        // core invariant, so its failure rejects outright.
        let deadline = Utc::now() + self.config.in_flight_deadline();
        match self
            .idempotency
            .begin(&request.tenant_id, &request.idempotency_key, deadline)
            .await
        {
            Err(e) => ExecuteResult::rejected(e.boundary_code(), e.to_string(), request_id),
            Ok(BeginOutcome::Completed(stored)) => {
                info!(receipt_id = %stored.id, "Idempotency hit; returning stored receipt");
                ExecuteResult::Receipt(stored.idempotent_view(entry.elapsed().as_millis() as u64))
            }
            Ok(BeginOutcome::Join(mut rx)) => {
                let waited =
                    tokio::time::timeout(self.config.barrier_wait(), rx.wait_for(|r| r.is_some()))
                        .await;
                match waited {
                    Ok(Ok(guard)) => match guard.clone() {
                        Some(stored) => {
                            drop(guard);
                            info!(receipt_id = %stored.id, "Joined in-flight execution; returning its receipt");
                            ExecuteResult::Receipt(
                                stored.idempotent_view(entry.elapsed().as_millis() as u64),
                            )
                        }
                        None => ExecuteResult::rejected(
                            ErrorCode::GatewayError,
                            "in-flight execution resolved without a receipt",
                            request_id,
                        ),
                    },
                    Ok(Err(_closed)) => ExecuteResult::rejected(
                        ErrorCode::GatewayError,
                        "in-flight execution with the same idempotency key was abandoned",
                        request_id,
                    ),
                    Err(_elapsed) => ExecuteResult::rejected(
                        ErrorCode::GatewayError,
                        "timed out waiting for in-flight execution with the same idempotency key",
                        request_id,
                    ),
                }
            }
            Ok(BeginOutcome::Started) => {
                if let Err(e) = self.decisions.append(decision.clone()).await {
                    let _ = self
                        .idempotency
                        .abandon(&request.tenant_id, &request.idempotency_key)
                        .await;
                    return ExecuteResult::rejected(e.boundary_code(), e.to_string(), request_id);
                }
                // Steps 6-11 run on a detached task: once the marker is
                // installed a receipt must be produced even if the caller
                // disconnects.
                let pipeline = self.clone();
                let task_request = request.clone();
                let decision_id = decision.id;
                let handle = tokio::spawn(async move {
                    pipeline
                        .run_execution(manifest, task_request, decision_id)
                        .await
                });
                match handle.await {
                    Ok(result) => result,
                    Err(join_error) => {
                        // The execution task itself crashed before building
                        // a receipt; clear the marker so retries re-execute.
                        warn!(error = %join_error, "Execution task failed; abandoning in-flight marker");
                        let _ = self
                            .idempotency
                            .abandon(&request.tenant_id, &request.idempotency_key)
                            .await;
                        ExecuteResult::rejected(
                            ErrorCode::GatewayError,
                            "execution task failed",
                            request_id,
                        )
                    }
                }
            }
        }
    }

    /// Persist and return a denial decision.
    async fn deny(&self, decision: PolicyDecision) -> ExecuteResult {
        let request_id = decision.request_id;
        if let Err(e) = self.decisions.append(decision.clone()).await {
            return ExecuteResult::rejected(e.boundary_code(), e.to_string(), request_id);
        }
        info!(rule_hit = ?decision.rule_hit, "Execution denied");
        ExecuteResult::PolicyDenied(decision)
    }

    /// Steps 6-11: the execution phase. Always produces a receipt.
    async fn run_execution(
        &self,
        manifest: CapabilityManifest,
        request: ExecuteRequest,
        decision_id: DecisionId,
    ) -> ExecuteResult {
        // Step 6: resolve the credential. The raw value stays inside this
        // call frame and the dispatch below; it is never logged, hashed,
        // or persisted.
        let call_started = Instant::now();
        let dispatched = match self
            .resolve_credential(&request.tenant_id, &manifest.provider)
            .await
        {
            // Step 7: adapter dispatch under the hard deadline.
            Ok(credential) => {
                self.dispatcher
                    .dispatch(&manifest, &request.params, credential)
                    .await
            }
            Err(e) => {
                warn!(error = %e, provider = %manifest.provider, "Credential resolution failed");
                Err(crate::adapters::AdapterFailure::new(
                    ErrorCode::GatewayError,
                    "credential resolution failed",
                ))
            }
        };
        let latency_ms = call_started.elapsed().as_millis() as u64;

        // Step 8: build and write the receipt.
        let input_hash = hash_redacted(&request.params);
        let receipt = match dispatched {
            Ok(output) => Receipt {
                id: ReceiptId::generate(),
                capability_id: manifest.id.clone(),
                capability_version: manifest.version.clone(),
                tenant_id: request.tenant_id,
                request_id: request.request_id,
                idempotency_key: request.idempotency_key.clone(),
                input_hash,
                output_hash: Some(hash_redacted(&output.output)),
                latency_ms,
                status: ReceiptStatus::Success,
                error_code: None,
                error_detail: None,
                output_annotation: output.annotation,
                policy_decision_id: decision_id,
                is_synthetic: request.is_synthetic,
                timestamp: Utc::now(),
            },
            Err(failure) => Receipt {
                id: ReceiptId::generate(),
                capability_id: manifest.id.clone(),
                capability_version: manifest.version.clone(),
                tenant_id: request.tenant_id,
                request_id: request.request_id,
                idempotency_key: request.idempotency_key.clone(),
                input_hash,
                output_hash: None,
                latency_ms,
                status: ReceiptStatus::Failure,
                error_code: Some(failure.code),
                error_detail: Some(failure.detail),
                output_annotation: None,
                policy_decision_id: decision_id,
                is_synthetic: request.is_synthetic,
                timestamp: Utc::now(),
            },
        };

        if let Err(e) = self.receipts.append(receipt.clone()).await {
            // Without a stored receipt there is no observable execution to
            // coalesce onto; clear the marker so retries re-execute.
            warn!(error = %e, "Receipt write failed; abandoning in-flight marker");
            let _ = self
                .idempotency
                .abandon(&request.tenant_id, &request.idempotency_key)
                .await;
            return ExecuteResult::rejected(e.boundary_code(), e.to_string(), request.request_id);
        }

        // Step 9: commit idempotency. Failures get TTL zero so retries may
        // re-execute; successes are served from the cache for 24h.
        let ttl_seconds = if receipt.status == ReceiptStatus::Success {
            self.config.idempotency_ttl_success_s
        } else {
            self.config.idempotency_ttl_failure_s
        };
        if let Err(e) = self
            .idempotency
            .commit(
                &request.tenant_id,
                &request.idempotency_key,
                receipt.clone(),
                ttl_seconds,
            )
            .await
        {
            // The receipt stands either way.
            warn!(error = %e, "Idempotency commit failed");
        }

        // Step 10: hand off the outcome; never awaited, never fatal.
        self.emitter.emit(receipt.clone());

        // Step 11: record spend. Synthetic probes are never billed.
        if receipt.status == ReceiptStatus::Success && !request.is_synthetic {
            if let Err(e) = self
                .counters
                .record_success(
                    &request.tenant_id,
                    &manifest.id,
                    self.config.cost_per_call_cents,
                    Utc::now(),
                )
                .await
            {
                warn!(error = %e, "Spend recording failed");
            }
        }

        info!(
            receipt_id = %receipt.id,
            status = %receipt.status,
            latency_ms = receipt.latency_ms,
            "Capability executed"
        );
        ExecuteResult::Receipt(receipt)
    }

    async fn resolve_credential(
        &self,
        tenant_id: &TenantId,
        provider: &Provider,
    ) -> crate::infra::Result<Option<Credential>> {
        match self.connections.secret_ref(tenant_id, provider).await? {
            // No connection row: providers that need no credential (the
            // stub, public APIs) proceed without one.
            None => Ok(None),
            Some(secret_ref) => Ok(Some(self.vault.resolve(&secret_ref).await?)),
        }
    }
}
