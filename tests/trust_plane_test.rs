//! End-to-end tests for the trust plane: scoring, routing advice, and the
//! hide/recovery cycle observed through the execute pipeline.

mod common;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;

use common::*;
use moat_gateway::domain::{
    CapabilityId, CapabilityVersion, ErrorCode, OutcomeEvent, ReceiptId, RoutingStatus, RuleHit,
};
use moat_gateway::infra::{CapabilityRegistry, OutcomeEventStore, StatsStore};
use moat_gateway::{GatewayConfig, RoutingAdvisor, TrustScorer};

fn outcome(
    success: bool,
    taxonomy: Option<ErrorCode>,
    latency_ms: u64,
    at: DateTime<Utc>,
    synthetic: bool,
) -> OutcomeEvent {
    OutcomeEvent {
        receipt_id: ReceiptId::generate(),
        capability_id: cap_id(),
        capability_version: cap_version(),
        success,
        latency_ms,
        error_taxonomy: taxonomy,
        timestamp: at,
        is_synthetic: synthetic,
    }
}

async fn seed_events(
    store: &dyn OutcomeEventStore,
    count: usize,
    taxonomy: Option<ErrorCode>,
    at: DateTime<Utc>,
) {
    for _ in 0..count {
        store
            .append(outcome(taxonomy.is_none(), taxonomy, 100, at, false))
            .await
            .unwrap();
    }
}

struct TrustPlane {
    scorer: Arc<TrustScorer>,
    advisor: Arc<RoutingAdvisor>,
}

fn trust_plane(harness: &Harness) -> TrustPlane {
    let config = GatewayConfig::default();
    let scorer = Arc::new(TrustScorer::new(
        harness.outcome_events.clone(),
        harness.stats.clone(),
        config.clone(),
    ));
    let advisor = Arc::new(RoutingAdvisor::new(
        harness.registry.clone(),
        harness.registry.clone(),
        Some(harness.cache.clone()),
        config,
    ));
    TrustPlane { scorer, advisor }
}

async fn run_batch(plane: &TrustPlane, now: DateTime<Utc>) {
    let snapshots = plane.scorer.recompute_at(now).await.unwrap();
    plane.advisor.apply_batch(&snapshots, now).await;
}

async fn routing_status(harness: &Harness) -> RoutingStatus {
    harness
        .registry
        .get_manifest(&cap_id(), Some(cap_version()))
        .await
        .unwrap()
        .unwrap()
        .routing_status
}

// ============================================================================
// Scenario: trust hide and recovery
// ============================================================================

#[tokio::test]
async fn test_hide_then_recover_cycle() {
    let (harness, _) = Harness::new(AdapterBehavior::Succeed(json!({"ok": true}))).await;
    harness.register_manifest().await;
    harness.grant_bundle(None).await;
    let plane = trust_plane(&harness);

    // 85 timeouts (weight 0) and 15 successes: weighted rate 0.15.
    let t0 = Utc::now();
    seed_events(harness.outcome_events.as_ref(), 85, Some(ErrorCode::Timeout), t0 - chrono::Duration::hours(1)).await;
    seed_events(harness.outcome_events.as_ref(), 15, None, t0 - chrono::Duration::hours(1)).await;

    // First batch observes the low rate but the sustain window has not
    // elapsed: still active.
    run_batch(&plane, t0).await;
    assert_eq!(routing_status(&harness).await, RoutingStatus::Active);

    let stats = harness
        .stats
        .fetch_stats(&cap_id(), &cap_version())
        .await
        .unwrap()
        .unwrap();
    let rate = stats.weighted_success_rate_7d.unwrap();
    assert!((rate - 0.15).abs() < 1e-9);

    // 24 hours later the low rate has been sustained: hidden.
    let t1 = t0 + chrono::Duration::hours(24);
    run_batch(&plane, t1).await;
    assert_eq!(routing_status(&harness).await, RoutingStatus::Hidden);

    // The pipeline's liveness guard now denies execution.
    let result = harness
        .pipeline
        .execute(harness.tenant, harness.request("k-hidden"))
        .await;
    let decision = result.as_policy_denied().expect("expected denial");
    assert_eq!(decision.rule_hit, RuleHit::CapabilityHidden);

    // Health returns: a large batch of successes plus a passing synthetic
    // probe. The first healthy batch is not yet sustained, so it stays
    // hidden.
    let t2 = t1 + chrono::Duration::hours(1);
    seed_events(harness.outcome_events.as_ref(), 400, None, t2 - chrono::Duration::minutes(30)).await;
    harness
        .outcome_events
        .append(outcome(true, None, 100, t2 - chrono::Duration::minutes(10), true))
        .await
        .unwrap();
    run_batch(&plane, t2).await;
    assert_eq!(routing_status(&harness).await, RoutingStatus::Hidden);

    // After 24 sustained healthy hours with the synthetic probe passing,
    // the capability returns to active.
    let t3 = t2 + chrono::Duration::hours(24);
    run_batch(&plane, t3).await;
    assert_eq!(routing_status(&harness).await, RoutingStatus::Active);

    // Execution is admitted again.
    let result = harness
        .pipeline
        .execute(harness.tenant, harness.request("k-recovered"))
        .await;
    assert!(result.as_receipt().is_some());

    // The full cycle is on the audit trail.
    let transitions = plane.advisor.transitions().await;
    let summary: Vec<(RoutingStatus, RoutingStatus)> =
        transitions.iter().map(|t| (t.from, t.to)).collect();
    assert!(summary.contains(&(RoutingStatus::Active, RoutingStatus::Hidden)));
    assert!(summary.contains(&(RoutingStatus::Hidden, RoutingStatus::Active)));
}

// ============================================================================
// Scoring properties observed end to end
// ============================================================================

#[tokio::test]
async fn test_pipeline_outcomes_flow_into_stats() {
    let (harness, _) = Harness::new(AdapterBehavior::Succeed(json!({"ok": true}))).await;
    harness.register_manifest().await;
    harness.grant_bundle(None).await;
    let plane = trust_plane(&harness);

    for i in 0..12 {
        let result = harness
            .pipeline
            .execute(harness.tenant, harness.request(&format!("k{i}")))
            .await;
        assert!(result.as_receipt().is_some());
    }
    harness.wait_for_outcome_events(12).await;

    let now = Utc::now();
    let snapshots = plane.scorer.recompute_at(now).await.unwrap();
    assert_eq!(snapshots.len(), 1);

    let stats = &snapshots[0];
    assert_eq!(stats.total_calls_7d, 12);
    assert_eq!(stats.weighted_success_rate_7d, Some(1.0));
    assert!(stats.p95_latency_ms >= stats.p50_latency_ms);
}

#[tokio::test]
async fn test_gateway_faults_do_not_affect_score() {
    let (harness, _) = Harness::new(AdapterBehavior::Succeed(json!({"ok": true}))).await;
    harness.register_manifest().await;
    let plane = trust_plane(&harness);

    let at = Utc::now() - chrono::Duration::hours(1);
    seed_events(harness.outcome_events.as_ref(), 15, None, at).await;
    seed_events(harness.outcome_events.as_ref(), 60, Some(ErrorCode::GatewayError), at).await;

    let snapshots = plane.scorer.recompute_at(Utc::now()).await.unwrap();
    let stats = &snapshots[0];
    assert_eq!(stats.weighted_success_rate_7d, Some(1.0));
    assert_eq!(stats.total_calls_7d, 15);
}

#[tokio::test]
async fn test_low_volume_capability_stays_active() {
    let (harness, _) = Harness::new(AdapterBehavior::Succeed(json!({"ok": true}))).await;
    harness.register_manifest().await;
    let plane = trust_plane(&harness);

    // Nine abysmal outcomes: below minimum volume, no verdict.
    let at = Utc::now() - chrono::Duration::hours(1);
    seed_events(harness.outcome_events.as_ref(), 9, Some(ErrorCode::Timeout), at).await;

    let t0 = Utc::now();
    run_batch(&plane, t0).await;
    let t1 = t0 + chrono::Duration::hours(25);
    run_batch(&plane, t1).await;

    assert_eq!(routing_status(&harness).await, RoutingStatus::Active);
}

#[tokio::test]
async fn test_throttle_on_high_tail_latency() {
    let (harness, _) = Harness::new(AdapterBehavior::Succeed(json!({"ok": true}))).await;
    harness.register_manifest().await;
    let plane = trust_plane(&harness);

    let at = Utc::now() - chrono::Duration::hours(1);
    for _ in 0..20 {
        harness
            .outcome_events
            .append(outcome(true, None, 15_000, at, false))
            .await
            .unwrap();
    }

    run_batch(&plane, Utc::now()).await;
    assert_eq!(routing_status(&harness).await, RoutingStatus::Throttled);
}

#[tokio::test]
async fn test_verified_healthy_capability_preferred() {
    let (harness, _) = Harness::new(AdapterBehavior::Succeed(json!({"ok": true}))).await;
    let mut m = manifest();
    m.verified = true;
    harness.registry.register(m).await.unwrap();
    let plane = trust_plane(&harness);

    let at = Utc::now() - chrono::Duration::hours(1);
    for _ in 0..50 {
        harness
            .outcome_events
            .append(outcome(true, None, 800, at, false))
            .await
            .unwrap();
    }

    run_batch(&plane, Utc::now()).await;
    assert_eq!(routing_status(&harness).await, RoutingStatus::Preferred);
}

#[tokio::test]
async fn test_scorer_batch_is_idempotent() {
    let (harness, _) = Harness::new(AdapterBehavior::Succeed(json!({"ok": true}))).await;
    harness.register_manifest().await;
    let plane = trust_plane(&harness);

    let at = Utc::now() - chrono::Duration::hours(1);
    seed_events(harness.outcome_events.as_ref(), 30, None, at).await;
    seed_events(harness.outcome_events.as_ref(), 10, Some(ErrorCode::ProviderRateLimited), at).await;

    let now = Utc::now();
    let first = plane.scorer.recompute_at(now).await.unwrap();
    let second = plane.scorer.recompute_at(now).await.unwrap();
    assert_eq!(first, second);

    // 30 * 1.0 + 10 * 0.5 over 40 events.
    let rate = first[0].weighted_success_rate_7d.unwrap();
    assert!((rate - 0.875).abs() < 1e-9);
}

#[tokio::test]
async fn test_stats_keyed_by_capability_version() {
    let (harness, _) = Harness::new(AdapterBehavior::Succeed(json!({"ok": true}))).await;
    harness.register_manifest().await;
    let plane = trust_plane(&harness);

    let at = Utc::now() - chrono::Duration::hours(1);
    seed_events(harness.outcome_events.as_ref(), 12, None, at).await;

    let other_version = OutcomeEvent {
        capability_version: CapabilityVersion::parse("2.0.0").unwrap(),
        ..outcome(true, None, 100, at, false)
    };
    harness.outcome_events.append(other_version).await.unwrap();

    let snapshots = plane.scorer.recompute_at(Utc::now()).await.unwrap();
    assert_eq!(snapshots.len(), 2);

    let v1 = harness
        .stats
        .fetch_stats(&cap_id(), &cap_version())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(v1.total_calls_7d, 12);

    let v2 = harness
        .stats
        .fetch_stats(&cap_id(), &CapabilityVersion::parse("2.0.0").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(v2.total_calls_7d, 1);
}

#[tokio::test]
async fn test_unused_capability_id_type_checks() {
    // Guard against accidental id/version transposition in fixtures.
    let id: CapabilityId = cap_id();
    assert_eq!(id.as_str(), "slack.post_message");
}
