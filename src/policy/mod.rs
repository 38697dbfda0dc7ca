//! Policy evaluation engine.
//!
//! [`evaluate`] is the single entry point. It is pure and deterministic:
//! same bundle, manifest, request, budget snapshot, and approval state
//! always produce the same decision. Rules are checked in priority order
//! and the first failure short-circuits.
//!
//! Default-deny: with no bundle configured the engine denies with
//! `NO_POLICY_BUNDLE`, so new capabilities start inaccessible until
//! explicitly unlocked. The engine itself never faults; infrastructure
//! failures around it (bundle fetch, counter snapshot) are converted by
//! the pipeline into a fail-closed `POLICY_ENGINE_ERROR` denial via
//! [`engine_error_decision`].

use std::time::Instant;

use chrono::Utc;

use crate::domain::{
    ApprovalState, BudgetSnapshot, CapabilityManifest, Decision, ExecuteRequest, PolicyBundle,
    PolicyDecision, RuleHit, Scope,
};

/// Everything one evaluation examines.
pub struct EvaluationContext<'a> {
    /// `None` triggers default-deny
    pub bundle: Option<&'a PolicyBundle>,
    pub manifest: &'a CapabilityManifest,
    pub request: &'a ExecuteRequest,
    /// Counter values at evaluation time
    pub budget: BudgetSnapshot,
    /// Resolved state of the request's approval token
    pub approval: ApprovalState,
    /// Whether the manifest was served stale by the lookup cache
    pub stale_manifest: bool,
}

/// Evaluate whether a request is permitted under the given policy bundle.
pub fn evaluate(ctx: EvaluationContext<'_>) -> PolicyDecision {
    let started = Instant::now();
    let mut warnings = Vec::new();

    let rule_hit = run_rules(&ctx, &mut warnings);
    let decision = match rule_hit {
        RuleHit::PolicyAllowed => Decision::Allowed,
        _ => Decision::Denied,
    };

    build_decision(&ctx, decision, rule_hit, warnings, started)
}

/// Returns the first failing rule, or `PolicyAllowed`.
fn run_rules(ctx: &EvaluationContext<'_>, warnings: &mut Vec<String>) -> RuleHit {
    // Rule 1: a bundle must exist.
    let Some(bundle) = ctx.bundle else {
        return RuleHit::NoPolicyBundle;
    };

    let required = &ctx.manifest.scopes;

    // Rule 2: every required scope must be granted.
    if let Some(missing) = required
        .iter()
        .find(|scope| !bundle.granted_scopes.contains(scope))
    {
        tracing::debug!(scope = %missing, "Required scope not granted");
        return RuleHit::ScopeNotGranted;
    }

    // Rule 3: no required scope may be explicitly denied.
    if required
        .iter()
        .any(|scope| bundle.denied_scopes.contains(scope))
    {
        return RuleHit::ScopeExplicitlyDenied;
    }

    // Rules 4-7: budget ceilings. Nullable limit means unlimited (rule
    // skipped); hard_limit=false downgrades a deny to a warning.
    let budget_rules: [(Option<u64>, u64, RuleHit, &str); 4] = [
        (
            bundle.daily_calls_limit,
            ctx.budget.daily_calls_used,
            RuleHit::BudgetDailyCallsExceeded,
            "daily_calls",
        ),
        (
            bundle.monthly_calls_limit,
            ctx.budget.monthly_calls_used,
            RuleHit::BudgetMonthlyCallsExceeded,
            "monthly_calls",
        ),
        (
            bundle.daily_cost_cents_limit,
            ctx.budget.daily_cost_cents_used,
            RuleHit::BudgetDailyCostExceeded,
            "daily_cost",
        ),
        (
            bundle.monthly_cost_cents_limit,
            ctx.budget.monthly_cost_cents_used,
            RuleHit::BudgetMonthlyCostExceeded,
            "monthly_cost",
        ),
    ];
    for (limit, used, rule, name) in budget_rules {
        if let Some(limit) = limit {
            if used >= limit {
                if bundle.hard_limit {
                    return rule;
                }
                warnings.push(format!("{name} limit exceeded: used={used} limit={limit}"));
            }
        }
    }

    // Rule 8: the manifest must carry a non-empty domain allowlist.
    if ctx.manifest.domain_allowlist.is_empty() {
        return RuleHit::DomainNotAllowlisted;
    }

    // Rule 9: high-risk capabilities need a valid approval token.
    if bundle
        .approval_required_risk_classes
        .contains(&ctx.manifest.risk_class)
    {
        match ctx.approval {
            ApprovalState::Valid => {}
            ApprovalState::NotPresented => return RuleHit::ApprovalRequired,
            ApprovalState::Pending => return RuleHit::ApprovalPending,
            ApprovalState::Denied => return RuleHit::ApprovalDenied,
            ApprovalState::Expired => return RuleHit::ApprovalExpired,
        }
    }

    RuleHit::PolicyAllowed
}

fn build_decision(
    ctx: &EvaluationContext<'_>,
    decision: Decision,
    rule_hit: RuleHit,
    warnings: Vec<String>,
    started: Instant,
) -> PolicyDecision {
    PolicyDecision {
        id: crate::domain::DecisionId::generate(),
        decision,
        rule_hit,
        evaluation_ms: started.elapsed().as_secs_f64() * 1_000.0,
        tenant_id: ctx.request.tenant_id,
        capability_id: ctx.manifest.id.clone(),
        capability_version: ctx.manifest.version.clone(),
        requested_scopes: ctx.manifest.scopes.clone(),
        granted_scopes: ctx
            .bundle
            .map(|b| b.granted_scopes.clone())
            .unwrap_or_default(),
        budget_state: ctx.budget,
        request_id: ctx.request.request_id,
        warnings,
        stale_manifest: ctx.stale_manifest,
        timestamp: Utc::now(),
    }
}

/// Fail-closed denial for infrastructure faults during evaluation
/// (counter store unreachable, bundle fetch failed). Treated by the
/// pipeline identically to an engine deny.
pub fn engine_error_decision(
    manifest: &CapabilityManifest,
    request: &ExecuteRequest,
    granted_scopes: Vec<Scope>,
    stale_manifest: bool,
) -> PolicyDecision {
    PolicyDecision {
        id: crate::domain::DecisionId::generate(),
        decision: Decision::Denied,
        rule_hit: RuleHit::PolicyEngineError,
        evaluation_ms: 0.0,
        tenant_id: request.tenant_id,
        capability_id: manifest.id.clone(),
        capability_version: manifest.version.clone(),
        requested_scopes: manifest.scopes.clone(),
        granted_scopes,
        budget_state: BudgetSnapshot::default(),
        request_id: request.request_id,
        warnings: Vec::new(),
        stale_manifest,
        timestamp: Utc::now(),
    }
}

/// Denial recorded by the pipeline's liveness guard before evaluation
/// (capability not published, or hidden by the routing advisor).
pub fn liveness_denial(
    manifest: &CapabilityManifest,
    request: &ExecuteRequest,
    rule_hit: RuleHit,
    stale_manifest: bool,
) -> PolicyDecision {
    PolicyDecision {
        id: crate::domain::DecisionId::generate(),
        decision: Decision::Denied,
        rule_hit,
        evaluation_ms: 0.0,
        tenant_id: request.tenant_id,
        capability_id: manifest.id.clone(),
        capability_version: manifest.version.clone(),
        requested_scopes: manifest.scopes.clone(),
        granted_scopes: Vec::new(),
        budget_state: BudgetSnapshot::default(),
        request_id: request.request_id,
        warnings: Vec::new(),
        stale_manifest,
        timestamp: Utc::now(),
    }
}
