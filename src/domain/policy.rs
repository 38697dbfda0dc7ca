//! Policy records: bundles, budget snapshots, and decisions.
//!
//! A [`PolicyDecision`] is the immutable audit record of one evaluation.
//! It is written before any side effect other than itself and never
//! mutated afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{
    CapabilityId, CapabilityVersion, DecisionId, ErrorCode, RequestId, RiskClass, Scope, TenantId,
};

/// Effective `(tenant, capability)` policy: granted scopes, budget caps,
/// allowlists, approval rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyBundle {
    pub tenant_id: TenantId,
    pub capability_id: CapabilityId,
    pub capability_version: CapabilityVersion,
    pub granted_scopes: Vec<Scope>,
    pub denied_scopes: Vec<Scope>,
    /// `None` means unlimited
    pub daily_calls_limit: Option<u64>,
    pub monthly_calls_limit: Option<u64>,
    pub daily_cost_cents_limit: Option<u64>,
    pub monthly_cost_cents_limit: Option<u64>,
    /// When false, budget overruns warn instead of denying
    pub hard_limit: bool,
    /// Mirrored from the manifest; not tenant-overridable
    pub domain_allowlist: Vec<String>,
    pub approval_required_risk_classes: Vec<RiskClass>,
}

impl PolicyBundle {
    /// A permissive bundle granting the given scopes with no budget caps.
    pub fn permissive(
        tenant_id: TenantId,
        capability_id: CapabilityId,
        capability_version: CapabilityVersion,
        granted_scopes: Vec<Scope>,
        domain_allowlist: Vec<String>,
    ) -> Self {
        Self {
            tenant_id,
            capability_id,
            capability_version,
            granted_scopes,
            denied_scopes: Vec::new(),
            daily_calls_limit: None,
            monthly_calls_limit: None,
            daily_cost_cents_limit: None,
            monthly_cost_cents_limit: None,
            hard_limit: true,
            domain_allowlist,
            approval_required_risk_classes: Vec::new(),
        }
    }
}

/// Budget counter values at evaluation time, before any increment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub daily_calls_used: u64,
    pub monthly_calls_used: u64,
    pub daily_cost_cents_used: u64,
    pub monthly_cost_cents_used: u64,
}

/// Resolved state of an approval token at evaluation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    /// No token was presented
    NotPresented,
    Valid,
    Pending,
    Denied,
    Expired,
}

/// Outcome of a policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allowed,
    Denied,
}

/// The rule that decided an evaluation: either the first failing rule in
/// priority order, or `PolicyAllowed` when every check passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleHit {
    NoPolicyBundle,
    ScopeNotGranted,
    ScopeExplicitlyDenied,
    BudgetDailyCallsExceeded,
    BudgetMonthlyCallsExceeded,
    BudgetDailyCostExceeded,
    BudgetMonthlyCostExceeded,
    DomainNotAllowlisted,
    ApprovalRequired,
    ApprovalPending,
    ApprovalDenied,
    ApprovalExpired,
    CapabilityNotPublished,
    CapabilityHidden,
    PolicyAllowed,
    PolicyEngineError,
}

impl RuleHit {
    /// The boundary error code corresponding to this rule hit.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            RuleHit::NoPolicyBundle => ErrorCode::NoPolicyBundle,
            RuleHit::ScopeNotGranted => ErrorCode::ScopeNotGranted,
            RuleHit::ScopeExplicitlyDenied => ErrorCode::ScopeExplicitlyDenied,
            RuleHit::BudgetDailyCallsExceeded => ErrorCode::BudgetDailyCallsExceeded,
            RuleHit::BudgetMonthlyCallsExceeded => ErrorCode::BudgetMonthlyCallsExceeded,
            RuleHit::BudgetDailyCostExceeded => ErrorCode::BudgetDailyCostExceeded,
            RuleHit::BudgetMonthlyCostExceeded => ErrorCode::BudgetMonthlyCostExceeded,
            RuleHit::DomainNotAllowlisted => ErrorCode::DomainNotAllowlisted,
            RuleHit::ApprovalRequired => ErrorCode::ApprovalRequired,
            RuleHit::ApprovalPending => ErrorCode::ApprovalPending,
            RuleHit::ApprovalDenied => ErrorCode::ApprovalDenied,
            RuleHit::ApprovalExpired => ErrorCode::ApprovalExpired,
            RuleHit::CapabilityNotPublished => ErrorCode::CapabilityNotPublished,
            RuleHit::CapabilityHidden => ErrorCode::CapabilityHidden,
            // Allowed decisions never surface as errors; map defensively.
            RuleHit::PolicyAllowed => ErrorCode::GatewayError,
            RuleHit::PolicyEngineError => ErrorCode::PolicyEngineError,
        }
    }
}

/// Immutable audit record of one policy evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    /// Time-ordered id (UUID v7)
    pub id: DecisionId,
    pub decision: Decision,
    pub rule_hit: RuleHit,
    pub evaluation_ms: f64,
    pub tenant_id: TenantId,
    pub capability_id: CapabilityId,
    pub capability_version: CapabilityVersion,
    /// Scopes the manifest required for this invocation
    pub requested_scopes: Vec<Scope>,
    /// Scopes the bundle granted, snapshotted at evaluation time
    pub granted_scopes: Vec<Scope>,
    /// Counter values at evaluation time, not after increment
    pub budget_state: BudgetSnapshot,
    pub request_id: RequestId,
    /// Soft-limit overruns when `hard_limit=false`
    pub warnings: Vec<String>,
    /// True when the manifest was served stale (registry unreachable)
    pub stale_manifest: bool,
    pub timestamp: DateTime<Utc>,
}

impl PolicyDecision {
    pub fn is_allowed(&self) -> bool {
        self.decision == Decision::Allowed
    }
}
