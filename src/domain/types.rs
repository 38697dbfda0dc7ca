//! Core identifier and enumeration types for the gateway.
//!
//! All identifiers are newtypes so that a tenant id can never be passed
//! where a capability id is expected. Records built from these types are
//! frozen after construction; equality is structural.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Capability ids follow `provider.action`, lowercase.
static CAPABILITY_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9_]+\.[a-z0-9_]+$").expect("valid capability id regex"));

/// Strict semver: `MAJOR.MINOR.PATCH` with optional pre-release tag.
static SEMVER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(0|[1-9]\d*)\.(0|[1-9]\d*)\.(0|[1-9]\d*)(?:-[0-9A-Za-z-]+(?:\.[0-9A-Za-z-]+)*)?$",
    )
    .expect("valid semver regex")
});

/// Maximum accepted idempotency key length in bytes.
pub const MAX_IDEMPOTENCY_KEY_BYTES: usize = 256;

/// Validation failures for domain values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Capability id does not match the `provider.action` grammar
    #[error("invalid capability id: {0:?}")]
    InvalidCapabilityId(String),

    /// Version string is not strict semver
    #[error("invalid capability version: {0:?}")]
    InvalidCapabilityVersion(String),

    /// Idempotency key is empty or too long
    #[error("invalid idempotency key: {0}")]
    InvalidIdempotencyKey(String),

    /// Manifest field constraint violated
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),
}

// ============================================================================
// Identifiers
// ============================================================================

/// Tenant identifier (organization/account level)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub Uuid);

impl TenantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlation id carried by an [`crate::domain::ExecuteRequest`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Time-ordered receipt identifier (UUID v7)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceiptId(pub Uuid);

impl ReceiptId {
    /// Mint a fresh, time-ordered id.
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ReceiptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Time-ordered policy decision identifier (UUID v7)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DecisionId(pub Uuid);

impl DecisionId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for DecisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Capability identifier, `provider.action` (e.g. `slack.post_message`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityId(String);

impl CapabilityId {
    /// Parse and validate a capability id.
    pub fn parse(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        if CAPABILITY_ID_RE.is_match(&id) {
            Ok(Self(id))
        } else {
            Err(DomainError::InvalidCapabilityId(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Strict semver capability version
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityVersion(String);

impl CapabilityVersion {
    pub fn parse(version: impl Into<String>) -> Result<Self, DomainError> {
        let version = version.into();
        if SEMVER_RE.is_match(&version) {
            Ok(Self(version))
        } else {
            Err(DomainError::InvalidCapabilityVersion(version))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CapabilityVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-supplied idempotency key, unique per tenant, at most 256 bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn parse(key: impl Into<String>) -> Result<Self, DomainError> {
        let key = key.into();
        if key.is_empty() {
            return Err(DomainError::InvalidIdempotencyKey("empty key".to_string()));
        }
        if key.len() > MAX_IDEMPOTENCY_KEY_BYTES {
            return Err(DomainError::InvalidIdempotencyKey(format!(
                "key is {} bytes, limit is {}",
                key.len(),
                MAX_IDEMPOTENCY_KEY_BYTES
            )));
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Provider name a capability executes against (e.g. `slack`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Provider(pub String);

impl Provider {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Provider {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// OAuth-style permission scope (e.g. `slack.post_message`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scope(pub String);

impl Scope {
    pub fn new(scope: impl Into<String>) -> Self {
        Self(scope.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Scope {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Opaque reference into the credential vault; never a raw credential
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretRef(pub String);

impl SecretRef {
    pub fn new(secret_ref: impl Into<String>) -> Self {
        Self(secret_ref.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Enumerations
// ============================================================================

/// Ordered severity tiers for capability risk classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskClass {
    Low,
    Medium,
    High,
    Critical,
}

/// Lifecycle state of a capability manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityStatus {
    Draft,
    Published,
    Deprecated,
    Archived,
}

impl fmt::Display for CapabilityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CapabilityStatus::Draft => "draft",
            CapabilityStatus::Published => "published",
            CapabilityStatus::Deprecated => "deprecated",
            CapabilityStatus::Archived => "archived",
        };
        write!(f, "{s}")
    }
}

/// Trust-derived routing state, gates visibility and executability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingStatus {
    Active,
    Preferred,
    Throttled,
    Hidden,
}

impl fmt::Display for RoutingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RoutingStatus::Active => "active",
            RoutingStatus::Preferred => "preferred",
            RoutingStatus::Throttled => "throttled",
            RoutingStatus::Hidden => "hidden",
        };
        write!(f, "{s}")
    }
}

/// Terminal status of one observable execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Success,
    Failure,
    IdempotentHit,
}

impl fmt::Display for ReceiptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReceiptStatus::Success => "success",
            ReceiptStatus::Failure => "failure",
            ReceiptStatus::IdempotentHit => "idempotent_hit",
        };
        write!(f, "{s}")
    }
}

/// Closed error taxonomy exposed at the gateway boundary.
///
/// These codes are stable; clients discriminate on them programmatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Policy rule hits
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
    PolicyEngineError,

    // Liveness / identity
    CapabilityNotPublished,
    CapabilityHidden,
    Unauthorized,

    // Input validation
    ParamsSchemaViolation,

    // Provider-side failures
    ProviderInvalidInput,
    ProviderAuthFailure,
    ProviderNotFound,
    ProviderRateLimited,
    ProviderServerError,

    // Transport / core faults
    Timeout,
    NetworkError,
    GatewayError,
}

impl ErrorCode {
    /// Map a provider HTTP status onto the taxonomy.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            401 | 403 => ErrorCode::ProviderAuthFailure,
            404 => ErrorCode::ProviderNotFound,
            429 => ErrorCode::ProviderRateLimited,
            400..=499 => ErrorCode::ProviderInvalidInput,
            500..=599 => ErrorCode::ProviderServerError,
            _ => ErrorCode::NetworkError,
        }
    }

    /// Whether a caller retry can plausibly succeed without operator action.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::ProviderRateLimited
                | ErrorCode::ProviderServerError
                | ErrorCode::Timeout
                | ErrorCode::NetworkError
                | ErrorCode::GatewayError
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::NoPolicyBundle => "NO_POLICY_BUNDLE",
            ErrorCode::ScopeNotGranted => "SCOPE_NOT_GRANTED",
            ErrorCode::ScopeExplicitlyDenied => "SCOPE_EXPLICITLY_DENIED",
            ErrorCode::BudgetDailyCallsExceeded => "BUDGET_DAILY_CALLS_EXCEEDED",
            ErrorCode::BudgetMonthlyCallsExceeded => "BUDGET_MONTHLY_CALLS_EXCEEDED",
            ErrorCode::BudgetDailyCostExceeded => "BUDGET_DAILY_COST_EXCEEDED",
            ErrorCode::BudgetMonthlyCostExceeded => "BUDGET_MONTHLY_COST_EXCEEDED",
            ErrorCode::DomainNotAllowlisted => "DOMAIN_NOT_ALLOWLISTED",
            ErrorCode::ApprovalRequired => "APPROVAL_REQUIRED",
            ErrorCode::ApprovalPending => "APPROVAL_PENDING",
            ErrorCode::ApprovalDenied => "APPROVAL_DENIED",
            ErrorCode::ApprovalExpired => "APPROVAL_EXPIRED",
            ErrorCode::PolicyEngineError => "POLICY_ENGINE_ERROR",
            ErrorCode::CapabilityNotPublished => "CAPABILITY_NOT_PUBLISHED",
            ErrorCode::CapabilityHidden => "CAPABILITY_HIDDEN",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::ParamsSchemaViolation => "PARAMS_SCHEMA_VIOLATION",
            ErrorCode::ProviderInvalidInput => "PROVIDER_INVALID_INPUT",
            ErrorCode::ProviderAuthFailure => "PROVIDER_AUTH_FAILURE",
            ErrorCode::ProviderNotFound => "PROVIDER_NOT_FOUND",
            ErrorCode::ProviderRateLimited => "PROVIDER_RATE_LIMITED",
            ErrorCode::ProviderServerError => "PROVIDER_SERVER_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::GatewayError => "GATEWAY_ERROR",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_id_grammar() {
        assert!(CapabilityId::parse("slack.post_message").is_ok());
        assert!(CapabilityId::parse("web3_rpc.eth_call").is_ok());

        assert!(CapabilityId::parse("Slack.post").is_err());
        assert!(CapabilityId::parse("slack").is_err());
        assert!(CapabilityId::parse("slack.post.message").is_err());
        assert!(CapabilityId::parse("slack.post-message").is_err());
        assert!(CapabilityId::parse("").is_err());
    }

    #[test]
    fn test_capability_version_strict_semver() {
        assert!(CapabilityVersion::parse("1.0.0").is_ok());
        assert!(CapabilityVersion::parse("0.2.13").is_ok());
        assert!(CapabilityVersion::parse("2.0.0-beta.1").is_ok());

        assert!(CapabilityVersion::parse("1.0").is_err());
        assert!(CapabilityVersion::parse("01.0.0").is_err());
        assert!(CapabilityVersion::parse("v1.0.0").is_err());
        assert!(CapabilityVersion::parse("latest").is_err());
    }

    #[test]
    fn test_idempotency_key_limits() {
        assert!(IdempotencyKey::parse("k1").is_ok());
        assert!(IdempotencyKey::parse("x".repeat(256)).is_ok());

        assert!(IdempotencyKey::parse("").is_err());
        assert!(IdempotencyKey::parse("x".repeat(257)).is_err());
    }

    #[test]
    fn test_receipt_ids_are_time_ordered() {
        let a = ReceiptId::generate();
        let b = ReceiptId::generate();
        // v7 ids sort by creation time
        assert!(a.0 <= b.0);
    }

    #[test]
    fn test_error_code_from_http_status() {
        assert_eq!(
            ErrorCode::from_http_status(401),
            ErrorCode::ProviderAuthFailure
        );
        assert_eq!(
            ErrorCode::from_http_status(403),
            ErrorCode::ProviderAuthFailure
        );
        assert_eq!(ErrorCode::from_http_status(404), ErrorCode::ProviderNotFound);
        assert_eq!(
            ErrorCode::from_http_status(429),
            ErrorCode::ProviderRateLimited
        );
        assert_eq!(
            ErrorCode::from_http_status(422),
            ErrorCode::ProviderInvalidInput
        );
        assert_eq!(
            ErrorCode::from_http_status(503),
            ErrorCode::ProviderServerError
        );
    }

    #[test]
    fn test_error_code_retryability() {
        assert!(ErrorCode::Timeout.retryable());
        assert!(ErrorCode::ProviderRateLimited.retryable());
        assert!(!ErrorCode::ScopeNotGranted.retryable());
        assert!(!ErrorCode::PolicyEngineError.retryable());
    }

    #[test]
    fn test_error_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::BudgetDailyCallsExceeded).unwrap();
        assert_eq!(json, "\"BUDGET_DAILY_CALLS_EXCEEDED\"");
        assert_eq!(
            ErrorCode::BudgetDailyCallsExceeded.to_string(),
            "BUDGET_DAILY_CALLS_EXCEEDED"
        );
    }
}
