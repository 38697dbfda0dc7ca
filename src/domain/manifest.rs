//! Capability manifests.
//!
//! A manifest is the registry's description of one invocable capability,
//! identified by `(id, version)`. Manifests with status other than `draft`
//! are immutable; behavior changes ship as a new version.

use serde::{Deserialize, Serialize};

use super::types::{
    CapabilityId, CapabilityStatus, CapabilityVersion, DomainError, Provider, RiskClass,
    RoutingStatus, Scope,
};

/// Registry entry describing a verifiable agent capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityManifest {
    pub id: CapabilityId,
    pub version: CapabilityVersion,
    pub provider: Provider,
    /// HTTP method + path against the provider, e.g. `POST /api/chat.postMessage`
    pub method: String,
    /// Scopes required to invoke this capability; never empty
    pub scopes: Vec<Scope>,
    /// JSON Schema (Draft 7) the request params must satisfy
    pub input_schema: serde_json::Value,
    /// JSON Schema (Draft 7) describing the provider output
    pub output_schema: serde_json::Value,
    pub risk_class: RiskClass,
    /// Outbound hosts the adapter may contact; exact hostnames only
    pub domain_allowlist: Vec<String>,
    pub status: CapabilityStatus,
    pub routing_status: RoutingStatus,
    /// Set by the trust plane once the provider passes verification
    pub verified: bool,
}

impl CapabilityManifest {
    /// Validate field constraints that the type system cannot express.
    ///
    /// Called by registry implementations before accepting a manifest:
    /// scopes must be non-empty, and the domain allowlist must be non-empty
    /// with no wildcard patterns and no raw IP literals.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.scopes.is_empty() {
            return Err(DomainError::InvalidManifest(
                "scopes must not be empty".to_string(),
            ));
        }
        if self.domain_allowlist.is_empty() {
            return Err(DomainError::InvalidManifest(
                "domain_allowlist must not be empty".to_string(),
            ));
        }
        for domain in &self.domain_allowlist {
            if domain.is_empty() {
                return Err(DomainError::InvalidManifest(
                    "domain_allowlist entries must not be empty".to_string(),
                ));
            }
            if domain.contains('*') {
                return Err(DomainError::InvalidManifest(format!(
                    "wildcard domains are not allowed: {domain:?}"
                )));
            }
            if domain.parse::<std::net::IpAddr>().is_ok() {
                return Err(DomainError::InvalidManifest(format!(
                    "IP literals are not allowed in domain_allowlist: {domain:?}"
                )));
            }
        }
        Ok(())
    }

    /// Whether the liveness guard admits this manifest for execution.
    pub fn is_executable(&self) -> bool {
        self.status == CapabilityStatus::Published && self.routing_status != RoutingStatus::Hidden
    }
}
