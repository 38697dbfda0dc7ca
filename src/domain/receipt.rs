//! Execution records: requests, receipts, and outcome events.
//!
//! A [`Receipt`] is the write-once record of one observable execution. It
//! carries hashes of redacted inputs and outputs, never raw bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::policy::PolicyDecision;
use super::types::{
    CapabilityId, CapabilityVersion, DecisionId, ErrorCode, IdempotencyKey, ReceiptId,
    ReceiptStatus, RequestId, TenantId,
};

/// Inbound capability invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub capability_id: CapabilityId,
    /// Defaults to the latest published version when absent
    pub capability_version: Option<CapabilityVersion>,
    pub tenant_id: TenantId,
    /// Opaque params, validated against the manifest's input schema
    pub params: serde_json::Value,
    /// Required, caller-supplied, unique per tenant
    pub idempotency_key: IdempotencyKey,
    /// Synthetic probes traverse the pipeline but are never billed
    pub is_synthetic: bool,
    /// Token minted by the approval flow, examined by policy rule 9
    pub approval_token: Option<String>,
    pub request_id: RequestId,
}

/// Immutable record of one observable execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    /// Time-ordered id (UUID v7)
    pub id: ReceiptId,
    pub capability_id: CapabilityId,
    pub capability_version: CapabilityVersion,
    pub tenant_id: TenantId,
    pub request_id: RequestId,
    pub idempotency_key: IdempotencyKey,
    /// SHA-256 over canonical JSON of the redacted params
    pub input_hash: String,
    /// SHA-256 over canonical JSON of the redacted output; absent on failure
    pub output_hash: Option<String>,
    pub latency_ms: u64,
    pub status: ReceiptStatus,
    pub error_code: Option<ErrorCode>,
    /// Redacted provider message; never a raw credential
    pub error_detail: Option<String>,
    /// Marks results produced by the development stub adapter
    pub output_annotation: Option<String>,
    pub policy_decision_id: DecisionId,
    pub is_synthetic: bool,
    pub timestamp: DateTime<Utc>,
}

impl Receipt {
    /// View of this receipt returned to a caller that hit the idempotency
    /// cache: same execution record, `idempotent_hit` status, latency
    /// measured from the replaying pipeline's entry.
    pub fn idempotent_view(&self, latency_ms: u64) -> Receipt {
        Receipt {
            status: ReceiptStatus::IdempotentHit,
            latency_ms,
            ..self.clone()
        }
    }
}

/// Telemetry projection of a receipt, consumed by the trust scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeEvent {
    pub receipt_id: ReceiptId,
    pub capability_id: CapabilityId,
    pub capability_version: CapabilityVersion,
    pub success: bool,
    pub latency_ms: u64,
    /// Absent on success
    pub error_taxonomy: Option<ErrorCode>,
    pub timestamp: DateTime<Utc>,
    pub is_synthetic: bool,
}

impl OutcomeEvent {
    /// Project a freshly written receipt. Idempotent hits are not projected;
    /// they correspond to no new observable execution.
    pub fn from_receipt(receipt: &Receipt) -> Self {
        Self {
            receipt_id: receipt.id,
            capability_id: receipt.capability_id.clone(),
            capability_version: receipt.capability_version.clone(),
            success: receipt.status == ReceiptStatus::Success,
            latency_ms: receipt.latency_ms,
            error_taxonomy: receipt.error_code,
            timestamp: receipt.timestamp,
            is_synthetic: receipt.is_synthetic,
        }
    }
}

/// Typed rejection for pre-policy faults: manifest unresolvable, tenant
/// mismatch, idempotency store down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRejection {
    pub code: ErrorCode,
    pub message: String,
    pub request_id: RequestId,
}

/// Result of one trip through the execute pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecuteResult {
    /// Success, execution failure, or idempotent hit
    Receipt(Receipt),
    /// Pre-execution policy denial; no receipt exists
    PolicyDenied(PolicyDecision),
    /// Pre-policy fault; neither decision nor receipt exists
    Rejected(ExecuteRejection),
}

impl ExecuteResult {
    pub fn rejected(code: ErrorCode, message: impl Into<String>, request_id: RequestId) -> Self {
        ExecuteResult::Rejected(ExecuteRejection {
            code,
            message: message.into(),
            request_id,
        })
    }

    pub fn as_receipt(&self) -> Option<&Receipt> {
        match self {
            ExecuteResult::Receipt(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_policy_denied(&self) -> Option<&PolicyDecision> {
        match self {
            ExecuteResult::PolicyDenied(d) => Some(d),
            _ => None,
        }
    }
}
