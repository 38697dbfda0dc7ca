//! Capability execution endpoint.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::auth::AuthContext;
use crate::domain::{
    CapabilityId, CapabilityVersion, ExecuteRequest, ExecuteResult, IdempotencyKey, PolicyDecision,
    RequestId, TenantId,
};
use crate::server::AppState;

/// Request body for `POST /execute/{capability_id}`.
#[derive(Debug, Deserialize)]
pub struct ExecuteBody {
    #[serde(default)]
    pub params: Value,
    pub tenant_id: Uuid,
    pub capability_version: Option<String>,
    pub idempotency_key: String,
    #[serde(default)]
    pub is_synthetic: bool,
    pub approval_token: Option<String>,
}

/// Body returned on a policy denial.
#[derive(Debug, Serialize)]
pub struct PolicyDeniedBody {
    pub error: &'static str,
    pub decision: PolicyDecision,
}

/// Execute a capability through the full gateway pipeline.
pub async fn execute_capability(
    State(state): State<AppState>,
    Path(capability_id): Path<String>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<ExecuteBody>,
) -> Response {
    let capability_id = match CapabilityId::parse(capability_id) {
        Ok(id) => id,
        Err(e) => return ApiError::bad_request(e.to_string()).into_response(),
    };
    let capability_version = match body.capability_version.map(CapabilityVersion::parse) {
        None => None,
        Some(Ok(version)) => Some(version),
        Some(Err(e)) => return ApiError::bad_request(e.to_string()).into_response(),
    };
    let idempotency_key = match IdempotencyKey::parse(body.idempotency_key) {
        Ok(key) => key,
        Err(e) => return ApiError::bad_request(e.to_string()).into_response(),
    };

    let request = ExecuteRequest {
        capability_id,
        capability_version,
        tenant_id: TenantId::from_uuid(body.tenant_id),
        params: body.params,
        idempotency_key,
        is_synthetic: body.is_synthetic,
        approval_token: body.approval_token,
        request_id: RequestId::new(),
    };

    match state.pipeline.execute(auth.tenant_id, request).await {
        ExecuteResult::Receipt(receipt) => (StatusCode::OK, Json(receipt)).into_response(),
        ExecuteResult::PolicyDenied(decision) => (
            StatusCode::FORBIDDEN,
            Json(PolicyDeniedBody {
                error: "policy_denied",
                decision,
            }),
        )
            .into_response(),
        ExecuteResult::Rejected(rejection) => ApiError::from(rejection).into_response(),
    }
}
