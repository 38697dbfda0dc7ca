//! Structured API error responses.
//!
//! Maps the gateway's closed error taxonomy onto HTTP statuses with a
//! machine-readable body. Execution failures are not errors at this layer:
//! they return a failure receipt with status 200.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::domain::{ErrorCode, ExecuteRejection};

/// Error payload returned by API endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ErrorDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Machine-readable taxonomy code
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Whether a caller retry can plausibly succeed
    pub retryable: bool,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetails {
                code,
                message: message.into(),
                request_id: None,
                retryable: code.retryable(),
            },
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.error.request_id = Some(request_id.into());
        self
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParamsSchemaViolation, message)
    }

    pub fn status(&self) -> StatusCode {
        status_for(self.error.code)
    }
}

impl From<ExecuteRejection> for ApiError {
    fn from(rejection: ExecuteRejection) -> Self {
        ApiError::new(rejection.code, rejection.message)
            .with_request_id(rejection.request_id.to_string())
    }
}

/// HTTP status for each taxonomy code.
fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Unauthorized => StatusCode::FORBIDDEN,
        ErrorCode::CapabilityNotPublished => StatusCode::NOT_FOUND,
        ErrorCode::CapabilityHidden => StatusCode::FORBIDDEN,
        ErrorCode::ParamsSchemaViolation => StatusCode::UNPROCESSABLE_ENTITY,

        // Policy rule hits surface as forbidden.
        ErrorCode::NoPolicyBundle
        | ErrorCode::ScopeNotGranted
        | ErrorCode::ScopeExplicitlyDenied
        | ErrorCode::BudgetDailyCallsExceeded
        | ErrorCode::BudgetMonthlyCallsExceeded
        | ErrorCode::BudgetDailyCostExceeded
        | ErrorCode::BudgetMonthlyCostExceeded
        | ErrorCode::DomainNotAllowlisted
        | ErrorCode::ApprovalRequired
        | ErrorCode::ApprovalPending
        | ErrorCode::ApprovalDenied
        | ErrorCode::ApprovalExpired
        | ErrorCode::PolicyEngineError => StatusCode::FORBIDDEN,

        ErrorCode::ProviderRateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorCode::ProviderInvalidInput
        | ErrorCode::ProviderAuthFailure
        | ErrorCode::ProviderNotFound
        | ErrorCode::ProviderServerError
        | ErrorCode::NetworkError
        | ErrorCode::GatewayError => StatusCode::BAD_GATEWAY,
        ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(self)).into_response()
    }
}
