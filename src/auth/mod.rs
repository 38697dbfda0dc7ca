//! Bearer-key authentication for the REST surface.
//!
//! Keys are stored as SHA-256 hashes mapping to a tenant. The middleware
//! resolves `Authorization: Bearer <key>` into an [`AuthContext`] carried
//! as a request extension; the execute handler compares that tenant
//! against the one named in the request body (the pipeline's
//! confused-deputy guard).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::crypto::sha256_hex;
use crate::domain::TenantId;

use super::api::error::ApiError;

/// Registered API key.
#[derive(Debug, Clone)]
pub struct ApiKeyRecord {
    pub key_hash: String,
    pub tenant_id: TenantId,
    pub active: bool,
}

/// Validates bearer keys against registered hashes.
pub struct ApiKeyValidator {
    keys: RwLock<HashMap<String, ApiKeyRecord>>,
}

impl ApiKeyValidator {
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// Hash a raw key for storage; raw keys are never kept.
    pub fn hash_key(raw: &str) -> String {
        sha256_hex(raw.as_bytes())
    }

    pub fn register_key(&self, record: ApiKeyRecord) {
        self.keys
            .write()
            .expect("api key lock poisoned")
            .insert(record.key_hash.clone(), record);
    }

    /// Resolve a raw bearer key to its tenant.
    pub fn validate(&self, raw: &str) -> Option<TenantId> {
        let hash = Self::hash_key(raw);
        let keys = self.keys.read().expect("api key lock poisoned");
        keys.get(&hash)
            .filter(|record| record.active)
            .map(|record| record.tenant_id)
    }
}

impl Default for ApiKeyValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Authenticated principal attached to the request.
#[derive(Debug, Clone, Copy)]
pub struct AuthContext {
    pub tenant_id: TenantId,
}

/// Shared state for the auth middleware.
#[derive(Clone)]
pub struct AuthMiddlewareState {
    pub validator: Arc<ApiKeyValidator>,
}

/// Axum middleware enforcing bearer-key auth on every API route.
pub async fn auth_middleware(
    State(state): State<AuthMiddlewareState>,
    mut request: Request,
    next: Next,
) -> Response {
    let bearer = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let Some(raw_key) = bearer else {
        return ApiError::unauthorized("missing bearer credentials").into_response();
    };
    let Some(tenant_id) = state.validator.validate(raw_key) else {
        return ApiError::unauthorized("invalid API key").into_response();
    };

    request.extensions_mut().insert(AuthContext { tenant_id });
    next.run(request).await
}
