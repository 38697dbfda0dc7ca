//! Trust-plane stats read endpoint.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::api::error::ApiError;
use crate::domain::{CapabilityId, CapabilityVersion, ErrorCode};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub version: Option<String>,
}

/// Fetch rolling reliability stats for a capability. With no explicit
/// version, the latest published version is resolved through the lookup
/// cache.
pub async fn fetch_stats(
    State(state): State<AppState>,
    Path(capability_id): Path<String>,
    Query(query): Query<StatsQuery>,
) -> Response {
    let capability_id = match CapabilityId::parse(capability_id) {
        Ok(id) => id,
        Err(e) => return ApiError::bad_request(e.to_string()).into_response(),
    };

    let version = match query.version.map(CapabilityVersion::parse) {
        None => {
            match state.cache.get(&capability_id, None).await {
                Ok(Some(cached)) => cached.manifest.version,
                Ok(None) => {
                    return ApiError::new(
                        ErrorCode::CapabilityNotPublished,
                        format!("capability '{capability_id}' not found"),
                    )
                    .into_response();
                }
                Err(e) => {
                    return ApiError::new(e.boundary_code(), e.to_string()).into_response();
                }
            }
        }
        Some(Ok(version)) => version,
        Some(Err(e)) => return ApiError::bad_request(e.to_string()).into_response(),
    };

    match state.stats.fetch_stats(&capability_id, &version).await {
        Ok(Some(stats)) => Json(stats).into_response(),
        Ok(None) => ApiError::new(
            ErrorCode::CapabilityNotPublished,
            format!("no stats recorded for '{capability_id}' version {version}"),
        )
        .into_response(),
        Err(e) => ApiError::new(e.boundary_code(), e.to_string()).into_response(),
    }
}
