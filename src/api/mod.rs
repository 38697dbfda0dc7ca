//! REST API routes.

pub mod error;
pub mod handlers;

use axum::routing::{get, post};
use axum::Router;

use crate::server::AppState;

/// The authenticated API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/execute/:capability_id", post(handlers::execute::execute_capability))
        .route("/stats/:capability_id", get(handlers::stats::fetch_stats))
}
