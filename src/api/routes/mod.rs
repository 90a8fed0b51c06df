//! API routes module

pub mod ai;

use axum::Router;

use crate::api::state::SharedState;

/// Create the combined API router
pub fn router() -> Router<SharedState> {
    Router::new()
        // DeepSeek chat routes
        .nest("/ai", ai::router())
}
