use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::handler::HandlerWithoutStateExt;
use axum::middleware;
use axum::routing::get;
use axum::{Json, Router, extract::Request, response::Response};
use http::{HeaderName, HeaderValue, Method, Uri, header};
use serde_json::{Value, json};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use super::routes;
use crate::api::public::ApiError;
use crate::api::state::{AppState, SharedState};
use crate::api::utils::{generate_request_id, timestamp};
use crate::core::{AppConfig, ChatError};

/// Service level liveness probe
async fn root_health() -> Json<Value> {
    Json(json!({
        "success": true,
        "status": "healthy",
        "timestamp": timestamp(),
        "service": "DeepSeek Chat API",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Anything that is neither an API route nor a static file
async fn not_found(method: Method, uri: Uri) -> ApiError {
    let request_id = generate_request_id();
    let path = uri.path();
    ApiError::new(ChatError::not_found(method.as_str(), path), &request_id)
        .with_route(method.as_str(), path)
}

async fn set_static_cache_control(request: Request, next: middleware::Next) -> Response {
    let mut response = next.run(request).await;
    if response.status().is_success() {
        response
            .headers_mut()
            .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    }
    response
}

fn cors_layer(origin: &str) -> CorsLayer {
    if origin == "*" {
        return CorsLayer::permissive();
    }

    match HeaderValue::from_str(origin) {
        Ok(origin) => CorsLayer::new()
            .allow_origin(AllowOrigin::exact(origin))
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([
                header::CONTENT_TYPE,
                header::AUTHORIZATION,
                HeaderName::from_static("x-requested-with"),
            ])
            .allow_credentials(true),
        Err(e) => {
            tracing::warn!("Invalid CORS_ORIGIN {}: {}. Allowing any origin", origin, e);
            CorsLayer::permissive()
        }
    }
}

pub fn app(shared_state: SharedState) -> Router {
    let cors = cors_layer(&shared_state.config.cors_origin);
    let body_limit = shared_state.config.body_limit;
    let static_dir = shared_state.config.static_dir.clone();

    Router::new()
        .route("/health", get(root_health))
        // API routes
        .nest("/api", routes::router())
        // Static assets, falling back to a JSON 404
        .fallback_service(
            ServiceBuilder::new()
                .layer(middleware::from_fn(set_static_cache_control))
                .service(
                    ServeDir::new(static_dir)
                        .call_fallback_on_method_not_allowed(true)
                        .not_found_service(not_found.into_service()),
                ),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::clone(&shared_state))
}

// Run the server
pub async fn serve(host: String, port: String, config: AppConfig) -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // axum logs rejections from built-in extractors with the `axum::rejection`
                // target, at `TRACE` level. `axum::rejection=trace` enables showing those events
                format! {
                    "{}=debug,tower_http=debug,axum::rejection=trace",
                    env!("CARGO_CRATE_NAME")
                }
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let shared_state = Arc::new(AppState::from_config(config));
    let app = app(shared_state);

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", host, port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", host, port))?;

    tracing::info!(
        "Server started. Listening on http://{}",
        listener.local_addr()?
    );

    axum::serve(listener, app).await?;
    Ok(())
}
