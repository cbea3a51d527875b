use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use dx_core::{ServerConfig, ValidationLimits};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

pub mod error;
pub mod handlers;
pub mod state;

pub use error::ApiError;
pub use state::AppState;

/// Transport limit for request bodies; leaves room for base64 inflation and
/// multipart framing so oversized images still reach validation.
pub fn body_limit(limits: &ValidationLimits) -> usize {
    limits.max_upload_bytes / 3 * 4 + 64 * 1024
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    if config.allows_any_origin() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

pub fn create_app(state: AppState, config: &ServerConfig) -> Router {
    let limit = body_limit(state.classifier.limits());

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/debug/model_meta", get(handlers::model_meta))
        .route("/predict", post(handlers::predict))
        .layer(DefaultBodyLimit::max(limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(config))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, config: &ServerConfig) -> anyhow::Result<()> {
    let addr = config.socket_addr()?;
    let app = create_app(state, config);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("🩺 Classifier API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

pub mod prelude {
    pub use crate::{create_app, serve, ApiError, AppState};
    pub use dx_core::{Error, Result};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_limit_exceeds_upload_limit() {
        let limits = ValidationLimits::default();
        assert!(body_limit(&limits) > limits.max_upload_bytes * 4 / 3);
    }
}
