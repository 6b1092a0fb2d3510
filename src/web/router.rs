//! Web application router and middleware setup.

use crate::error::{Result, SystemError};
use crate::web::config::WebConfig;
use crate::web::{handlers, AppState};
use axum::{
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

/// Create the main axum application with all routes and middleware.
pub fn create_app(config: &WebConfig, state: AppState) -> Result<Router> {
    let mut app = Router::new()
        .route("/data", get(handlers::get_data))
        .route("/predict", post(handlers::predict))
        .route("/gemini", post(handlers::analyze))
        .route("/health", get(handlers::health_check))
        .with_state(state);

    if config.enable_cors {
        app = app.layer(cors_layer(config)?);
    }

    let service_builder = ServiceBuilder::new().layer(TraceLayer::new_for_http());
    app = app.layer(service_builder);

    Ok(app)
}

fn cors_layer(config: &WebConfig) -> Result<CorsLayer> {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    if config.allow_any_origin {
        info!("CORS: allowing any origin");
        return Ok(layer.allow_origin(Any));
    }

    let origins = config
        .allowed_origins
        .iter()
        .map(|origin| {
            origin.parse::<HeaderValue>().map_err(|e| {
                SystemError::config_error(format!("Invalid CORS origin {:?}: {}", origin, e))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    info!("CORS: allowing origins {:?}", config.allowed_origins);
    Ok(layer.allow_origin(AllowOrigin::list(origins)))
}
