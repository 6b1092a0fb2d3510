//! HTTP gateway for turbidity readings, lifespan predictions and analyses.

pub mod config;
pub mod handlers;
pub mod router;

// Re-export commonly used items
pub use config::WebConfig;
pub use router::create_app;

use crate::analysis::{InsightGenerator, LifespanPredictor};
use crate::error::{Result, SystemError};
use crate::sensor::ReadingStore;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ReadingStore>,
    pub predictor: Option<Arc<LifespanPredictor>>,
    pub insights: Arc<InsightGenerator>,
    pub serial_enabled: bool,
}

impl AppState {
    pub fn new(
        store: Arc<ReadingStore>,
        predictor: Option<Arc<LifespanPredictor>>,
        insights: Arc<InsightGenerator>,
    ) -> Self {
        Self {
            store,
            predictor,
            insights,
            serial_enabled: false,
        }
    }

    /// Record whether the serial reader was requested.
    pub fn with_serial_enabled(mut self, serial_enabled: bool) -> Self {
        self.serial_enabled = serial_enabled;
        self
    }
}

/// Start the web server and run until `shutdown` resolves.
pub async fn start_web_server(
    config: WebConfig,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = create_app(&config, state)?;

    let addr = config
        .bind_address()
        .parse::<SocketAddr>()
        .map_err(|e| SystemError::config_error(format!("Invalid bind address: {}", e)))?;

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| SystemError::web_server_error(format!("Failed to bind to address: {}", e)))?;

    info!("Starting turbidity gateway on http://{}", addr);
    info!("Reading endpoint: http://{}/data", addr);
    info!("Prediction endpoint: http://{}/predict", addr);
    info!("Analysis endpoint: http://{}/gemini", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| SystemError::web_server_error(format!("Server error: {}", e)))?;

    info!("Web server stopped");
    Ok(())
}
