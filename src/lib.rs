//! # Turbidity Gateway
//!
//! Exposes turbidity telemetry from a serial-connected sensor over HTTP,
//! predicts remaining filter life with a pre-trained regression model, and
//! asks the Gemini API for a plain-language analysis of recent readings.
//!
//! ## Features
//!
//! - **Serial ingestion**: background thread parsing `Turbidity:<value>` lines
//! - **Latest reading**: lock-free single-slot store shared with handlers
//! - **Lifespan prediction**: JSON-exported scaler + linear or tree-ensemble model
//! - **Narrative analysis**: Gemini `generateContent` with a fixed fallback message
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use turbidity_gateway::{
//!     start_serial_reader, start_web_server, AppState, GeminiClient, GeminiConfig,
//!     InsightGenerator, ProcessParameters, ReadingStore, SerialConfig, WebConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(ReadingStore::new());
//!     let cancel = CancellationToken::new();
//!     let _reader = start_serial_reader(&SerialConfig::default(), store.clone(), cancel.clone())?;
//!
//!     let gemini = Arc::new(GeminiClient::new(GeminiConfig::default()));
//!     let insights = InsightGenerator::new(gemini, None, ProcessParameters::default());
//!     let state = AppState::new(store, None, Arc::new(insights));
//!
//!     start_web_server(WebConfig::default(), state, async move { cancel.cancelled().await }).await?;
//!     Ok(())
//! }
//! ```

pub mod analysis;
pub mod error;
pub mod sensor;
pub mod web;

// Re-export public API
pub use analysis::{
    GeminiClient, GeminiConfig, InsightGenerator, LifespanPredictor, ProcessParameters,
    TextService, FALLBACK_ANALYSIS,
};
pub use error::{Result, SystemError};
pub use sensor::{
    serial::start_serial_reader, ReadingStore, SerialConfig, SerialReader, SerialReaderHandle,
};
pub use web::{create_app, start_web_server, AppState, WebConfig};

/// The default web server port
pub const DEFAULT_WEB_PORT: u16 = 5000;

/// The default serial baud rate
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// The default timeout for one serial read attempt in milliseconds
pub const DEFAULT_SERIAL_TIMEOUT_MS: u64 = 2000;
