//! Web server configuration.

use serde::{Deserialize, Serialize};

/// Origins of the dashboard's development server.
pub const DEFAULT_ALLOWED_ORIGINS: [&str; 2] = ["http://localhost:5173", "http://127.0.0.1:5173"];

/// Configuration for the web server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Host to bind the server to
    pub host: String,
    /// Port to bind the server to
    pub port: u16,
    /// Whether to enable CORS
    pub enable_cors: bool,
    /// Browser origins allowed by CORS
    pub allowed_origins: Vec<String>,
    /// Allow any origin instead of the list
    pub allow_any_origin: bool,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: crate::DEFAULT_WEB_PORT,
            enable_cors: true,
            allowed_origins: DEFAULT_ALLOWED_ORIGINS
                .iter()
                .map(|origin| origin.to_string())
                .collect(),
            allow_any_origin: false,
        }
    }
}

impl WebConfig {
    /// Create a new web configuration with custom host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Set the host for the web server.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port for the web server.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Enable or disable CORS.
    pub fn with_cors(mut self, enable_cors: bool) -> Self {
        self.enable_cors = enable_cors;
        self
    }

    /// Replace the allowed origin list. An empty list keeps the defaults.
    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        if !origins.is_empty() {
            self.allowed_origins = origins;
        }
        self
    }

    /// Allow requests from any origin.
    pub fn with_any_origin(mut self, allow_any_origin: bool) -> Self {
        self.allow_any_origin = allow_any_origin;
        self
    }

    /// Get the full bind address.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
