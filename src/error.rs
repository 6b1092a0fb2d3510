//! Error handling for the turbidity gateway crate.

/// A specialized `Result` type for gateway operations.
pub type Result<T> = std::result::Result<T, SystemError>;

/// The main error type for gateway operations.
#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port could not be opened or configured
    #[error("Serial error: {0}")]
    Serial(String),

    /// Input or artifact parsing failed
    #[error("Failed to parse: {0}")]
    Parse(String),

    /// Scaling or regression failed
    #[error("Model error: {0}")]
    Model(String),

    /// The generative-text service failed or returned unusable data
    #[error("Upstream service error: {0}")]
    Upstream(String),

    /// Unexpected fault inside the gateway
    #[error("Internal error: {0}")]
    Internal(String),

    /// Web server error
    #[error("Web server error: {0}")]
    WebServer(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A background task was started twice
    #[error("{0} is already running")]
    AlreadyRunning(&'static str),
}

impl SystemError {
    /// Create a new serial error
    pub fn serial_error(msg: impl Into<String>) -> Self {
        Self::Serial(msg.into())
    }

    /// Create a new parse error
    pub fn parse_error(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a new model error
    pub fn model_error(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    /// Create a new upstream service error
    pub fn upstream_error(msg: impl Into<String>) -> Self {
        Self::Upstream(msg.into())
    }

    /// Create a new internal error
    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a new web server error
    pub fn web_server_error(msg: impl Into<String>) -> Self {
        Self::WebServer(msg.into())
    }

    /// Create a new configuration error
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error came from the external text service.
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::Upstream(_))
    }
}
