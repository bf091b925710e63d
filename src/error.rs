use thiserror::Error;

/// Main error type for the bridge monitor
#[derive(Error, Debug)]
pub enum MonitorError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    // Startup handshake
    #[error(transparent)]
    Auth(#[from] AuthError),

    // Stream errors
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Reconnect attempts exhausted after {attempts} consecutive failures")]
    ReconnectExhausted { attempts: u32 },

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("{0:#}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for MonitorError
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Failures of the portal login handshake
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Auth request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Portal rejected credential: HTTP {status}")]
    Rejected { status: u16 },

    #[error("Malformed auth response: {0}")]
    Malformed(String),

    #[error("Auth response carried no {0} cookie")]
    MissingCookie(&'static str),
}

/// Inbound frames that cannot be turned into an envelope
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Frame has no body")]
    MissingBody,

    #[error("Frame has no source")]
    MissingSource,

    #[error("Frame body is neither an object nor a control string: {0}")]
    InvalidBody(String),
}

/// Failed ack, alert or metrics sends. Logged at the boundary, never retried.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("{channel} delivery failed: {reason}")]
    Failed { channel: String, reason: String },

    #[error("Outbound queue full, dropped frame for {0}")]
    QueueFull(String),

    #[error("Stream not open ({state}), dropped frame")]
    NotOpen { state: String },

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
}

impl DeliveryError {
    pub fn failed(channel: impl Into<String>, reason: impl ToString) -> Self {
        DeliveryError::Failed {
            channel: channel.into(),
            reason: reason.to_string(),
        }
    }
}
