//! Error types for the gateway and its supervisors

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    #[error("Route error: {0}")]
    Route(#[from] RouteError),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Config rendering errors
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Template not registered: {0}")]
    UnknownTemplate(String),

    #[error("Failed to register template {name}: {reason}")]
    Register { name: String, reason: String },

    #[error("Failed to render template {name}: {reason}")]
    Render { name: String, reason: String },
}

/// Supervisor errors
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Failed to render config: {0}")]
    Render(#[from] TemplateError),

    #[error("Failed to write config {path}: {source}")]
    WriteConfig {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn supervisor thread: {0}")]
    Thread(std::io::Error),

    #[error("Supervisor already started")]
    AlreadyStarted,
}

/// Route resolution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("Unknown namespace: {0}")]
    UnknownNamespace(String),

    #[error("Missing route target after namespace {0}")]
    MissingTarget(String),

    #[error("Invalid instance id: {0}")]
    InvalidInstance(String),
}

/// Relay errors
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Connection to {url} failed after {attempts} attempts")]
    ConnectExhausted { url: String, attempts: u32 },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection attempt timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),

    #[error("Inbound connection error: {0}")]
    Inbound(String),

    #[error("Outbound connection error: {0}")]
    Outbound(String),
}

impl RelayError {
    pub fn inbound<E: std::fmt::Display>(e: E) -> Self {
        Self::Inbound(e.to_string())
    }

    pub fn outbound<E: std::fmt::Display>(e: E) -> Self {
        Self::Outbound(e.to_string())
    }
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
