use std::time::Duration;
use thiserror::Error;

/// Main error type for the warden supervisor
#[derive(Debug, Error)]
pub enum WardenError {
    // Process-related errors
    #[error("{0}: failed to start: {1}")]
    Spawn(String, std::io::Error),

    #[error("{0}: failed to wire {1}")]
    Pipe(String, &'static str),

    #[error("{0}: timed out after {1:?}")]
    Timeout(String, Duration),

    #[error("{0}: exited: {1}")]
    Exited(String, String),

    #[error("{0}: wait failed: {1}")]
    Wait(String, std::io::Error),

    #[error("Failed to send signal: {0}")]
    Signal(String),

    #[error("Supervisor ID already registered: {0}")]
    DuplicateId(String),

    // Log forwarding errors
    #[error("Failed to read child output: {0}")]
    Forward(std::io::Error),

    // Memory sampling errors
    #[error("Memory sampling failed for pid {0}: {1}")]
    Sampling(u32, String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Missing required configuration field: {0}")]
    MissingConfigField(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    // Log sink errors
    #[error("Failed to open log file: {0}")]
    LogFile(String),

    #[error("Log rotation failed: {0}")]
    LogRotation(String),

    // IO errors (automatically converted from std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WardenError {
    /// True if this error was produced by a per-attempt timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, WardenError::Timeout(..))
    }
}

/// Result type alias for warden operations
pub type Result<T> = std::result::Result<T, WardenError>;
