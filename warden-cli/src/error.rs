//! CLI-specific error types and exit code mapping

use warden_appsec::AppSecError;
use warden_core::error::WardenError;

/// CLI-specific error type.
///
/// The `exit_code()` method maps errors to process exit codes.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration loading or validation failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// A subcommand-specific operation failed.
    #[error("{0}")]
    Command(String),

    /// Rule loading or compilation failure.
    #[error("rule error: {0}")]
    Rule(String),

    /// Event delivery to the collector failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// JSON serialisation or replay input parsing failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (file read, stdout write, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapped domain error from warden-core.
    #[error("{0}")]
    Core(#[from] WardenError),
}

impl CliError {
    /// Map the error to a process exit code.
    ///
    /// | Code | Meaning                    |
    /// |------|----------------------------|
    /// | 0    | Success                    |
    /// | 1    | General / command error    |
    /// | 2    | Configuration error        |
    /// | 3    | Invalid rules              |
    /// | 4    | Collector delivery failed  |
    /// | 10   | IO error                   |
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Core(WardenError::Config(_)) => 2,
            Self::Rule(_) => 3,
            Self::Transport(_) => 4,
            Self::Io(_) => 10,
            Self::Json(_) | Self::Command(_) | Self::Core(_) => 1,
        }
    }
}

impl From<AppSecError> for CliError {
    fn from(e: AppSecError) -> Self {
        match e {
            AppSecError::Config { .. } => Self::Config(e.to_string()),
            AppSecError::Transport(reason) => Self::Transport(reason),
            other => Self::Rule(other.to_string()),
        }
    }
}
