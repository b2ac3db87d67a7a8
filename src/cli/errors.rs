//! CLI-specific error types

use std::fmt;
use std::io;

use crate::errors::DbError;

/// CLI error codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Configuration missing or invalid
    ConfigError,
    /// I/O error (stdout)
    IoError,
    /// `init` on a directory that already has a configuration
    AlreadyInitialized,
    /// The engine rejected the operation
    EngineError,
    /// `verify` found damaged data
    VerifyFailed,
}

impl CliErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError => "TIER_CLI_CONFIG_ERROR",
            Self::IoError => "TIER_CLI_IO_ERROR",
            Self::AlreadyInitialized => "TIER_CLI_ALREADY_INITIALIZED",
            Self::EngineError => "TIER_CLI_ENGINE_ERROR",
            Self::VerifyFailed => "TIER_CLI_VERIFY_FAILED",
        }
    }
}

/// CLI error
#[derive(Debug)]
pub struct CliError {
    code: CliErrorCode,
    message: String,
}

impl CliError {
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, msg)
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IoError, msg)
    }

    pub fn already_initialized(path: &std::path::Path) -> Self {
        Self::new(
            CliErrorCode::AlreadyInitialized,
            format!("configuration already exists at {}", path.display()),
        )
    }

    pub fn verify_failed(problems: usize) -> Self {
        Self::new(
            CliErrorCode::VerifyFailed,
            format!("{} problem(s) found", problems),
        )
    }

    pub fn code(&self) -> &CliErrorCode {
        &self.code
    }

    pub fn code_str(&self) -> &'static str {
        self.code.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.code(), self.message)
    }
}

impl std::error::Error for CliError {}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::io_error(format!("JSON error: {}", e))
    }
}

impl From<DbError> for CliError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::InvalidConfig(msg) => Self::config_error(msg),
            other => Self::new(CliErrorCode::EngineError, other.to_string()),
        }
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;
