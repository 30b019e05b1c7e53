//! Error types for ALMANAC operations

use crate::Namespace;
use thiserror::Error;

/// Errors raised by the remote settings service or the transport to it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Remote call {method} failed: {reason}")]
    Communication { method: String, reason: String },

    #[error("Remote method not supported: {method}")]
    Unsupported { method: String },
}

impl RemoteError {
    pub fn communication(method: impl Into<String>, reason: impl Into<String>) -> Self {
        RemoteError::Communication {
            method: method.into(),
            reason: reason.into(),
        }
    }

    pub fn unsupported(method: impl Into<String>) -> Self {
        RemoteError::Unsupported {
            method: method.into(),
        }
    }
}

/// Shared generation array errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("Shared array is closed")]
    Closed,

    #[error("Index {index} out of bounds for shared array of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("Invalid shared array layout: {reason}")]
    InvalidLayout { reason: String },

    #[error("Shared array I/O error: {reason}")]
    Io { reason: String },
}

impl From<std::io::Error> for MemoryError {
    fn from(e: std::io::Error) -> Self {
        MemoryError::Io {
            reason: e.to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Incompatible options: {option_a} and {option_b}")]
    IncompatibleOptions { option_a: String, option_b: String },

    #[error("Failed to read config file: {reason}")]
    Io { reason: String },

    #[error("Failed to parse config TOML: {reason}")]
    Parse { reason: String },
}

/// Errors reading a typed setting.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SettingError {
    #[error("Setting not found: {namespace}/{name}")]
    NotFound { namespace: Namespace, name: String },

    #[error("Setting {name} has non-numeric value {value:?}: {reason}")]
    InvalidNumber {
        name: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all ALMANAC errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AlmanacError {
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Shared memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Setting error: {0}")]
    Setting(#[from] SettingError),
}

/// Result type alias for ALMANAC operations.
pub type AlmanacResult<T> = Result<T, AlmanacError>;

// =============================================================================
// TESTS
// =============================================================================
