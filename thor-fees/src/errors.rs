use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ledger::LedgerErrorCode;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeError {
    // Network errors
    NetworkError(String),
    ConnectionTimeout,
    InvalidResponse(String),
    NodeError { status: u16, message: String },

    // Estimation errors
    SimulationError(String),

    // Storage errors
    StorageError(String),
    FileNotFound(String),
    PermissionDenied(String),

    // Validation errors
    ValidationError(String),
    InvalidAddress(String),
    InvalidAmount(String),

    // Hardware wallet errors
    Ledger(LedgerErrorCode),

    // Application errors
    NotFound(String),

    // Generic errors
    Unknown(String),
}

impl fmt::Display for FeeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FeeError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            FeeError::ConnectionTimeout => write!(f, "Connection timeout"),
            FeeError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
            FeeError::NodeError { status, message } => {
                write!(f, "Node returned {}: {}", status, message)
            }

            FeeError::SimulationError(msg) => write!(f, "Simulation error: {}", msg),

            FeeError::StorageError(msg) => write!(f, "Storage error: {}", msg),
            FeeError::FileNotFound(msg) => write!(f, "File not found: {}", msg),
            FeeError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),

            FeeError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            FeeError::InvalidAddress(msg) => write!(f, "Invalid address: {}", msg),
            FeeError::InvalidAmount(msg) => write!(f, "Invalid amount: {}", msg),

            FeeError::Ledger(code) => write!(f, "Ledger error: {}", code),

            FeeError::NotFound(msg) => write!(f, "Not found: {}", msg),

            FeeError::Unknown(msg) => write!(f, "Unknown error: {}", msg),
        }
    }
}

impl std::error::Error for FeeError {}

pub type FeeResult<T> = Result<T, FeeError>;

// Helper macro for easy error creation
#[macro_export]
macro_rules! fee_error {
    ($variant:ident, $msg:expr) => {
        $crate::errors::FeeError::$variant($msg.to_string())
    };
    ($variant:ident) => {
        $crate::errors::FeeError::$variant
    };
}

// Conversion helpers
impl From<std::io::Error> for FeeError {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => FeeError::FileNotFound(error.to_string()),
            std::io::ErrorKind::PermissionDenied => FeeError::PermissionDenied(error.to_string()),
            _ => FeeError::StorageError(error.to_string()),
        }
    }
}

impl From<serde_json::Error> for FeeError {
    fn from(error: serde_json::Error) -> Self {
        FeeError::ValidationError(format!("JSON error: {}", error))
    }
}

impl From<reqwest::Error> for FeeError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            FeeError::ConnectionTimeout
        } else if error.is_decode() {
            FeeError::InvalidResponse(error.to_string())
        } else {
            FeeError::NetworkError(error.to_string())
        }
    }
}

impl From<LedgerErrorCode> for FeeError {
    fn from(code: LedgerErrorCode) -> Self {
        FeeError::Ledger(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_by_kind() {
        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(FeeError::from(missing), FeeError::FileNotFound(_)));

        let other = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        assert!(matches!(FeeError::from(other), FeeError::StorageError(_)));
    }

    #[test]
    fn macro_builds_variants() {
        let err = fee_error!(InvalidAmount, "negative");
        assert_eq!(err, FeeError::InvalidAmount("negative".into()));
        assert_eq!(fee_error!(ConnectionTimeout), FeeError::ConnectionTimeout);
    }

    #[test]
    fn node_error_display() {
        let err = FeeError::NodeError {
            status: 400,
            message: "bad revision".into(),
        };
        assert_eq!(err.to_string(), "Node returned 400: bad revision");
    }
}
