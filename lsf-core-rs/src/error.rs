//! Response codes and the crate error type

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Response code carried in every method reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseCode {
    Ok,
    NullArgument,
    UnexpectedState,
    InvalidValue,
    Unknown,
    Failure,
    /// Lock contention, retry later
    Busy,
    Rejected,
    OutOfRange,
    InvalidField,
    MalformedMessage,
    InvalidArgs,
    EmptyName,
    /// Blob too large or allocation failure
    OutOfResources,
    /// Some lamps of an aggregate call succeeded, some did not
    PartialSuccess,
    NotFound,
    /// Entity table full
    NoSlot,
    /// Delete blocked by a dependent entity
    Dependency,
}

impl ResponseCode {
    pub fn is_ok(&self) -> bool {
        matches!(self, ResponseCode::Ok)
    }
}

impl std::fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Errors produced by the controller core
#[derive(Debug, Error)]
pub enum LsfError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("name must not be empty")]
    EmptyName,

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("entity table full ({0} entries)")]
    NoSlot(usize),

    #[error("{id} is referenced by {dependent}")]
    Dependency { id: String, dependent: String },

    #[error("blob would grow to {length} bytes (limit {limit})")]
    OutOfResources { length: usize, limit: usize },

    #[error("malformed blob: {0}")]
    Malformed(String),

    #[error("busy: {0}")]
    Busy(String),

    #[error("lamp replied {0}")]
    Lamp(ResponseCode),

    #[error("call timed out")]
    Timeout,

    #[error("session lost")]
    SessionLost,

    #[error("unexpected state: {0}")]
    UnexpectedState(String),

    #[error("channel closed")]
    ChannelClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LsfError {
    /// Response code reported to RPC callers for this error
    pub fn code(&self) -> ResponseCode {
        match self {
            LsfError::NotFound(_) => ResponseCode::NotFound,
            LsfError::EmptyName => ResponseCode::EmptyName,
            LsfError::InvalidArgs(_) => ResponseCode::InvalidArgs,
            LsfError::NoSlot(_) => ResponseCode::NoSlot,
            LsfError::Dependency { .. } => ResponseCode::Dependency,
            LsfError::OutOfResources { .. } => ResponseCode::OutOfResources,
            LsfError::Malformed(_) | LsfError::Json(_) => ResponseCode::MalformedMessage,
            LsfError::Busy(_) => ResponseCode::Busy,
            LsfError::Lamp(code) => *code,
            LsfError::Timeout | LsfError::SessionLost | LsfError::Io(_) => ResponseCode::Failure,
            LsfError::UnexpectedState(_) | LsfError::ChannelClosed => {
                ResponseCode::UnexpectedState
            }
        }
    }
}

/// Result alias used across the crate
pub type LsfResult<T> = Result<T, LsfError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(LsfError::EmptyName.code(), ResponseCode::EmptyName);
        assert_eq!(LsfError::NoSlot(100).code(), ResponseCode::NoSlot);
        assert_eq!(
            LsfError::Lamp(ResponseCode::InvalidField).code(),
            ResponseCode::InvalidField
        );
        assert_eq!(LsfError::Timeout.code(), ResponseCode::Failure);
    }
}
