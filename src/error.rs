//! Error taxonomy of bucket operations.
//!
//! Registry-level failures never surface here: they are absorbed and reported
//! as `bool`. `StoreError` is what a caller of a selector, or of a remote
//! bucket client, gets back.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The bucket is absent from every registry and from the ownership index.
    #[error("no such bucket")]
    BucketNotFound,

    /// The bucket is known but its handle lacks the requested capability.
    #[error("operation not implemented by this bucket")]
    NotImplemented,

    /// The key does not exist in the bucket.
    #[error("key not found")]
    NotFound,

    /// The bucket has remote owners but none of them can be reached.
    #[error("no reachable peer serves bucket {0}")]
    NoCandidatePeer(String),

    #[error("deadline of {0:?} exceeded")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("{0}")]
    Other(String),
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        StoreError::MalformedMessage(e.to_string())
    }
}

/// Error vocabulary of the remote bucket protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    None,
    NotImplemented,
    NotFound,
    Other(String),
}

impl StoreError {
    /// Wire form of this error. Variants without a code of their own travel
    /// as `Other` with their message.
    pub fn code(&self) -> ErrorCode {
        match self {
            StoreError::NotImplemented => ErrorCode::NotImplemented,
            StoreError::NotFound => ErrorCode::NotFound,
            other => ErrorCode::Other(other.to_string()),
        }
    }

    /// Inverse of [`StoreError::code`]; `None` for [`ErrorCode::None`].
    pub fn from_code(code: ErrorCode) -> Option<StoreError> {
        match code {
            ErrorCode::None => None,
            ErrorCode::NotImplemented => Some(StoreError::NotImplemented),
            ErrorCode::NotFound => Some(StoreError::NotFound),
            ErrorCode::Other(msg) if msg == StoreError::BucketNotFound.to_string() => {
                Some(StoreError::BucketNotFound)
            }
            ErrorCode::Other(msg) => Some(StoreError::Other(msg)),
        }
    }
}
