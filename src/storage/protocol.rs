//! Bucket RPC Protocol
//!
//! Defines the endpoints and Data Transfer Objects (DTOs) of the remote bucket
//! interface. Every peer exposes it on its RPC address; the [`super::client`]
//! side is what the cluster selector hands out for remote buckets.
//!
//! Bodies are bincode encoded. Errors travel as an [`ErrorCode`]: none,
//! not-implemented, not-found, or an opaque message.

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};

pub use crate::error::ErrorCode;

// --- API Endpoints ---

/// Reads a key from a bucket served by the receiving node.
pub const ENDPOINT_GET: &str = "/bucket/get";
/// Writes a key.
pub const ENDPOINT_PUT: &str = "/bucket/put";
/// Removes a key.
pub const ENDPOINT_DELETE: &str = "/bucket/delete";
/// Writes a key with an absolute expiry time.
pub const ENDPOINT_PUT_EXPIRE: &str = "/bucket/put_expire";

// --- Data Transfer Objects ---

/// Request body shared by all four endpoints. Fields that an endpoint does
/// not use are left empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketRequest {
    pub bucket: Vec<u8>,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    /// Unix seconds, only read by [`ENDPOINT_PUT_EXPIRE`].
    pub expires_at: u64,
}

impl ErrorCode {
    pub fn from_result<T>(result: &StoreResult<T>) -> Self {
        match result {
            Ok(_) => ErrorCode::None,
            Err(e) => e.code(),
        }
    }

    /// Maps back to a local error. `None` yields `Ok(())`.
    pub fn into_result(self) -> StoreResult<()> {
        match StoreError::from_code(self) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketResponse {
    pub error: ErrorCode,
    /// Only populated by a successful get.
    pub value: Vec<u8>,
}

impl BucketResponse {
    pub fn from_unit(result: StoreResult<()>) -> Self {
        Self {
            error: ErrorCode::from_result(&result),
            value: Vec::new(),
        }
    }

    pub fn from_value(result: StoreResult<Vec<u8>>) -> Self {
        let error = ErrorCode::from_result(&result);
        Self {
            error,
            value: result.unwrap_or_default(),
        }
    }

    pub fn into_value(self) -> StoreResult<Vec<u8>> {
        self.error.into_result().map(|_| self.value)
    }
}
