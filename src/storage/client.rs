//! Client side of the bucket RPC protocol.
//!
//! A [`RemoteBucketClient`] targets one peer's RPC address and implements all
//! three bucket capabilities over HTTP. Every call is bounded by the client's
//! deadline.

use super::handle::{BucketExpiringWriter, BucketReader, BucketWriter};
use super::protocol::{
    BucketRequest, BucketResponse, ENDPOINT_DELETE, ENDPOINT_GET, ENDPOINT_PUT,
    ENDPOINT_PUT_EXPIRE,
};
use crate::error::{StoreError, StoreResult};

use async_trait::async_trait;
use std::time::Duration;

/// Deadline applied to a remote bucket call unless configured otherwise.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct RemoteBucketClient {
    addr: String,
    http: reqwest::Client,
    deadline: Duration,
}

impl RemoteBucketClient {
    pub fn new(addr: impl Into<String>, http: reqwest::Client, deadline: Duration) -> Self {
        Self {
            addr: addr.into(),
            http,
            deadline,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Points a recycled client at another peer.
    pub fn retarget(&mut self, addr: impl Into<String>) {
        self.addr = addr.into();
    }

    async fn call(&self, endpoint: &str, req: &BucketRequest) -> StoreResult<BucketResponse> {
        let body = bincode::serialize(req)?;
        let url = format!("http://{}{}", self.addr, endpoint);

        let resp = self
            .http
            .post(&url)
            .timeout(self.deadline)
            .body(body)
            .send()
            .await
            .map_err(|e| self.map_err(e))?;

        let status = resp.status();
        let bytes = resp.bytes().await.map_err(|e| self.map_err(e))?;
        match bincode::deserialize::<BucketResponse>(&bytes) {
            Ok(response) => Ok(response),
            Err(_) if !status.is_success() => Err(StoreError::Transport(format!(
                "{} answered {}",
                self.addr, status
            ))),
            Err(e) => Err(StoreError::from(e)),
        }
    }

    fn map_err(&self, e: reqwest::Error) -> StoreError {
        if e.is_timeout() {
            tracing::warn!("Request to {} timed out", self.addr);
            StoreError::Timeout(self.deadline)
        } else {
            tracing::warn!("Request to {} failed: {}", self.addr, e);
            StoreError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl BucketReader for RemoteBucketClient {
    async fn bucket_get(&self, bucket: &[u8], key: &[u8]) -> StoreResult<Vec<u8>> {
        let req = BucketRequest {
            bucket: bucket.to_vec(),
            key: key.to_vec(),
            ..Default::default()
        };
        self.call(ENDPOINT_GET, &req).await?.into_value()
    }
}

#[async_trait]
impl BucketWriter for RemoteBucketClient {
    async fn bucket_put(&self, bucket: &[u8], key: &[u8], value: &[u8]) -> StoreResult<()> {
        let req = BucketRequest {
            bucket: bucket.to_vec(),
            key: key.to_vec(),
            value: value.to_vec(),
            ..Default::default()
        };
        self.call(ENDPOINT_PUT, &req).await?.error.into_result()
    }

    async fn bucket_delete(&self, bucket: &[u8], key: &[u8]) -> StoreResult<()> {
        let req = BucketRequest {
            bucket: bucket.to_vec(),
            key: key.to_vec(),
            ..Default::default()
        };
        self.call(ENDPOINT_DELETE, &req).await?.error.into_result()
    }
}

#[async_trait]
impl BucketExpiringWriter for RemoteBucketClient {
    async fn bucket_put_expire(
        &self,
        bucket: &[u8],
        key: &[u8],
        value: &[u8],
        expires_at: u64,
    ) -> StoreResult<()> {
        let req = BucketRequest {
            bucket: bucket.to_vec(),
            key: key.to_vec(),
            value: value.to_vec(),
            expires_at,
        };
        self.call(ENDPOINT_PUT_EXPIRE, &req).await?.error.into_result()
    }
}
