//! Resolution of buckets served by this node.
//!
//! Network buckets shadow pre-provisioned ones of the same name. The local
//! selector never consults the ownership index and never leaves the node;
//! it is what the RPC server dispatches to.

use super::bucket_map::LocalBucketMap;
use super::handle::{BucketExpiringWriter, BucketHandle, BucketReader, BucketWriter};
use crate::directory::netbucket::NetBucketRegistry;
use crate::error::{StoreError, StoreResult};

use async_trait::async_trait;
use std::sync::Arc;

#[derive(Clone)]
pub struct LocalSelector {
    net_buckets: Arc<NetBucketRegistry>,
    buckets: Arc<LocalBucketMap>,
}

impl LocalSelector {
    pub fn new(net_buckets: Arc<NetBucketRegistry>, buckets: Arc<LocalBucketMap>) -> Self {
        Self {
            net_buckets,
            buckets,
        }
    }

    pub fn lookup(&self, bucket: &[u8]) -> Option<BucketHandle> {
        self.net_buckets
            .get(bucket)
            .or_else(|| self.buckets.obtain(bucket))
    }

    fn resolve(&self, bucket: &[u8]) -> StoreResult<BucketHandle> {
        self.lookup(bucket).ok_or(StoreError::BucketNotFound)
    }

    /// This selector as a handle, for callers that route through handles.
    pub fn as_handle(self: &Arc<Self>) -> BucketHandle {
        BucketHandle::full(self.clone())
    }
}

#[async_trait]
impl BucketReader for LocalSelector {
    async fn bucket_get(&self, bucket: &[u8], key: &[u8]) -> StoreResult<Vec<u8>> {
        self.resolve(bucket)?.get(bucket, key).await
    }
}

#[async_trait]
impl BucketWriter for LocalSelector {
    async fn bucket_put(&self, bucket: &[u8], key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.resolve(bucket)?.put(bucket, key, value).await
    }

    async fn bucket_delete(&self, bucket: &[u8], key: &[u8]) -> StoreResult<()> {
        self.resolve(bucket)?.delete(bucket, key).await
    }
}

#[async_trait]
impl BucketExpiringWriter for LocalSelector {
    async fn bucket_put_expire(
        &self,
        bucket: &[u8],
        key: &[u8],
        value: &[u8],
        expires_at: u64,
    ) -> StoreResult<()> {
        self.resolve(bucket)?
            .put_with_expiry(bucket, key, value, expires_at)
            .await
    }
}
