use super::pool::ConnectionPool;
use crate::directory::metadata::NodeMetadata;
use crate::directory::netbucket::NetScope;
use crate::directory::Directory;
use crate::error::{StoreError, StoreResult};
use crate::membership::types::NodeId;
use crate::storage::handle::{
    display_bucket, BucketExpiringWriter, BucketHandle, BucketReader, BucketWriter,
};
use crate::storage::selector::LocalSelector;

use async_trait::async_trait;
use std::sync::Arc;

/// How many known locations serve a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    None,
    One,
    Some,
    All,
}

impl Scope {
    fn from_owner_count(count: usize) -> Self {
        if count > 1 {
            Scope::Some
        } else {
            Scope::One
        }
    }
}

/// Where a resolved bucket is served from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Local,
    Remote(NodeId),
    Nowhere,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub handle: Option<BucketHandle>,
    pub scope: Scope,
    pub target: Target,
}

/// Routes bucket operations to this node or to the nearest remote owner.
pub struct ClusterSelector {
    directory: Arc<Directory>,
    local: Arc<LocalSelector>,
    pool: Arc<ConnectionPool>,
}

impl ClusterSelector {
    /// Builds the selector and subscribes its pool to peer departures.
    pub fn new(
        directory: Arc<Directory>,
        local: Arc<LocalSelector>,
        pool: Arc<ConnectionPool>,
    ) -> Arc<Self> {
        let evicting = pool.clone();
        directory.add_leave_listener(Arc::new(move |meta: &NodeMetadata| {
            evicting.evict(&meta.rpc_addr().to_string());
        }));
        Arc::new(Self {
            directory,
            local,
            pool,
        })
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Resolves `bucket` to a handle and the scope of its placement.
    ///
    /// Fails with `NoCandidatePeer` when the bucket has remote owners but none
    /// of them has usable metadata.
    pub fn resolve(&self, bucket: &[u8]) -> StoreResult<Resolution> {
        let local_handle = || Some(self.local.as_handle());

        if let Some(scope) = self.directory.net_buckets.is_net(bucket) {
            let scope = match scope {
                NetScope::Global => Scope::All,
                NetScope::Local => {
                    Scope::from_owner_count(self.directory.ownership.count_nodes(bucket))
                }
            };
            return Ok(Resolution {
                handle: local_handle(),
                scope,
                target: Target::Local,
            });
        }

        if self.directory.buckets.contains(bucket) {
            return Ok(Resolution {
                handle: local_handle(),
                scope: Scope::from_owner_count(self.directory.ownership.count_nodes(bucket)),
                target: Target::Local,
            });
        }

        let owners = self.directory.ownership.nodes_of(bucket);
        if owners.is_empty() {
            return Ok(Resolution {
                handle: None,
                scope: Scope::None,
                target: Target::Nowhere,
            });
        }

        let mut candidates = self.directory.nodes_metadata(&owners);
        if candidates.is_empty() {
            tracing::warn!(
                "Bucket {} has {} owners but none with known metadata",
                display_bucket(bucket),
                owners.len()
            );
            return Err(StoreError::NoCandidatePeer(display_bucket(bucket).into_owned()));
        }
        self.directory.sort_by_distance(&mut candidates);
        let nearest = &candidates[0];

        let client = self.pool.get(&nearest.rpc_addr().to_string());
        Ok(Resolution {
            handle: Some(BucketHandle::full(client)),
            scope: Scope::from_owner_count(owners.len()),
            target: Target::Remote(nearest.name.clone()),
        })
    }

    fn handle_for(&self, bucket: &[u8]) -> StoreResult<BucketHandle> {
        self.resolve(bucket)?.handle.ok_or(StoreError::BucketNotFound)
    }

    pub async fn get(&self, bucket: &[u8], key: &[u8]) -> StoreResult<Vec<u8>> {
        self.handle_for(bucket)?.get(bucket, key).await
    }

    pub async fn put(&self, bucket: &[u8], key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.handle_for(bucket)?.put(bucket, key, value).await
    }

    pub async fn delete(&self, bucket: &[u8], key: &[u8]) -> StoreResult<()> {
        self.handle_for(bucket)?.delete(bucket, key).await
    }

    pub async fn put_with_expiry(
        &self,
        bucket: &[u8],
        key: &[u8],
        value: &[u8],
        expires_at: u64,
    ) -> StoreResult<()> {
        self.handle_for(bucket)?
            .put_with_expiry(bucket, key, value, expires_at)
            .await
    }
}

#[async_trait]
impl BucketReader for ClusterSelector {
    async fn bucket_get(&self, bucket: &[u8], key: &[u8]) -> StoreResult<Vec<u8>> {
        self.get(bucket, key).await
    }
}

#[async_trait]
impl BucketWriter for ClusterSelector {
    async fn bucket_put(&self, bucket: &[u8], key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.put(bucket, key, value).await
    }

    async fn bucket_delete(&self, bucket: &[u8], key: &[u8]) -> StoreResult<()> {
        self.delete(bucket, key).await
    }
}

#[async_trait]
impl BucketExpiringWriter for ClusterSelector {
    async fn bucket_put_expire(
        &self,
        bucket: &[u8],
        key: &[u8],
        value: &[u8],
        expires_at: u64,
    ) -> StoreResult<()> {
        self.put_with_expiry(bucket, key, value, expires_at).await
    }
}
