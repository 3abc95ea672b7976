//! Buckets pre-provisioned on this node.

use super::handle::{BucketHandle, BucketName};
use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct LocalBucketMap {
    buckets: DashMap<BucketName, BucketHandle>,
}

impl LocalBucketMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces. Returns `true` if the name was new.
    pub fn add(&self, bucket: &[u8], handle: BucketHandle) -> bool {
        self.buckets.insert(bucket.to_vec(), handle).is_none()
    }

    pub fn remove(&self, bucket: &[u8]) -> bool {
        self.buckets.remove(bucket).is_some()
    }

    pub fn obtain(&self, bucket: &[u8]) -> Option<BucketHandle> {
        self.buckets.get(bucket).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, bucket: &[u8]) -> bool {
        self.buckets.contains_key(bucket)
    }

    pub fn bucket_list(&self) -> Vec<BucketName> {
        self.buckets.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
