//! In-memory bucket engine.
//!
//! Backs pre-provisioned local buckets and the built-in `memory` network
//! provider. Expired entries read as missing and are removed lazily.

use super::handle::{BucketExpiringWriter, BucketReader, BucketWriter};
use crate::error::{StoreError, StoreResult};

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<u64>,
}

impl Entry {
    fn expired(&self, now: u64) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

#[derive(Debug, Default)]
pub struct MemoryBucket {
    entries: DashMap<Vec<u8>, Entry>,
}

impl MemoryBucket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included until they are read.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = now_secs();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.expired(now));
        before - self.entries.len()
    }

    fn get_local(&self, key: &[u8]) -> StoreResult<Vec<u8>> {
        let now = now_secs();
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.expired(now) => return Ok(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, entry| entry.expired(now));
        }
        Err(StoreError::NotFound)
    }
}

#[async_trait]
impl BucketReader for MemoryBucket {
    async fn bucket_get(&self, _bucket: &[u8], key: &[u8]) -> StoreResult<Vec<u8>> {
        self.get_local(key)
    }
}

#[async_trait]
impl BucketWriter for MemoryBucket {
    async fn bucket_put(&self, _bucket: &[u8], key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.entries.insert(
            key.to_vec(),
            Entry {
                value: value.to_vec(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn bucket_delete(&self, _bucket: &[u8], key: &[u8]) -> StoreResult<()> {
        self.entries.remove(key);
        Ok(())
    }
}

#[async_trait]
impl BucketExpiringWriter for MemoryBucket {
    async fn bucket_put_expire(
        &self,
        _bucket: &[u8],
        key: &[u8],
        value: &[u8],
        expires_at: u64,
    ) -> StoreResult<()> {
        self.entries.insert(
            key.to_vec(),
            Entry {
                value: value.to_vec(),
                expires_at: Some(expires_at),
            },
        );
        Ok(())
    }
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
