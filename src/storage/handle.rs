//! Bucket capabilities.
//!
//! A bucket is served through up to three independent capabilities. A
//! [`BucketHandle`] carries each of them as an optional field; callers check
//! for presence instead of probing the concrete type.

use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// Opaque bucket name.
pub type BucketName = Vec<u8>;

/// Lossy printable form of a bucket name, for logs and error messages.
pub fn display_bucket(bucket: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(bucket)
}

#[async_trait]
pub trait BucketReader: Send + Sync {
    async fn bucket_get(&self, bucket: &[u8], key: &[u8]) -> StoreResult<Vec<u8>>;
}

#[async_trait]
pub trait BucketWriter: Send + Sync {
    async fn bucket_put(&self, bucket: &[u8], key: &[u8], value: &[u8]) -> StoreResult<()>;

    async fn bucket_delete(&self, bucket: &[u8], key: &[u8]) -> StoreResult<()>;
}

#[async_trait]
pub trait BucketExpiringWriter: Send + Sync {
    /// `expires_at` is a Unix timestamp in seconds.
    async fn bucket_put_expire(
        &self,
        bucket: &[u8],
        key: &[u8],
        value: &[u8],
        expires_at: u64,
    ) -> StoreResult<()>;
}

#[derive(Clone, Default)]
pub struct BucketHandle {
    pub reader: Option<Arc<dyn BucketReader>>,
    pub writer: Option<Arc<dyn BucketWriter>>,
    pub writer_ex: Option<Arc<dyn BucketExpiringWriter>>,
}

impl BucketHandle {
    /// Handle exposing every capability of `engine`.
    pub fn full<T>(engine: Arc<T>) -> Self
    where
        T: BucketReader + BucketWriter + BucketExpiringWriter + 'static,
    {
        Self {
            reader: Some(engine.clone()),
            writer: Some(engine.clone()),
            writer_ex: Some(engine),
        }
    }

    pub fn read_only<T>(engine: Arc<T>) -> Self
    where
        T: BucketReader + 'static,
    {
        Self {
            reader: Some(engine),
            writer: None,
            writer_ex: None,
        }
    }

    pub async fn get(&self, bucket: &[u8], key: &[u8]) -> StoreResult<Vec<u8>> {
        match &self.reader {
            Some(reader) => reader.bucket_get(bucket, key).await,
            None => Err(StoreError::NotImplemented),
        }
    }

    pub async fn put(&self, bucket: &[u8], key: &[u8], value: &[u8]) -> StoreResult<()> {
        match &self.writer {
            Some(writer) => writer.bucket_put(bucket, key, value).await,
            None => Err(StoreError::NotImplemented),
        }
    }

    pub async fn delete(&self, bucket: &[u8], key: &[u8]) -> StoreResult<()> {
        match &self.writer {
            Some(writer) => writer.bucket_delete(bucket, key).await,
            None => Err(StoreError::NotImplemented),
        }
    }

    pub async fn put_with_expiry(
        &self,
        bucket: &[u8],
        key: &[u8],
        value: &[u8],
        expires_at: u64,
    ) -> StoreResult<()> {
        match &self.writer_ex {
            Some(writer) => writer.bucket_put_expire(bucket, key, value, expires_at).await,
            None => Err(StoreError::NotImplemented),
        }
    }
}

impl fmt::Debug for BucketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketHandle")
            .field("reader", &self.reader.is_some())
            .field("writer", &self.writer.is_some())
            .field("writer_ex", &self.writer_ex.is_some())
            .finish()
    }
}
