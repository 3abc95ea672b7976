//! Network-bucket registry.
//!
//! A network bucket is opened through a named provider rather than
//! pre-provisioned. Registration is first-writer-wins: once a bucket has a
//! live session, later offers for the same name are acknowledged but their
//! freshly opened session is closed again.

use crate::error::StoreResult;
use crate::storage::handle::{display_bucket, BucketHandle, BucketName};
use crate::storage::memory::MemoryBucket;

use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Provider name of the built-in in-memory engine.
pub const MEMORY_PROVIDER: &str = "memory";

pub trait SessionCloser: Send + Sync {
    fn close(&self) -> StoreResult<()>;
}

/// An opened connection to a network bucket.
#[derive(Default)]
pub struct Session {
    pub handle: BucketHandle,
    closer: Option<Box<dyn SessionCloser>>,
}

impl Session {
    pub fn new(handle: BucketHandle) -> Self {
        Self {
            handle,
            closer: None,
        }
    }

    pub fn with_closer(mut self, closer: Box<dyn SessionCloser>) -> Self {
        self.closer = Some(closer);
        self
    }

    pub fn close(self) -> StoreResult<()> {
        match self.closer {
            Some(closer) => closer.close(),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("handle", &self.handle)
            .field("closer", &self.closer.is_some())
            .finish()
    }
}

/// Opens a session for `(bucket, meta)`.
pub type ProviderFn = Arc<dyn Fn(&[u8], &[u8]) -> StoreResult<Session> + Send + Sync>;

/// Named session factories, consulted by [`NetBucketRegistry::offer`].
pub struct ProviderRegistry {
    providers: DashMap<String, ProviderFn>,
}

impl ProviderRegistry {
    /// Registry with the built-in `memory` provider installed.
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.register(MEMORY_PROVIDER, |_bucket: &[u8], _meta: &[u8]| {
            Ok(Session::new(BucketHandle::full(Arc::new(MemoryBucket::new()))))
        });
        registry
    }

    pub fn empty() -> Self {
        Self {
            providers: DashMap::new(),
        }
    }

    pub fn register<F>(&self, name: &str, open: F)
    where
        F: Fn(&[u8], &[u8]) -> StoreResult<Session> + Send + Sync + 'static,
    {
        self.providers.insert(name.to_string(), Arc::new(open));
    }

    pub fn get(&self, name: &str) -> Option<ProviderFn> {
        self.providers.get(name).map(|entry| entry.value().clone())
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetScope {
    /// Owned by one node, reachable through the ownership index.
    Local,
    /// Opened on every node.
    Global,
}

/// A registration as it is replayed to a joining peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetRegistration {
    pub bucket: BucketName,
    pub provider: String,
    pub meta: Vec<u8>,
    pub global: bool,
}

#[derive(Debug)]
struct NetEntry {
    provider: String,
    meta: Vec<u8>,
    global: bool,
    session: Session,
}

pub struct NetBucketRegistry {
    providers: Arc<ProviderRegistry>,
    entries: RwLock<HashMap<BucketName, NetEntry>>,
}

impl NetBucketRegistry {
    pub fn new(providers: Arc<ProviderRegistry>) -> Self {
        Self {
            providers,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Opens `bucket` through `provider` unless it is already registered.
    ///
    /// Returns `true` if the bucket is registered afterwards, whether by this
    /// call or an earlier one. Returns `false` on an unknown provider or a
    /// failed open.
    pub fn offer(&self, provider: &str, bucket: &[u8], meta: &[u8], global: bool) -> bool {
        if self.entries.read().contains_key(bucket) {
            return true;
        }

        let open = match self.providers.get(provider) {
            Some(open) => open,
            None => {
                tracing::warn!(
                    "No provider '{}' for network bucket {}",
                    provider,
                    display_bucket(bucket)
                );
                return false;
            }
        };

        // Opening may block; it runs outside the lock.
        let session = match open(bucket, meta) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(
                    "Provider '{}' failed to open {}: {}",
                    provider,
                    display_bucket(bucket),
                    e
                );
                return false;
            }
        };

        let rejected = {
            let mut entries = self.entries.write();
            if entries.contains_key(bucket) {
                Some(session)
            } else {
                entries.insert(
                    bucket.to_vec(),
                    NetEntry {
                        provider: provider.to_string(),
                        meta: meta.to_vec(),
                        global,
                        session,
                    },
                );
                None
            }
        };

        match rejected {
            Some(session) => {
                tracing::debug!("Lost registration race for {}", display_bucket(bucket));
                if let Err(e) = session.close() {
                    tracing::debug!("Closing rejected session failed: {}", e);
                }
            }
            None => {
                tracing::info!(
                    "Registered network bucket {} (provider={}, global={})",
                    display_bucket(bucket),
                    provider,
                    global
                );
            }
        }
        true
    }

    /// Unregisters `bucket` and closes its session. Returns `true` if it was present.
    pub fn remove(&self, bucket: &[u8]) -> bool {
        let entry = self.entries.write().remove(bucket);
        match entry {
            Some(entry) => {
                if let Err(e) = entry.session.close() {
                    tracing::debug!("Closing session of {} failed: {}", display_bucket(bucket), e);
                }
                tracing::info!("Unregistered network bucket {}", display_bucket(bucket));
                true
            }
            None => false,
        }
    }

    /// `None` if `bucket` is not a registered network bucket.
    pub fn is_net(&self, bucket: &[u8]) -> Option<NetScope> {
        self.entries.read().get(bucket).map(|entry| {
            if entry.global {
                NetScope::Global
            } else {
                NetScope::Local
            }
        })
    }

    pub fn get(&self, bucket: &[u8]) -> Option<BucketHandle> {
        self.entries
            .read()
            .get(bucket)
            .map(|entry| entry.session.handle.clone())
    }

    pub fn registrations(&self) -> Vec<NetRegistration> {
        self.entries
            .read()
            .iter()
            .map(|(bucket, entry)| NetRegistration {
                bucket: bucket.clone(),
                provider: entry.provider.clone(),
                meta: entry.meta.clone(),
                global: entry.global,
            })
            .collect()
    }

    /// Names of the node-local (non-global) registrations.
    pub fn local_buckets(&self) -> Vec<BucketName> {
        self.entries
            .read()
            .iter()
            .filter(|(_, entry)| !entry.global)
            .map(|(bucket, _)| bucket.clone())
            .collect()
    }

    pub fn bucket_list(&self) -> Vec<BucketName> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
