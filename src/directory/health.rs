//! Bucket health.
//!
//! Health records are cluster-wide: whoever checks a bucket issues the result
//! through a [`HealthFanout`], and the directory (one of its receivers)
//! replicates it as a command.

use crate::storage::handle::BucketName;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    pub bucket: BucketName,
    pub writable: bool,
}

pub trait HealthReceiver: Send + Sync {
    fn issue_health(&self, health: &Health);
}

/// Last known writability per bucket.
#[derive(Debug, Default)]
pub struct HealthRegistry {
    records: RwLock<HashMap<BucketName, bool>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the stored value changed.
    pub fn set_writable(&self, bucket: &[u8], writable: bool) -> bool {
        let previous = self.records.write().insert(bucket.to_vec(), writable);
        previous != Some(writable)
    }

    /// Writability of `bucket`, or `default` if nothing was recorded.
    pub fn get_writable(&self, bucket: &[u8], default: bool) -> bool {
        self.records.read().get(bucket).copied().unwrap_or(default)
    }

    pub fn all(&self) -> Vec<Health> {
        self.records
            .read()
            .iter()
            .map(|(bucket, writable)| Health {
                bucket: bucket.clone(),
                writable: *writable,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReceiverId(u64);

/// Distributes issued health records to every subscribed receiver.
#[derive(Default)]
pub struct HealthFanout {
    next_id: AtomicU64,
    receivers: Mutex<Vec<(ReceiverId, Arc<dyn HealthReceiver>)>>,
}

impl HealthFanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_receiver(&self, receiver: Arc<dyn HealthReceiver>) -> ReceiverId {
        let id = ReceiverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.receivers.lock().push((id, receiver));
        id
    }

    pub fn remove_receiver(&self, id: ReceiverId) -> bool {
        let mut receivers = self.receivers.lock();
        let before = receivers.len();
        receivers.retain(|(rid, _)| *rid != id);
        receivers.len() != before
    }

    pub fn issue(&self, health: &Health) {
        // Snapshot so receivers may subscribe or unsubscribe from inside the callback.
        let receivers: Vec<Arc<dyn HealthReceiver>> = self
            .receivers
            .lock()
            .iter()
            .map(|(_, receiver)| receiver.clone())
            .collect();
        for receiver in receivers {
            receiver.issue_health(health);
        }
    }

    pub fn len(&self) -> usize {
        self.receivers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.receivers.lock().is_empty()
    }
}
