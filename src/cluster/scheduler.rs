//! Write-target scheduling.
//!
//! The scheduler keeps a deduplicated list of every bucket currently known
//! to the cluster (owned buckets and network-registered buckets) and answers
//! "pick one" uniformly at random. A single background task rebuilds the list
//! once per interval and publishes it atomically; readers never block.

use crate::directory::Directory;
use crate::storage::handle::BucketName;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_SCHEDULE_INTERVAL: Duration = Duration::from_secs(1);

/// Writer-side copy of the list, with positions for O(1) removal.
#[derive(Debug, Default)]
struct BucketList {
    list: Vec<BucketName>,
    index: HashMap<BucketName, usize>,
}

impl BucketList {
    fn add(&mut self, bucket: &BucketName) -> bool {
        if self.index.contains_key(bucket) {
            return false;
        }
        self.index.insert(bucket.clone(), self.list.len());
        self.list.push(bucket.clone());
        true
    }

    fn remove(&mut self, bucket: &BucketName) -> bool {
        let slot = match self.index.remove(bucket) {
            Some(slot) => slot,
            None => return false,
        };
        self.list.swap_remove(slot);
        if let Some(moved) = self.list.get(slot) {
            self.index.insert(moved.clone(), slot);
        }
        true
    }
}

pub struct BucketScheduler {
    directory: Arc<Directory>,
    state: Mutex<BucketList>,
    published: ArcSwap<Vec<BucketName>>,
    interval: Duration,
}

impl BucketScheduler {
    pub fn new(directory: Arc<Directory>) -> Arc<Self> {
        Self::with_interval(directory, DEFAULT_SCHEDULE_INTERVAL)
    }

    pub fn with_interval(directory: Arc<Directory>, interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            directory,
            state: Mutex::new(BucketList::default()),
            published: ArcSwap::from_pointee(Vec::new()),
            interval,
        })
    }

    /// Reconciles the list with `sources` and publishes it.
    ///
    /// A bucket present in several sources is counted once; buckets missing
    /// from every source are removed, present ones keep their position.
    pub fn update(&self, sources: &[Vec<BucketName>]) {
        let mut state = self.state.lock();

        let mut seen: HashSet<&BucketName> = HashSet::new();
        for bucket in sources.iter().flatten() {
            if !bucket.is_empty() {
                seen.insert(bucket);
            }
        }

        let stale: Vec<BucketName> = state
            .list
            .iter()
            .filter(|bucket| !seen.contains(bucket))
            .cloned()
            .collect();
        for bucket in &stale {
            state.remove(bucket);
        }
        let mut added = 0;
        for bucket in sources.iter().flatten() {
            if !bucket.is_empty() && state.add(bucket) {
                added += 1;
            }
        }
        if added > 0 || !stale.is_empty() {
            tracing::debug!(
                "Bucket list: +{} -{} ({} total)",
                added,
                stale.len(),
                state.list.len()
            );
        }

        self.published.store(Arc::new(state.list.clone()));
    }

    /// Pulls both sources from the directory and updates.
    pub fn refresh(&self) {
        let owned = self.directory.ownership.bucket_list();
        let net = self.directory.net_buckets.bucket_list();
        self.update(&[owned, net]);
    }

    /// A uniformly random bucket, or `None` while nothing is known.
    pub fn next_bucket(&self) -> Option<BucketName> {
        let list = self.published.load();
        if list.is_empty() {
            return None;
        }
        let i = rand::thread_rng().gen_range(0..list.len());
        Some(list[i].clone())
    }

    /// Snapshot of the published list.
    pub fn buckets(&self) -> Arc<Vec<BucketName>> {
        self.published.load_full()
    }

    pub fn start(self: Arc<Self>, shutdown: CancellationToken) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => self.refresh(),
                }
            }
            tracing::debug!("Bucket scheduler stopped");
        });
    }
}
