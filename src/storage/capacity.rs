//! Capacity-driven health checks.
//!
//! A [`HealthChecker`] periodically samples the free space behind one local
//! bucket and issues a [`Health`] record to the fan-out: the bucket stays
//! writable while at least [`MIN_AVAILABLE_BYTES`] and at least 1/1024 of the
//! device are free.

use crate::directory::health::{Health, HealthFanout};
use crate::storage::handle::{display_bucket, BucketName};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::Disks;
use tokio_util::sync::CancellationToken;

pub const MIN_AVAILABLE_BYTES: u64 = 256 * 1024 * 1024;
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

pub fn is_writable(available: u64, total: u64) -> bool {
    available >= MIN_AVAILABLE_BYTES && available >= total >> 10
}

/// Source of `(available, total)` bytes for a path.
pub trait CapacityProbe: Send + Sync {
    fn sample(&self, path: &Path) -> Option<(u64, u64)>;
}

/// Reads capacity from the disk whose mount point most specifically covers the path.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskProbe;

impl CapacityProbe for DiskProbe {
    fn sample(&self, path: &Path) -> Option<(u64, u64)> {
        let resolved = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let disks = Disks::new_with_refreshed_list();
        let mut best: Option<(usize, u64, u64)> = None;
        for disk in disks.list() {
            let mount = disk.mount_point();
            if !resolved.starts_with(mount) {
                continue;
            }
            let depth = mount.components().count();
            match best {
                Some((best_depth, _, _)) if depth < best_depth => {}
                _ => best = Some((depth, disk.available_space(), disk.total_space())),
            }
        }
        best.map(|(_, available, total)| (available, total))
    }
}

pub struct HealthChecker {
    bucket: BucketName,
    path: PathBuf,
    probe: Arc<dyn CapacityProbe>,
    fanout: Arc<HealthFanout>,
    interval: Duration,
}

impl HealthChecker {
    pub fn new(
        bucket: &[u8],
        path: impl Into<PathBuf>,
        probe: Arc<dyn CapacityProbe>,
        fanout: Arc<HealthFanout>,
    ) -> Self {
        Self {
            bucket: bucket.to_vec(),
            path: path.into(),
            probe,
            fanout,
            interval: DEFAULT_CHECK_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Samples once and issues the result. `None` if the path could not be sampled.
    pub fn check_once(&self) -> Option<bool> {
        let (available, total) = match self.probe.sample(&self.path) {
            Some(sample) => sample,
            None => {
                tracing::warn!(
                    "Cannot sample capacity of {} for bucket {}",
                    self.path.display(),
                    display_bucket(&self.bucket)
                );
                return None;
            }
        };
        let writable = is_writable(available, total);
        tracing::debug!(
            "Bucket {}: {} of {} bytes free, writable={}",
            display_bucket(&self.bucket),
            available,
            total,
            writable
        );
        self.fanout.issue(&Health {
            bucket: self.bucket.clone(),
            writable,
        });
        Some(writable)
    }

    pub fn start(self, shutdown: CancellationToken) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        self.check_once();
                    }
                }
            }
        });
    }
}
