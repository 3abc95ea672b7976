//! Node Assembly
//!
//! Wires one process together: the bucket RPC listener, the directory, the
//! gossip membership that drives it, cluster routing, and the background
//! tasks (scheduler, capacity checkers, departed-node reaper, stats).
//!
//! ## Startup Order
//! 1. Bind the RPC listener, so the advertised metadata carries its real port.
//! 2. Build the directory and provision the configured buckets.
//! 3. Start membership with the directory as its delegate.
//! 4. Serve the bucket RPC and start routing and background tasks.

use crate::cluster::pool::ConnectionPool;
use crate::cluster::scheduler::BucketScheduler;
use crate::cluster::ClusterSelector;
use crate::config::NodeConfig;
use crate::directory::health::HealthFanout;
use crate::directory::netbucket::ProviderRegistry;
use crate::directory::{Directory, DirectoryConfig};
use crate::membership::service::MembershipService;
use crate::membership::types::NodeId;
use crate::storage::capacity::{DiskProbe, HealthChecker};
use crate::storage::handle::BucketHandle;
use crate::storage::handlers::router;
use crate::storage::memory::MemoryBucket;
use crate::storage::selector::LocalSelector;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const STATS_INTERVAL: Duration = Duration::from_secs(30);

pub struct BucketNode {
    pub directory: Arc<Directory>,
    pub membership: Arc<MembershipService>,
    pub selector: Arc<ClusterSelector>,
    pub scheduler: Arc<BucketScheduler>,
    pub fanout: Arc<HealthFanout>,
    rpc_addr: SocketAddr,
    shutdown: CancellationToken,
}

impl BucketNode {
    pub async fn start(config: NodeConfig) -> Result<Self> {
        Self::start_with_providers(config, Arc::new(ProviderRegistry::new())).await
    }

    /// Starts a node whose network buckets open through `providers`.
    pub async fn start_with_providers(
        config: NodeConfig,
        providers: Arc<ProviderRegistry>,
    ) -> Result<Self> {
        let name = config.node_id();
        let shutdown = CancellationToken::new();

        // 1. RPC listener:
        let listener = tokio::net::TcpListener::bind(config.rpc_addr())
            .await
            .with_context(|| format!("binding bucket RPC on {}", config.rpc_addr()))?;
        let rpc_addr = listener.local_addr()?;

        // 2. Directory and local buckets:
        let directory = Directory::new(
            DirectoryConfig {
                retransmit_mult: config.tuning.retransmit_mult,
                ..DirectoryConfig::new(name.clone(), config.loc.clone(), rpc_addr.port())
            },
            providers,
        );
        let fanout = Arc::new(HealthFanout::new());
        fanout.add_receiver(directory.clone());

        for bucket in &config.buckets {
            let engine = Arc::new(MemoryBucket::new());
            directory.add_bucket(bucket.name.as_bytes(), BucketHandle::full(engine));
        }
        for net in &config.net_buckets {
            if !directory.register_net_bucket(
                &net.provider,
                net.name.as_bytes(),
                net.meta.as_bytes(),
                net.global,
            ) {
                tracing::warn!(
                    "Network bucket {} was not registered (provider {})",
                    net.name,
                    net.provider
                );
            }
        }

        // 3. Membership (UDP gossip):
        let membership =
            MembershipService::new(config.membership_config(name.clone()), directory.clone())
                .await?;
        directory.attach_transport(&membership);
        tracing::info!(
            "Node {} gossiping on {}, bucket RPC on {}",
            name,
            membership.local_node.gossip_addr,
            rpc_addr
        );
        if config.seeds.is_empty() {
            tracing::info!("Starting as seed node (founder)");
        } else {
            tracing::info!("Seed nodes: {:?}", config.seeds);
        }
        membership.clone().start().await;

        // 4. Bucket RPC server:
        let local = Arc::new(LocalSelector::new(
            directory.net_buckets.clone(),
            directory.buckets.clone(),
        ));
        let app = router(local.clone());
        let stop = shutdown.clone();
        tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { stop.cancelled().await })
                .await;
            if let Err(e) = served {
                tracing::error!("Bucket RPC server failed: {}", e);
            }
        });

        // 5. Routing and background tasks:
        let pool = Arc::new(ConnectionPool::new(config.tuning.rpc_deadline()));
        let selector = ClusterSelector::new(directory.clone(), local, pool);

        let scheduler =
            BucketScheduler::with_interval(directory.clone(), config.tuning.scheduler_interval());
        scheduler.refresh();
        scheduler.clone().start(shutdown.clone());

        for bucket in &config.buckets {
            if let Some(path) = &bucket.path {
                HealthChecker::new(
                    bucket.name.as_bytes(),
                    path.clone(),
                    Arc::new(DiskProbe),
                    fanout.clone(),
                )
                .with_interval(config.tuning.health_check_interval())
                .start(shutdown.clone());
            }
        }

        directory
            .clone()
            .start_reaper(config.tuning.departed_grace(), shutdown.clone());

        let node = Self {
            directory,
            membership,
            selector,
            scheduler,
            fanout,
            rpc_addr,
            shutdown,
        };
        node.spawn_stats_reporter();
        Ok(node)
    }

    pub fn name(&self) -> &NodeId {
        self.directory.name()
    }

    pub fn gossip_addr(&self) -> SocketAddr {
        self.membership.local_node.gossip_addr
    }

    pub fn rpc_addr(&self) -> SocketAddr {
        self.rpc_addr
    }

    /// Announces departure to the cluster and stops every background task.
    pub async fn shutdown(&self) {
        self.membership.leave().await;
        self.shutdown.cancel();
        tracing::info!("Node {} stopped", self.name());
    }

    fn spawn_stats_reporter(&self) {
        let membership = self.membership.clone();
        let directory = self.directory.clone();
        let selector = self.selector.clone();
        let stop = self.shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(STATS_INTERVAL);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = interval.tick() => {}
                }
                let alive = membership.get_alive_members();
                tracing::info!(
                    "Cluster stats: {} alive nodes, {} owned buckets, {} network buckets, {} pooled peers",
                    alive.len(),
                    directory.ownership.bucket_list().len(),
                    directory.net_buckets.len(),
                    selector.pool().len()
                );
                for node in alive {
                    tracing::debug!(
                        "  - {} gossip={} (inc={})",
                        node.id,
                        node.gossip_addr,
                        node.incarnation
                    );
                }
            }
        });
    }
}
