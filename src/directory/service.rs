use super::command::{decode_commands, encode_commands, Command, QueuedCommand};
use super::health::{Health, HealthReceiver, HealthRegistry};
use super::metadata::{default_distance, sort_by_distance, DistanceFn, LocalMeta, NodeMetadata};
use super::netbucket::{NetBucketRegistry, NetScope, ProviderRegistry};
use super::ownership::OwnershipIndex;
use crate::membership::broadcast::{Broadcast, TransmitLimitedQueue};
use crate::membership::delegate::{GossipTransport, MembershipDelegate, MergeRejected};
use crate::membership::types::{Node, NodeId};
use crate::storage::bucket_map::LocalBucketMap;
use crate::storage::handle::{display_bucket, BucketHandle};

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Called with the metadata of a node that joined or left.
pub type NodeListener = Arc<dyn Fn(&NodeMetadata) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub name: NodeId,
    pub loc: String,
    /// Port of this node's bucket RPC server.
    pub rpc_port: u16,
    pub retransmit_mult: usize,
}

impl DirectoryConfig {
    pub fn new(name: NodeId, loc: impl Into<String>, rpc_port: u16) -> Self {
        Self {
            name,
            loc: loc.into(),
            rpc_port,
            retransmit_mult: 4,
        }
    }
}

#[derive(Debug, Clone)]
struct NodeRecord {
    meta: Option<NodeMetadata>,
    departed: Option<Instant>,
}

/// The bucket directory of one node.
///
/// Owns the ownership index, the network-bucket registry, the health
/// registry and the local bucket map, and keeps them converged with the rest
/// of the cluster by acting as the membership delegate.
pub struct Directory {
    name: NodeId,
    local_meta: LocalMeta,
    pub ownership: OwnershipIndex,
    pub net_buckets: Arc<NetBucketRegistry>,
    pub health: HealthRegistry,
    pub buckets: Arc<LocalBucketMap>,
    nodes: RwLock<HashMap<NodeId, NodeRecord>>,
    discovery_seq: AtomicU64,
    queue: TransmitLimitedQueue<QueuedCommand>,
    transport: RwLock<Option<Weak<dyn GossipTransport>>>,
    join_listeners: RwLock<Vec<NodeListener>>,
    leave_listeners: RwLock<Vec<NodeListener>>,
    distance: RwLock<DistanceFn>,
}

impl Directory {
    pub fn new(config: DirectoryConfig, providers: Arc<ProviderRegistry>) -> Arc<Self> {
        let local_meta = LocalMeta {
            loc: config.loc,
            port: config.rpc_port,
        };
        let distance: DistanceFn = Arc::new(default_distance);
        Arc::new(Self {
            name: config.name,
            local_meta,
            ownership: OwnershipIndex::new(),
            net_buckets: Arc::new(NetBucketRegistry::new(providers)),
            health: HealthRegistry::new(),
            buckets: Arc::new(LocalBucketMap::new()),
            nodes: RwLock::new(HashMap::new()),
            discovery_seq: AtomicU64::new(0),
            queue: TransmitLimitedQueue::new(config.retransmit_mult),
            transport: RwLock::new(None),
            join_listeners: RwLock::new(Vec::new()),
            leave_listeners: RwLock::new(Vec::new()),
            distance: RwLock::new(distance),
        })
    }

    /// Connects the directory to the membership transport that drives it.
    ///
    /// Only a weak reference is kept: the transport owns the directory as
    /// its delegate.
    pub fn attach_transport<T>(&self, transport: &Arc<T>)
    where
        T: GossipTransport + 'static,
    {
        let weak: Weak<T> = Arc::downgrade(transport);
        let weak: Weak<dyn GossipTransport> = weak;
        *self.transport.write() = Some(weak);
    }

    fn transport(&self) -> Option<Arc<dyn GossipTransport>> {
        self.transport.read().as_ref().and_then(Weak::upgrade)
    }

    pub fn name(&self) -> &NodeId {
        &self.name
    }

    pub fn loc(&self) -> &str {
        &self.local_meta.loc
    }

    pub fn rpc_port(&self) -> u16 {
        self.local_meta.port
    }

    pub fn set_distance_fn(&self, distance: DistanceFn) {
        *self.distance.write() = distance;
    }

    // --- Local mutations, replicated as commands ---

    /// Serves `bucket` from this node and announces ownership.
    pub fn add_bucket(&self, bucket: &[u8], handle: BucketHandle) {
        self.buckets.add(bucket, handle);
        self.ownership.set(&self.name, bucket);
        tracing::info!("Serving local bucket {}", display_bucket(bucket));
        self.broadcast(Command::AddOwnership {
            node: self.name.clone(),
            bucket: bucket.to_vec(),
        });
    }

    pub fn delete_bucket(&self, bucket: &[u8]) -> bool {
        let removed = self.buckets.remove(bucket);
        self.ownership.remove(&self.name, bucket);
        if removed {
            tracing::info!("Stopped serving local bucket {}", display_bucket(bucket));
            self.broadcast(Command::DropOwnership {
                node: self.name.clone(),
                bucket: bucket.to_vec(),
            });
        }
        removed
    }

    /// Opens a network bucket here. A global one is offered on every node.
    pub fn register_net_bucket(&self, provider: &str, bucket: &[u8], meta: &[u8], global: bool) -> bool {
        if !self.net_buckets.offer(provider, bucket, meta, global) {
            return false;
        }
        if !global {
            self.ownership.set(&self.name, bucket);
        }
        self.broadcast(Command::RegisterNetBucket {
            node: self.name.clone(),
            provider: provider.to_string(),
            bucket: bucket.to_vec(),
            meta: meta.to_vec(),
            global,
        });
        true
    }

    pub fn unregister_net_bucket(&self, bucket: &[u8]) -> bool {
        let scope = match self.net_buckets.is_net(bucket) {
            Some(scope) => scope,
            None => return false,
        };
        self.net_buckets.remove(bucket);
        let global = scope == NetScope::Global;
        if !global {
            self.ownership.remove(&self.name, bucket);
        }
        self.broadcast(Command::UnregisterNetBucket {
            node: self.name.clone(),
            bucket: bucket.to_vec(),
            global,
        });
        true
    }

    fn broadcast(&self, command: Command) {
        match QueuedCommand::new(command) {
            Ok(queued) => self.queue.queue_broadcast(queued),
            Err(e) => tracing::error!("Failed to encode directory command: {}", e),
        }
    }

    /// Commands too large for one gossip datagram go to every live peer
    /// over the reliable channel instead.
    fn send_oversized(&self, transport: &dyn GossipTransport, overhead: usize, limit: usize) {
        let oversized = self.queue.drain_oversized(overhead, limit);
        if oversized.is_empty() {
            return;
        }
        let peers = transport.alive_members();
        for queued in oversized {
            tracing::debug!(
                "Directory command of {} bytes sent reliably to {} peers",
                queued.message().len(),
                peers.len()
            );
            for peer in &peers {
                transport.send_reliable(peer, queued.message().to_vec());
            }
        }
    }

    /// Number of commands waiting to be gossiped.
    pub fn pending_broadcasts(&self) -> usize {
        self.queue.len()
    }

    // --- Remote commands ---

    /// Applies one command. Every command is idempotent.
    pub fn apply(&self, command: &Command) {
        match command {
            Command::AddOwnership { node, bucket } => {
                self.ownership.set(node, bucket);
            }
            Command::DropOwnership { node, bucket } => {
                self.ownership.remove(node, bucket);
            }
            Command::RegisterNetBucket {
                node,
                provider,
                bucket,
                meta,
                global,
            } => {
                if *global {
                    self.net_buckets.offer(provider, bucket, meta, true);
                } else {
                    self.ownership.set(node, bucket);
                }
            }
            Command::UnregisterNetBucket {
                node,
                bucket,
                global,
            } => {
                if *global {
                    self.net_buckets.remove(bucket);
                } else {
                    self.ownership.remove(node, bucket);
                }
            }
            Command::SetHealth { bucket, writable } => {
                self.health.set_writable(bucket, *writable);
            }
            Command::RequestState { node } => {
                self.answer_state_request(node);
            }
        }
    }

    fn answer_state_request(&self, node: &NodeId) {
        if *node == self.name {
            return;
        }
        let peer = match self.transport().and_then(|transport| transport.member(node)) {
            Some(peer) => peer,
            None => {
                tracing::debug!("State request from unknown node {}", node);
                return;
            }
        };
        self.push_state(&peer, false);
    }

    /// Decodes and applies a command stream. Returns how many were applied.
    pub fn handle_message(&self, buf: &[u8]) -> usize {
        let (commands, error) = decode_commands(buf);
        for command in &commands {
            self.apply(command);
        }
        if let Some(e) = error {
            tracing::warn!(
                "Dropped rest of directory message after {} commands: {}",
                commands.len(),
                e
            );
        }
        commands.len()
    }

    /// The commands that bring a fresh peer up to date with this node.
    pub fn snapshot_commands(&self) -> Vec<Command> {
        let live: Vec<NodeId> = self
            .nodes
            .read()
            .iter()
            .filter(|(_, record)| record.departed.is_none())
            .map(|(id, _)| id.clone())
            .collect();

        let mut commands: Vec<Command> = self
            .ownership
            .entries()
            .into_iter()
            .filter(|(node, _)| *node == self.name || live.contains(node))
            .map(|(node, bucket)| Command::AddOwnership { node, bucket })
            .collect();

        for registration in self.net_buckets.registrations() {
            if registration.global {
                commands.push(Command::RegisterNetBucket {
                    node: self.name.clone(),
                    provider: registration.provider,
                    bucket: registration.bucket,
                    meta: registration.meta,
                    global: true,
                });
            }
        }

        for health in self.health.all() {
            commands.push(Command::SetHealth {
                bucket: health.bucket,
                writable: health.writable,
            });
        }
        commands
    }

    /// Sends this node's state to `node`. With `request_back` the peer is
    /// asked to answer with its own state, which a peer that never saw us
    /// leave would otherwise not send.
    fn push_state(&self, node: &Node, request_back: bool) {
        let transport = match self.transport() {
            Some(transport) => transport,
            None => return,
        };
        let mut commands = self.snapshot_commands();
        if request_back {
            commands.push(Command::RequestState {
                node: self.name.clone(),
            });
        }
        if commands.is_empty() {
            return;
        }
        match encode_commands(&commands) {
            Ok(buf) => {
                tracing::debug!("Pushing {} directory entries to {}", commands.len(), node.id);
                transport.send_reliable(node, buf);
            }
            Err(e) => tracing::error!("Failed to encode state for {}: {}", node.id, e),
        }
    }

    // --- Node table ---

    fn record_node(&self, node: &Node) -> Option<NodeMetadata> {
        let decoded = if node.meta.is_empty() {
            None
        } else {
            match LocalMeta::decode(&node.meta) {
                Ok(meta) => Some(meta),
                Err(e) => {
                    tracing::debug!("Ignoring metadata of {}: {}", node.id, e);
                    None
                }
            }
        };

        let mut nodes = self.nodes.write();
        let seq = match nodes.get(&node.id) {
            Some(record) if record.departed.is_none() => record.meta.as_ref().map(|m| m.seq),
            _ => None,
        }
        .unwrap_or_else(|| self.discovery_seq.fetch_add(1, Ordering::Relaxed));

        let meta = decoded.map(|meta| NodeMetadata {
            name: node.id.clone(),
            addr: node.gossip_addr.ip(),
            loc: meta.loc,
            port: meta.port,
            seq,
        });
        nodes.insert(
            node.id.clone(),
            NodeRecord {
                meta: meta.clone(),
                departed: None,
            },
        );
        meta
    }

    pub fn node_metadata(&self, node: &NodeId) -> Option<NodeMetadata> {
        self.nodes.read().get(node).and_then(|record| record.meta.clone())
    }

    /// Metadata of each listed node; unknown nodes are skipped.
    pub fn nodes_metadata(&self, nodes: &[NodeId]) -> Vec<NodeMetadata> {
        let table = self.nodes.read();
        nodes
            .iter()
            .filter_map(|id| table.get(id).and_then(|record| record.meta.clone()))
            .collect()
    }

    pub fn sort_by_distance(&self, nodes: &mut [NodeMetadata]) {
        let distance = self.distance.read().clone();
        sort_by_distance(&self.local_meta.loc, nodes, &distance);
    }

    pub fn is_departed(&self, node: &NodeId) -> bool {
        self.nodes
            .read()
            .get(node)
            .map_or(false, |record| record.departed.is_some())
    }

    /// Evicts nodes that left more than `grace` ago. Returns how many were evicted.
    pub fn sweep_departed(&self, grace: Duration) -> usize {
        let now = Instant::now();
        let mut nodes = self.nodes.write();
        let before = nodes.len();
        nodes.retain(|_, record| match record.departed {
            Some(since) => now.duration_since(since) < grace,
            None => true,
        });
        before - nodes.len()
    }

    pub fn start_reaper(self: Arc<Self>, grace: Duration, shutdown: CancellationToken) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(grace.max(Duration::from_secs(1)));
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let evicted = self.sweep_departed(grace);
                        if evicted > 0 {
                            tracing::info!("Evicted {} departed nodes from the directory", evicted);
                        }
                    }
                }
            }
        });
    }

    // --- Listeners ---

    pub fn add_join_listener(&self, listener: NodeListener) {
        self.join_listeners.write().push(listener);
    }

    pub fn add_leave_listener(&self, listener: NodeListener) {
        self.leave_listeners.write().push(listener);
    }

    fn fire(listeners: &RwLock<Vec<NodeListener>>, meta: &NodeMetadata) {
        let snapshot: Vec<NodeListener> = listeners.read().clone();
        for listener in snapshot {
            listener(meta);
        }
    }
}

impl HealthReceiver for Directory {
    fn issue_health(&self, health: &Health) {
        let changed = self.health.set_writable(&health.bucket, health.writable);
        if changed {
            tracing::info!(
                "Bucket {} is now {}",
                display_bucket(&health.bucket),
                if health.writable { "writable" } else { "read-only" }
            );
        }
        self.broadcast(Command::SetHealth {
            bucket: health.bucket.clone(),
            writable: health.writable,
        });
    }
}

impl MembershipDelegate for Directory {
    fn node_meta(&self, limit: usize) -> Vec<u8> {
        let encoded = self.local_meta.encode();
        if encoded.len() > limit {
            tracing::warn!(
                "Node metadata of {} bytes exceeds the {} byte limit, not advertising it",
                encoded.len(),
                limit
            );
            return Vec::new();
        }
        encoded
    }

    fn notify_msg(&self, msg: &[u8]) {
        self.handle_message(msg);
    }

    fn get_broadcasts(&self, overhead: usize, limit: usize) -> Vec<Vec<u8>> {
        let transport = self.transport();
        let num_nodes = match &transport {
            Some(transport) => {
                self.send_oversized(transport.as_ref(), overhead, limit);
                transport.num_members()
            }
            None => self
                .nodes
                .read()
                .values()
                .filter(|record| record.departed.is_none())
                .count()
                .max(1),
        };
        self.queue.get_broadcasts(num_nodes, overhead, limit)
    }

    fn notify_join(&self, node: &Node) {
        if node.id == self.name {
            return;
        }
        let meta = self.record_node(node);
        tracing::info!("Directory learned about node {} ({})", node.id, node.gossip_addr);
        if let Some(meta) = meta {
            Self::fire(&self.join_listeners, &meta);
        }
        self.push_state(node, true);
    }

    fn notify_leave(&self, node: &Node) {
        if node.id == self.name {
            return;
        }
        let dropped = self.ownership.drop_node(&node.id);
        let meta = {
            let mut nodes = self.nodes.write();
            match nodes.get_mut(&node.id) {
                Some(record) => {
                    record.departed = Some(Instant::now());
                    record.meta.clone()
                }
                None => None,
            }
        };
        tracing::info!(
            "Node {} left, dropped ownership of {} buckets",
            node.id,
            dropped.len()
        );
        if let Some(meta) = meta {
            Self::fire(&self.leave_listeners, &meta);
        }
    }

    fn notify_update(&self, node: &Node) {
        if node.id != self.name {
            self.record_node(node);
        }
    }

    fn notify_merge(&self, peers: &[Node]) -> Result<(), MergeRejected> {
        for peer in peers {
            if peer.meta.is_empty() {
                continue;
            }
            LocalMeta::decode(&peer.meta).map_err(|e| MergeRejected {
                node: peer.id.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

