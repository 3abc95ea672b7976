use anyhow::{Context, Result};
use dashmap::DashMap;
use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use std::{net::SocketAddr, time::Duration};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::delegate::{GossipTransport, MembershipDelegate};
use super::types::{GossipMessage, Node, NodeId, NodeState, ReliableFrame};

const MAX_DATAGRAM: usize = 65536;
const MAX_RELIABLE_FRAME: usize = 16 * 1024 * 1024;
const RELIABLE_SEND_TIMEOUT: Duration = Duration::from_secs(5);
const RELIABLE_READ_TIMEOUT: Duration = Duration::from_secs(5);
/// Per-payload framing cost of a `Broadcast` datagram (bincode length prefix).
pub const BROADCAST_OVERHEAD: usize = 8;

/// Bytes left for piggybacked payloads once the `Broadcast` envelope sent
/// by `from` is accounted for.
pub fn broadcast_budget(from: &NodeId, udp_limit: usize) -> usize {
    let envelope = GossipMessage::Broadcast {
        from: from.clone(),
        payloads: Vec::new(),
    };
    match bincode::serialized_size(&envelope) {
        Ok(header) => udp_limit.saturating_sub(header as usize),
        Err(_) => 0,
    }
}

/// Tunables of the membership service.
#[derive(Debug, Clone)]
pub struct MembershipConfig {
    pub name: NodeId,
    pub bind_addr: SocketAddr,
    /// Address peers should dial. Defaults to the bound address.
    pub advertise_addr: Option<SocketAddr>,
    pub seeds: Vec<SocketAddr>,
    pub gossip_interval: Duration,
    pub gossip_fanout: usize,
    pub failure_detection_interval: Duration,
    pub suspect_timeout: Duration,
    pub dead_timeout: Duration,
    pub retransmit_mult: usize,
    pub meta_limit: usize,
    pub udp_payload_limit: usize,
}

impl MembershipConfig {
    pub fn new(name: NodeId, bind_addr: SocketAddr) -> Self {
        Self {
            name,
            bind_addr,
            advertise_addr: None,
            seeds: Vec::new(),
            gossip_interval: Duration::from_millis(200),
            gossip_fanout: 3,
            failure_detection_interval: Duration::from_secs(1),
            suspect_timeout: Duration::from_secs(5),
            dead_timeout: Duration::from_secs(10),
            retransmit_mult: 4,
            meta_limit: 512,
            udp_payload_limit: 1400,
        }
    }
}

/// Membership events collected while the member table is locked and
/// dispatched to the delegate once it is released.
enum MemberEvent {
    Join(Node),
    Leave(Node),
    Update(Node),
}

pub struct MembershipService {
    pub local_node: Node,
    pub members: Arc<DashMap<NodeId, Node>>,
    socket: Arc<UdpSocket>,
    listener: parking_lot::Mutex<Option<TcpListener>>,
    incarnation: AtomicU64,
    delegate: Arc<dyn MembershipDelegate>,
    config: MembershipConfig,
    shutdown: CancellationToken,
}

impl MembershipService {
    pub async fn new(
        config: MembershipConfig,
        delegate: Arc<dyn MembershipDelegate>,
    ) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(config.bind_addr)
            .await
            .with_context(|| format!("binding gossip socket on {}", config.bind_addr))?;
        let bound = socket.local_addr()?;
        let listener = TcpListener::bind(bound)
            .await
            .with_context(|| format!("binding reliable listener on {}", bound))?;

        let mut meta = delegate.node_meta(config.meta_limit);
        if meta.len() > config.meta_limit {
            tracing::warn!(
                "Delegate metadata is {} bytes (limit {}), advertising none",
                meta.len(),
                config.meta_limit
            );
            meta.clear();
        }

        let local_node = Node {
            id: config.name.clone(),
            gossip_addr: config.advertise_addr.unwrap_or(bound),
            meta,
            state: NodeState::Alive,
            incarnation: 1,
            last_seen: Some(Instant::now()),
        };
        let members = Arc::new(DashMap::new());
        members.insert(local_node.id.clone(), local_node.clone());

        let service = Arc::new(Self {
            local_node,
            members,
            socket: Arc::new(socket),
            listener: parking_lot::Mutex::new(Some(listener)),
            incarnation: AtomicU64::new(1),
            delegate,
            config,
            shutdown: CancellationToken::new(),
        });

        service.join(&service.config.seeds).await?;
        Ok(service)
    }

    /// Sends a join request to every seed. Seeds answer with their member list.
    pub async fn join(&self, seeds: &[SocketAddr]) -> Result<()> {
        if seeds.is_empty() {
            return Ok(());
        }
        info!("Joining cluster via {} seed node(s)", seeds.len());

        let msg = GossipMessage::Join {
            node: self.current_local(),
        };
        let encoded = bincode::serialize(&msg)?;
        for seed_node in seeds.iter() {
            self.socket.send_to(&encoded, seed_node).await?;
            info!("Sent join request to {}", seed_node);
        }
        Ok(())
    }

    pub async fn start(self: Arc<Self>) {
        tracing::info!("Starting membership service...");

        {
            let service = self.clone();
            tokio::spawn(async move {
                service.gossip_loop().await;
            });
        }

        {
            let service = self.clone();
            tokio::spawn(async move {
                service.receive_loop().await;
            });
        }

        {
            let service = self.clone();
            tokio::spawn(async move {
                service.failure_detection_loop().await;
            });
        }

        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            let service = self.clone();
            tokio::spawn(async move {
                service.reliable_loop(listener).await;
            });
        }

        tracing::info!("All background tasks started");
    }

    /// Announces a graceful departure and stops the background tasks.
    pub async fn leave(&self) {
        let incarnation = self.incarnation.load(Ordering::SeqCst);
        let msg = GossipMessage::Leave {
            node_id: self.local_node.id.clone(),
            incarnation,
        };
        self.broadcast_message(msg).await;
        self.shutdown.cancel();
        tracing::info!("Left cluster as {}", self.local_node.id);
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn get_alive_members(&self) -> Vec<Node> {
        self.members
            .iter()
            .filter(|entry| entry.value().state == NodeState::Alive)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn get_member(&self, id: &NodeId) -> Option<Node> {
        self.members.get(id).map(|entry| entry.value().clone())
    }

    fn current_local(&self) -> Node {
        self.get_member(&self.local_node.id)
            .unwrap_or_else(|| self.local_node.clone())
    }

    fn alive_peers(&self) -> Vec<Node> {
        self.members
            .iter()
            .filter(|entry| {
                entry.value().id != self.local_node.id && entry.value().state == NodeState::Alive
            })
            .map(|entry| entry.value().clone())
            .collect()
    }

    async fn gossip_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.gossip_interval);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            let mut alive_members = self.alive_peers();
            if alive_members.is_empty() {
                continue;
            }
            alive_members.shuffle(&mut rand::thread_rng());

            let me = self.current_local();
            let ping = GossipMessage::Ping {
                from: me.id.clone(),
                incarnation: me.incarnation,
                meta: me.meta.clone(),
            };
            let target = &alive_members[0];
            self.send_to(&ping, target).await;

            let budget = broadcast_budget(&me.id, self.config.udp_payload_limit);
            for target in alive_members.iter().take(self.config.gossip_fanout) {
                let payloads = self.delegate.get_broadcasts(BROADCAST_OVERHEAD, budget);
                if payloads.is_empty() {
                    break;
                }
                let msg = GossipMessage::Broadcast {
                    from: me.id.clone(),
                    payloads,
                };
                self.send_to(&msg, target).await;
            }
        }
    }

    async fn send_to(&self, msg: &GossipMessage, target: &Node) {
        match bincode::serialize(msg) {
            Ok(encoded) => {
                if let Err(e) = self.socket.send_to(&encoded, target.gossip_addr).await {
                    tracing::warn!("Failed to send to {:?}: {}", target.id, e);
                }
            }
            Err(e) => tracing::error!("Failed to serialize gossip message: {}", e),
        }
    }

    async fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            let received = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => received,
            };

            match received {
                Ok((len, src)) => match bincode::deserialize::<GossipMessage>(&buf[..len]) {
                    Ok(msg) => {
                        if let Err(e) = self.handle_message(msg, src).await {
                            tracing::error!("Error handling message from {}: {}", src, e);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to deserialize message from {}: {}", src, e);
                    }
                },
                Err(e) => {
                    tracing::error!("Failed to receive UDP packet: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn handle_message(&self, msg: GossipMessage, src: SocketAddr) -> Result<()> {
        match msg {
            GossipMessage::Ping {
                from,
                incarnation,
                meta,
            } => {
                self.handle_ping(from, incarnation, meta, src).await?;
            }

            GossipMessage::Ack {
                from,
                incarnation,
                members,
            } => {
                self.handle_ack(from, incarnation, members);
            }

            GossipMessage::Join { node } => {
                self.handle_join(node, src).await?;
            }

            GossipMessage::Suspect {
                node_id,
                incarnation,
            } => {
                self.handle_suspect(node_id, incarnation).await;
            }

            GossipMessage::Alive {
                node_id,
                incarnation,
            } => {
                self.handle_alive(node_id, incarnation);
            }

            GossipMessage::Leave {
                node_id,
                incarnation,
            } => {
                self.handle_leave(node_id, incarnation);
            }

            GossipMessage::Broadcast { from, payloads } => {
                self.touch(&from);
                tracing::trace!("Received {} broadcast(s) from {:?}", payloads.len(), from);
                for payload in payloads {
                    self.delegate.notify_msg(&payload);
                }
            }
        }

        Ok(())
    }

    async fn handle_ping(
        &self,
        from: NodeId,
        from_incarnation: u64,
        meta: Vec<u8>,
        src: SocketAddr,
    ) -> Result<()> {
        tracing::debug!("Received ping from {:?}", from);

        let known = self.members.contains_key(&from);
        if known {
            self.touch(&from);
        }
        let observed = Node {
            id: from.clone(),
            gossip_addr: src,
            meta,
            state: NodeState::Alive,
            incarnation: from_incarnation,
            last_seen: Some(Instant::now()),
        };
        if let Some(event) = self.observe(observed) {
            self.dispatch(event);
        }

        let all_members: Vec<Node> = self
            .members
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let my_incarnation = self.incarnation.load(Ordering::SeqCst);
        let reply = GossipMessage::Ack {
            from: self.local_node.id.clone(),
            incarnation: my_incarnation,
            members: all_members,
        };

        let encoded = bincode::serialize(&reply)?;
        self.socket.send_to(&encoded, src).await?;

        tracing::debug!("Sent ack to {:?} with {} members", from, self.members.len());

        Ok(())
    }

    fn handle_ack(&self, from: NodeId, from_incarnation: u64, members: Vec<Node>) {
        tracing::debug!(
            "Received ack from {:?} (inc={}) with {} members",
            from,
            from_incarnation,
            members.len()
        );

        self.touch(&from);

        for member in members {
            if member.id == self.local_node.id {
                self.check_self_view(&member);
                continue;
            }
            if let Some(event) = self.observe(member) {
                self.dispatch(event);
            }
        }
    }

    /// Direct contact from a peer: refresh its liveness. A suspect or dead
    /// peer that talks to us is alive again.
    fn touch(&self, id: &NodeId) {
        let event = match self.members.get_mut(id) {
            Some(mut member) => {
                member.last_seen = Some(Instant::now());
                match member.state {
                    NodeState::Alive => None,
                    NodeState::Suspect => {
                        tracing::info!("{:?} answered, no longer suspect", member.id);
                        member.state = NodeState::Alive;
                        None
                    }
                    NodeState::Dead => {
                        tracing::info!("{:?} is back from the dead", member.id);
                        member.state = NodeState::Alive;
                        Some(MemberEvent::Join(member.clone()))
                    }
                }
            }
            None => None,
        };
        if let Some(event) = event {
            self.dispatch(event);
        }
    }

    /// Merges what another node told us about `incoming`. Returns the event
    /// to publish, if any. Metadata is validated through the delegate before
    /// it is accepted.
    fn observe(&self, mut incoming: Node) -> Option<MemberEvent> {
        if incoming.id == self.local_node.id {
            return None;
        }
        let now = Instant::now();
        let existing = self.get_member(&incoming.id);

        match existing {
            None => {
                if incoming.state != NodeState::Alive {
                    return None;
                }
                if let Err(e) = self.delegate.notify_merge(std::slice::from_ref(&incoming)) {
                    tracing::warn!("Refusing member {:?}: {}", incoming.id, e);
                    return None;
                }
                tracing::info!(
                    "Discovered new member: {:?} at {}",
                    incoming.id,
                    incoming.gossip_addr
                );
                incoming.last_seen = Some(now);
                self.members.insert(incoming.id.clone(), incoming.clone());
                Some(MemberEvent::Join(incoming))
            }
            Some(existing) => {
                let newer = incoming.incarnation > existing.incarnation;
                // Alive at the same incarnation overrides a suspect or dead
                // view; coming back from dead is a rejoin.
                let refuted = incoming.incarnation == existing.incarnation
                    && incoming.state == NodeState::Alive
                    && existing.state != NodeState::Alive;
                let meta_changed =
                    incoming.incarnation >= existing.incarnation && incoming.meta != existing.meta;

                if !newer && !refuted && !meta_changed {
                    return None;
                }
                if meta_changed {
                    if let Err(e) = self.delegate.notify_merge(std::slice::from_ref(&incoming)) {
                        tracing::warn!("Refusing metadata of {:?}: {}", incoming.id, e);
                        return None;
                    }
                }

                let mut updated = existing.clone();
                if newer || refuted {
                    tracing::debug!(
                        "Updating {:?}: inc {} -> {}",
                        incoming.id,
                        existing.incarnation,
                        incoming.incarnation,
                    );
                    updated.state = incoming.state;
                    updated.incarnation = incoming.incarnation;
                }
                if meta_changed {
                    updated.meta = std::mem::take(&mut incoming.meta);
                }
                updated.last_seen = Some(now);
                self.members.insert(updated.id.clone(), updated.clone());

                match (existing.state, updated.state) {
                    (NodeState::Dead, NodeState::Alive) | (NodeState::Dead, NodeState::Suspect) => {
                        Some(MemberEvent::Join(updated))
                    }
                    (NodeState::Alive, NodeState::Dead) | (NodeState::Suspect, NodeState::Dead) => {
                        Some(MemberEvent::Leave(updated))
                    }
                    _ if meta_changed => Some(MemberEvent::Update(updated)),
                    _ => None,
                }
            }
        }
    }

    /// Someone gossiped about us. Refute suspicion by outbidding it.
    fn check_self_view(&self, view: &Node) {
        if view.state == NodeState::Alive {
            return;
        }
        let mine = self.incarnation.load(Ordering::SeqCst);
        if view.incarnation < mine {
            return;
        }
        let bumped = self.bump_incarnation(view.incarnation);
        tracing::info!("Refuting {:?} view of ourselves (inc={})", view.state, bumped);
    }

    fn bump_incarnation(&self, at_least: u64) -> u64 {
        let mut current = self.incarnation.load(Ordering::SeqCst);
        loop {
            let next = current.max(at_least) + 1;
            match self.incarnation.compare_exchange(
                current,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    if let Some(mut me) = self.members.get_mut(&self.local_node.id) {
                        me.incarnation = next;
                        me.state = NodeState::Alive;
                    }
                    return next;
                }
                Err(actual) => current = actual,
            }
        }
    }

    async fn handle_suspect(&self, node_id: NodeId, incarnation: u64) {
        if node_id == self.local_node.id {
            if incarnation >= self.incarnation.load(Ordering::SeqCst) {
                let my_incarnation = self.bump_incarnation(incarnation);
                tracing::info!("Suspected by a peer, announcing alive (inc={})", my_incarnation);
                let msg = GossipMessage::Alive {
                    node_id,
                    incarnation: my_incarnation,
                };
                self.broadcast_message(msg).await;
            }
            return;
        }

        match self.members.get_mut(&node_id) {
            Some(mut existing) => {
                if incarnation >= existing.incarnation && existing.state == NodeState::Alive {
                    tracing::info!(
                        "Node {:?} at {} suspected",
                        existing.id,
                        existing.gossip_addr
                    );
                    existing.state = NodeState::Suspect;
                    existing.incarnation = incarnation;
                }
            }
            None => {
                tracing::debug!("Suspected node {:?} doesn't exist", node_id);
            }
        }
    }

    fn handle_alive(&self, node_id: NodeId, incarnation: u64) {
        let event = match self.members.get_mut(&node_id) {
            Some(mut existing) => {
                if incarnation > existing.incarnation
                    || (incarnation == existing.incarnation
                        && existing.state == NodeState::Suspect)
                {
                    tracing::info!(
                        "Node {:?} at {} is now Alive (inc={})",
                        existing.id,
                        existing.gossip_addr,
                        incarnation
                    );
                    let was_dead = existing.state == NodeState::Dead;
                    existing.state = NodeState::Alive;
                    existing.incarnation = incarnation;
                    existing.last_seen = Some(Instant::now());
                    if was_dead {
                        Some(MemberEvent::Join(existing.clone()))
                    } else {
                        None
                    }
                } else {
                    None
                }
            }
            None => {
                tracing::debug!("Alive message for unknown node {:?}", node_id);
                None
            }
        };
        if let Some(event) = event {
            self.dispatch(event);
        }
    }

    fn handle_leave(&self, node_id: NodeId, incarnation: u64) {
        let event = match self.members.get_mut(&node_id) {
            Some(mut existing) => {
                if incarnation >= existing.incarnation && existing.state != NodeState::Dead {
                    tracing::info!("Node {:?} left the cluster", existing.id);
                    existing.state = NodeState::Dead;
                    existing.incarnation = incarnation;
                    Some(MemberEvent::Leave(existing.clone()))
                } else {
                    None
                }
            }
            None => None,
        };
        if let Some(event) = event {
            self.dispatch(event);
        }
    }

    async fn handle_join(&self, node: Node, src: SocketAddr) -> Result<()> {
        tracing::info!("Node {:?} joining cluster at {}", node.id, node.gossip_addr);

        let mut node = node;
        node.state = NodeState::Alive;
        let reply_to = node.gossip_addr;
        let id = node.id.clone();
        if let Some(event) = self.observe(node) {
            self.dispatch(event);
        } else {
            self.touch(&id);
        }
        tracing::info!("Cluster size now: {}", self.members.len());

        if !self.members.contains_key(&id) {
            return Ok(());
        }

        let reply = GossipMessage::Ack {
            from: self.local_node.id.clone(),
            incarnation: self.incarnation.load(Ordering::SeqCst),
            members: self
                .members
                .iter()
                .map(|entry| entry.value().clone())
                .collect(),
        };
        let encoded = bincode::serialize(&reply)?;
        self.socket.send_to(&encoded, reply_to).await?;
        if reply_to != src {
            self.socket.send_to(&encoded, src).await?;
        }
        Ok(())
    }

    fn dispatch(&self, event: MemberEvent) {
        match event {
            MemberEvent::Join(node) => self.delegate.notify_join(&node),
            MemberEvent::Leave(node) => self.delegate.notify_leave(&node),
            MemberEvent::Update(node) => self.delegate.notify_update(&node),
        }
    }

    async fn failure_detection_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.failure_detection_interval);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            let now = Instant::now();

            let mut suspicions = Vec::new();
            let mut events = Vec::new();

            for mut entry in self.members.iter_mut() {
                let member = entry.value_mut();

                if member.id == self.local_node.id {
                    continue;
                }

                if let Some(last_seen) = member.last_seen {
                    let elapsed = now.duration_since(last_seen);

                    match member.state {
                        NodeState::Alive => {
                            if elapsed > self.config.suspect_timeout {
                                tracing::warn!(
                                    "Node {:?} suspected (no contact for {:?})",
                                    member.id,
                                    elapsed
                                );

                                member.state = NodeState::Suspect;
                                let msg = GossipMessage::Suspect {
                                    node_id: member.id.clone(),
                                    incarnation: member.incarnation,
                                };
                                suspicions.push((msg, member.clone()));
                            }
                        }

                        NodeState::Suspect => {
                            if elapsed > self.config.dead_timeout {
                                tracing::info!(
                                    "Node {:?} declared DEAD (no contact for {:?})",
                                    member.id,
                                    elapsed
                                );

                                member.state = NodeState::Dead;
                                events.push(MemberEvent::Leave(member.clone()));
                            }
                        }

                        NodeState::Dead => {}
                    }
                } else {
                    member.last_seen = Some(now);
                }
            }

            for event in events {
                self.dispatch(event);
            }

            // The suspect itself is told too, so it can refute.
            for (msg, suspect) in suspicions {
                self.send_to(&msg, &suspect).await;
                self.broadcast_message(msg).await;
            }
        }
    }

    async fn broadcast_message(&self, msg: GossipMessage) {
        if let Ok(encoded) = bincode::serialize(&msg) {
            for member in self.alive_peers() {
                if let Err(e) = self.socket.send_to(&encoded, member.gossip_addr).await {
                    tracing::warn!("Failed to broadcast to {:?}: {}", member.id, e);
                }
            }
        }
    }

    async fn reliable_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, peer)) => {
                    let service = self.clone();
                    tokio::spawn(async move {
                        match read_frame(stream, RELIABLE_READ_TIMEOUT).await {
                            Ok(frame) => {
                                tracing::debug!(
                                    "Reliable message from {:?} ({} bytes)",
                                    frame.from,
                                    frame.payload.len()
                                );
                                service.delegate.notify_msg(&frame.payload);
                            }
                            Err(e) => tracing::warn!("Bad reliable frame from {}: {}", peer, e),
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to accept reliable connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

impl GossipTransport for MembershipService {
    fn num_members(&self) -> usize {
        self.members
            .iter()
            .filter(|entry| entry.value().state == NodeState::Alive)
            .count()
    }

    fn member(&self, id: &NodeId) -> Option<Node> {
        self.get_member(id)
    }

    fn alive_members(&self) -> Vec<Node> {
        self.alive_peers()
    }

    fn send_reliable(&self, to: &Node, payload: Vec<u8>) {
        let frame = ReliableFrame {
            from: self.local_node.id.clone(),
            payload,
        };
        let addr = to.gossip_addr;
        let target = to.id.clone();
        tokio::spawn(async move {
            let sent = tokio::time::timeout(RELIABLE_SEND_TIMEOUT, write_frame(addr, &frame)).await;
            match sent {
                Ok(Ok(())) => tracing::debug!("Reliable message delivered to {:?}", target),
                Ok(Err(e)) => tracing::warn!("Reliable send to {:?} failed: {}", target, e),
                Err(_) => tracing::warn!("Reliable send to {:?} timed out", target),
            }
        });
    }
}

async fn write_frame(addr: SocketAddr, frame: &ReliableFrame) -> Result<()> {
    let encoded = bincode::serialize(frame)?;
    let len = u32::try_from(encoded.len()).context("reliable frame too large")?;
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(&encoded).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Reads one length-prefixed frame, giving up after `deadline`.
pub(crate) async fn read_frame(stream: TcpStream, deadline: Duration) -> Result<ReliableFrame> {
    tokio::time::timeout(deadline, read_frame_body(stream))
        .await
        .context("timed out waiting for a reliable frame")?
}

async fn read_frame_body(mut stream: TcpStream) -> Result<ReliableFrame> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_RELIABLE_FRAME {
        anyhow::bail!("frame of {} bytes exceeds limit", len);
    }
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(bincode::deserialize(&buf)?)
}
