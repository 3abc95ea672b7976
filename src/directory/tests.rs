//! Directory Module Tests
//!
//! Validates the registries and their replication without a network.
//!
//! ## Test Scopes
//! - **Ownership Index**: Bidirectional consistency, idempotence, swap-removal bookkeeping.
//! - **Registries**: First-writer-wins network buckets, health records and fan-out.
//! - **Commands**: Invalidation and stream decoding that stops at the first malformed command.
//! - **Directory**: Command application, gossip between two directories, join handshake, departures.

#[cfg(test)]
mod tests {
    use crate::directory::command::{decode_commands, encode_commands, Command, QueuedCommand};
    use crate::directory::health::{Health, HealthFanout, HealthReceiver, HealthRegistry};
    use crate::directory::metadata::{
        default_distance, sort_by_distance, DistanceFn, LocalMeta, MetadataError, NodeMetadata,
    };
    use crate::directory::netbucket::{
        NetBucketRegistry, NetScope, ProviderRegistry, Session, SessionCloser, MEMORY_PROVIDER,
    };
    use crate::directory::ownership::OwnershipIndex;
    use crate::directory::{Directory, DirectoryConfig};
    use crate::error::{StoreError, StoreResult};
    use crate::membership::broadcast::Broadcast;
    use crate::membership::delegate::{GossipTransport, MembershipDelegate};
    use crate::membership::types::{Node, NodeId, NodeState};
    use crate::storage::handle::BucketHandle;
    use crate::storage::memory::MemoryBucket;

    use parking_lot::Mutex;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::time::Duration;

    fn id(name: &str) -> NodeId {
        NodeId::from(name)
    }

    fn peer(name: &str, ip: &str, meta: Vec<u8>) -> Node {
        Node {
            id: id(name),
            gossip_addr: format!("{}:7946", ip).parse().unwrap(),
            meta,
            state: NodeState::Alive,
            incarnation: 0,
            last_seen: None,
        }
    }

    fn meta_bytes(loc: &str, port: u16) -> Vec<u8> {
        LocalMeta {
            loc: loc.to_string(),
            port,
        }
        .encode()
    }

    fn directory(name: &str, loc: &str) -> Arc<Directory> {
        Directory::new(
            DirectoryConfig::new(id(name), loc, 7947),
            Arc::new(ProviderRegistry::new()),
        )
    }

    /// Transport that knows a fixed set of peers and records reliable sends
    /// instead of performing them.
    struct FakeTransport {
        peers: Vec<Node>,
        sent: Mutex<Vec<(NodeId, Vec<u8>)>>,
    }

    impl FakeTransport {
        fn new(peers: Vec<Node>) -> Arc<Self> {
            Arc::new(Self {
                peers,
                sent: Mutex::new(Vec::new()),
            })
        }

        /// Hands every recorded send addressed to `to` over to it.
        fn deliver(&self, to: &Directory) -> usize {
            let sent: Vec<(NodeId, Vec<u8>)> = std::mem::take(&mut *self.sent.lock());
            let mut delivered = 0;
            for (target, payload) in sent {
                if target == *to.name() {
                    to.notify_msg(&payload);
                    delivered += 1;
                } else {
                    self.sent.lock().push((target, payload));
                }
            }
            delivered
        }
    }

    impl GossipTransport for FakeTransport {
        fn num_members(&self) -> usize {
            self.peers.len() + 1
        }

        fn member(&self, id: &NodeId) -> Option<Node> {
            self.peers.iter().find(|peer| peer.id == *id).cloned()
        }

        fn alive_members(&self) -> Vec<Node> {
            self.peers.clone()
        }

        fn send_reliable(&self, to: &Node, payload: Vec<u8>) {
            self.sent.lock().push((to.id.clone(), payload));
        }
    }

    /// Moves every pending broadcast of `from` into `to`.
    fn gossip(from: &Directory, to: &Directory) {
        for msg in from.get_broadcasts(8, 64 * 1024) {
            to.notify_msg(&msg);
        }
    }

    // ============================================================
    // OWNERSHIP INDEX TESTS
    // ============================================================

    #[test]
    fn test_ownership_set_is_idempotent() {
        let index = OwnershipIndex::new();

        assert!(index.set(&id("n1"), b"B1"));
        assert!(!index.set(&id("n1"), b"B1"));

        assert_eq!(index.nodes_of(b"B1"), vec![id("n1")]);
        assert_eq!(index.buckets_of(&id("n1")), vec![b"B1".to_vec()]);
        assert_eq!(index.count_nodes(b"B1"), 1);
    }

    #[test]
    fn test_ownership_remove_keeps_both_sides_in_step() {
        let index = OwnershipIndex::new();
        index.set(&id("n1"), b"B1");
        index.set(&id("n2"), b"B1");
        index.set(&id("n3"), b"B1");

        // Removing the first owner swaps the last one into its slot.
        assert!(index.remove(&id("n1"), b"B1"));
        assert!(!index.remove(&id("n1"), b"B1"));
        assert_eq!(index.nodes_of(b"B1"), vec![id("n3"), id("n2")]);
        assert!(index.buckets_of(&id("n1")).is_empty());

        // The moved entry's slot must have been updated.
        assert!(index.remove(&id("n3"), b"B1"));
        assert_eq!(index.nodes_of(b"B1"), vec![id("n2")]);
    }

    #[test]
    fn test_ownership_drop_node_and_drop_bucket() {
        let index = OwnershipIndex::new();
        index.set(&id("n1"), b"B1");
        index.set(&id("n1"), b"B2");
        index.set(&id("n2"), b"B2");

        let mut dropped = index.drop_node(&id("n1"));
        dropped.sort();
        assert_eq!(dropped, vec![b"B1".to_vec(), b"B2".to_vec()]);
        assert_eq!(index.count_nodes(b"B1"), 0);
        assert_eq!(index.nodes_of(b"B2"), vec![id("n2")]);

        assert_eq!(index.drop_bucket(b"B2"), vec![id("n2")]);
        assert!(index.buckets_of(&id("n2")).is_empty());
        assert!(index.bucket_list().is_empty());
    }

    #[derive(Debug, Clone)]
    enum IndexOp {
        Set(u8, u8),
        Remove(u8, u8),
        DropNode(u8),
        DropBucket(u8),
    }

    fn index_op() -> impl Strategy<Value = IndexOp> {
        prop_oneof![
            4 => (0u8..4, 0u8..4).prop_map(|(n, b)| IndexOp::Set(n, b)),
            3 => (0u8..4, 0u8..4).prop_map(|(n, b)| IndexOp::Remove(n, b)),
            1 => (0u8..4).prop_map(IndexOp::DropNode),
            1 => (0u8..4).prop_map(IndexOp::DropBucket),
        ]
    }

    proptest! {
        #[test]
        fn test_ownership_matches_a_set_model(ops in proptest::collection::vec(index_op(), 0..64)) {
            let index = OwnershipIndex::new();
            let mut model: HashSet<(u8, u8)> = HashSet::new();
            let node = |n: u8| NodeId(format!("n{}", n));
            let bucket = |b: u8| vec![b'B', b];

            for op in ops {
                match op {
                    IndexOp::Set(n, b) => {
                        prop_assert_eq!(index.set(&node(n), &bucket(b)), model.insert((n, b)));
                    }
                    IndexOp::Remove(n, b) => {
                        prop_assert_eq!(index.remove(&node(n), &bucket(b)), model.remove(&(n, b)));
                    }
                    IndexOp::DropNode(n) => {
                        index.drop_node(&node(n));
                        model.retain(|(mn, _)| *mn != n);
                    }
                    IndexOp::DropBucket(b) => {
                        index.drop_bucket(&bucket(b));
                        model.retain(|(_, mb)| *mb != b);
                    }
                }

                for n in 0u8..4 {
                    for b in 0u8..4 {
                        let expected = model.contains(&(n, b));
                        prop_assert_eq!(index.nodes_of(&bucket(b)).contains(&node(n)), expected);
                        prop_assert_eq!(index.buckets_of(&node(n)).contains(&bucket(b)), expected);
                    }
                }
                prop_assert_eq!(index.entries().len(), model.len());
            }
        }
    }

    // ============================================================
    // NETWORK BUCKET REGISTRY TESTS
    // ============================================================

    struct CountingCloser(Arc<AtomicUsize>);

    impl SessionCloser for CountingCloser {
        fn close(&self) -> StoreResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn counting_providers(opened: Arc<AtomicUsize>, closed: Arc<AtomicUsize>) -> Arc<ProviderRegistry> {
        let providers = ProviderRegistry::new();
        providers.register("counting", move |_bucket: &[u8], _meta: &[u8]| {
            opened.fetch_add(1, Ordering::SeqCst);
            Ok(Session::new(BucketHandle::full(Arc::new(MemoryBucket::new())))
                .with_closer(Box::new(CountingCloser(closed.clone()))))
        });
        providers.register("broken", |_bucket: &[u8], _meta: &[u8]| {
            Err(StoreError::Other("cannot open".to_string()))
        });
        Arc::new(providers)
    }

    #[tokio::test]
    async fn test_memory_provider_serves_reads_and_writes() {
        let registry = NetBucketRegistry::new(Arc::new(ProviderRegistry::new()));

        assert!(registry.offer(MEMORY_PROVIDER, b"N1", b"", false));
        let handle = registry.get(b"N1").expect("registered bucket has a handle");

        handle.put(b"N1", b"k", b"v").await.unwrap();
        assert_eq!(handle.get(b"N1", b"k").await.unwrap(), b"v".to_vec());
        assert_eq!(registry.is_net(b"N1"), Some(NetScope::Local));
        assert_eq!(registry.local_buckets(), vec![b"N1".to_vec()]);
    }

    #[test]
    fn test_offer_is_first_writer_wins() {
        let opened = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));
        let registry = NetBucketRegistry::new(counting_providers(opened.clone(), closed.clone()));

        assert!(registry.offer("counting", b"N1", b"first", true));
        assert!(registry.offer("counting", b"N1", b"second", true));

        // The second offer saw the bucket already present and never opened.
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert_eq!(closed.load(Ordering::SeqCst), 0);
        assert_eq!(registry.registrations()[0].meta, b"first".to_vec());
        assert_eq!(registry.is_net(b"N1"), Some(NetScope::Global));
    }

    #[test]
    fn test_concurrent_offers_keep_exactly_one_session() {
        let opened = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Barrier::new(2));

        let providers = ProviderRegistry::new();
        for name in ["left", "right"] {
            let opened = opened.clone();
            let closed = closed.clone();
            let gate = gate.clone();
            providers.register(name, move |_bucket: &[u8], _meta: &[u8]| {
                opened.fetch_add(1, Ordering::SeqCst);
                // Both offers are past the "already registered" check here.
                gate.wait();
                Ok(Session::new(BucketHandle::full(Arc::new(MemoryBucket::new())))
                    .with_closer(Box::new(CountingCloser(closed.clone()))))
            });
        }
        let registry = NetBucketRegistry::new(Arc::new(providers));

        let (left, right) = std::thread::scope(|scope| {
            let left = scope.spawn(|| registry.offer("left", b"N1", b"l", false));
            let right = scope.spawn(|| registry.offer("right", b"N1", b"r", false));
            (left.join().unwrap(), right.join().unwrap())
        });

        assert!(left);
        assert!(right);
        assert_eq!(opened.load(Ordering::SeqCst), 2);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(b"N1").is_some());
    }

    #[test]
    fn test_offer_fails_on_unknown_or_broken_provider() {
        let registry = NetBucketRegistry::new(counting_providers(
            Arc::new(AtomicUsize::new(0)),
            Arc::new(AtomicUsize::new(0)),
        ));

        assert!(!registry.offer("nope", b"N1", b"", false));
        assert!(!registry.offer("broken", b"N1", b"", false));
        assert!(registry.is_net(b"N1").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_closes_the_session() {
        let closed = Arc::new(AtomicUsize::new(0));
        let registry =
            NetBucketRegistry::new(counting_providers(Arc::new(AtomicUsize::new(0)), closed.clone()));

        registry.offer("counting", b"N1", b"", false);
        assert!(registry.remove(b"N1"));
        assert!(!registry.remove(b"N1"));
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(registry.get(b"N1").is_none());
    }

    // ============================================================
    // HEALTH TESTS
    // ============================================================

    #[test]
    fn test_health_registry_defaults_and_updates() {
        let health = HealthRegistry::new();

        assert!(health.get_writable(b"B1", true));
        assert!(!health.get_writable(b"B1", false));

        assert!(health.set_writable(b"B1", false));
        assert!(!health.set_writable(b"B1", false));
        assert!(!health.get_writable(b"B1", true));
    }

    struct Recorder(Mutex<Vec<Health>>);

    impl HealthReceiver for Recorder {
        fn issue_health(&self, health: &Health) {
            self.0.lock().push(health.clone());
        }
    }

    #[test]
    fn test_health_fanout_reaches_every_receiver() {
        let fanout = HealthFanout::new();
        let first = Arc::new(Recorder(Mutex::new(Vec::new())));
        let second = Arc::new(Recorder(Mutex::new(Vec::new())));
        fanout.add_receiver(first.clone());
        let second_id = fanout.add_receiver(second.clone());

        let record = Health {
            bucket: b"B1".to_vec(),
            writable: false,
        };
        fanout.issue(&record);
        assert!(fanout.remove_receiver(second_id));
        fanout.issue(&record);

        assert_eq!(first.0.lock().len(), 2);
        assert_eq!(second.0.lock().len(), 1);
        assert_eq!(fanout.len(), 1);
    }

    // ============================================================
    // COMMAND TESTS
    // ============================================================

    #[test]
    fn test_command_invalidation() {
        let register = Command::RegisterNetBucket {
            node: id("n1"),
            provider: "memory".to_string(),
            bucket: b"N1".to_vec(),
            meta: vec![],
            global: true,
        };
        let unregister = Command::UnregisterNetBucket {
            node: id("n1"),
            bucket: b"N1".to_vec(),
            global: true,
        };
        let unregister_local = Command::UnregisterNetBucket {
            node: id("n1"),
            bucket: b"N1".to_vec(),
            global: false,
        };
        let healthy = Command::SetHealth {
            bucket: b"N1".to_vec(),
            writable: true,
        };
        let full = Command::SetHealth {
            bucket: b"N1".to_vec(),
            writable: false,
        };

        assert!(unregister.invalidates(&register));
        assert!(register.invalidates(&unregister));
        assert!(!unregister_local.invalidates(&register));
        assert!(full.invalidates(&healthy));
        assert!(!healthy.invalidates(&register));

        let queued = QueuedCommand::new(full.clone()).unwrap();
        assert_eq!(queued.message(), full.encode().unwrap().as_slice());
    }

    #[test]
    fn test_decode_stops_at_first_malformed_command() {
        let commands = vec![
            Command::AddOwnership {
                node: id("n1"),
                bucket: b"B1".to_vec(),
            },
            Command::SetHealth {
                bucket: b"B1".to_vec(),
                writable: false,
            },
        ];
        let mut buf = encode_commands(&commands).unwrap();
        buf.extend_from_slice(&[0xff, 0xff, 0xff, 0xff, 0x01]);
        buf.extend_from_slice(&encode_commands(&commands).unwrap());

        let (decoded, error) = decode_commands(&buf);

        assert_eq!(decoded, commands);
        assert!(matches!(error, Some(StoreError::MalformedMessage(_))));
    }

    #[test]
    fn test_decode_empty_buffer() {
        let (decoded, error) = decode_commands(&[]);
        assert!(decoded.is_empty());
        assert!(error.is_none());
    }

    // ============================================================
    // METADATA TESTS
    // ============================================================

    #[test]
    fn test_metadata_rejects_foreign_magic() {
        let decoded = LocalMeta::decode(&meta_bytes("eu", 9000)).unwrap();
        assert_eq!(decoded.loc, "eu");
        assert_eq!(decoded.port, 9000);

        let mut foreign = meta_bytes("eu", 9000);
        foreign[0] ^= 0xff;
        assert!(matches!(
            LocalMeta::decode(&foreign),
            Err(MetadataError::BadMagic(_))
        ));
        assert!(matches!(
            LocalMeta::decode(&[1, 2]),
            Err(MetadataError::Undecodable(_))
        ));
    }

    #[test]
    fn test_sort_by_distance_is_stable_on_discovery_order() {
        let node = |name: &str, loc: &str, seq: u64| NodeMetadata {
            name: id(name),
            addr: "10.0.0.1".parse().unwrap(),
            loc: loc.to_string(),
            port: 1,
            seq,
        };
        let mut nodes = vec![node("far", "us", 0), node("b", "eu", 2), node("a", "eu", 1)];
        let distance: DistanceFn = Arc::new(default_distance);

        sort_by_distance("eu", &mut nodes, &distance);

        let names: Vec<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "far"]);
    }

    // ============================================================
    // DIRECTORY TESTS
    // ============================================================

    #[test]
    fn test_add_bucket_gossips_ownership() {
        let d1 = directory("n1", "eu");
        let d2 = directory("n2", "eu");

        d1.add_bucket(b"B1", BucketHandle::full(Arc::new(MemoryBucket::new())));
        assert!(d1.ownership.contains(&id("n1"), b"B1"));
        assert_eq!(d1.pending_broadcasts(), 1);

        gossip(&d1, &d2);
        assert_eq!(d2.ownership.nodes_of(b"B1"), vec![id("n1")]);

        assert!(d1.delete_bucket(b"B1"));
        gossip(&d1, &d2);
        assert_eq!(d2.ownership.count_nodes(b"B1"), 0);
    }

    #[test]
    fn test_commands_are_idempotent() {
        let d = directory("n1", "eu");
        let command = Command::AddOwnership {
            node: id("n2"),
            bucket: b"B2".to_vec(),
        };
        let buf = encode_commands(&[command.clone(), command]).unwrap();

        assert_eq!(d.handle_message(&buf), 2);
        assert_eq!(d.ownership.nodes_of(b"B2"), vec![id("n2")]);
    }

    #[test]
    fn test_global_registration_is_offered_everywhere() {
        let d1 = directory("n1", "eu");
        let d2 = directory("n2", "eu");

        assert!(d1.register_net_bucket(MEMORY_PROVIDER, b"G1", b"", true));
        gossip(&d1, &d2);
        assert_eq!(d2.net_buckets.is_net(b"G1"), Some(NetScope::Global));
        assert_eq!(d2.ownership.count_nodes(b"G1"), 0);

        assert!(d1.unregister_net_bucket(b"G1"));
        gossip(&d1, &d2);
        assert!(d2.net_buckets.is_net(b"G1").is_none());
    }

    #[test]
    fn test_local_registration_only_sets_ownership_remotely() {
        let d1 = directory("n1", "eu");
        let d2 = directory("n2", "eu");

        assert!(d1.register_net_bucket(MEMORY_PROVIDER, b"L1", b"", false));
        assert!(d1.ownership.contains(&id("n1"), b"L1"));
        gossip(&d1, &d2);

        assert!(d2.net_buckets.is_net(b"L1").is_none());
        assert_eq!(d2.ownership.nodes_of(b"L1"), vec![id("n1")]);

        assert!(d1.unregister_net_bucket(b"L1"));
        assert!(!d1.unregister_net_bucket(b"L1"));
        gossip(&d1, &d2);
        assert_eq!(d2.ownership.count_nodes(b"L1"), 0);
    }

    #[test]
    fn test_register_with_unknown_provider_is_not_announced() {
        let d = directory("n1", "eu");

        assert!(!d.register_net_bucket("nope", b"X", b"", false));
        assert_eq!(d.pending_broadcasts(), 0);
        assert!(!d.ownership.contains(&id("n1"), b"X"));
    }

    #[test]
    fn test_issued_health_is_replicated() {
        let d1 = directory("n1", "eu");
        let d2 = directory("n2", "eu");

        d1.issue_health(&Health {
            bucket: b"B1".to_vec(),
            writable: false,
        });
        gossip(&d1, &d2);

        assert!(!d2.health.get_writable(b"B1", true));
    }

    #[test]
    fn test_join_records_metadata_and_pushes_state() {
        let d1 = directory("n1", "eu");
        let transport = FakeTransport::new(vec![peer("n2", "10.0.0.2", meta_bytes("us", 8001))]);
        d1.attach_transport(&transport);
        d1.add_bucket(b"B1", BucketHandle::full(Arc::new(MemoryBucket::new())));
        d1.register_net_bucket(MEMORY_PROVIDER, b"G1", b"", true);
        d1.issue_health(&Health {
            bucket: b"B1".to_vec(),
            writable: true,
        });

        let joined = Arc::new(Mutex::new(Vec::new()));
        let seen = joined.clone();
        d1.add_join_listener(Arc::new(move |meta: &NodeMetadata| {
            seen.lock().push(meta.name.clone())
        }));

        d1.notify_join(&peer("n2", "10.0.0.2", meta_bytes("us", 8001)));

        let meta = d1.node_metadata(&id("n2")).expect("metadata recorded");
        assert_eq!(meta.rpc_addr(), "10.0.0.2:8001".parse::<SocketAddr>().unwrap());
        assert_eq!(meta.loc, "us");
        assert_eq!(*joined.lock(), vec![id("n2")]);

        // Replaying the pushed state on a fresh directory reproduces it.
        let sent = transport.sent.lock().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, id("n2"));
        let d2 = directory("n2", "us");
        d2.handle_message(&sent[0].1);
        assert_eq!(d2.ownership.nodes_of(b"B1"), vec![id("n1")]);
        assert_eq!(d2.net_buckets.is_net(b"G1"), Some(NetScope::Global));
        assert!(d2.health.get_writable(b"B1", false));
    }

    #[test]
    fn test_rejoin_after_false_death_restores_ownership() {
        let a = directory("n1", "eu");
        let b = directory("n2", "us");
        let a_view = peer("n1", "10.0.0.1", meta_bytes("eu", 7947));
        let b_view = peer("n2", "10.0.0.2", meta_bytes("us", 7947));
        let a_net = FakeTransport::new(vec![b_view]);
        let b_net = FakeTransport::new(vec![a_view.clone()]);
        a.attach_transport(&a_net);
        b.attach_transport(&b_net);

        a.add_bucket(b"B1", BucketHandle::full(Arc::new(MemoryBucket::new())));
        b.notify_join(&a_view);
        gossip(&a, &b);
        assert_eq!(b.ownership.nodes_of(b"B1"), vec![id("n1")]);
        b_net.sent.lock().clear();

        // B declares A dead and then sees it again; A never noticed anything.
        b.notify_leave(&a_view);
        assert!(b.ownership.nodes_of(b"B1").is_empty());
        b.notify_join(&a_view);

        assert_eq!(b_net.deliver(&a), 1);
        assert_eq!(a_net.deliver(&b), 1);
        assert_eq!(b.ownership.nodes_of(b"B1"), vec![id("n1")]);

        // The answer does not ask again, so the exchange ends.
        assert!(a_net.sent.lock().is_empty());
        assert!(b_net.sent.lock().is_empty());
    }

    #[test]
    fn test_state_request_from_unknown_node_is_ignored() {
        let d = directory("n1", "eu");
        let transport = FakeTransport::new(Vec::new());
        d.attach_transport(&transport);
        d.add_bucket(b"B1", BucketHandle::full(Arc::new(MemoryBucket::new())));

        d.apply(&Command::RequestState { node: id("ghost") });
        d.apply(&Command::RequestState { node: id("n1") });

        assert!(transport.sent.lock().is_empty());
    }

    #[test]
    fn test_oversized_command_is_sent_reliably() {
        let d1 = directory("n1", "eu");
        let transport = FakeTransport::new(vec![
            peer("n2", "10.0.0.2", meta_bytes("us", 8001)),
            peer("n3", "10.0.0.3", meta_bytes("eu", 8001)),
        ]);
        d1.attach_transport(&transport);

        let bucket = vec![b'x'; 2000];
        d1.add_bucket(&bucket, BucketHandle::full(Arc::new(MemoryBucket::new())));
        d1.add_bucket(b"B1", BucketHandle::full(Arc::new(MemoryBucket::new())));

        let gossiped = d1.get_broadcasts(8, 1400);
        assert_eq!(gossiped.len(), 1);
        assert_eq!(d1.pending_broadcasts(), 1);

        let sent = transport.sent.lock().clone();
        let targets: Vec<NodeId> = sent.iter().map(|(to, _)| to.clone()).collect();
        assert_eq!(targets, vec![id("n2"), id("n3")]);

        let d2 = directory("n2", "us");
        d2.handle_message(&sent[0].1);
        assert_eq!(d2.ownership.nodes_of(&bucket), vec![id("n1")]);
    }

    #[test]
    fn test_leave_drops_ownership_and_notifies() {
        let d = directory("n1", "eu");
        let left = Arc::new(Mutex::new(Vec::new()));
        let seen = left.clone();
        d.add_leave_listener(Arc::new(move |meta: &NodeMetadata| {
            seen.lock().push(meta.rpc_addr())
        }));

        let n2 = peer("n2", "10.0.0.2", meta_bytes("eu", 8001));
        d.notify_join(&n2);
        d.apply(&Command::AddOwnership {
            node: id("n2"),
            bucket: b"B2".to_vec(),
        });

        d.notify_leave(&n2);

        assert_eq!(d.ownership.count_nodes(b"B2"), 0);
        assert!(d.is_departed(&id("n2")));
        assert_eq!(*left.lock(), vec!["10.0.0.2:8001".parse::<SocketAddr>().unwrap()]);

        // Metadata stays available until the grace period is swept.
        assert!(d.node_metadata(&id("n2")).is_some());
        assert_eq!(d.sweep_departed(Duration::from_secs(60)), 0);
        assert_eq!(d.sweep_departed(Duration::ZERO), 1);
        assert!(d.node_metadata(&id("n2")).is_none());
    }

    #[test]
    fn test_nodes_metadata_skips_unknown_nodes() {
        let d = directory("n1", "eu");
        d.notify_join(&peer("n2", "10.0.0.2", meta_bytes("us", 8001)));
        d.notify_join(&peer("n3", "10.0.0.3", meta_bytes("eu", 8001)));
        d.notify_join(&peer("n4", "10.0.0.4", Vec::new()));

        let mut nodes = d.nodes_metadata(&[id("n2"), id("ghost"), id("n3"), id("n4")]);
        assert_eq!(nodes.len(), 2);

        d.sort_by_distance(&mut nodes);
        assert_eq!(nodes[0].name, id("n3"));
    }

    #[test]
    fn test_merge_rejects_foreign_metadata() {
        let d = directory("n1", "eu");

        let ours = peer("n2", "10.0.0.2", meta_bytes("eu", 1));
        let silent = peer("n3", "10.0.0.3", Vec::new());
        let foreign = peer("n4", "10.0.0.4", b"not a directory node".to_vec());

        assert!(d.notify_merge(&[ours.clone(), silent.clone()]).is_ok());
        let rejected = d.notify_merge(&[ours, foreign]).unwrap_err();
        assert_eq!(rejected.node, id("n4"));
    }

    #[test]
    fn test_node_meta_respects_limit() {
        let d = directory("n1", "eu");

        let meta = d.node_meta(512);
        assert_eq!(LocalMeta::decode(&meta).unwrap().port, 7947);
        assert!(d.node_meta(4).is_empty());
    }
}
