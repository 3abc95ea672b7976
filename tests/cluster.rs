//! Two in-process nodes on loopback: directory convergence over gossip,
//! remote routing through the bucket RPC, recovery from a false death, and
//! cleanup after a departure.

use bucket_directory::cluster::{Scope, Target};
use bucket_directory::config::{BucketConfig, Endpoint, NodeConfig};
use bucket_directory::error::StoreError;
use bucket_directory::membership::delegate::MembershipDelegate;
use bucket_directory::membership::types::NodeId;
use bucket_directory::node::BucketNode;
use bucket_directory::storage::handle::BucketHandle;
use bucket_directory::storage::memory::MemoryBucket;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

fn loopback_config(name: &str, loc: &str, seeds: Vec<SocketAddr>) -> NodeConfig {
    let mut config = NodeConfig {
        name: Some(name.to_string()),
        loc: loc.to_string(),
        seeds,
        bind: Endpoint {
            addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
        },
        ..NodeConfig::default()
    };
    config.tuning.gossip_interval_ms = 50;
    config.tuning.scheduler_interval_ms = 100;
    config.tuning.rpc_deadline_ms = 2_000;
    config
}

async fn wait_until<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_nodes_route_and_forget() {
    let mut config_a = loopback_config("node-a", "us", Vec::new());
    config_a.buckets.push(BucketConfig {
        name: "B1".to_string(),
        path: None,
    });
    let node_a = BucketNode::start(config_a).await.unwrap();

    let node_b = BucketNode::start(loopback_config("node-b", "eu", vec![node_a.gossip_addr()]))
        .await
        .unwrap();
    let a = NodeId::from("node-a");

    // Bucket provisioned before the join reaches B through the state push.
    wait_until("B to learn B1 and A's metadata", || {
        node_b.directory.ownership.contains(&a, b"B1")
            && node_b.directory.node_metadata(&a).is_some()
    })
    .await;

    let resolution = node_b.selector.resolve(b"B1").unwrap();
    assert_eq!(resolution.scope, Scope::One);
    assert_eq!(resolution.target, Target::Remote(a.clone()));
    assert_eq!(
        node_b.directory.node_metadata(&a).unwrap().rpc_addr(),
        node_a.rpc_addr()
    );

    // Writes through B land in A's bucket.
    node_b.selector.put(b"B1", b"k", b"v").await.unwrap();
    assert_eq!(node_a.selector.get(b"B1", b"k").await.unwrap(), b"v".to_vec());
    assert_eq!(node_b.selector.get(b"B1", b"k").await.unwrap(), b"v".to_vec());
    assert_eq!(
        node_b.selector.get(b"B1", b"missing").await,
        Err(StoreError::NotFound)
    );

    // Bucket added after the join travels as a gossip broadcast.
    node_a
        .directory
        .add_bucket(b"B2", BucketHandle::full(Arc::new(MemoryBucket::new())));
    wait_until("B to learn B2", || {
        node_b.directory.ownership.contains(&a, b"B2")
    })
    .await;
    wait_until("B's scheduler to list both buckets", || {
        node_b.scheduler.buckets().len() == 2
    })
    .await;

    // B wrongly declares A dead and then hears from it again. A never saw
    // anything happen, yet B must relearn A's buckets.
    wait_until("A's broadcast queue to drain", || {
        node_a.directory.pending_broadcasts() == 0
    })
    .await;
    let a_member = node_b.membership.get_member(&a).unwrap();
    node_b.directory.notify_leave(&a_member);
    assert!(!node_b.directory.ownership.contains(&a, b"B1"));
    node_b.directory.notify_join(&a_member);
    wait_until("B to relearn A's buckets", || {
        node_b.directory.ownership.contains(&a, b"B1")
            && node_b.directory.ownership.contains(&a, b"B2")
    })
    .await;
    assert_eq!(node_b.selector.resolve(b"B1").unwrap().scope, Scope::One);

    // A's departure clears its ownership on B.
    node_a.shutdown().await;
    wait_until("B to forget A's buckets", || {
        node_b.directory.ownership.nodes_of(b"B1").is_empty()
    })
    .await;

    let resolution = node_b.selector.resolve(b"B1").unwrap();
    assert_eq!(resolution.scope, Scope::None);
    assert_eq!(
        node_b.selector.get(b"B1", b"k").await,
        Err(StoreError::BucketNotFound)
    );
    let departed_addr = node_a.rpc_addr().to_string();
    wait_until("B to drop its connection to A", || {
        node_b.selector.pool().peek(&departed_addr).is_none()
    })
    .await;

    node_b.shutdown().await;
}
