//! Bidirectional ownership index.
//!
//! Records which nodes own which buckets, answerable in both directions. Both
//! sides are kept as adjacency lists with a position index so that inserts,
//! removals and membership checks are O(1) (removal swaps the last element
//! into the freed slot).
//!
//! ## Invariant
//! `(node, bucket)` is in the node-to-bucket side iff it is in the
//! bucket-to-node side. Both sides are mutated under one write lock.

use crate::membership::types::NodeId;
use crate::storage::handle::BucketName;

use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;

/// One direction of the index.
#[derive(Debug)]
struct Adjacency<K, V> {
    lists: HashMap<K, Vec<V>>,
    slots: HashMap<(K, V), usize>,
}

impl<K, V> Default for Adjacency<K, V> {
    fn default() -> Self {
        Self {
            lists: HashMap::new(),
            slots: HashMap::new(),
        }
    }
}

impl<K, V> Adjacency<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone + Eq + Hash,
{
    fn insert(&mut self, key: &K, value: &V) -> bool {
        let slot_key = (key.clone(), value.clone());
        if self.slots.contains_key(&slot_key) {
            return false;
        }
        let list = self.lists.entry(key.clone()).or_default();
        self.slots.insert(slot_key, list.len());
        list.push(value.clone());
        true
    }

    fn remove(&mut self, key: &K, value: &V) -> bool {
        let slot = match self.slots.remove(&(key.clone(), value.clone())) {
            Some(slot) => slot,
            None => return false,
        };
        let now_empty = match self.lists.get_mut(key) {
            Some(list) => {
                list.swap_remove(slot);
                if let Some(moved) = list.get(slot) {
                    self.slots.insert((key.clone(), moved.clone()), slot);
                }
                list.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.lists.remove(key);
        }
        true
    }

    fn take(&mut self, key: &K) -> Vec<V> {
        let list = self.lists.remove(key).unwrap_or_default();
        for value in &list {
            self.slots.remove(&(key.clone(), value.clone()));
        }
        list
    }

    fn get(&self, key: &K) -> Vec<V> {
        self.lists.get(key).cloned().unwrap_or_default()
    }

    fn count(&self, key: &K) -> usize {
        self.lists.get(key).map_or(0, Vec::len)
    }

    fn contains(&self, key: &K, value: &V) -> bool {
        self.slots.contains_key(&(key.clone(), value.clone()))
    }

    fn keys(&self) -> Vec<K> {
        self.lists.keys().cloned().collect()
    }
}

#[derive(Debug, Default)]
struct Sides {
    n2b: Adjacency<NodeId, BucketName>,
    b2n: Adjacency<BucketName, NodeId>,
}

#[derive(Debug, Default)]
pub struct OwnershipIndex {
    inner: RwLock<Sides>,
}

impl OwnershipIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent. Returns `true` if the pair was new.
    pub fn set(&self, node: &NodeId, bucket: &[u8]) -> bool {
        let bucket = bucket.to_vec();
        let mut sides = self.inner.write();
        let added = sides.n2b.insert(node, &bucket);
        if added {
            sides.b2n.insert(&bucket, node);
        }
        added
    }

    /// Idempotent. Returns `true` if the pair was present.
    pub fn remove(&self, node: &NodeId, bucket: &[u8]) -> bool {
        let bucket = bucket.to_vec();
        let mut sides = self.inner.write();
        let removed = sides.n2b.remove(node, &bucket);
        if removed {
            sides.b2n.remove(&bucket, node);
        }
        removed
    }

    /// Removes every pair involving `node`. Returns the buckets it owned.
    pub fn drop_node(&self, node: &NodeId) -> Vec<BucketName> {
        let mut sides = self.inner.write();
        let buckets = sides.n2b.take(node);
        for bucket in &buckets {
            sides.b2n.remove(bucket, node);
        }
        buckets
    }

    /// Removes every pair involving `bucket`. Returns its former owners.
    pub fn drop_bucket(&self, bucket: &[u8]) -> Vec<NodeId> {
        let bucket = bucket.to_vec();
        let mut sides = self.inner.write();
        let nodes = sides.b2n.take(&bucket);
        for node in &nodes {
            sides.n2b.remove(node, &bucket);
        }
        nodes
    }

    /// Owners of `bucket`, in the order they were recorded (modulo swap-removals).
    pub fn nodes_of(&self, bucket: &[u8]) -> Vec<NodeId> {
        self.inner.read().b2n.get(&bucket.to_vec())
    }

    pub fn buckets_of(&self, node: &NodeId) -> Vec<BucketName> {
        self.inner.read().n2b.get(node)
    }

    pub fn count_nodes(&self, bucket: &[u8]) -> usize {
        self.inner.read().b2n.count(&bucket.to_vec())
    }

    pub fn contains(&self, node: &NodeId, bucket: &[u8]) -> bool {
        self.inner.read().n2b.contains(node, &bucket.to_vec())
    }

    /// Every bucket with at least one owner.
    pub fn bucket_list(&self) -> Vec<BucketName> {
        self.inner.read().b2n.keys()
    }

    /// Every `(node, bucket)` pair.
    pub fn entries(&self) -> Vec<(NodeId, BucketName)> {
        let sides = self.inner.read();
        let mut pairs = Vec::new();
        for (node, buckets) in &sides.n2b.lists {
            for bucket in buckets {
                pairs.push((node.clone(), bucket.clone()));
            }
        }
        pairs
    }
}
