//! Pool of remote bucket clients, keyed by peer RPC address.
//!
//! Lookups are lock-free against each other (read lock). A miss creates a
//! client outside the lock and inserts it only if the address is still
//! absent; the loser of such a race is parked on a free list and reused for
//! the next miss. When a peer leaves, its client is evicted.

use crate::storage::client::RemoteBucketClient;

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

const FREE_LIST_CAP: usize = 16;

pub struct ConnectionPool {
    http: reqwest::Client,
    deadline: Duration,
    active: RwLock<HashMap<String, Arc<RemoteBucketClient>>>,
    free: Mutex<VecDeque<RemoteBucketClient>>,
}

impl ConnectionPool {
    pub fn new(deadline: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            deadline,
            active: RwLock::new(HashMap::new()),
            free: Mutex::new(VecDeque::new()),
        }
    }

    /// The client for `addr`, created on first use.
    pub fn get(&self, addr: &str) -> Arc<RemoteBucketClient> {
        loop {
            if let Some(client) = self.peek(addr) {
                return client;
            }

            let fresh = Arc::new(self.new_client(addr));
            let lost = {
                let mut active = self.active.write();
                if active.contains_key(addr) {
                    Some(fresh)
                } else {
                    active.insert(addr.to_string(), fresh.clone());
                    return fresh;
                }
            };
            if let Some(loser) = lost {
                self.recycle(loser);
            }
        }
    }

    pub fn peek(&self, addr: &str) -> Option<Arc<RemoteBucketClient>> {
        self.active.read().get(addr).cloned()
    }

    /// Drops the client for `addr`. Callers still holding it keep a working handle.
    pub fn evict(&self, addr: &str) -> bool {
        let evicted = self.active.write().remove(addr);
        match evicted {
            Some(client) => {
                tracing::debug!("Evicted pooled client for {}", addr);
                self.recycle(client);
                true
            }
            None => false,
        }
    }

    fn new_client(&self, addr: &str) -> RemoteBucketClient {
        match self.free.lock().pop_front() {
            Some(mut client) => {
                client.retarget(addr);
                client
            }
            None => RemoteBucketClient::new(addr, self.http.clone(), self.deadline),
        }
    }

    fn recycle(&self, client: Arc<RemoteBucketClient>) {
        // Only clients nobody else holds can be reused.
        if let Ok(client) = Arc::try_unwrap(client) {
            let mut free = self.free.lock();
            if free.len() < FREE_LIST_CAP {
                free.push_back(client);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.active.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.read().is_empty()
    }

    pub fn free_len(&self) -> usize {
        self.free.lock().len()
    }
}
