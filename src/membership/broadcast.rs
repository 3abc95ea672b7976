//! Transmit-limited broadcast queue.
//!
//! Every queued broadcast is handed out at most
//! `retransmit_mult * ceil(log10(n + 1))` times, where `n` is the current
//! member count, and then forgotten. Queueing a broadcast drops every queued
//! one it invalidates, so superseded updates never hit the wire.

use parking_lot::Mutex;

/// A payload that can sit in a [`TransmitLimitedQueue`].
pub trait Broadcast: Send + Sync {
    /// True if `self` supersedes `other`, which can then be dropped unsent.
    fn invalidates(&self, other: &Self) -> bool;

    /// Encoded payload handed to the transport.
    fn message(&self) -> &[u8];
}

struct Queued<B> {
    broadcast: B,
    transmits: usize,
    seq: u64,
}

struct QueueState<B> {
    items: Vec<Queued<B>>,
    next_seq: u64,
}

pub struct TransmitLimitedQueue<B> {
    retransmit_mult: usize,
    state: Mutex<QueueState<B>>,
}

/// Maximum number of transmissions for one broadcast in a cluster of
/// `num_nodes` members.
pub fn retransmit_limit(retransmit_mult: usize, num_nodes: usize) -> usize {
    let node_scale = ((num_nodes + 1) as f64).log10().ceil() as usize;
    retransmit_mult.max(1) * node_scale.max(1)
}

impl<B: Broadcast> TransmitLimitedQueue<B> {
    pub fn new(retransmit_mult: usize) -> Self {
        Self {
            retransmit_mult,
            state: Mutex::new(QueueState {
                items: Vec::new(),
                next_seq: 0,
            }),
        }
    }

    pub fn queue_broadcast(&self, broadcast: B) {
        let mut state = self.state.lock();
        let before = state.items.len();
        state
            .items
            .retain(|queued| !broadcast.invalidates(&queued.broadcast));

        let dropped = before - state.items.len();
        if dropped > 0 {
            tracing::trace!("Broadcast superseded {} queued message(s)", dropped);
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.items.push(Queued {
            broadcast,
            transmits: 0,
            seq,
        });
    }

    /// Drains up to `limit` bytes of broadcasts, least transmitted first and
    /// newest first among equals.
    pub fn get_broadcasts(&self, num_nodes: usize, overhead: usize, limit: usize) -> Vec<Vec<u8>> {
        let transmit_limit = retransmit_limit(self.retransmit_mult, num_nodes);
        let mut state = self.state.lock();
        if state.items.is_empty() {
            return Vec::new();
        }

        state
            .items
            .sort_by(|a, b| a.transmits.cmp(&b.transmits).then(b.seq.cmp(&a.seq)));

        let before = state.items.len();
        state
            .items
            .retain(|queued| queued.broadcast.message().len() + overhead <= limit);
        let oversized = before - state.items.len();
        if oversized > 0 {
            tracing::warn!(
                "Dropped {} broadcast(s) that can never fit a {} byte datagram",
                oversized,
                limit
            );
        }

        let mut used = 0usize;
        let mut out = Vec::new();
        for queued in state.items.iter_mut() {
            let message = queued.broadcast.message();
            let cost = message.len() + overhead;
            if used + cost > limit {
                continue;
            }
            used += cost;
            out.push(message.to_vec());
            queued.transmits += 1;
        }

        state
            .items
            .retain(|queued| queued.transmits < transmit_limit);
        out
    }

    /// Removes and returns the broadcasts that cannot fit a single datagram
    /// of `limit` bytes, so the caller can deliver them another way.
    pub fn drain_oversized(&self, overhead: usize, limit: usize) -> Vec<B> {
        let mut state = self.state.lock();
        let mut oversized = Vec::new();
        let mut kept = Vec::with_capacity(state.items.len());
        for queued in state.items.drain(..) {
            if queued.broadcast.message().len() + overhead > limit {
                oversized.push(queued.broadcast);
            } else {
                kept.push(queued);
            }
        }
        state.items = kept;
        oversized
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
