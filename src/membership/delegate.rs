//! Hooks between the membership transport and whatever rides on top of it.
//!
//! The transport calls a [`MembershipDelegate`] for every membership event and
//! for every user payload it receives; the delegate talks back through the
//! narrow [`GossipTransport`] surface.

use super::types::{Node, NodeId};
use thiserror::Error;

/// Veto returned by [`MembershipDelegate::notify_merge`].
#[derive(Debug, Clone, Error)]
#[error("merge with {node} rejected: {reason}")]
pub struct MergeRejected {
    pub node: NodeId,
    pub reason: String,
}

/// Callbacks invoked by the membership service.
///
/// Implementations must not block: every callback runs on a transport task.
/// None of them is ever invoked while the transport holds a lock on its
/// member table, so calling back into the transport is allowed.
pub trait MembershipDelegate: Send + Sync {
    /// Metadata this node advertises. Must not exceed `limit` bytes.
    fn node_meta(&self, limit: usize) -> Vec<u8>;

    /// A user payload arrived, by broadcast or by reliable unicast.
    fn notify_msg(&self, msg: &[u8]);

    /// Pending broadcasts to piggyback on the next datagram. Each returned
    /// payload costs `overhead` extra bytes; the total must fit in `limit`.
    fn get_broadcasts(&self, overhead: usize, limit: usize) -> Vec<Vec<u8>>;

    fn notify_join(&self, node: &Node);

    fn notify_leave(&self, node: &Node);

    fn notify_update(&self, node: &Node);

    /// Called before a peer (or a peer's changed metadata) is accepted.
    fn notify_merge(&self, peers: &[Node]) -> Result<(), MergeRejected>;
}

/// The part of the transport a delegate may use.
pub trait GossipTransport: Send + Sync {
    /// Number of members currently considered alive, self included.
    fn num_members(&self) -> usize;

    /// Current view of one member, if known.
    fn member(&self, id: &NodeId) -> Option<Node>;

    /// Every other member currently considered alive.
    fn alive_members(&self) -> Vec<Node>;

    /// Fire-and-forget reliable send to one peer. Never blocks the caller.
    fn send_reliable(&self, to: &Node, payload: Vec<u8>);
}
