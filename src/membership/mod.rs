//! Membership & Discovery Module
//!
//! Gossip-based membership (inspired by SWIM) that carries the bucket
//! directory. Nodes discover each other, detect failures, and piggyback
//! directory broadcasts on the gossip traffic.
//!
//! ## Core Mechanisms
//! - **Gossip Protocol**: Nodes periodically ping a random peer over UDP and merge the member list it returns.
//! - **Failure Detection**: "Suspect" -> "Dead" transitions with timeouts; a dead node triggers a leave notification.
//! - **Incarnation Numbers**: Resolve disputes about a node's state (Alive/Suspect).
//! - **Delegate**: Metadata exchange, merge validation, broadcasts and join/leave events are handed to a
//!   [`delegate::MembershipDelegate`].
//! - **Reliable Unicast**: A TCP side channel for one-shot state pushes (join handshake).

pub mod broadcast;
pub mod delegate;
pub mod service;
pub mod types;
