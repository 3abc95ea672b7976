//! Cluster Routing Module
//!
//! Turns directory knowledge into answers for callers.
//!
//! ## Core Concepts
//! - **Cluster Selector**: Resolves a bucket to a local handle or to a pooled client for the
//!   nearest remote owner, together with the scope of its placement (None/One/Some/All).
//! - **Connection Pool**: One client per peer RPC address, evicted when the peer leaves.
//! - **Bucket Scheduler**: A periodically rebuilt list of all known buckets, sampled at random
//!   to pick write targets.

pub mod pool;
pub mod scheduler;
pub mod selector;

pub use selector::{ClusterSelector, Resolution, Scope, Target};
