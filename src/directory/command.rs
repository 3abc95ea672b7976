//! Replicated directory commands.
//!
//! Directory changes travel as a stream of bincode-encoded [`Command`]s,
//! piggybacked on gossip or pushed reliably during the join handshake. A
//! buffer may carry several commands back to back; decoding stops at the
//! first one that does not parse and keeps what came before it.

use crate::error::{StoreError, StoreResult};
use crate::membership::broadcast::Broadcast;
use crate::membership::types::NodeId;
use crate::storage::handle::BucketName;

use bincode::Options;
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Upper bound for one encoded command.
const MAX_COMMAND_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    AddOwnership {
        node: NodeId,
        bucket: BucketName,
    },
    DropOwnership {
        node: NodeId,
        bucket: BucketName,
    },
    RegisterNetBucket {
        node: NodeId,
        provider: String,
        bucket: BucketName,
        meta: Vec<u8>,
        global: bool,
    },
    UnregisterNetBucket {
        node: NodeId,
        bucket: BucketName,
        global: bool,
    },
    SetHealth {
        bucket: BucketName,
        writable: bool,
    },
    /// Asks the receiver to push its own state back to `node`. Rides along
    /// with a join-time state push so both sides of a (re)join converge.
    RequestState {
        node: NodeId,
    },
}

/// What a command is about; two commands with the same subject supersede each other.
#[derive(Debug, PartialEq, Eq)]
enum Subject<'a> {
    Ownership(&'a NodeId, &'a [u8]),
    NetBucket(&'a NodeId, &'a [u8], bool),
    Health(&'a [u8]),
    StateRequest(&'a NodeId),
}

impl Command {
    fn subject(&self) -> Subject<'_> {
        match self {
            Command::AddOwnership { node, bucket } | Command::DropOwnership { node, bucket } => {
                Subject::Ownership(node, bucket)
            }
            Command::RegisterNetBucket {
                node,
                bucket,
                global,
                ..
            }
            | Command::UnregisterNetBucket {
                node,
                bucket,
                global,
            } => Subject::NetBucket(node, bucket, *global),
            Command::SetHealth { bucket, .. } => Subject::Health(bucket),
            Command::RequestState { node } => Subject::StateRequest(node),
        }
    }

    /// `true` if `other`, still queued, is made redundant by `self`.
    pub fn invalidates(&self, other: &Command) -> bool {
        self.subject() == other.subject()
    }

    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        Ok(wire().serialize(self)?)
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) -> StoreResult<()> {
        wire().serialize_into(buf, self)?;
        Ok(())
    }
}

fn wire() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
        .with_limit(MAX_COMMAND_BYTES)
}

/// Concatenates the encodings of `commands`.
pub fn encode_commands(commands: &[Command]) -> StoreResult<Vec<u8>> {
    let mut buf = Vec::new();
    for command in commands {
        command.encode_into(&mut buf)?;
    }
    Ok(buf)
}

/// Decodes as many commands as parse from `buf`.
///
/// The error, if any, is the one that stopped decoding; every command before
/// it is returned.
pub fn decode_commands(buf: &[u8]) -> (Vec<Command>, Option<StoreError>) {
    let mut cursor = Cursor::new(buf);
    let mut commands = Vec::new();
    while (cursor.position() as usize) < buf.len() {
        match wire().deserialize_from::<_, Command>(&mut cursor) {
            Ok(command) => commands.push(command),
            Err(e) => return (commands, Some(StoreError::from(e))),
        }
    }
    (commands, None)
}

/// A command waiting in the broadcast queue, with its encoding cached.
#[derive(Debug, Clone)]
pub struct QueuedCommand {
    pub command: Command,
    encoded: Vec<u8>,
}

impl QueuedCommand {
    pub fn new(command: Command) -> StoreResult<Self> {
        let encoded = command.encode()?;
        Ok(Self { command, encoded })
    }
}

impl Broadcast for QueuedCommand {
    fn invalidates(&self, other: &Self) -> bool {
        self.command.invalidates(&other.command)
    }

    fn message(&self) -> &[u8] {
        &self.encoded
    }
}
