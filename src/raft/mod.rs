//! Replica group interface.
//!
//! A replica group participant runs the replicated-log protocol for one
//! (space, partition) on this host. This module fixes the contract between a
//! participant and the partition it drives:
//!
//! - the participant answers role/leader queries and accepts appends
//!   ([`ReplicaGroup`])
//! - the partition applies committed entries and reacts to leadership
//!   changes ([`StateMachine`])
//!
//! The election and log-matching protocol itself is not part of this crate.
//! [`local`] provides an in-process participant that replicates between
//! participants registered on a shared [`local::LocalNetwork`].
//!
//! - [`codec`] - Log entry wire format
//! - [`local`] - In-process participant

pub mod codec;
pub mod local;

use crate::core::error::{StoreError, StoreResult};
use crate::core::host::HostAddr;
use crate::engine::KeyValue;
use crate::{PartitionId, SpaceId};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

pub use local::{LocalNetwork, LocalReplica, LocalReplicaFactory};

/// Position of an entry in a partition's log. The first entry is 1.
pub type LogId = u64;

/// Leadership term.
pub type TermId = u64;

/// Identifier of the cluster a replica group belongs to.
pub type ClusterId = u64;

/// A committed log entry handed to the state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: LogId,
    pub term: TermId,
    pub payload: Vec<u8>,
}

impl LogEntry {
    pub fn new(id: LogId, term: TermId, payload: Vec<u8>) -> Self {
        Self { id, term, payload }
    }
}

/// Role of a participant in its replica group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Follower,
    /// Election in progress; opaque to the store.
    Candidate,
    Leader,
    /// Non-voting member receiving the log.
    Learner,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Follower => write!(f, "follower"),
            Self::Candidate => write!(f, "candidate"),
            Self::Leader => write!(f, "leader"),
            Self::Learner => write!(f, "learner"),
        }
    }
}

/// Callbacks a participant drives on its partition.
///
/// All callbacks run on the participant's own execution context and must
/// not block it.
pub trait StateMachine: Send + Sync {
    /// Apply committed entries, delivered in log order.
    ///
    /// Entries at or below [`StateMachine::last_applied`] must be ignored.
    /// An error is fatal for the partition.
    fn commit_logs(&self, entries: &[LogEntry]) -> StoreResult<()>;

    fn on_elected(&self, term: TermId);

    fn on_lost_leadership(&self, term: TermId);

    /// Highest log id already applied.
    fn last_applied(&self) -> LogId;

    /// Copy of the applied state, handed to members too far behind the
    /// retained log.
    fn snapshot(&self) -> StoreResult<Snapshot> {
        Err(StoreError::internal("state machine does not produce snapshots"))
    }

    /// Replace the applied state with `snapshot`.
    fn install_snapshot(&self, snapshot: &Snapshot) -> StoreResult<()> {
        let _ = snapshot;
        Err(StoreError::internal("state machine does not install snapshots"))
    }
}

/// Applied state of a partition up to and including `last_applied`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub last_applied: LogId,
    pub data: Vec<KeyValue>,
}

/// Produces the payload of an atomic append. Runs on the participant after
/// every earlier entry has been applied.
pub type AtomicPayloadFn = Box<dyn FnOnce() -> StoreResult<Vec<u8>> + Send>;

/// Completion of one append: resolves once, to the committed log id or to a
/// terminal error.
#[must_use = "an append handle does nothing unless awaited"]
pub struct AppendHandle {
    rx: oneshot::Receiver<StoreResult<LogId>>,
}

impl AppendHandle {
    /// Pair a fresh handle with the sender that completes it.
    pub fn channel() -> (oneshot::Sender<StoreResult<LogId>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// A handle that is already complete.
    pub fn ready(result: StoreResult<LogId>) -> Self {
        let (tx, handle) = Self::channel();
        let _ = tx.send(result);
        handle
    }
}

impl Future for AppendHandle {
    type Output = StoreResult<LogId>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|res| {
            res.unwrap_or_else(|_| {
                Err(StoreError::commit_failed(
                    "participant dropped the entry before commit",
                ))
            })
        })
    }
}

/// Replica group participant for one partition.
pub trait ReplicaGroup: Send + Sync {
    /// Begin participating: replay the local log, join the group.
    fn start(&self) -> StoreResult<()>;

    /// Leave the group. Queued appends fail with `CommitFailed`.
    fn stop(&self);

    fn role(&self) -> Role;

    fn is_leader(&self) -> bool {
        self.role() == Role::Leader
    }

    /// Best-known leader's replication address, unset when unknown.
    fn leader(&self) -> HostAddr;

    fn term(&self) -> TermId;

    /// Replication address of this participant.
    fn address(&self) -> HostAddr;

    /// Append an opaque payload. Fails with `LeaderChanged` unless this
    /// participant is leader at submission time.
    fn append_async(&self, payload: Vec<u8>) -> AppendHandle;

    /// Append the payload produced by `op`, evaluated in log order.
    fn atomic_op_async(&self, op: AtomicPayloadFn) -> AppendHandle;

    /// Append a membership command adding `learner` to the group.
    fn add_learner(&self, learner: HostAddr) -> AppendHandle {
        self.append_async(codec::encode_learner(&learner))
    }

    /// Learners added through the log.
    fn learners(&self) -> Vec<HostAddr>;

    /// Drop durable log entries at or below `upto`, which the engine holds on
    /// its own. Returns the number of log files removed.
    fn compact_log(&self, upto: LogId) -> StoreResult<usize> {
        let _ = upto;
        Ok(0)
    }
}

/// Construction parameters of a participant.
#[derive(Debug, Clone)]
pub struct ReplicaOptions {
    pub cluster_id: ClusterId,
    pub space: SpaceId,
    pub part: PartitionId,
    /// Replication address of this host.
    pub local_addr: HostAddr,
    /// Replication addresses of every group member, this host included or not.
    pub peers: Vec<HostAddr>,
    /// Durable log location; `None` keeps the log in memory only.
    pub wal_path: Option<PathBuf>,
}

impl ReplicaOptions {
    /// Peers other than this host.
    pub fn remote_peers(&self) -> Vec<HostAddr> {
        self.peers
            .iter()
            .copied()
            .filter(|p| *p != self.local_addr)
            .collect()
    }
}

/// Creates participants for newly added partitions.
pub trait ReplicaFactory: Send + Sync {
    fn create(
        &self,
        options: ReplicaOptions,
        state_machine: Arc<dyn StateMachine>,
    ) -> StoreResult<Arc<dyn ReplicaGroup>>;
}
