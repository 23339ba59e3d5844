//! Partition: one replica group participant bound to one storage engine.
//!
//! Reads go straight to the engine. Writes are encoded into a single log
//! entry and only submitted while the participant is leader; they complete
//! once the entry commits and has been applied by [`PartStateMachine`].
//!
//! - [`state_machine`] - Committed-entry application

pub mod state_machine;

pub use state_machine::{PartStateMachine, LAST_APPLIED_KEY};

use crate::core::error::{StoreError, StoreResult};
use crate::core::host::HostAddr;
use crate::engine::{KeyValue, KvEngine};
use crate::raft::codec::LogOp;
use crate::raft::{
    AtomicPayloadFn, LogId, ReplicaFactory, ReplicaGroup, ReplicaOptions, Role, StateMachine,
    TermId,
};
use crate::{PartitionId, SpaceId};
use std::sync::Arc;

/// Read-modify-write operation evaluated on the leader against the engine
/// state left by every earlier entry. Returning `None` declines the write and
/// fails the call with `AtomicOpFailed`.
pub type AtomicOp = Box<dyn FnOnce(&dyn KvEngine) -> StoreResult<Option<LogOp>> + Send>;

pub struct Part {
    space: SpaceId,
    part: PartitionId,
    state_machine: Arc<PartStateMachine>,
    replica: Arc<dyn ReplicaGroup>,
}

impl Part {
    /// Bind `engine` to a fresh participant from `factory`. The participant
    /// is not started.
    pub fn open(
        space: SpaceId,
        part: PartitionId,
        engine: Arc<dyn KvEngine>,
        factory: &dyn ReplicaFactory,
        options: ReplicaOptions,
    ) -> StoreResult<Self> {
        let state_machine = Arc::new(PartStateMachine::open(space, part, engine)?);
        let replica = factory.create(
            options,
            Arc::clone(&state_machine) as Arc<dyn StateMachine>,
        )?;
        Ok(Self {
            space,
            part,
            state_machine,
            replica,
        })
    }

    pub fn start(&self) -> StoreResult<()> {
        self.replica.start()
    }

    pub fn stop(&self) {
        self.replica.stop();
    }

    pub fn space_id(&self) -> SpaceId {
        self.space
    }

    pub fn part_id(&self) -> PartitionId {
        self.part
    }

    pub fn engine(&self) -> &Arc<dyn KvEngine> {
        self.state_machine.engine()
    }

    pub fn state_machine(&self) -> &Arc<PartStateMachine> {
        &self.state_machine
    }

    pub fn replica(&self) -> &Arc<dyn ReplicaGroup> {
        &self.replica
    }

    pub fn is_leader(&self) -> bool {
        self.replica.is_leader()
    }

    pub fn role(&self) -> Role {
        self.replica.role()
    }

    pub fn term(&self) -> TermId {
        self.replica.term()
    }

    /// Service address of the believed leader, unset when unknown.
    pub fn leader(&self) -> HostAddr {
        self.replica.leader().store_addr()
    }

    pub fn last_applied(&self) -> LogId {
        self.state_machine.last_applied()
    }

    pub fn is_halted(&self) -> bool {
        self.state_machine.is_halted()
    }

    /// Data entries applied on this replica.
    pub fn num_logs(&self) -> u64 {
        self.state_machine.applied_data_entries()
    }

    /// Flush the engine. A persistent engine then lets the participant drop
    /// log segments it covers.
    pub fn flush(&self) -> StoreResult<()> {
        let durable = self.last_applied();
        self.engine().flush()?;
        if self.engine().data_path().is_some() {
            let removed = self.replica.compact_log(durable)?;
            if removed > 0 {
                tracing::debug!(space = self.space, part = self.part, durable, removed, "log compacted after flush");
            }
        }
        Ok(())
    }

    pub async fn put(&self, key: Vec<u8>, value: Vec<u8>) -> StoreResult<()> {
        self.submit(LogOp::Put { key, value }).await
    }

    pub async fn multi_put(&self, kvs: Vec<KeyValue>) -> StoreResult<()> {
        self.submit(LogOp::MultiPut(kvs)).await
    }

    pub async fn remove(&self, key: Vec<u8>) -> StoreResult<()> {
        self.submit(LogOp::Remove(key)).await
    }

    pub async fn multi_remove(&self, keys: Vec<Vec<u8>>) -> StoreResult<()> {
        self.submit(LogOp::MultiRemove(keys)).await
    }

    pub async fn remove_range(&self, start: Vec<u8>, end: Vec<u8>) -> StoreResult<()> {
        if start > end {
            return Err(StoreError::invalid("range start is past range end"));
        }
        self.submit(LogOp::RemoveRange { start, end }).await
    }

    pub async fn remove_prefix(&self, prefix: Vec<u8>) -> StoreResult<()> {
        self.submit(LogOp::RemovePrefix(prefix)).await
    }

    pub async fn atomic_op(&self, op: AtomicOp) -> StoreResult<()> {
        self.check_writable()?;
        let engine = Arc::clone(self.engine());
        let payload: AtomicPayloadFn = Box::new(move || match op(engine.as_ref())? {
            Some(op) => op.encode(),
            None => Err(StoreError::AtomicOpFailed),
        });
        self.replica
            .atomic_op_async(payload)
            .await
            .map(|_| ())
            .map_err(|e| self.client_error(e))
    }

    /// Append an add-learner membership entry. Returns its log id.
    pub async fn add_learner(&self, learner: HostAddr) -> StoreResult<LogId> {
        self.check_writable()?;
        self.replica
            .add_learner(learner.raft_addr())
            .await
            .map_err(|e| self.client_error(e))
    }

    async fn submit(&self, op: LogOp) -> StoreResult<()> {
        self.check_writable()?;
        let payload = op.encode()?;
        self.replica
            .append_async(payload)
            .await
            .map(|_| ())
            .map_err(|e| self.client_error(e))
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.is_halted() {
            return Err(StoreError::PartitionHalted {
                space: self.space,
                part: self.part,
            });
        }
        if !self.replica.is_leader() {
            return Err(StoreError::leader_changed(self.leader()));
        }
        Ok(())
    }

    /// Participants report replication addresses; callers retry against
    /// service addresses.
    fn client_error(&self, err: StoreError) -> StoreError {
        match err {
            StoreError::LeaderChanged { leader } => StoreError::leader_changed(leader.store_addr()),
            other => other,
        }
    }
}

impl std::fmt::Debug for Part {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Part")
            .field("space", &self.space)
            .field("part", &self.part)
            .field("role", &self.role())
            .field("last_applied", &self.last_applied())
            .finish()
    }
}
