//! Applies committed log entries to a partition's engine.

use crate::core::error::{StoreError, StoreResult};
use crate::engine::{KvEngine, WriteBatch};
use crate::raft::codec::{self, LogCommand};
use crate::raft::{LogEntry, LogId, Snapshot, StateMachine, TermId};
use crate::{PartitionId, SpaceId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Meta key holding the highest applied log id, big-endian.
pub const LAST_APPLIED_KEY: &[u8] = b"__partkv.last_applied";

/// State machine of one partition.
///
/// Every entry is applied as one engine batch that also records its log id
/// under [`LAST_APPLIED_KEY`], so the watermark and the data never diverge
/// and re-delivered entries are skipped after a restart.
pub struct PartStateMachine {
    space: SpaceId,
    part: PartitionId,
    engine: Arc<dyn KvEngine>,
    apply_lock: Mutex<()>,
    last_applied: AtomicU64,
    halted: AtomicBool,
    leader: AtomicBool,
    term: AtomicU64,
    applied_data_entries: AtomicU64,
    commit_batches: AtomicU64,
}

impl PartStateMachine {
    /// Bind to `engine`, resuming from the watermark it already holds.
    pub fn open(space: SpaceId, part: PartitionId, engine: Arc<dyn KvEngine>) -> StoreResult<Self> {
        let last_applied = match engine.get_meta(LAST_APPLIED_KEY)? {
            Some(bytes) => decode_log_id(&bytes)?,
            None => 0,
        };
        if last_applied > 0 {
            tracing::debug!(space, part, last_applied, "resuming partition state machine");
        }
        Ok(Self {
            space,
            part,
            engine,
            apply_lock: Mutex::new(()),
            last_applied: AtomicU64::new(last_applied),
            halted: AtomicBool::new(false),
            leader: AtomicBool::new(false),
            term: AtomicU64::new(0),
            applied_data_entries: AtomicU64::new(0),
            commit_batches: AtomicU64::new(0),
        })
    }

    pub fn engine(&self) -> &Arc<dyn KvEngine> {
        &self.engine
    }

    /// Set once an entry failed to apply. A halted partition applies nothing.
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Data entries applied by this instance. Membership commands and
    /// heartbeats are not counted.
    pub fn applied_data_entries(&self) -> u64 {
        self.applied_data_entries.load(Ordering::Acquire)
    }

    /// Number of `commit_logs` deliveries that applied at least one entry.
    pub fn commit_batches(&self) -> u64 {
        self.commit_batches.load(Ordering::Acquire)
    }

    /// Leadership as last reported by the participant.
    pub fn believes_leader(&self) -> bool {
        self.leader.load(Ordering::Acquire)
    }

    pub fn term(&self) -> TermId {
        self.term.load(Ordering::Acquire)
    }

    fn halt(&self, err: StoreError, log_id: LogId) -> StoreError {
        self.halted.store(true, Ordering::Release);
        tracing::error!(
            space = self.space,
            part = self.part,
            log_id,
            error = %err,
            "partition halted, committed entry could not be applied"
        );
        err
    }

    fn apply_entry(&self, entry: &LogEntry) -> StoreResult<bool> {
        let (mut batch, is_data) = match codec::decode(&entry.payload)? {
            LogCommand::Heartbeat => (WriteBatch::new(), false),
            LogCommand::AddLearner(learner) => {
                tracing::debug!(
                    space = self.space,
                    part = self.part,
                    log_id = entry.id,
                    learner = %learner,
                    "skipping membership entry"
                );
                (WriteBatch::new(), false)
            }
            LogCommand::Data(op) => (op.into_batch(), true),
        };
        batch.put_meta(LAST_APPLIED_KEY.to_vec(), entry.id.to_be_bytes().to_vec());
        self.engine.write_batch(batch)?;
        Ok(is_data)
    }
}

impl StateMachine for PartStateMachine {
    fn commit_logs(&self, entries: &[LogEntry]) -> StoreResult<()> {
        let _apply = self.apply_lock.lock();
        if self.is_halted() {
            return Err(StoreError::PartitionHalted {
                space: self.space,
                part: self.part,
            });
        }

        let mut last = self.last_applied.load(Ordering::Acquire);
        let mut applied = 0usize;
        for entry in entries {
            if entry.id <= last {
                tracing::trace!(space = self.space, part = self.part, log_id = entry.id, "skipping applied entry");
                continue;
            }
            if entry.id != last + 1 {
                let err = StoreError::internal(format!(
                    "log gap: expected entry {}, got {}",
                    last + 1,
                    entry.id
                ));
                return Err(self.halt(err, entry.id));
            }
            match self.apply_entry(entry) {
                Ok(is_data) => {
                    if is_data {
                        self.applied_data_entries.fetch_add(1, Ordering::AcqRel);
                    }
                }
                Err(e) => return Err(self.halt(e, entry.id)),
            }
            last = entry.id;
            self.last_applied.store(last, Ordering::Release);
            applied += 1;
        }

        if applied > 0 {
            self.commit_batches.fetch_add(1, Ordering::AcqRel);
            tracing::trace!(space = self.space, part = self.part, applied, last_applied = last, "committed entries");
        }
        Ok(())
    }

    fn on_elected(&self, term: TermId) {
        self.term.store(term, Ordering::Release);
        self.leader.store(true, Ordering::Release);
        tracing::info!(space = self.space, part = self.part, term, "partition elected leader");
    }

    fn on_lost_leadership(&self, term: TermId) {
        self.leader.store(false, Ordering::Release);
        tracing::info!(space = self.space, part = self.part, term, "partition lost leadership");
    }

    fn last_applied(&self) -> LogId {
        self.last_applied.load(Ordering::Acquire)
    }

    fn snapshot(&self) -> StoreResult<Snapshot> {
        let _apply = self.apply_lock.lock();
        Ok(Snapshot {
            last_applied: self.last_applied.load(Ordering::Acquire),
            data: self.engine.prefix(b"")?.collect(),
        })
    }

    fn install_snapshot(&self, snapshot: &Snapshot) -> StoreResult<()> {
        let _apply = self.apply_lock.lock();
        if self.is_halted() {
            return Err(StoreError::PartitionHalted {
                space: self.space,
                part: self.part,
            });
        }
        let mut batch = WriteBatch::new();
        batch.remove_prefix(Vec::new());
        for (key, value) in &snapshot.data {
            batch.put(key.clone(), value.clone());
        }
        batch.put_meta(
            LAST_APPLIED_KEY.to_vec(),
            snapshot.last_applied.to_be_bytes().to_vec(),
        );
        if let Err(e) = self.engine.write_batch(batch) {
            return Err(self.halt(e, snapshot.last_applied));
        }
        // Entries below the snapshot are gone from every log this member
        // can replay, so the engine must keep them on its own.
        self.engine.flush()?;
        self.last_applied.store(snapshot.last_applied, Ordering::Release);
        tracing::info!(
            space = self.space,
            part = self.part,
            last_applied = snapshot.last_applied,
            keys = snapshot.data.len(),
            "installed partition snapshot"
        );
        Ok(())
    }
}

fn decode_log_id(bytes: &[u8]) -> StoreResult<LogId> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::engine(format!("corrupt applied watermark ({} bytes)", bytes.len())))?;
    Ok(LogId::from_be_bytes(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemEngine;
    use crate::raft::codec::LogOp;

    fn put(id: LogId, key: &str) -> LogEntry {
        let op = LogOp::Put {
            key: key.as_bytes().to_vec(),
            value: id.to_string().into_bytes(),
        };
        LogEntry::new(id, 1, op.encode().unwrap())
    }

    #[test]
    fn test_watermark_survives_reopen() {
        let engine: Arc<dyn KvEngine> = Arc::new(MemEngine::new(1, 1));
        let sm = PartStateMachine::open(1, 1, Arc::clone(&engine)).unwrap();
        sm.commit_logs(&[put(1, "a"), put(2, "b")]).unwrap();

        let reopened = PartStateMachine::open(1, 1, engine).unwrap();
        assert_eq!(reopened.last_applied(), 2);
        reopened.commit_logs(&[put(1, "a"), put(2, "b")]).unwrap();
        assert_eq!(reopened.applied_data_entries(), 0);
    }

    #[test]
    fn test_gap_halts() {
        let engine: Arc<dyn KvEngine> = Arc::new(MemEngine::new(1, 1));
        let sm = PartStateMachine::open(1, 1, engine).unwrap();
        assert!(sm.commit_logs(&[put(2, "a")]).is_err());
        assert!(sm.is_halted());
        assert_eq!(
            sm.commit_logs(&[put(1, "a")]),
            Err(StoreError::PartitionHalted { space: 1, part: 1 })
        );
    }

    #[test]
    fn test_snapshot_replaces_state() {
        let leader_engine: Arc<dyn KvEngine> = Arc::new(MemEngine::new(1, 1));
        let leader = PartStateMachine::open(1, 1, leader_engine).unwrap();
        leader.commit_logs(&[put(1, "a"), put(2, "b")]).unwrap();
        let snapshot = leader.snapshot().unwrap();
        assert_eq!(snapshot.last_applied, 2);
        assert_eq!(snapshot.data.len(), 2);

        let engine: Arc<dyn KvEngine> = Arc::new(MemEngine::new(1, 1));
        let follower = PartStateMachine::open(1, 1, Arc::clone(&engine)).unwrap();
        engine.put(b"stale".to_vec(), b"x".to_vec()).unwrap();
        follower.install_snapshot(&snapshot).unwrap();
        assert_eq!(follower.last_applied(), 2);
        assert_eq!(engine.get(b"stale").unwrap(), None);
        assert_eq!(engine.get(b"b").unwrap(), Some(b"2".to_vec()));

        follower.commit_logs(&[put(2, "b"), put(3, "c")]).unwrap();
        assert_eq!(follower.last_applied(), 3);
        assert_eq!(follower.applied_data_entries(), 1);
    }

    #[test]
    fn test_corrupt_watermark() {
        assert!(decode_log_id(&[1, 2, 3]).is_err());
        assert_eq!(decode_log_id(&7u64.to_be_bytes()).unwrap(), 7);
    }
}
