//! In-process replica group participant.
//!
//! [`LocalReplica`] implements [`ReplicaGroup`] for participants that live in
//! the same process and reach each other through a shared [`LocalNetwork`].
//! Each participant owns one commit worker task. The worker is the only
//! place log ids are assigned, entries are persisted and applied, and
//! leadership callbacks are delivered, so all of that happens in log order.
//!
//! Single-member groups elect themselves on start. Multi-member groups stay
//! followers until [`LocalNetwork::elect`] names a leader. The leader commits
//! an entry once it is persisted and applied locally, then pushes it to every
//! member registered at that moment. Elections wait for a commit in progress,
//! so every member receives a term's entries before the next term's.
//!
//! Members keep the tail of their log in memory. A member that joins late or
//! sees a gap pulls the missing entries from the leader, or a snapshot of the
//! leader's state when the tail no longer reaches back far enough.

use super::codec::{self, CommandType};
use super::{
    AppendHandle, AtomicPayloadFn, LogEntry, LogId, ReplicaFactory, ReplicaGroup, ReplicaOptions,
    Role, Snapshot, StateMachine, TermId,
};
use crate::core::error::{StoreError, StoreResult};
use crate::core::host::HostAddr;
use crate::storage::wal::LogStore;
use crate::{PartitionId, SpaceId};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot};

/// Default number of appends that may wait for the commit worker.
pub const DEFAULT_APPEND_BUFFER_SIZE: usize = 1024;

/// Entries each member keeps in memory to serve lagging members.
pub const DEFAULT_RETAINED_ENTRIES: usize = 4096;

enum Payload {
    Raw(Vec<u8>),
    Atomic(AtomicPayloadFn),
}

enum Command {
    Append {
        payload: Payload,
        term: TermId,
        reply: oneshot::Sender<StoreResult<LogId>>,
    },
    Replicate {
        from: HostAddr,
        term: TermId,
        entries: Vec<LogEntry>,
    },
    CatchUp {
        from: HostAddr,
    },
    Elected {
        term: TermId,
    },
    LostLeadership {
        term: TermId,
    },
    Stop,
}

#[derive(Debug)]
struct ReplicaState {
    role: Role,
    term: TermId,
    leader: HostAddr,
    last_log_id: LogId,
    last_log_term: TermId,
    learners: Vec<HostAddr>,
    stopped: bool,
}

/// What a member hands to a lagging peer.
enum CatchUp {
    Entries(Vec<LogEntry>),
    Snapshot {
        snapshot: Snapshot,
        term: TermId,
        learners: Vec<HostAddr>,
    },
}

struct Shared {
    options: ReplicaOptions,
    state_machine: Arc<dyn StateMachine>,
    network: Arc<LocalNetwork>,
    state: Mutex<ReplicaState>,
    log: Mutex<Option<LogStore>>,
    history: Mutex<VecDeque<LogEntry>>,
    retained: usize,
    tx: mpsc::UnboundedSender<Command>,
    queued: AtomicUsize,
    buffer_size: usize,
}

fn log_error(err: anyhow::Error) -> StoreError {
    StoreError::ReplicationFailure {
        message: format!("{err:#}"),
    }
}

impl Shared {
    fn space(&self) -> SpaceId {
        self.options.space
    }

    fn part(&self) -> PartitionId {
        self.options.part
    }

    fn addr(&self) -> HostAddr {
        self.options.local_addr
    }

    fn term(&self) -> TermId {
        self.state.lock().term
    }

    fn become_leader(&self, term: TermId) {
        let mut st = self.state.lock();
        if st.stopped {
            return;
        }
        let was_leader = st.role == Role::Leader;
        st.term = term;
        st.leader = self.addr();
        st.role = Role::Leader;
        if !was_leader {
            let _ = self.tx.send(Command::Elected { term });
        }
        tracing::info!(
            space = self.space(),
            part = self.part(),
            term,
            addr = %self.addr(),
            "participant became leader"
        );
    }

    fn become_follower(&self, leader: HostAddr, term: TermId) {
        let mut st = self.state.lock();
        if st.stopped {
            return;
        }
        let old_term = st.term;
        if st.role == Role::Leader {
            let _ = self.tx.send(Command::LostLeadership { term: old_term });
        }
        st.role = Role::Follower;
        st.term = term;
        st.leader = leader;
        tracing::debug!(
            space = self.space(),
            part = self.part(),
            term,
            leader = %leader,
            "participant following"
        );
    }

    fn enqueue_replicated(&self, from: HostAddr, term: TermId, entries: Vec<LogEntry>) {
        let _ = self.tx.send(Command::Replicate {
            from,
            term,
            entries,
        });
    }

    fn retain(&self, entries: &[LogEntry]) {
        let mut history = self.history.lock();
        history.extend(entries.iter().cloned());
        while history.len() > self.retained {
            history.pop_front();
        }
    }

    fn observe_membership(&self, entry: &LogEntry) {
        if entry.payload.first() != Some(&(CommandType::AddLearner as u8)) {
            return;
        }
        match codec::decode_learner(&entry.payload) {
            Ok(learner) => {
                let mut st = self.state.lock();
                if !st.learners.contains(&learner) {
                    st.learners.push(learner);
                    tracing::info!(
                        space = self.space(),
                        part = self.part(),
                        learner = %learner,
                        log_id = entry.id,
                        "learner added"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    space = self.space(),
                    part = self.part(),
                    error = %e,
                    log_id = entry.id,
                    "malformed membership entry"
                );
            }
        }
    }

    fn persist(&self, entry: &LogEntry) -> StoreResult<()> {
        if let Some(log) = self.log.lock().as_mut() {
            log.append(entry).map_err(log_error)?;
        }
        Ok(())
    }

    /// Assign the next log id to an append and commit it. Runs on the worker.
    fn commit_local(&self, payload: Payload, term: TermId) -> StoreResult<LogId> {
        // Held until the entry is queued on every member, so no election
        // lands between the leadership check and the push.
        let fence = self.network.fence(self.space(), self.part());
        let _fence = fence.lock();
        let id = {
            let st = self.state.lock();
            if st.stopped {
                return Err(StoreError::commit_failed("participant stopped"));
            }
            if st.role != Role::Leader || st.term != term {
                return Err(StoreError::leader_changed(st.leader));
            }
            st.last_log_id + 1
        };

        let payload = match payload {
            Payload::Raw(bytes) => bytes,
            Payload::Atomic(op) => op()?,
        };
        let entry = LogEntry::new(id, term, payload);
        self.persist(&entry)?;
        {
            let mut st = self.state.lock();
            st.last_log_id = id;
            st.last_log_term = term;
        }

        self.state_machine.commit_logs(std::slice::from_ref(&entry))?;
        self.observe_membership(&entry);
        self.retain(std::slice::from_ref(&entry));
        self.network
            .push(self.space(), self.part(), self.addr(), term, &entry);
        Ok(id)
    }

    /// Persist and apply entries pushed by `from`. Runs on the worker.
    fn apply_replicated(&self, from: HostAddr, term: TermId, entries: Vec<LogEntry>) {
        let (last, last_term) = {
            let st = self.state.lock();
            (st.last_log_id, st.last_log_term)
        };
        if term < last_term {
            tracing::warn!(
                space = self.space(),
                part = self.part(),
                from = %from,
                term,
                last_term,
                "rejecting entries from a deposed leader"
            );
            return;
        }

        let mut fresh: Vec<LogEntry> = entries.into_iter().filter(|e| e.id > last).collect();
        let Some(first) = fresh.first() else {
            return;
        };
        if first.id != last + 1 {
            tracing::debug!(
                space = self.space(),
                part = self.part(),
                expected = last + 1,
                received = first.id,
                from = %from,
                "log gap, catching up"
            );
            if !self.catch_up(from) {
                return;
            }
            let last = self.state.lock().last_log_id;
            fresh.retain(|e| e.id > last);
            match fresh.first() {
                None => return,
                Some(first) if first.id != last + 1 => {
                    tracing::error!(
                        space = self.space(),
                        part = self.part(),
                        expected = last + 1,
                        received = first.id,
                        "log gap remains after catching up"
                    );
                    return;
                }
                Some(_) => {}
            }
        }
        self.accept(fresh);
    }

    /// Persist and apply contiguous entries following the local log.
    fn accept(&self, entries: Vec<LogEntry>) -> bool {
        for entry in &entries {
            if let Err(e) = self.persist(entry) {
                tracing::error!(
                    space = self.space(),
                    part = self.part(),
                    log_id = entry.id,
                    error = %e,
                    "failed to persist replicated entry"
                );
                return false;
            }
            let mut st = self.state.lock();
            st.last_log_id = entry.id;
            st.last_log_term = entry.term;
        }
        if let Err(e) = self.state_machine.commit_logs(&entries) {
            tracing::error!(
                space = self.space(),
                part = self.part(),
                error = %e,
                "follower failed to apply replicated entries"
            );
            return false;
        }
        for entry in &entries {
            self.observe_membership(entry);
        }
        self.retain(&entries);
        true
    }

    /// Bring the local log level with `source`. Runs on the worker.
    fn catch_up(&self, source: HostAddr) -> bool {
        if source == self.addr() {
            return false;
        }
        let after = self.state.lock().last_log_id;
        let fetched = self
            .network
            .fetch(self.space(), self.part(), source, after);
        match fetched {
            Ok(CatchUp::Entries(entries)) => {
                let last = self.state.lock().last_log_id;
                let entries: Vec<LogEntry> = entries.into_iter().filter(|e| e.id > last).collect();
                match entries.first().map(|e| e.id) {
                    None => true,
                    Some(first) if first == last + 1 => {
                        tracing::info!(
                            space = self.space(),
                            part = self.part(),
                            source = %source,
                            entries = entries.len(),
                            "caught up from peer log"
                        );
                        self.accept(entries)
                    }
                    Some(first) => {
                        tracing::error!(
                            space = self.space(),
                            part = self.part(),
                            expected = last + 1,
                            received = first,
                            "peer log does not follow the local log"
                        );
                        false
                    }
                }
            }
            Ok(CatchUp::Snapshot {
                snapshot,
                term,
                learners,
            }) => self.install(source, snapshot, term, learners),
            Err(e) => {
                tracing::error!(
                    space = self.space(),
                    part = self.part(),
                    source = %source,
                    error = %e,
                    "failed to catch up"
                );
                false
            }
        }
    }

    fn install(&self, source: HostAddr, snapshot: Snapshot, term: TermId, learners: Vec<HostAddr>) -> bool {
        if snapshot.last_applied <= self.state.lock().last_log_id {
            return true;
        }
        if let Err(e) = self.state_machine.install_snapshot(&snapshot) {
            tracing::error!(
                space = self.space(),
                part = self.part(),
                error = %e,
                "failed to install snapshot"
            );
            return false;
        }
        if let Some(log) = self.log.lock().as_mut() {
            if let Err(e) = log.compact_through(snapshot.last_applied) {
                tracing::warn!(
                    space = self.space(),
                    part = self.part(),
                    error = %e,
                    "failed to drop log segments below snapshot"
                );
            }
        }
        self.history.lock().clear();
        let mut st = self.state.lock();
        st.last_log_id = snapshot.last_applied;
        st.last_log_term = term;
        for learner in learners {
            if !st.learners.contains(&learner) {
                st.learners.push(learner);
            }
        }
        tracing::info!(
            space = self.space(),
            part = self.part(),
            source = %source,
            last_log_id = snapshot.last_applied,
            "caught up from peer snapshot"
        );
        true
    }

    /// Entries after `after`, or a snapshot when they are no longer retained.
    fn entries_after(&self, after: LogId) -> StoreResult<CatchUp> {
        let last = self.state.lock().last_log_id;
        {
            let history = self.history.lock();
            let covered = match history.front() {
                Some(first) => first.id <= after + 1,
                None => after >= last,
            };
            if covered {
                return Ok(CatchUp::Entries(
                    history.iter().filter(|e| e.id > after).cloned().collect(),
                ));
            }
        }
        let snapshot = self.state_machine.snapshot()?;
        let st = self.state.lock();
        Ok(CatchUp::Snapshot {
            snapshot,
            term: st.last_log_term,
            learners: st.learners.clone(),
        })
    }
}

async fn run_worker(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Append {
                payload,
                term,
                reply,
            } => {
                shared.queued.fetch_sub(1, Ordering::AcqRel);
                let result = shared.commit_local(payload, term);
                let _ = reply.send(result);
            }
            Command::Replicate {
                from,
                term,
                entries,
            } => shared.apply_replicated(from, term, entries),
            Command::CatchUp { from } => {
                shared.catch_up(from);
            }
            Command::Elected { term } => shared.state_machine.on_elected(term),
            Command::LostLeadership { term } => shared.state_machine.on_lost_leadership(term),
            Command::Stop => break,
        }
    }

    rx.close();
    while let Ok(command) = rx.try_recv() {
        if let Command::Append { reply, .. } = command {
            let _ = reply.send(Err(StoreError::commit_failed("participant stopped")));
        }
    }
    tracing::debug!(
        space = shared.space(),
        part = shared.part(),
        "commit worker exited"
    );
}

/// In-process [`ReplicaGroup`].
pub struct LocalReplica {
    shared: Arc<Shared>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
}

impl LocalReplica {
    pub fn new(
        options: ReplicaOptions,
        state_machine: Arc<dyn StateMachine>,
        network: Arc<LocalNetwork>,
        buffer_size: usize,
    ) -> Self {
        Self::with_retained(options, state_machine, network, buffer_size, DEFAULT_RETAINED_ENTRIES)
    }

    /// Like [`LocalReplica::new`], keeping `retained` entries in memory for
    /// lagging members.
    pub fn with_retained(
        options: ReplicaOptions,
        state_machine: Arc<dyn StateMachine>,
        network: Arc<LocalNetwork>,
        buffer_size: usize,
        retained: usize,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            options,
            state_machine,
            network,
            state: Mutex::new(ReplicaState {
                role: Role::Follower,
                term: 0,
                leader: HostAddr::UNSET,
                last_log_id: 0,
                last_log_term: 0,
                learners: Vec::new(),
                stopped: false,
            }),
            log: Mutex::new(None),
            history: Mutex::new(VecDeque::new()),
            retained,
            tx,
            queued: AtomicUsize::new(0),
            buffer_size: buffer_size.max(1),
        });
        Self {
            shared,
            rx: Mutex::new(Some(rx)),
        }
    }

    pub fn options(&self) -> &ReplicaOptions {
        &self.shared.options
    }

    /// Id of the last entry this participant accepted.
    pub fn last_log_id(&self) -> LogId {
        self.shared.state.lock().last_log_id
    }

    fn replay(&self) -> StoreResult<()> {
        // The log never restarts below what the engine already holds.
        let applied = self.shared.state_machine.last_applied();
        let Some(path) = &self.shared.options.wal_path else {
            self.shared.state.lock().last_log_id = applied;
            return Ok(());
        };
        let log = LogStore::open(path).map_err(log_error)?;
        let entries = log.read_all().map_err(log_error)?;
        {
            let mut st = self.shared.state.lock();
            st.last_log_id = log.last_log_id().max(applied);
            st.term = log.last_term();
            st.last_log_term = log.last_term();
        }
        if !entries.is_empty() {
            tracing::info!(
                space = self.shared.space(),
                part = self.shared.part(),
                entries = entries.len(),
                applied = self.shared.state_machine.last_applied(),
                "replaying local log"
            );
            self.shared.state_machine.commit_logs(&entries)?;
            for entry in &entries {
                self.shared.observe_membership(entry);
            }
            // Only a contiguous tail ending at the local log can serve peers.
            if log.last_log_id() >= applied {
                let start = entries
                    .windows(2)
                    .rposition(|w| w[1].id != w[0].id + 1)
                    .map_or(0, |i| i + 1);
                self.shared.retain(&entries[start..]);
            }
        }
        *self.shared.log.lock() = Some(log);
        Ok(())
    }

    fn submit(&self, payload: Payload) -> AppendHandle {
        let st = self.shared.state.lock();
        if st.stopped {
            return AppendHandle::ready(Err(StoreError::commit_failed("participant stopped")));
        }
        if st.role != Role::Leader {
            return AppendHandle::ready(Err(StoreError::leader_changed(st.leader)));
        }
        if self.shared.queued.load(Ordering::Acquire) >= self.shared.buffer_size {
            return AppendHandle::ready(Err(StoreError::Backpressure));
        }

        let (reply, handle) = AppendHandle::channel();
        self.shared.queued.fetch_add(1, Ordering::AcqRel);
        // Enqueued under the state lock, so the term checked here is the
        // term the worker validates against.
        let command = Command::Append {
            payload,
            term: st.term,
            reply,
        };
        if self.shared.tx.send(command).is_err() {
            self.shared.queued.fetch_sub(1, Ordering::AcqRel);
        }
        handle
    }
}

impl ReplicaGroup for LocalReplica {
    fn start(&self) -> StoreResult<()> {
        let rx = self
            .rx
            .lock()
            .take()
            .ok_or_else(|| StoreError::internal("participant already started"))?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| StoreError::internal("participant must start inside a tokio runtime"))?;

        self.replay()?;
        runtime.spawn(run_worker(Arc::clone(&self.shared), rx));
        self.shared.network.register(&self.shared);

        if self.shared.options.remote_peers().is_empty() {
            self.shared
                .network
                .elect(self.shared.space(), self.shared.part(), self.shared.addr())?;
        }
        tracing::info!(
            space = self.shared.space(),
            part = self.shared.part(),
            addr = %self.shared.addr(),
            peers = self.shared.options.peers.len(),
            "participant started"
        );
        Ok(())
    }

    fn stop(&self) {
        {
            let mut st = self.shared.state.lock();
            if st.stopped {
                return;
            }
            st.stopped = true;
            st.role = Role::Follower;
        }
        self.shared
            .network
            .unregister(self.shared.space(), self.shared.part(), self.shared.addr());
        let _ = self.shared.tx.send(Command::Stop);
        tracing::info!(
            space = self.shared.space(),
            part = self.shared.part(),
            "participant stopped"
        );
    }

    fn role(&self) -> Role {
        self.shared.state.lock().role
    }

    fn leader(&self) -> HostAddr {
        self.shared.state.lock().leader
    }

    fn term(&self) -> TermId {
        self.shared.term()
    }

    fn address(&self) -> HostAddr {
        self.shared.addr()
    }

    fn append_async(&self, payload: Vec<u8>) -> AppendHandle {
        self.submit(Payload::Raw(payload))
    }

    fn atomic_op_async(&self, op: AtomicPayloadFn) -> AppendHandle {
        self.submit(Payload::Atomic(op))
    }

    fn learners(&self) -> Vec<HostAddr> {
        self.shared.state.lock().learners.clone()
    }

    fn compact_log(&self, upto: LogId) -> StoreResult<usize> {
        let mut log = self.shared.log.lock();
        let Some(log) = log.as_mut() else {
            return Ok(0);
        };
        let removed = log.compact_through(upto).map_err(log_error)?;
        if removed > 0 {
            tracing::debug!(
                space = self.shared.space(),
                part = self.shared.part(),
                upto,
                removed,
                "dropped log segments"
            );
        }
        Ok(removed)
    }
}

impl Drop for LocalReplica {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Default)]
struct Group {
    members: HashMap<HostAddr, Weak<Shared>>,
    term: TermId,
    leader: HostAddr,
}


/// In-process transport shared by the participants of every local group.
#[derive(Default)]
pub struct LocalNetwork {
    groups: RwLock<HashMap<(SpaceId, PartitionId), Group>>,
    fences: Mutex<HashMap<(SpaceId, PartitionId), Arc<Mutex<()>>>>,
}

impl LocalNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn register(&self, shared: &Arc<Shared>) {
        let mut groups = self.groups.write();
        let group = groups.entry((shared.space(), shared.part())).or_default();
        group.members.insert(shared.addr(), Arc::downgrade(shared));
        if !group.leader.is_unset() && group.leader != shared.addr() {
            shared.become_follower(group.leader, group.term);
            let _ = shared.tx.send(Command::CatchUp { from: group.leader });
        }
    }

    fn unregister(&self, space: SpaceId, part: PartitionId, addr: HostAddr) {
        let mut groups = self.groups.write();
        if let Some(group) = groups.get_mut(&(space, part)) {
            group.members.remove(&addr);
            if group.leader == addr {
                group.leader = HostAddr::UNSET;
            }
            if group.members.is_empty() {
                groups.remove(&(space, part));
            }
        }
    }

    /// Serializes a group's commits with its elections.
    fn fence(&self, space: SpaceId, part: PartitionId) -> Arc<Mutex<()>> {
        Arc::clone(self.fences.lock().entry((space, part)).or_default())
    }

    fn push(&self, space: SpaceId, part: PartitionId, from: HostAddr, term: TermId, entry: &LogEntry) {
        let groups = self.groups.read();
        let Some(group) = groups.get(&(space, part)) else {
            return;
        };
        for (addr, member) in &group.members {
            if *addr == from {
                continue;
            }
            if let Some(member) = member.upgrade() {
                member.enqueue_replicated(from, term, vec![entry.clone()]);
            }
        }
    }

    fn fetch(
        &self,
        space: SpaceId,
        part: PartitionId,
        source: HostAddr,
        after: LogId,
    ) -> StoreResult<CatchUp> {
        let source = self
            .groups
            .read()
            .get(&(space, part))
            .and_then(|g| g.members.get(&source))
            .and_then(Weak::upgrade)
            .ok_or_else(|| StoreError::ReplicationFailure {
                message: format!("{source} left {space}:{part}"),
            })?;
        source.entries_after(after)
    }

    /// Make `addr` the leader of the group in a new term.
    pub fn elect(&self, space: SpaceId, part: PartitionId, addr: HostAddr) -> StoreResult<TermId> {
        let fence = self.fence(space, part);
        let _fence = fence.lock();
        let mut groups = self.groups.write();
        let group = groups
            .get_mut(&(space, part))
            .ok_or_else(|| StoreError::part_not_found(space, part))?;
        if !group.members.contains_key(&addr) {
            return Err(StoreError::invalid(format!(
                "{addr} is not a member of {space}:{part}"
            )));
        }

        let members: Vec<(HostAddr, Arc<Shared>)> = group
            .members
            .iter()
            .filter_map(|(a, m)| m.upgrade().map(|m| (*a, m)))
            .collect();
        let term = members
            .iter()
            .map(|(_, m)| m.term())
            .fold(group.term, TermId::max)
            + 1;
        group.term = term;
        group.leader = addr;

        for (member_addr, member) in members {
            if member_addr == addr {
                member.become_leader(term);
            } else {
                member.become_follower(addr, term);
            }
        }
        Ok(term)
    }

    /// Current leader of a group, unset when there is none.
    pub fn leader(&self, space: SpaceId, part: PartitionId) -> HostAddr {
        self.groups
            .read()
            .get(&(space, part))
            .map_or(HostAddr::UNSET, |g| g.leader)
    }

    /// Registered members of a group.
    pub fn members(&self, space: SpaceId, part: PartitionId) -> Vec<HostAddr> {
        let mut members: Vec<HostAddr> = self
            .groups
            .read()
            .get(&(space, part))
            .map(|g| g.members.keys().copied().collect())
            .unwrap_or_default();
        members.sort();
        members
    }
}

/// Factory producing [`LocalReplica`]s on one shared network.
#[derive(Clone)]
pub struct LocalReplicaFactory {
    network: Arc<LocalNetwork>,
    buffer_size: usize,
}

impl LocalReplicaFactory {
    pub fn new(network: Arc<LocalNetwork>) -> Self {
        Self {
            network,
            buffer_size: DEFAULT_APPEND_BUFFER_SIZE,
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn network(&self) -> &Arc<LocalNetwork> {
        &self.network
    }
}

impl ReplicaFactory for LocalReplicaFactory {
    fn create(
        &self,
        options: ReplicaOptions,
        state_machine: Arc<dyn StateMachine>,
    ) -> StoreResult<Arc<dyn ReplicaGroup>> {
        Ok(Arc::new(LocalReplica::new(
            options,
            state_machine,
            Arc::clone(&self.network),
            self.buffer_size,
        )))
    }
}
