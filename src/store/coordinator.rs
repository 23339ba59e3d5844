//! Store coordinator.

use super::space::SpaceParts;
use crate::control::{LifecycleHandler, PlacementProvider};
use crate::core::error::{StoreError, StoreResult};
use crate::core::host::HostAddr;
use crate::engine::{EngineFactory, KeyValue, KvEngine, KvIterator};
use crate::part::{AtomicOp, Part};
use crate::raft::{ClusterId, ReplicaFactory, ReplicaOptions};
use crate::{PartitionId, SpaceId};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

/// Completion callback of the `async_*` write variants. Invoked exactly once.
pub type KvCallback = Box<dyn FnOnce(StoreResult<()>) + Send>;

/// Which replicas may serve reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadPolicy {
    /// Any replica hosting the partition serves reads. Reads may miss
    /// writes the leader has already committed.
    #[default]
    AnyReplica,
    /// Only the leader serves reads; followers answer `LeaderChanged`.
    LeaderOnly,
}

#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub cluster_id: ClusterId,
    /// Service address of this host.
    pub local_addr: HostAddr,
    /// Engine roots. Partitions are spread across them; empty keeps engines
    /// in memory.
    pub data_paths: Vec<PathBuf>,
    /// Root of the per-partition durable logs; `None` keeps logs in memory.
    pub wal_path: Option<PathBuf>,
    pub read_policy: ReadPolicy,
}

impl StoreOptions {
    pub fn new(local_addr: HostAddr) -> Self {
        Self {
            cluster_id: 0,
            local_addr,
            data_paths: Vec::new(),
            wal_path: None,
            read_policy: ReadPolicy::default(),
        }
    }

    fn engine_path(&self, space: SpaceId, part: PartitionId) -> Option<PathBuf> {
        if self.data_paths.is_empty() {
            return None;
        }
        let root = &self.data_paths[part as usize % self.data_paths.len()];
        Some(root.join(space.to_string()).join(part.to_string()))
    }

    fn wal_dir(&self, space: SpaceId, part: PartitionId) -> Option<PathBuf> {
        self.wal_path
            .as_ref()
            .map(|root| root.join(space.to_string()).join(part.to_string()))
    }
}

/// Outcome of an administrative operation on one partition engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartOutcome {
    pub part: PartitionId,
    pub result: StoreResult<()>,
}

/// Per-engine outcomes of an administrative operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminReport {
    pub outcomes: Vec<PartOutcome>,
}

impl AdminReport {
    pub fn is_ok(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &PartOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    /// First failure, if any.
    pub fn into_result(self) -> StoreResult<()> {
        self.outcomes
            .into_iter()
            .find_map(|o| o.result.err())
            .map_or(Ok(()), Err)
    }
}

/// Fires the callback with `CommitFailed` if the task carrying it is dropped
/// before completion.
struct CallbackGuard(Option<KvCallback>);

impl CallbackGuard {
    fn fire(mut self, result: StoreResult<()>) {
        if let Some(callback) = self.0.take() {
            callback(result);
        }
    }
}

impl Drop for CallbackGuard {
    fn drop(&mut self) {
        if let Some(callback) = self.0.take() {
            callback(Err(StoreError::commit_failed(
                "request dropped before completion",
            )));
        }
    }
}

/// Routes KV requests to the partitions hosted on this store.
///
/// Placement changes arrive through the [`LifecycleHandler`] implementation.
/// Lifecycle notifications are serialized by one lock; client requests only
/// take the read side of the space map and hold their own `Arc` to the
/// partition they resolved, so a concurrent removal never tears it down
/// under them.
pub struct Store {
    options: StoreOptions,
    spaces: RwLock<HashMap<SpaceId, Arc<SpaceParts>>>,
    lifecycle: Mutex<()>,
    placement: Arc<dyn PlacementProvider>,
    engine_factory: Arc<dyn EngineFactory>,
    replica_factory: Arc<dyn ReplicaFactory>,
}

impl Store {
    pub fn new(
        options: StoreOptions,
        placement: Arc<dyn PlacementProvider>,
        engine_factory: Arc<dyn EngineFactory>,
        replica_factory: Arc<dyn ReplicaFactory>,
    ) -> Arc<Self> {
        Arc::new(Self {
            options,
            spaces: RwLock::new(HashMap::new()),
            lifecycle: Mutex::new(()),
            placement,
            engine_factory,
            replica_factory,
        })
    }

    /// Open every partition placed on this host, then subscribe to placement
    /// changes.
    pub fn init(self: &Arc<Self>) -> StoreResult<()> {
        let placed = self.placement.parts_of(self.options.local_addr);
        tracing::info!(
            addr = %self.options.local_addr,
            spaces = placed.len(),
            "initialising store"
        );
        for (space, parts) in placed {
            self.add_space(space)?;
            for part in parts.keys() {
                self.add_part(space, *part)?;
            }
        }
        let handler: Weak<dyn LifecycleHandler> = Arc::downgrade(self) as Weak<dyn LifecycleHandler>;
        self.placement.register_handler(handler)
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn local_addr(&self) -> HostAddr {
        self.options.local_addr
    }

    /// Replication address for a service address.
    pub fn get_raft_addr(addr: HostAddr) -> HostAddr {
        addr.raft_addr()
    }

    /// Service address for a replication address.
    pub fn get_store_addr(addr: HostAddr) -> HostAddr {
        addr.store_addr()
    }

    /// Hosted space ids, ascending.
    pub fn space_ids(&self) -> Vec<SpaceId> {
        let mut ids: Vec<SpaceId> = self.spaces.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn space(&self, space: SpaceId) -> StoreResult<Arc<SpaceParts>> {
        self.spaces
            .read()
            .get(&space)
            .cloned()
            .ok_or_else(|| StoreError::space_not_found(space))
    }

    /// Resolve a partition. The returned handle stays usable after the
    /// partition is removed from the store.
    pub fn part(&self, space: SpaceId, part: PartitionId) -> StoreResult<Arc<Part>> {
        self.space(space)?
            .part(part)
            .ok_or_else(|| StoreError::part_not_found(space, part))
    }

    fn read_engine(&self, space: SpaceId, part: PartitionId) -> StoreResult<Arc<dyn KvEngine>> {
        let part = self.part(space, part)?;
        if self.options.read_policy == ReadPolicy::LeaderOnly && !part.is_leader() {
            return Err(StoreError::leader_changed(part.leader()));
        }
        Ok(Arc::clone(part.engine()))
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn get(&self, space: SpaceId, part: PartitionId, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.read_engine(space, part)?.get(key)
    }

    pub fn multi_get(
        &self,
        space: SpaceId,
        part: PartitionId,
        keys: &[Vec<u8>],
    ) -> StoreResult<Vec<Option<Vec<u8>>>> {
        self.read_engine(space, part)?.multi_get(keys)
    }

    /// Keys in `[start, end)`, in engine key order.
    pub fn range(
        &self,
        space: SpaceId,
        part: PartitionId,
        start: &[u8],
        end: &[u8],
    ) -> StoreResult<Box<dyn KvIterator>> {
        self.read_engine(space, part)?.range(start, end)
    }

    pub fn prefix(
        &self,
        space: SpaceId,
        part: PartitionId,
        prefix: &[u8],
    ) -> StoreResult<Box<dyn KvIterator>> {
        self.read_engine(space, part)?.prefix(prefix)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    pub async fn put(
        &self,
        space: SpaceId,
        part: PartitionId,
        key: Vec<u8>,
        value: Vec<u8>,
    ) -> StoreResult<()> {
        self.part(space, part)?.put(key, value).await
    }

    pub async fn multi_put(
        &self,
        space: SpaceId,
        part: PartitionId,
        kvs: Vec<KeyValue>,
    ) -> StoreResult<()> {
        self.part(space, part)?.multi_put(kvs).await
    }

    pub async fn remove(&self, space: SpaceId, part: PartitionId, key: Vec<u8>) -> StoreResult<()> {
        self.part(space, part)?.remove(key).await
    }

    pub async fn multi_remove(
        &self,
        space: SpaceId,
        part: PartitionId,
        keys: Vec<Vec<u8>>,
    ) -> StoreResult<()> {
        self.part(space, part)?.multi_remove(keys).await
    }

    pub async fn remove_range(
        &self,
        space: SpaceId,
        part: PartitionId,
        start: Vec<u8>,
        end: Vec<u8>,
    ) -> StoreResult<()> {
        self.part(space, part)?.remove_range(start, end).await
    }

    pub async fn remove_prefix(
        &self,
        space: SpaceId,
        part: PartitionId,
        prefix: Vec<u8>,
    ) -> StoreResult<()> {
        self.part(space, part)?.remove_prefix(prefix).await
    }

    pub async fn atomic_op(&self, space: SpaceId, part: PartitionId, op: AtomicOp) -> StoreResult<()> {
        self.part(space, part)?.atomic_op(op).await
    }

    fn dispatch<F, Fut>(&self, space: SpaceId, part: PartitionId, callback: KvCallback, write: F)
    where
        F: FnOnce(Arc<Part>) -> Fut,
        Fut: Future<Output = StoreResult<()>> + Send + 'static,
    {
        let guard = CallbackGuard(Some(callback));
        let part = match self.part(space, part) {
            Ok(part) => part,
            Err(e) => return guard.fire(Err(e)),
        };
        let write = write(part);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    guard.fire(write.await);
                });
            }
            Err(_) => guard.fire(Err(StoreError::internal(
                "asynchronous writes require a tokio runtime",
            ))),
        }
    }

    pub fn async_put(
        &self,
        space: SpaceId,
        part: PartitionId,
        key: Vec<u8>,
        value: Vec<u8>,
        callback: KvCallback,
    ) {
        self.dispatch(space, part, callback, move |p| async move {
            p.put(key, value).await
        });
    }

    pub fn async_multi_put(
        &self,
        space: SpaceId,
        part: PartitionId,
        kvs: Vec<KeyValue>,
        callback: KvCallback,
    ) {
        self.dispatch(space, part, callback, move |p| async move {
            p.multi_put(kvs).await
        });
    }

    pub fn async_remove(&self, space: SpaceId, part: PartitionId, key: Vec<u8>, callback: KvCallback) {
        self.dispatch(space, part, callback, move |p| async move {
            p.remove(key).await
        });
    }

    pub fn async_multi_remove(
        &self,
        space: SpaceId,
        part: PartitionId,
        keys: Vec<Vec<u8>>,
        callback: KvCallback,
    ) {
        self.dispatch(space, part, callback, move |p| async move {
            p.multi_remove(keys).await
        });
    }

    pub fn async_remove_range(
        &self,
        space: SpaceId,
        part: PartitionId,
        start: Vec<u8>,
        end: Vec<u8>,
        callback: KvCallback,
    ) {
        self.dispatch(space, part, callback, move |p| async move {
            p.remove_range(start, end).await
        });
    }

    pub fn async_remove_prefix(
        &self,
        space: SpaceId,
        part: PartitionId,
        prefix: Vec<u8>,
        callback: KvCallback,
    ) {
        self.dispatch(space, part, callback, move |p| async move {
            p.remove_prefix(prefix).await
        });
    }

    pub fn async_atomic_op(&self, space: SpaceId, part: PartitionId, op: AtomicOp, callback: KvCallback) {
        self.dispatch(space, part, callback, move |p| async move {
            p.atomic_op(op).await
        });
    }

    // ========================================================================
    // Leadership
    // ========================================================================

    /// Service address of the partition's believed leader.
    pub fn part_leader(&self, space: SpaceId, part: PartitionId) -> StoreResult<HostAddr> {
        Ok(self.part(space, part)?.leader())
    }

    /// False when the partition is not hosted here.
    pub fn is_leader(&self, space: SpaceId, part: PartitionId) -> bool {
        self.part(space, part).is_ok_and(|p| p.is_leader())
    }

    // ========================================================================
    // Administration
    // ========================================================================

    fn for_each_engine<F>(&self, space: SpaceId, op: &str, f: F) -> StoreResult<AdminReport>
    where
        F: Fn(&dyn KvEngine) -> StoreResult<()>,
    {
        self.for_each_part(space, op, |part| f(part.engine().as_ref()))
    }

    fn for_each_part<F>(&self, space: SpaceId, op: &str, f: F) -> StoreResult<AdminReport>
    where
        F: Fn(&Part) -> StoreResult<()>,
    {
        let registry = self.space(space)?;
        let mut report = AdminReport::default();
        for handle in registry.parts() {
            let part = handle.part_id();
            let result = f(handle.as_ref());
            if let Err(e) = &result {
                tracing::warn!(space, part, op, error = %e, "engine operation failed");
            }
            report.outcomes.push(PartOutcome { part, result });
        }
        tracing::debug!(space, op, engines = report.outcomes.len(), ok = report.is_ok(), "engine operation done");
        Ok(report)
    }

    fn with_part_engine<F>(&self, space: SpaceId, part: PartitionId, f: F) -> StoreResult<()>
    where
        F: FnOnce(&dyn KvEngine) -> StoreResult<()>,
    {
        let part = self.part(space, part)?;
        f(part.engine().as_ref())
    }

    /// Ingest the files staged under each engine's `download` directory.
    pub fn ingest(&self, space: SpaceId) -> StoreResult<AdminReport> {
        self.for_each_engine(space, "ingest", |engine| {
            let Some(root) = engine.data_path() else {
                return Ok(());
            };
            let files = staged_files(&root.join("download"))?;
            if files.is_empty() {
                return Ok(());
            }
            let loaded = engine.ingest(&files)?;
            tracing::info!(space, files = files.len(), loaded, "ingested staged files");
            Ok(())
        })
    }

    /// Ingest `files` into one partition's engine. Returns the number of
    /// pairs loaded.
    pub fn ingest_part(&self, space: SpaceId, part: PartitionId, files: &[PathBuf]) -> StoreResult<usize> {
        self.part(space, part)?.engine().ingest(files)
    }

    pub fn compact(&self, space: SpaceId) -> StoreResult<AdminReport> {
        self.for_each_engine(space, "compact", |engine| engine.compact())
    }

    pub fn compact_part(&self, space: SpaceId, part: PartitionId) -> StoreResult<()> {
        self.with_part_engine(space, part, |engine| engine.compact())
    }

    /// Flush every engine of `space`, compacting logs the engines cover.
    pub fn flush(&self, space: SpaceId) -> StoreResult<AdminReport> {
        self.for_each_part(space, "flush", Part::flush)
    }

    pub fn flush_part(&self, space: SpaceId, part: PartitionId) -> StoreResult<()> {
        self.part(space, part)?.flush()
    }

    pub fn set_option(&self, space: SpaceId, key: &str, value: &str) -> StoreResult<AdminReport> {
        self.for_each_engine(space, "set_option", |engine| engine.set_option(key, value))
    }

    pub fn set_option_part(&self, space: SpaceId, part: PartitionId, key: &str, value: &str) -> StoreResult<()> {
        self.with_part_engine(space, part, |engine| engine.set_option(key, value))
    }

    pub fn set_db_option(&self, space: SpaceId, key: &str, value: &str) -> StoreResult<AdminReport> {
        self.for_each_engine(space, "set_db_option", |engine| {
            engine.set_db_option(key, value)
        })
    }

    pub fn set_db_option_part(
        &self,
        space: SpaceId,
        part: PartitionId,
        key: &str,
        value: &str,
    ) -> StoreResult<()> {
        self.with_part_engine(space, part, |engine| engine.set_db_option(key, value))
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    fn open_part(&self, registry: &SpaceParts, space: SpaceId, part: PartitionId) -> StoreResult<Arc<Part>> {
        let engine = match registry.engine(part) {
            Some(engine) => engine,
            None => self
                .engine_factory
                .open(space, part, self.options.engine_path(space, part))?,
        };

        let local = self.options.local_addr.raft_addr();
        let mut peers: Vec<HostAddr> = self
            .placement
            .part_meta(space, part)
            .map(|meta| meta.peers.iter().map(HostAddr::raft_addr).collect())
            .unwrap_or_default();
        if !peers.contains(&local) {
            peers.push(local);
        }

        let options = ReplicaOptions {
            cluster_id: self.options.cluster_id,
            space,
            part,
            local_addr: local,
            peers,
            wal_path: self.options.wal_dir(space, part),
        };
        Ok(Arc::new(Part::open(
            space,
            part,
            engine,
            self.replica_factory.as_ref(),
            options,
        )?))
    }

    /// The registry of `space`, and whether this call created it.
    fn ensure_space(&self, space: SpaceId) -> (Arc<SpaceParts>, bool) {
        let mut spaces = self.spaces.write();
        let mut created = false;
        let registry = spaces.entry(space).or_insert_with(|| {
            created = true;
            tracing::info!(space, "space added");
            Arc::new(SpaceParts::new(space))
        });
        (Arc::clone(registry), created)
    }

    fn drop_space(&self, space: SpaceId) {
        let removed = self.spaces.write().remove(&space);
        if let Some(registry) = removed {
            let parts = registry.clear();
            tracing::info!(space, parts = parts.len(), "space removed");
        }
    }
}

impl LifecycleHandler for Store {
    fn add_space(&self, space: SpaceId) -> StoreResult<()> {
        let _lifecycle = self.lifecycle.lock();
        self.ensure_space(space);
        Ok(())
    }

    fn add_part(&self, space: SpaceId, part: PartitionId) -> StoreResult<()> {
        let _lifecycle = self.lifecycle.lock();
        let (registry, created) = self.ensure_space(space);
        if registry.part(part).is_some() {
            return Ok(());
        }

        // A space this call created must not outlive a failed add.
        let abandon = |registry: &SpaceParts| {
            if created && registry.is_empty() {
                self.drop_space(space);
            }
        };
        let opened = match self.open_part(&registry, space, part) {
            Ok(opened) => opened,
            Err(e) => {
                abandon(&registry);
                tracing::error!(space, part, error = %e, "failed to open partition");
                return Err(e);
            }
        };
        registry.insert(Arc::clone(&opened));
        if let Err(e) = opened.start() {
            registry.remove(part);
            opened.stop();
            abandon(&registry);
            tracing::error!(space, part, error = %e, "failed to start partition");
            return Err(e);
        }
        tracing::info!(space, part, leader = opened.is_leader(), "partition added");
        Ok(())
    }

    fn remove_space(&self, space: SpaceId) -> StoreResult<()> {
        let _lifecycle = self.lifecycle.lock();
        self.drop_space(space);
        Ok(())
    }

    fn remove_part(&self, space: SpaceId, part: PartitionId) -> StoreResult<()> {
        let _lifecycle = self.lifecycle.lock();
        let Some(registry) = self.spaces.read().get(&space).cloned() else {
            return Ok(());
        };
        if let Some(removed) = registry.remove(part) {
            removed.stop();
            tracing::info!(space, part, "partition removed");
        }
        if registry.is_empty() {
            self.drop_space(space);
        }
        Ok(())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        for (_, registry) in self.spaces.get_mut().drain() {
            registry.clear();
        }
    }
}

fn staged_files(dir: &std::path::Path) -> StoreResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
