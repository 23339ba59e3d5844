//! Common test utilities.
//!
//! This module contains shared helpers for integration tests.
//! Import with `mod common;` in test files.

#![allow(dead_code)]

use parking_lot::Mutex;
use partkv::core::config::Config;
use partkv::engine::{
    EngineFactory, KeyValue, KvEngine, KvIterator, MemEngine, MemEngineFactory, WriteBatch,
};
use partkv::raft::codec::LogOp;
use partkv::raft::{LocalNetwork, LocalReplicaFactory, LogEntry, LogId};
use partkv::{
    HostAddr, KvCallback, LifecycleHandler, MemPlacementProvider, PartitionId, SpaceId, Store,
    StoreError, StoreOptions, StoreResult,
};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::sync::oneshot;

/// Service address of the default test node.
pub fn local_addr() -> HostAddr {
    HostAddr::localhost(9779)
}

/// Service address of the n-th node of a multi-node test.
pub fn node_addr(n: u16) -> HostAddr {
    HostAddr::localhost(9779 + n * 10)
}

// ============================================================================
// Store fixtures
// ============================================================================

/// A store together with the placement table driving it.
pub struct Node {
    pub addr: HostAddr,
    pub store: Arc<Store>,
    pub placement: Arc<MemPlacementProvider>,
}

impl Node {
    /// Place a partition on this node only.
    pub fn add_local_part(&self, space: SpaceId, part: PartitionId) {
        self.placement.add_part(space, part, vec![self.addr]);
    }
}

/// Start a store on `network` with the given engine factory.
pub fn start_node_with(
    network: &Arc<LocalNetwork>,
    options: StoreOptions,
    engines: Arc<dyn EngineFactory>,
) -> Node {
    let addr = options.local_addr;
    let placement = Arc::new(MemPlacementProvider::new(addr));
    let store = Store::new(
        options,
        Arc::clone(&placement) as Arc<dyn partkv::PlacementProvider>,
        engines,
        Arc::new(LocalReplicaFactory::new(Arc::clone(network))),
    );
    store.init().expect("store init");
    Node {
        addr,
        store,
        placement,
    }
}

/// Start a store with in-memory engines on `network`.
pub fn start_node(network: &Arc<LocalNetwork>, addr: HostAddr) -> Node {
    start_node_with(
        network,
        StoreOptions::new(addr),
        Arc::new(MemEngineFactory::new()),
    )
}

/// Start a standalone store on its own network.
pub fn single_node() -> Node {
    start_node(&LocalNetwork::new(), local_addr())
}

/// Poll `cond` until it holds.
pub async fn wait_until<F: Fn() -> bool>(what: &str, cond: F) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

// ============================================================================
// Log entries
// ============================================================================

pub fn put_entry(id: LogId, key: &str, value: &str) -> LogEntry {
    let op = LogOp::Put {
        key: key.as_bytes().to_vec(),
        value: value.as_bytes().to_vec(),
    };
    LogEntry::new(id, 1, op.encode().expect("encode put"))
}

pub fn remove_entry(id: LogId, key: &str) -> LogEntry {
    let op = LogOp::Remove(key.as_bytes().to_vec());
    LogEntry::new(id, 1, op.encode().expect("encode remove"))
}

pub fn kv(key: &str, value: &str) -> KeyValue {
    (key.as_bytes().to_vec(), value.as_bytes().to_vec())
}

pub fn collect(iter: Box<dyn KvIterator>) -> Vec<KeyValue> {
    iter.collect()
}

/// Every data key/value of an engine, in key order.
pub fn dump(engine: &dyn KvEngine) -> Vec<KeyValue> {
    collect(engine.prefix(b"").expect("full scan"))
}

// ============================================================================
// Callbacks
// ============================================================================

/// Counts invocations of a [`KvCallback`] and captures its first result.
pub struct CallbackProbe {
    pub calls: Arc<AtomicUsize>,
    pub rx: oneshot::Receiver<StoreResult<()>>,
}

impl CallbackProbe {
    pub fn new() -> (KvCallback, Self) {
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel();
        let counter = Arc::clone(&calls);
        let callback: KvCallback = Box::new(move |result| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(result);
        });
        (callback, Self { calls, rx })
    }

    pub async fn result(self) -> (StoreResult<()>, usize) {
        let result = tokio::time::timeout(Duration::from_secs(5), self.rx)
            .await
            .expect("callback never fired")
            .expect("callback dropped");
        (result, self.calls.load(Ordering::SeqCst))
    }
}

// ============================================================================
// Lifecycle recording
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    AddSpace(SpaceId),
    AddPart(SpaceId, PartitionId),
    RemoveSpace(SpaceId),
    RemovePart(SpaceId, PartitionId),
}

/// Handler recording every notification it receives.
#[derive(Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<Lifecycle>>,
}

impl RecordingHandler {
    pub fn events(&self) -> Vec<Lifecycle> {
        self.events.lock().clone()
    }

    pub fn count(&self, event: Lifecycle) -> usize {
        self.events.lock().iter().filter(|e| **e == event).count()
    }
}

impl LifecycleHandler for RecordingHandler {
    fn add_space(&self, space: SpaceId) -> StoreResult<()> {
        self.events.lock().push(Lifecycle::AddSpace(space));
        Ok(())
    }

    fn add_part(&self, space: SpaceId, part: PartitionId) -> StoreResult<()> {
        self.events.lock().push(Lifecycle::AddPart(space, part));
        Ok(())
    }

    fn remove_space(&self, space: SpaceId) -> StoreResult<()> {
        self.events.lock().push(Lifecycle::RemoveSpace(space));
        Ok(())
    }

    fn remove_part(&self, space: SpaceId, part: PartitionId) -> StoreResult<()> {
        self.events.lock().push(Lifecycle::RemovePart(space, part));
        Ok(())
    }
}

// ============================================================================
// Fault injection
// ============================================================================

/// Engine delegating to a [`MemEngine`] that can be told to fail.
pub struct FaultyEngine {
    inner: MemEngine,
    pub fail_writes: AtomicBool,
    pub fail_admin: AtomicBool,
}

impl FaultyEngine {
    pub fn new(space: SpaceId, part: PartitionId) -> Self {
        Self {
            inner: MemEngine::new(space, part),
            fail_writes: AtomicBool::new(false),
            fail_admin: AtomicBool::new(false),
        }
    }

    fn admin(&self) -> StoreResult<()> {
        if self.fail_admin.load(Ordering::SeqCst) {
            return Err(StoreError::engine("injected admin failure"));
        }
        Ok(())
    }
}

impl KvEngine for FaultyEngine {
    fn data_path(&self) -> Option<&Path> {
        self.inner.data_path()
    }

    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn range(&self, start: &[u8], end: &[u8]) -> StoreResult<Box<dyn KvIterator>> {
        self.inner.range(start, end)
    }

    fn prefix(&self, prefix: &[u8]) -> StoreResult<Box<dyn KvIterator>> {
        self.inner.prefix(prefix)
    }

    fn write_batch(&self, batch: WriteBatch) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::engine("injected write failure"));
        }
        self.inner.write_batch(batch)
    }

    fn get_meta(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.inner.get_meta(key)
    }

    fn ingest(&self, files: &[PathBuf]) -> StoreResult<usize> {
        self.admin()?;
        self.inner.ingest(files)
    }

    fn compact(&self) -> StoreResult<()> {
        self.admin()?;
        self.inner.compact()
    }

    fn flush(&self) -> StoreResult<()> {
        self.admin()?;
        self.inner.flush()
    }

    fn set_option(&self, key: &str, value: &str) -> StoreResult<()> {
        self.admin()?;
        self.inner.set_option(key, value)
    }

    fn set_db_option(&self, key: &str, value: &str) -> StoreResult<()> {
        self.admin()?;
        self.inner.set_db_option(key, value)
    }
}

/// Factory handing out [`FaultyEngine`]s and remembering them.
#[derive(Default)]
pub struct FaultyEngineFactory {
    engines: Mutex<HashMap<(SpaceId, PartitionId), Arc<FaultyEngine>>>,
    pub fail_open: AtomicBool,
}

impl FaultyEngineFactory {
    pub fn engine(&self, space: SpaceId, part: PartitionId) -> Arc<FaultyEngine> {
        Arc::clone(
            self.engines
                .lock()
                .get(&(space, part))
                .expect("engine was never opened"),
        )
    }
}

impl EngineFactory for FaultyEngineFactory {
    fn open(
        &self,
        space: SpaceId,
        part: PartitionId,
        _path: Option<PathBuf>,
    ) -> StoreResult<Arc<dyn KvEngine>> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(StoreError::engine("injected open failure"));
        }
        let engine = Arc::new(FaultyEngine::new(space, part));
        self.engines.lock().insert((space, part), Arc::clone(&engine));
        Ok(engine)
    }
}

// ============================================================================
// Config files
// ============================================================================

/// Write `content` to a temporary config file.
pub fn config_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write config");
    file
}

/// Load a config from a temp file.
pub fn load_config(file: &NamedTempFile) -> Config {
    Config::from_file(file.path()).expect("Failed to load config")
}

/// Create a temporary directory for test data.
pub fn temp_test_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}
