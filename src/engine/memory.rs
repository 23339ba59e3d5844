//! Ordered in-memory engine.
//!
//! Keys live in a `BTreeMap`, so scans follow lexicographic byte order. When
//! opened with a data path, `flush` and `compact` write a bincode snapshot
//! (`data.snap`) that is reloaded on the next open.

use super::{prefix_successor, BatchOp, EngineFactory, KeyValue, KvEngine, KvIterator, WriteBatch};
use crate::core::error::{StoreError, StoreResult};
use crate::{PartitionId, SpaceId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::{BufReader, BufWriter, Read, Write};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const SNAPSHOT_FILE: &str = "data.snap";

type Tree = BTreeMap<Vec<u8>, Vec<u8>>;

/// On-disk image of an engine.
#[derive(Debug, Default, Serialize, Deserialize)]
struct EngineSnapshot {
    data: Vec<KeyValue>,
    meta: Vec<KeyValue>,
}

/// In-memory [`KvEngine`].
pub struct MemEngine {
    space: SpaceId,
    part: PartitionId,
    path: Option<PathBuf>,
    data: Arc<RwLock<Tree>>,
    meta: RwLock<Tree>,
    options: RwLock<HashMap<String, String>>,
    db_options: RwLock<HashMap<String, String>>,
    compactions: AtomicU64,
}

impl MemEngine {
    /// Create a volatile engine.
    pub fn new(space: SpaceId, part: PartitionId) -> Self {
        Self {
            space,
            part,
            path: None,
            data: Arc::new(RwLock::new(Tree::new())),
            meta: RwLock::new(Tree::new()),
            options: RwLock::new(HashMap::new()),
            db_options: RwLock::new(HashMap::new()),
            compactions: AtomicU64::new(0),
        }
    }

    /// Open an engine rooted at `path`, loading a previous snapshot if present.
    pub fn open(space: SpaceId, part: PartitionId, path: PathBuf) -> StoreResult<Self> {
        std::fs::create_dir_all(&path)?;
        let mut engine = Self::new(space, part);
        let snap_path = path.join(SNAPSHOT_FILE);
        if snap_path.exists() {
            let mut bytes = Vec::new();
            BufReader::new(std::fs::File::open(&snap_path)?).read_to_end(&mut bytes)?;
            let snapshot: EngineSnapshot = bincode::deserialize(&bytes)?;
            tracing::debug!(
                space,
                part,
                keys = snapshot.data.len(),
                path = %snap_path.display(),
                "loaded engine snapshot"
            );
            *engine.data.write() = snapshot.data.into_iter().collect();
            *engine.meta.write() = snapshot.meta.into_iter().collect();
        }
        engine.path = Some(path);
        Ok(engine)
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Value of an engine option set through `set_option`.
    pub fn option(&self, key: &str) -> Option<String> {
        self.options.read().get(key).cloned()
    }

    /// Value of a db option set through `set_db_option`.
    pub fn db_option(&self, key: &str) -> Option<String> {
        self.db_options.read().get(key).cloned()
    }

    pub fn compactions(&self) -> u64 {
        self.compactions.load(Ordering::Acquire)
    }

    fn scan(&self, start: Vec<u8>, end: Option<Vec<u8>>) -> Box<dyn KvIterator> {
        Box::new(MemIterator {
            data: Arc::clone(&self.data),
            start,
            end,
            cursor: None,
            done: false,
        })
    }

    fn write_snapshot(&self) -> StoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        // Hold both read locks so data and meta come from the same point in time.
        let data = self.data.read();
        let meta = self.meta.read();
        let snapshot = EngineSnapshot {
            data: data.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            meta: meta.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        };
        drop(meta);
        drop(data);

        let bytes = bincode::serialize(&snapshot)?;
        let tmp_path = path.join(format!("{SNAPSHOT_FILE}.tmp"));
        {
            let mut writer = BufWriter::new(std::fs::File::create(&tmp_path)?);
            writer.write_all(&bytes)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        std::fs::rename(&tmp_path, path.join(SNAPSHOT_FILE))?;
        Ok(())
    }
}

fn remove_bounded(tree: &mut Tree, start: &[u8], end: Option<&[u8]>) {
    let upper = match end {
        Some(end) if start >= end => return,
        Some(end) => Bound::Excluded(end.to_vec()),
        None => Bound::Unbounded,
    };
    let doomed: Vec<Vec<u8>> = tree
        .range((Bound::Included(start.to_vec()), upper))
        .map(|(k, _)| k.clone())
        .collect();
    for key in doomed {
        tree.remove(&key);
    }
}

impl KvEngine for MemEngine {
    fn data_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn multi_get(&self, keys: &[Vec<u8>]) -> StoreResult<Vec<Option<Vec<u8>>>> {
        let data = self.data.read();
        Ok(keys.iter().map(|k| data.get(k).cloned()).collect())
    }

    fn range(&self, start: &[u8], end: &[u8]) -> StoreResult<Box<dyn KvIterator>> {
        if start > end {
            return Err(StoreError::invalid("range start is greater than end"));
        }
        Ok(self.scan(start.to_vec(), Some(end.to_vec())))
    }

    fn prefix(&self, prefix: &[u8]) -> StoreResult<Box<dyn KvIterator>> {
        Ok(self.scan(prefix.to_vec(), prefix_successor(prefix)))
    }

    fn write_batch(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut data = self.data.write();
        let mut meta = self.meta.write();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => {
                    data.insert(key, value);
                }
                BatchOp::Remove { key } => {
                    data.remove(&key);
                }
                BatchOp::RemoveRange { start, end } => {
                    remove_bounded(&mut data, &start, Some(&end));
                }
                BatchOp::RemovePrefix { prefix } => {
                    let end = prefix_successor(&prefix);
                    remove_bounded(&mut data, &prefix, end.as_deref());
                }
                BatchOp::PutMeta { key, value } => {
                    meta.insert(key, value);
                }
            }
        }
        Ok(())
    }

    fn get_meta(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.meta.read().get(key).cloned())
    }

    fn ingest(&self, files: &[PathBuf]) -> StoreResult<usize> {
        let mut loaded = Vec::new();
        for file in files {
            let mut bytes = Vec::new();
            BufReader::new(std::fs::File::open(file)?).read_to_end(&mut bytes)?;
            let kvs: Vec<KeyValue> = bincode::deserialize(&bytes)?;
            loaded.extend(kvs);
        }
        // Decode every file before touching the tree so a bad file loads nothing.
        let count = loaded.len();
        self.data.write().extend(loaded);
        tracing::info!(
            space = self.space,
            part = self.part,
            files = files.len(),
            keys = count,
            "ingested files"
        );
        Ok(count)
    }

    fn compact(&self) -> StoreResult<()> {
        self.write_snapshot()?;
        self.compactions.fetch_add(1, Ordering::AcqRel);
        tracing::debug!(space = self.space, part = self.part, "engine compacted");
        Ok(())
    }

    fn flush(&self) -> StoreResult<()> {
        self.write_snapshot()
    }

    fn set_option(&self, key: &str, value: &str) -> StoreResult<()> {
        if key.is_empty() {
            return Err(StoreError::invalid("option key must not be empty"));
        }
        self.options.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn set_db_option(&self, key: &str, value: &str) -> StoreResult<()> {
        if key.is_empty() {
            return Err(StoreError::invalid("db option key must not be empty"));
        }
        self.db_options
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Cursor-based scan that re-seeks on every step.
struct MemIterator {
    data: Arc<RwLock<Tree>>,
    start: Vec<u8>,
    end: Option<Vec<u8>>,
    cursor: Option<Vec<u8>>,
    done: bool,
}

impl Iterator for MemIterator {
    type Item = KeyValue;

    fn next(&mut self) -> Option<KeyValue> {
        if self.done {
            return None;
        }
        let lower = match &self.cursor {
            Some(last) => Bound::Excluded(last.clone()),
            None => Bound::Included(self.start.clone()),
        };
        let upper = match &self.end {
            Some(end) => Bound::Excluded(end.clone()),
            None => Bound::Unbounded,
        };
        let next = self
            .data
            .read()
            .range((lower, upper))
            .next()
            .map(|(k, v)| (k.clone(), v.clone()));
        match next {
            Some((key, value)) => {
                self.cursor = Some(key.clone());
                Some((key, value))
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}

impl KvIterator for MemIterator {
    fn rewind(&mut self) {
        self.cursor = None;
        self.done = false;
    }
}

/// Factory producing [`MemEngine`]s, persistent when a path is supplied.
#[derive(Debug, Clone, Default)]
pub struct MemEngineFactory;

impl MemEngineFactory {
    pub fn new() -> Self {
        Self
    }
}

impl EngineFactory for MemEngineFactory {
    fn open(
        &self,
        space: SpaceId,
        part: PartitionId,
        path: Option<PathBuf>,
    ) -> StoreResult<Arc<dyn KvEngine>> {
        let engine = match path {
            Some(path) => MemEngine::open(space, part, path)?,
            None => MemEngine::new(space, part),
        };
        Ok(Arc::new(engine))
    }
}

/// Write a bulk-load file understood by [`MemEngine::ingest`].
pub fn write_ingest_file(path: &Path, kvs: &[KeyValue]) -> StoreResult<()> {
    let bytes = bincode::serialize(kvs)?;
    let mut writer = BufWriter::new(std::fs::File::create(path)?);
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}
