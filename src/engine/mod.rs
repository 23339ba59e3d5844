//! Storage engine interface.
//!
//! An engine is a local, single-partition key/value backend. Every operation
//! is synchronous from the caller's point of view. The partition state
//! machine applies each committed log entry as one [`WriteBatch`].
//!
//! - [`memory`] - Ordered in-memory engine with an optional on-disk snapshot

pub mod memory;

use crate::core::error::StoreResult;
use crate::{PartitionId, SpaceId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use memory::{write_ingest_file, MemEngine, MemEngineFactory};

/// A key/value pair.
pub type KeyValue = (Vec<u8>, Vec<u8>);

/// Lazy scan over engine key order.
///
/// Iterators observe concurrent writes; `rewind` restarts the scan from the
/// first key of the original bounds.
pub trait KvIterator: Iterator<Item = KeyValue> + Send {
    fn rewind(&mut self);
}

/// One mutation within a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Remove { key: Vec<u8> },
    /// Remove every key in `[start, end)`.
    RemoveRange { start: Vec<u8>, end: Vec<u8> },
    RemovePrefix { prefix: Vec<u8> },
    /// Write to the engine's metadata keyspace, invisible to scans.
    PutMeta { key: Vec<u8>, value: Vec<u8> },
}

/// A group of mutations applied atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> &mut Self {
        self.ops.push(BatchOp::Put { key, value });
        self
    }

    pub fn remove(&mut self, key: Vec<u8>) -> &mut Self {
        self.ops.push(BatchOp::Remove { key });
        self
    }

    pub fn remove_range(&mut self, start: Vec<u8>, end: Vec<u8>) -> &mut Self {
        self.ops.push(BatchOp::RemoveRange { start, end });
        self
    }

    pub fn remove_prefix(&mut self, prefix: Vec<u8>) -> &mut Self {
        self.ops.push(BatchOp::RemovePrefix { prefix });
        self
    }

    pub fn put_meta(&mut self, key: Vec<u8>, value: Vec<u8>) -> &mut Self {
        self.ops.push(BatchOp::PutMeta { key, value });
        self
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl From<Vec<BatchOp>> for WriteBatch {
    fn from(ops: Vec<BatchOp>) -> Self {
        Self { ops }
    }
}

/// Local storage engine backing one partition.
pub trait KvEngine: Send + Sync + 'static {
    /// Directory holding this engine's files, if it persists anything.
    fn data_path(&self) -> Option<&Path>;

    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    /// Batch read preserving input order.
    fn multi_get(&self, keys: &[Vec<u8>]) -> StoreResult<Vec<Option<Vec<u8>>>> {
        keys.iter().map(|k| self.get(k)).collect()
    }

    /// Scan `[start, end)`.
    fn range(&self, start: &[u8], end: &[u8]) -> StoreResult<Box<dyn KvIterator>>;

    /// Scan every key sharing `prefix`.
    fn prefix(&self, prefix: &[u8]) -> StoreResult<Box<dyn KvIterator>>;

    /// Apply every op of `batch` atomically.
    fn write_batch(&self, batch: WriteBatch) -> StoreResult<()>;

    /// Read from the metadata keyspace.
    fn get_meta(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> StoreResult<()> {
        self.write_batch(vec![BatchOp::Put { key, value }].into())
    }

    fn multi_put(&self, kvs: Vec<KeyValue>) -> StoreResult<()> {
        let ops = kvs
            .into_iter()
            .map(|(key, value)| BatchOp::Put { key, value })
            .collect::<Vec<_>>();
        self.write_batch(ops.into())
    }

    fn remove(&self, key: Vec<u8>) -> StoreResult<()> {
        self.write_batch(vec![BatchOp::Remove { key }].into())
    }

    fn multi_remove(&self, keys: Vec<Vec<u8>>) -> StoreResult<()> {
        let ops = keys
            .into_iter()
            .map(|key| BatchOp::Remove { key })
            .collect::<Vec<_>>();
        self.write_batch(ops.into())
    }

    fn remove_range(&self, start: Vec<u8>, end: Vec<u8>) -> StoreResult<()> {
        self.write_batch(vec![BatchOp::RemoveRange { start, end }].into())
    }

    fn remove_prefix(&self, prefix: Vec<u8>) -> StoreResult<()> {
        self.write_batch(vec![BatchOp::RemovePrefix { prefix }].into())
    }

    /// Bulk-load the given files. Returns the number of keys loaded.
    fn ingest(&self, files: &[PathBuf]) -> StoreResult<usize>;

    fn compact(&self) -> StoreResult<()>;

    fn flush(&self) -> StoreResult<()>;

    fn set_option(&self, key: &str, value: &str) -> StoreResult<()>;

    fn set_db_option(&self, key: &str, value: &str) -> StoreResult<()>;
}

/// Creates the engine backing one partition.
pub trait EngineFactory: Send + Sync {
    fn open(
        &self,
        space: SpaceId,
        part: PartitionId,
        path: Option<PathBuf>,
    ) -> StoreResult<Arc<dyn KvEngine>>;
}

/// Smallest key strictly greater than every key starting with `prefix`.
///
/// Returns `None` when no such key exists (empty prefix or all `0xff`).
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_successor() {
        assert_eq!(prefix_successor(b"ab"), Some(b"ac".to_vec()));
        assert_eq!(prefix_successor(&[b'a', 0xff]), Some(b"b".to_vec()));
        assert_eq!(prefix_successor(&[0xff, 0xff]), None);
        assert_eq!(prefix_successor(b""), None);
    }

    #[test]
    fn test_write_batch_builder() {
        let mut batch = WriteBatch::new();
        batch
            .put(b"k".to_vec(), b"v".to_vec())
            .remove(b"x".to_vec())
            .put_meta(b"m".to_vec(), b"1".to_vec());
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.ops()[1], BatchOp::Remove { key: b"x".to_vec() });
    }
}
