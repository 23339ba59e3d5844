//! Durable replica log.
//!
//! Each participant appends accepted entries to length-prefixed bincode
//! frames in segment files under its own directory
//! (`segment_<16-digit id>.wal`). Segments rotate once they reach the size
//! limit. On open the store scans every segment to recover the last log id;
//! `read_all` feeds replay on restart. Sealed segments whose entries are all
//! held durably elsewhere are dropped by `compact_through`.

use crate::raft::{LogEntry, LogId, TermId};
use anyhow::{Context, Result};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Default maximum segment size (64 MB).
const DEFAULT_SEGMENT_MAX_SIZE: u64 = 64 * 1024 * 1024;

/// An open, appendable segment.
#[derive(Debug)]
struct OpenSegment {
    path: PathBuf,
    size_bytes: u64,
}

/// Append-only log of one participant.
#[derive(Debug)]
pub struct LogStore {
    dir: PathBuf,
    current: Option<OpenSegment>,
    next_segment_id: u64,
    last_log_id: LogId,
    last_term: TermId,
    max_segment_size: u64,
}

impl LogStore {
    /// Open (creating if needed) the log in `dir` and recover its tail.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create log directory {}", dir.display()))?;

        let mut store = Self {
            dir,
            current: None,
            next_segment_id: 0,
            last_log_id: 0,
            last_term: 0,
            max_segment_size: DEFAULT_SEGMENT_MAX_SIZE,
        };
        store.recover()?;
        Ok(store)
    }

    /// Use a custom segment size.
    pub fn with_segment_size(mut self, max_size: u64) -> Self {
        self.max_segment_size = max_size;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn last_log_id(&self) -> LogId {
        self.last_log_id
    }

    pub fn last_term(&self) -> TermId {
        self.last_term
    }

    fn recover(&mut self) -> Result<()> {
        let segments = segment_paths(&self.dir)?;
        if let Some(last) = segments.last() {
            self.next_segment_id = segment_id(last).map_or(0, |id| id + 1);
        }
        for path in &segments {
            for entry in read_segment(path)? {
                self.last_log_id = entry.id;
                self.last_term = entry.term;
            }
        }
        Ok(())
    }

    /// Append one entry. Ids must be strictly increasing.
    pub fn append(&mut self, entry: &LogEntry) -> Result<()> {
        if entry.id <= self.last_log_id {
            anyhow::bail!(
                "log id {} does not follow last id {}",
                entry.id,
                self.last_log_id
            );
        }
        let bytes = bincode::serialize(entry).context("failed to serialize log entry")?;
        self.ensure_open_segment()?;
        let Some(segment) = self.current.as_mut() else {
            anyhow::bail!("no open log segment");
        };

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&segment.path)
            .context("failed to open segment file")?;
        let mut writer = BufWriter::new(file);
        let len = bytes.len() as u32;
        writer
            .write_all(&len.to_le_bytes())
            .context("failed to write entry length")?;
        writer
            .write_all(&bytes)
            .context("failed to write entry data")?;
        writer.flush().context("failed to flush segment")?;
        writer
            .get_ref()
            .sync_data()
            .context("failed to sync segment")?;

        segment.size_bytes += 4 + bytes.len() as u64;
        self.last_log_id = entry.id;
        self.last_term = entry.term;
        Ok(())
    }

    fn ensure_open_segment(&mut self) -> Result<()> {
        let needs_new = match &self.current {
            None => true,
            Some(segment) => segment.size_bytes >= self.max_segment_size,
        };
        if needs_new {
            let path = self
                .dir
                .join(format!("segment_{:016}.wal", self.next_segment_id));
            self.next_segment_id += 1;
            self.current = Some(OpenSegment {
                path,
                size_bytes: 0,
            });
        }
        Ok(())
    }

    /// Remove sealed segments holding no entry above `upto`. The newest
    /// segment is always kept so the tail survives a reopen. Returns the
    /// number of segments removed.
    pub fn compact_through(&mut self, upto: LogId) -> Result<usize> {
        let mut paths = segment_paths(&self.dir)?;
        paths.pop();
        let mut removed = 0;
        for path in paths {
            let last = read_segment(&path)?.last().map_or(0, |e| e.id);
            if last > upto {
                break;
            }
            std::fs::remove_file(&path)
                .with_context(|| format!("failed to remove segment {}", path.display()))?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Every entry in log order.
    pub fn read_all(&self) -> Result<Vec<LogEntry>> {
        let mut entries = Vec::new();
        for path in segment_paths(&self.dir)? {
            entries.extend(read_segment(&path)?);
        }
        Ok(entries)
    }
}

/// Segment files in `dir`, oldest first.
pub fn segment_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "wal"))
            .collect(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e).context("failed to list log directory"),
    };
    paths.sort();
    Ok(paths)
}

fn segment_id(path: &Path) -> Option<u64> {
    path.file_stem()?
        .to_str()?
        .strip_prefix("segment_")?
        .parse()
        .ok()
}

/// Decode every frame of one segment file. A torn trailing frame ends the read.
pub fn read_segment(path: &Path) -> Result<Vec<LogEntry>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open segment {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut entries = Vec::new();
    let mut len_buf = [0u8; 4];

    loop {
        match reader.read_exact(&mut len_buf) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e).context("failed to read entry length"),
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut entry_buf = vec![0u8; len];
        match reader.read_exact(&mut entry_buf) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                tracing::warn!(path = %path.display(), "ignoring torn log frame");
                break;
            }
            Err(e) => return Err(e).context("failed to read entry data"),
        }
        let entry: LogEntry =
            bincode::deserialize(&entry_buf).context("failed to deserialize log entry")?;
        entries.push(entry);
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_recover() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut log = LogStore::open(dir.path()).unwrap();
            log.append(&LogEntry::new(1, 1, b"a".to_vec())).unwrap();
            log.append(&LogEntry::new(2, 1, b"b".to_vec())).unwrap();
        }
        let log = LogStore::open(dir.path()).unwrap();
        assert_eq!(log.last_log_id(), 2);
        assert_eq!(log.last_term(), 1);
        assert_eq!(log.read_all().unwrap().len(), 2);
    }

    #[test]
    fn test_rejects_non_increasing_ids() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = LogStore::open(dir.path()).unwrap();
        log.append(&LogEntry::new(1, 1, vec![])).unwrap();
        assert!(log.append(&LogEntry::new(1, 1, vec![])).is_err());
    }

    #[test]
    fn test_segment_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = LogStore::open(dir.path()).unwrap().with_segment_size(16);
        for id in 1..=4 {
            log.append(&LogEntry::new(id, 1, vec![0u8; 32])).unwrap();
        }
        assert_eq!(segment_paths(dir.path()).unwrap().len(), 4);
        let ids: Vec<_> = log.read_all().unwrap().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_compaction_keeps_entries_above_watermark() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = LogStore::open(dir.path()).unwrap().with_segment_size(16);
        for id in 1..=4 {
            log.append(&LogEntry::new(id, 1, vec![0u8; 32])).unwrap();
        }
        assert_eq!(log.compact_through(2).unwrap(), 2);
        let ids: Vec<_> = log.read_all().unwrap().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3, 4]);

        // The newest segment survives even when fully covered.
        assert_eq!(log.compact_through(10).unwrap(), 1);
        assert_eq!(log.read_all().unwrap().len(), 1);
        log.append(&LogEntry::new(5, 1, vec![])).unwrap();

        let reopened = LogStore::open(dir.path()).unwrap();
        assert_eq!(reopened.last_log_id(), 5);
    }

    #[test]
    fn test_torn_tail_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut log = LogStore::open(dir.path()).unwrap();
            log.append(&LogEntry::new(1, 1, b"ok".to_vec())).unwrap();
        }
        let path = segment_paths(dir.path()).unwrap().remove(0);
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&100u32.to_le_bytes()).unwrap();
        file.write_all(b"short").unwrap();

        let log = LogStore::open(dir.path()).unwrap();
        assert_eq!(log.last_log_id(), 1);
    }
}
