//! Inspect command implementation.

use crate::raft::codec::{self, LogCommand, LogOp};
use crate::raft::LogEntry;
use crate::storage::wal;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;

/// Inspect partition logs.
#[derive(Args, Debug)]
pub struct InspectArgs {
    #[command(subcommand)]
    pub command: InspectCommand,
}

/// Inspect subcommands.
#[derive(Subcommand, Debug)]
pub enum InspectCommand {
    /// Print log entries as JSON lines.
    Wal {
        /// Segment files or log directories.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

/// Run the inspect command.
pub fn run_inspect(args: InspectArgs) -> Result<()> {
    match args.command {
        InspectCommand::Wal { paths } => {
            for path in paths {
                let segments = if path.is_dir() {
                    wal::segment_paths(&path)?
                } else {
                    vec![path]
                };
                for segment in segments {
                    let entries = wal::read_segment(&segment)
                        .with_context(|| format!("failed to read segment {:?}", segment))?;
                    for entry in &entries {
                        println!("{}", describe_entry(entry));
                    }
                    eprintln!("{}: {} entries", segment.display(), entries.len());
                }
            }
        }
    }
    Ok(())
}

/// JSON summary of one log entry.
pub fn describe_entry(entry: &LogEntry) -> Value {
    let command = match codec::decode(&entry.payload) {
        Ok(LogCommand::Heartbeat) => json!({ "type": "heartbeat" }),
        Ok(LogCommand::AddLearner(learner)) => {
            json!({ "type": "add_learner", "learner": learner.to_string() })
        }
        Ok(LogCommand::Data(op)) => describe_op(&op),
        Err(e) => json!({ "type": "corrupt", "error": e.to_string() }),
    };
    json!({
        "id": entry.id,
        "term": entry.term,
        "bytes": entry.payload.len(),
        "command": command,
    })
}

fn describe_op(op: &LogOp) -> Value {
    let lossy = |b: &[u8]| String::from_utf8_lossy(b).into_owned();
    match op {
        LogOp::Put { key, value } => {
            json!({ "type": "put", "key": lossy(key), "value_bytes": value.len() })
        }
        LogOp::MultiPut(kvs) => json!({ "type": "multi_put", "pairs": kvs.len() }),
        LogOp::Remove(key) => json!({ "type": "remove", "key": lossy(key) }),
        LogOp::MultiRemove(keys) => json!({ "type": "multi_remove", "keys": keys.len() }),
        LogOp::RemoveRange { start, end } => {
            json!({ "type": "remove_range", "start": lossy(start), "end": lossy(end) })
        }
        LogOp::RemovePrefix(prefix) => {
            json!({ "type": "remove_prefix", "prefix": lossy(prefix) })
        }
    }
}
