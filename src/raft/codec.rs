//! Log entry wire format.
//!
//! Every entry starts with a one-byte command tag. `AddLearner` carries a
//! fixed-size host address and is consumed by the replication layer; data
//! tags carry a bincode body that the partition applies to its engine as one
//! write batch. An empty entry is a heartbeat.

use crate::core::error::{StoreError, StoreResult};
use crate::core::host::{HostAddr, HOST_ADDR_WIRE_LEN};
use crate::engine::{KeyValue, WriteBatch};

/// Command tag, the first byte of every log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandType {
    AddLearner = 0x01,
    Put = 0x10,
    MultiPut = 0x11,
    Remove = 0x12,
    MultiRemove = 0x13,
    RemoveRange = 0x14,
    RemovePrefix = 0x15,
}

impl CommandType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(Self::AddLearner),
            0x10 => Some(Self::Put),
            0x11 => Some(Self::MultiPut),
            0x12 => Some(Self::Remove),
            0x13 => Some(Self::MultiRemove),
            0x14 => Some(Self::RemoveRange),
            0x15 => Some(Self::RemovePrefix),
            _ => None,
        }
    }

    /// Membership commands never reach the storage engine.
    pub fn is_membership(&self) -> bool {
        matches!(self, Self::AddLearner)
    }
}

/// A data mutation carried by one log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    MultiPut(Vec<KeyValue>),
    Remove(Vec<u8>),
    MultiRemove(Vec<Vec<u8>>),
    RemoveRange { start: Vec<u8>, end: Vec<u8> },
    RemovePrefix(Vec<u8>),
}

impl LogOp {
    pub fn command_type(&self) -> CommandType {
        match self {
            Self::Put { .. } => CommandType::Put,
            Self::MultiPut(_) => CommandType::MultiPut,
            Self::Remove(_) => CommandType::Remove,
            Self::MultiRemove(_) => CommandType::MultiRemove,
            Self::RemoveRange { .. } => CommandType::RemoveRange,
            Self::RemovePrefix(_) => CommandType::RemovePrefix,
        }
    }

    /// Encode as a tagged log payload.
    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        let body = match self {
            Self::Put { key, value } => bincode::serialize(&(key, value)),
            Self::MultiPut(kvs) => bincode::serialize(kvs),
            Self::Remove(key) => bincode::serialize(key),
            Self::MultiRemove(keys) => bincode::serialize(keys),
            Self::RemoveRange { start, end } => bincode::serialize(&(start, end)),
            Self::RemovePrefix(prefix) => bincode::serialize(prefix),
        }
        .map_err(|e| StoreError::internal(format!("failed to encode log op: {e}")))?;

        let mut out = Vec::with_capacity(body.len() + 1);
        out.push(self.command_type() as u8);
        out.extend_from_slice(&body);
        Ok(out)
    }

    fn decode_body(kind: CommandType, body: &[u8]) -> bincode::Result<Option<Self>> {
        let op = match kind {
            CommandType::AddLearner => return Ok(None),
            CommandType::Put => {
                let (key, value) = bincode::deserialize(body)?;
                Self::Put { key, value }
            }
            CommandType::MultiPut => Self::MultiPut(bincode::deserialize(body)?),
            CommandType::Remove => Self::Remove(bincode::deserialize(body)?),
            CommandType::MultiRemove => Self::MultiRemove(bincode::deserialize(body)?),
            CommandType::RemoveRange => {
                let (start, end) = bincode::deserialize(body)?;
                Self::RemoveRange { start, end }
            }
            CommandType::RemovePrefix => Self::RemovePrefix(bincode::deserialize(body)?),
        };
        Ok(Some(op))
    }

    /// Engine mutations for this op.
    pub fn into_batch(self) -> WriteBatch {
        let mut batch = WriteBatch::new();
        match self {
            Self::Put { key, value } => {
                batch.put(key, value);
            }
            Self::MultiPut(kvs) => {
                for (key, value) in kvs {
                    batch.put(key, value);
                }
            }
            Self::Remove(key) => {
                batch.remove(key);
            }
            Self::MultiRemove(keys) => {
                for key in keys {
                    batch.remove(key);
                }
            }
            Self::RemoveRange { start, end } => {
                batch.remove_range(start, end);
            }
            Self::RemovePrefix(prefix) => {
                batch.remove_prefix(prefix);
            }
        }
        batch
    }
}

/// A decoded log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogCommand {
    Heartbeat,
    AddLearner(HostAddr),
    Data(LogOp),
}

/// Decode a log payload.
pub fn decode(payload: &[u8]) -> StoreResult<LogCommand> {
    let Some((&tag, body)) = payload.split_first() else {
        return Ok(LogCommand::Heartbeat);
    };
    let kind = CommandType::from_tag(tag)
        .ok_or_else(|| StoreError::internal(format!("unknown log command tag {tag:#04x}")))?;
    if kind == CommandType::AddLearner {
        return decode_learner(payload).map(LogCommand::AddLearner);
    }
    match LogOp::decode_body(kind, body) {
        Ok(Some(op)) => Ok(LogCommand::Data(op)),
        Ok(None) => Err(StoreError::internal("membership tag without a body")),
        Err(e) => Err(StoreError::internal(format!(
            "corrupt {kind:?} log entry: {e}"
        ))),
    }
}

/// Encode an add-learner membership command.
pub fn encode_learner(learner: &HostAddr) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + HOST_ADDR_WIRE_LEN);
    out.push(CommandType::AddLearner as u8);
    out.extend_from_slice(&learner.to_bytes());
    out
}

/// Decode an add-learner membership command, tag included.
pub fn decode_learner(payload: &[u8]) -> StoreResult<HostAddr> {
    match payload.split_first() {
        Some((&tag, body)) if tag == CommandType::AddLearner as u8 => HostAddr::from_bytes(body)
            .ok_or_else(|| {
                StoreError::internal(format!(
                    "add-learner entry carries {} address bytes, expected {HOST_ADDR_WIRE_LEN}",
                    body.len()
                ))
            }),
        _ => Err(StoreError::internal("not an add-learner entry")),
    }
}
