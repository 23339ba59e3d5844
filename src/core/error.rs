//! Error types and result codes.
//!
//! Store operations report failures as typed result codes rather than
//! panics. Resolution errors (`SpaceNotFound`, `PartitionNotFound`) are never
//! retried internally; `LeaderChanged` carries the best-known leader so the
//! caller can retry against it.

use crate::core::host::HostAddr;
use crate::{PartitionId, SpaceId};
use thiserror::Error;

/// Common store error conditions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The space is not hosted on this store.
    #[error("space {space} not found")]
    SpaceNotFound { space: SpaceId },

    /// The partition is not hosted on this store.
    #[error("partition {space}:{part} not found")]
    PartitionNotFound { space: SpaceId, part: PartitionId },

    /// Write attempted on a non-leader. `leader` may be unset when unknown.
    #[error("leader changed, current leader is {leader}")]
    LeaderChanged { leader: HostAddr },

    /// Local storage failure.
    #[error("engine error: {message}")]
    Engine { message: String },

    /// The append buffer is full.
    #[error("replication backpressure, append buffer is full")]
    Backpressure,

    /// The log append could not be accepted.
    #[error("replication failure: {message}")]
    ReplicationFailure { message: String },

    /// The entry was appended but never reached the committed state.
    #[error("commit failed: {message}")]
    CommitFailed { message: String },

    /// The entry did not commit in time.
    #[error("commit timed out")]
    CommitTimeout,

    /// An atomic operation declined to produce a write.
    #[error("atomic operation failed its precondition")]
    AtomicOpFailed,

    /// The partition stopped applying its log after a fatal apply error.
    #[error("partition {space}:{part} halted after an apply failure")]
    PartitionHalted { space: SpaceId, part: PartitionId },

    /// Invalid request.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// Internal error.
    #[error("internal error: {message}")]
    Internal { message: String },
}

/// Stable result codes for every [`StoreError`] variant plus success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Succeeded = 0,
    SpaceNotFound = -11,
    PartitionNotFound = -12,
    LeaderChanged = -13,
    Engine = -20,
    Backpressure = -21,
    ReplicationFailure = -22,
    CommitFailed = -23,
    CommitTimeout = -24,
    AtomicOpFailed = -25,
    PartitionHalted = -26,
    InvalidRequest = -30,
    Internal = -99,
}

impl StoreError {
    pub fn space_not_found(space: SpaceId) -> Self {
        Self::SpaceNotFound { space }
    }

    pub fn part_not_found(space: SpaceId, part: PartitionId) -> Self {
        Self::PartitionNotFound { space, part }
    }

    pub fn leader_changed(leader: HostAddr) -> Self {
        Self::LeaderChanged { leader }
    }

    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
        }
    }

    pub fn commit_failed(message: impl Into<String>) -> Self {
        Self::CommitFailed {
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if the caller may retry, possibly against another host.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::LeaderChanged { .. }
                | Self::Backpressure
                | Self::CommitFailed { .. }
                | Self::CommitTimeout
        )
    }

    /// Best-known leader carried by a `LeaderChanged` error.
    pub fn leader_hint(&self) -> Option<HostAddr> {
        match self {
            Self::LeaderChanged { leader } if !leader.is_unset() => Some(*leader),
            _ => None,
        }
    }

    /// Map to the stable result code.
    pub fn code(&self) -> ResultCode {
        match self {
            Self::SpaceNotFound { .. } => ResultCode::SpaceNotFound,
            Self::PartitionNotFound { .. } => ResultCode::PartitionNotFound,
            Self::LeaderChanged { .. } => ResultCode::LeaderChanged,
            Self::Engine { .. } => ResultCode::Engine,
            Self::Backpressure => ResultCode::Backpressure,
            Self::ReplicationFailure { .. } => ResultCode::ReplicationFailure,
            Self::CommitFailed { .. } => ResultCode::CommitFailed,
            Self::CommitTimeout => ResultCode::CommitTimeout,
            Self::AtomicOpFailed => ResultCode::AtomicOpFailed,
            Self::PartitionHalted { .. } => ResultCode::PartitionHalted,
            Self::InvalidRequest { .. } => ResultCode::InvalidRequest,
            Self::Internal { .. } => ResultCode::Internal,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::engine(err.to_string())
    }
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        Self::engine(format!("codec: {err}"))
    }
}

/// Result type using StoreError.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result code of an arbitrary store result.
pub fn result_code<T>(result: &StoreResult<T>) -> ResultCode {
    match result {
        Ok(_) => ResultCode::Succeeded,
        Err(e) => e.code(),
    }
}
