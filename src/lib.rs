//! partkv - partition routing and replication core of a sharded key-value store.
//!
//! A logical keyspace ("space") is sharded into partitions. Every partition
//! hosted on this node pairs one replica group participant with one local
//! storage engine. Writes are accepted only on the partition's leader and
//! become visible once the entry carrying them commits through the
//! replicated log and is applied to the engine.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Placement Provider                       │
//! │        in-memory table  │  metadata-service change stream       │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │ lifecycle notifications
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            Store                                │
//! │    space registry │ partition resolution │ leader-gated KV API  │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Partition                              │
//! │      replica group participant  ──commit──▶  state machine      │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Storage Engine                           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! - [`core`] - Configuration, errors, host addressing, runtime
//! - [`control`] - Placement providers and lifecycle notifications
//! - [`engine`] - Storage engine interface and in-memory engine
//! - [`raft`] - Replica group interface, log format, in-process participant
//! - [`storage`] - Durable partition log
//! - [`part`] - Partition and its state machine
//! - [`store`] - Space registry and store coordinator
//! - [`cli`] - CLI command implementations
//!
//! # Key Invariants
//!
//! - Committed entries are applied in log order, without gaps, once each
//! - Writes on a non-leader fail with the best-known leader address
//! - A partition is released before its engine

/// Identifier of a logical keyspace.
pub type SpaceId = u32;

/// Identifier of a partition within a space.
pub type PartitionId = u32;

// Core infrastructure
pub mod core;

// Placement integration
pub mod control;

// Storage engines
pub mod engine;

// Replication
pub mod raft;

// Durable log
pub mod storage;

// Partitions
pub mod part;

// Store coordinator
pub mod store;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::error::{ResultCode, StoreError, StoreResult};
pub use self::core::host::HostAddr;
pub use self::core::{config, error, host, runtime};
pub use control::{
    LifecycleHandler, MemPlacementProvider, MetaChange, MetaPlacementProvider, PartMeta, PartsMap,
    PlacementProvider,
};
pub use part::{AtomicOp, Part};
pub use store::{AdminReport, KvCallback, ReadPolicy, Store, StoreOptions};
