//! Space registry and store coordinator.
//!
//! [`Store`] resolves every request to a partition: space lookup first
//! (`SpaceNotFound`), then partition lookup (`PartitionNotFound`). Writes are
//! then gated on leadership (`LeaderChanged`) and committed through the
//! partition's replica group. Reads are served under the configured
//! [`ReadPolicy`].
//!
//! - [`space`] - Per-space partition and engine registry
//! - [`coordinator`] - Store coordinator and KV API

pub mod coordinator;
pub mod space;

pub use coordinator::{AdminReport, KvCallback, PartOutcome, ReadPolicy, Store, StoreOptions};
pub use space::SpaceParts;
