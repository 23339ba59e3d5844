//! Storage layer.
//!
//! - [`wal`] - Durable per-partition log used by the in-process participant

pub mod wal;

pub use wal::LogStore;
