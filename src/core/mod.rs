//! Core runtime infrastructure.
//!
//! - [`config`] - Configuration parsing and validation
//! - [`error`] - Error types and result codes
//! - [`host`] - Host addressing
//! - [`runtime`] - Main runtime orchestration

pub mod config;
pub mod error;
pub mod host;
pub mod runtime;
