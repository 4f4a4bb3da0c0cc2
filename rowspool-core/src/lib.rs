//! In-memory column-oriented tables with row views and spooled sampling
//!
//! This crate provides three cooperating views over shared column storage:
//! a mapping-like table over named typed fields ([`Dataset`]), a zero-copy
//! per-index view across those fields ([`Row`]), and a sampling/batching
//! wrapper over row views for iterative consumers such as training loops
//! ([`Spool`]).
//!
//! The model is single-threaded and single-writer: datasets are cheap-clone
//! handles, structural mutations bump an explicit generation counter, and
//! cached column views rebuild when stale rather than being patched.

#![warn(missing_docs)]

pub mod column;
pub mod dataset;
pub mod dtype;
pub mod error;
pub mod io;
pub mod row;
pub mod spool;
pub mod store;

// Re-export key types for convenience
pub use column::Column;
pub use dataset::{generate_uids, Dataset, UID};
pub use dtype::{DType, Field, Value};
pub use error::{Error, Result};
pub use io::Format;
pub use row::Row;
pub use spool::Spool;
pub use store::{ColumnData, Store};
