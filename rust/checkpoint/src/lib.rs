#![warn(clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::cast_possible_truncation
)]

//! mmeval checkpoint
//!
//! This crate provides:
//! - the binary snapshot format for `ParameterSet` values (`snapshot`)
//! - `latest_snapshot` - resolve the newest snapshot in a directory
//! - `RestoreRule` / `restore` - selective, renaming restore from one or
//!   more snapshot directories into a live parameter set

use std::path::PathBuf;

pub mod snapshot;
pub mod store;

pub use snapshot::{SnapshotIndex, read_snapshot, write_snapshot};
pub use store::{RestoreRule, latest_snapshot, restore};

/// Errors raised while writing snapshots or restoring parameters.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("no snapshot found in {0}")]
    NoCheckpoint(PathBuf),
    #[error("failed to access {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("corrupt snapshot {0}: {1}")]
    Corrupt(PathBuf, String),
    #[error("snapshot {snapshot} has no entry for live parameter {name}")]
    MissingParameter { name: String, snapshot: PathBuf },
    #[error("shape mismatch for {name}: live {expected:?}, stored {found:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("restore rule for {0} selected no snapshot entries")]
    EmptySelection(PathBuf),
    #[error("parameter {0} is targeted by more than one restore rule")]
    Conflict(String),
    #[error("expected {expected} checkpoint directories, got {found}")]
    WrongDirCount { expected: usize, found: usize },
}
