#![warn(clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss
)]

//! mmeval data
//!
//! This crate provides:
//! - the sharded binary record format (`shard`)
//! - `RecordDataset` / `DatasetDescriptor` - dataset access by split
//! - `RecordBatcher` - endlessly cycling batch source for the feeder
//! - `convert` - raw per-sample files to sharded records

use std::path::PathBuf;

pub mod batcher;
pub mod convert;
pub mod provider;
pub mod shard;

pub use batcher::{Batch, BatchSource, RecordBatcher};
pub use convert::{ConvertOptions, ConvertSummary, convert_dataset};
pub use provider::{DatasetDescriptor, RecordDataset, Split, read_label_file};

/// Errors raised while locating, reading or producing dataset records.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("dataset source {0} does not exist")]
    SourceMissing(PathBuf),
    #[error("no record shards for split {split} in {dir}")]
    NoShards { dir: PathBuf, split: Split },
    #[error("failed to read {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("malformed record file {0}: {1}")]
    Malformed(PathBuf, String),
    #[error("inconsistent shards in {dir}: {detail}")]
    InconsistentShards { dir: PathBuf, detail: String },
    #[error("split {0} is empty but a batch was requested")]
    Empty(Split),
    #[error("invalid split name: {0}")]
    InvalidSplit(String),
}
