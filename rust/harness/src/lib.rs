#![warn(clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::cast_precision_loss
)]

//! mmeval harness
//!
//! This crate provides:
//! - the `Evaluator` trait and the one-shot `EvaluationRun` lifecycle
//! - `RunContext` - batches, restored parameters and the summary sink
//! - `BackgroundFeeder` - worker threads filling a bounded batch queue
//! - `ClassifyEvaluator` / `EmbeddingEvaluator` - the built-in evaluators
//! - `EvalConfig` - TOML run configuration for the `mmeval` binary

pub mod classify;
pub mod context;
pub mod driver;
pub mod embedding;
pub mod evaluator;
pub mod feeder;
pub mod run;
pub mod summary;

pub use classify::{ClassifyEvaluator, ClassifyOptions};
pub use context::RunContext;
pub use driver::{ConfigError, EvalConfig};
pub use embedding::{EmbeddingEvaluator, EmbeddingOptions};
pub use evaluator::{BoundData, EvalError, Evaluator, RuntimeComputeError};
pub use feeder::BackgroundFeeder;
pub use run::{EvaluationRun, RunOptions, RunSummary};
pub use summary::SummaryWriter;
