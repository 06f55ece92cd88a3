//! Configuration the model computation runs under.

use serde::{Deserialize, Serialize};

/// How intermediate activations are normalized during the computation.
///
/// Mirrors the two evaluation modes of batch normalization: statistics of
/// the current batch, or moving averages accumulated during training and
/// restored from the checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormMode {
    /// No normalization.
    Off,
    /// Normalize with the statistics of the current batch.
    BatchStat,
    /// Normalize with restored moving mean/variance.
    Moving,
}

/// Scope configuration returned by `Evaluator::used_scope`.
///
/// Pure data; building it has no side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputationConfig {
    /// Whether to normalize activations at all.
    pub use_batch_norm: bool,
    /// Whether to use batch statistics instead of moving averages.
    pub batch_stat: bool,
}

impl ComputationConfig {
    #[must_use]
    pub fn new(batch_stat: bool, use_batch_norm: bool) -> Self {
        Self {
            use_batch_norm,
            batch_stat,
        }
    }

    #[must_use]
    pub fn norm_mode(&self) -> NormMode {
        match (self.use_batch_norm, self.batch_stat) {
            (false, _) => NormMode::Off,
            (true, true) => NormMode::BatchStat,
            (true, false) => NormMode::Moving,
        }
    }
}

impl Default for ComputationConfig {
    /// Evaluation defaults: normalize with moving averages.
    fn default() -> Self {
        Self {
            use_batch_norm: true,
            batch_stat: false,
        }
    }
}
