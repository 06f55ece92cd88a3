//! The model-structure seam.
//!
//! A structure maps an input batch to an output representation plus a
//! mapping of intermediate stage names to intermediate values, stopping at
//! a caller-specified final stage. Concrete evaluators compose one or more
//! structures under distinct scopes (e.g. `Color`, `Depth`).

use std::collections::BTreeMap;

use ndarray::{Array2, ArrayView2};

use crate::params::{ParamError, ParameterSet};
use crate::scope::ComputationConfig;

/// Stage name of the bottleneck representation.
pub const STAGE_MIDDLE: &str = "Middle";
/// Stage name of the full (reconstruction) output.
pub const STAGE_FINAL: &str = "Final";

/// Output of a structure forward pass, cut off at the requested stage.
#[derive(Debug)]
pub struct StageOutput {
    /// Value at the requested final stage.
    pub output: Array2<f32>,
    /// All stages computed up to and including the final one.
    pub stages: BTreeMap<String, Array2<f32>>,
}

/// A model structure: pure computation over a restored `ParameterSet`.
pub trait Structure: std::fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Stage names this structure can stop at, in computation order.
    fn stage_names(&self) -> &'static [&'static str];

    /// Width of the input feature vector this structure expects.
    fn input_len(&self) -> usize;

    /// Width of a named stage's output, if the stage exists.
    fn stage_width(&self, stage: &str) -> Option<usize>;

    /// Register parameter names and shapes under `scope`.
    fn declare(
        &self,
        params: &mut ParameterSet,
        scope: &str,
        config: &ComputationConfig,
    ) -> Result<(), StructureError>;

    /// Run the computation up to `final_stage`.
    fn forward(
        &self,
        inputs: &ArrayView2<'_, f32>,
        params: &ParameterSet,
        scope: &str,
        final_stage: &str,
        config: &ComputationConfig,
    ) -> Result<StageOutput, StructureError>;
}

/// Errors from structure declaration or forward computation.
#[derive(Debug, thiserror::Error)]
pub enum StructureError {
    #[error("unknown final stage {stage} for structure {structure} (known: {known:?})")]
    UnknownStage {
        structure: &'static str,
        stage: String,
        known: &'static [&'static str],
    },
    #[error("input has {found} features, structure {structure} expects {expected}")]
    InputWidth {
        structure: &'static str,
        expected: usize,
        found: usize,
    },
    #[error(transparent)]
    Param(#[from] ParamError),
}
