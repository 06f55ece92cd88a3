//! Cross-modal embedding evaluator.
//!
//! Each sample carries color and depth features side by side. Both halves run
//! through autoencoders declared under the `Color` and `Depth` scopes, the
//! bottlenecks are optionally projected through a shared embedding head, and
//! the cosine distance between the unit-normed modality vectors is measured.
//!
//! The two autoencoders were trained separately as single-modality models, so
//! restore pulls each one out of its own checkpoint directory and renames the
//! stored `CAE/*` parameters into the live `Color/*` and `Depth/*` scopes.

use ndarray::{Array2, s};
use serde::Deserialize;
use tracing::info;

use mmeval_checkpoint::{CheckpointError, RestoreRule, restore};
use mmeval_core::{
    ComputationConfig, ParameterSet, STAGE_MIDDLE, Structure, StructureKind,
    norm::unit_norm_rows,
};

use crate::{
    context::RunContext,
    driver::ConfigError,
    evaluator::{BoundData, EvalError, Evaluator, RuntimeComputeError, bind_record_source},
    run::RunOptions,
};

const SCOPE_COLOR: &str = "Color";
const SCOPE_DEPTH: &str = "Depth";
const SCOPE_EMBEDDING: &str = "Embedding";
/// Scope the single-modality training runs stored their parameters under.
const STORED_SCOPE: &str = "CAE";
const LOG_EVERY: u64 = 10;

fn default_structure() -> StructureKind {
    StructureKind::Shadow
}

fn default_middle_len() -> usize {
    64
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmbeddingOptions {
    #[serde(default = "default_structure")]
    pub structure: StructureKind,
    #[serde(default = "default_middle_len")]
    pub middle_len: usize,
    /// Width of the shared embedding projection. When unset the bottlenecks
    /// are compared directly and no third checkpoint is needed.
    #[serde(default)]
    pub feature_length: Option<usize>,
}

pub struct EmbeddingEvaluator {
    options: EmbeddingOptions,
    structure: Option<Box<dyn Structure>>,
    modality_len: usize,
    distance_sum: f64,
    distance_min: f64,
    distance_max: f64,
    steps_seen: u64,
}

impl EmbeddingEvaluator {
    #[must_use]
    pub fn new(options: EmbeddingOptions) -> Self {
        Self {
            options,
            structure: None,
            modality_len: 0,
            distance_sum: 0.0,
            distance_min: f64::INFINITY,
            distance_max: f64::NEG_INFINITY,
            steps_seen: 0,
        }
    }

    /// Declare both modality structures and the optional shared head.
    pub fn declare_params(
        options: &EmbeddingOptions,
        modality_len: usize,
        params: &mut ParameterSet,
        config: &ComputationConfig,
    ) -> Result<Box<dyn Structure>, EvalError> {
        let structure = options.structure.build(modality_len, options.middle_len);
        structure.declare(params, SCOPE_COLOR, config)?;
        structure.declare(params, SCOPE_DEPTH, config)?;
        if let Some(feature_length) = options.feature_length {
            params.declare(
                format!("{SCOPE_EMBEDDING}/weights"),
                &[options.middle_len, feature_length],
            )?;
            params.declare(format!("{SCOPE_EMBEDDING}/biases"), &[feature_length])?;
        }
        Ok(structure)
    }

    fn project(
        &self,
        middle: &Array2<f32>,
        params: &ParameterSet,
    ) -> Result<Array2<f32>, EvalError> {
        if self.options.feature_length.is_none() {
            return Ok(middle.clone());
        }
        let weights = params.require_2d(&format!("{SCOPE_EMBEDDING}/weights"))?;
        let biases = params.require_1d(&format!("{SCOPE_EMBEDDING}/biases"))?;
        Ok(middle.dot(&weights) + &biases)
    }
}

/// Per-row cosine distance between two unit-normed matrices.
fn cosine_distances(color: &Array2<f32>, depth: &Array2<f32>) -> Vec<f64> {
    color
        .rows()
        .into_iter()
        .zip(depth.rows())
        .map(|(c, d)| f64::from(1.0 - c.dot(&d)))
        .collect()
}

impl Evaluator for EmbeddingEvaluator {
    fn name(&self) -> &'static str {
        "embedding"
    }

    fn used_scope(&self) -> &str {
        SCOPE_COLOR
    }

    fn get_data(&mut self, options: &RunOptions) -> Result<BoundData, EvalError> {
        let bound = bind_record_source(options)?;
        let feature_len = bound.descriptor.feature_len;
        if feature_len % 2 != 0 {
            return Err(ConfigError::Invalid(format!(
                "embedding evaluation needs color and depth halves, \
                 but the feature width {feature_len} is odd"
            ))
            .into());
        }
        self.modality_len = feature_len / 2;
        Ok(bound)
    }

    fn compute(
        &mut self,
        params: &mut ParameterSet,
        config: &ComputationConfig,
    ) -> Result<(), EvalError> {
        let structure =
            Self::declare_params(&self.options, self.modality_len, params, config)?;
        self.structure = Some(structure);
        Ok(())
    }

    fn init_model(
        &mut self,
        params: &mut ParameterSet,
        checkpoint_dirs: &[std::path::PathBuf],
    ) -> Result<(), EvalError> {
        let expected = if self.options.feature_length.is_some() { 3 } else { 2 };
        if checkpoint_dirs.len() != expected {
            return Err(CheckpointError::WrongDirCount {
                expected,
                found: checkpoint_dirs.len(),
            }
            .into());
        }

        let mut rules = vec![
            RestoreRule::prefix_remap(&checkpoint_dirs[0], SCOPE_COLOR, STORED_SCOPE),
            RestoreRule::prefix_remap(&checkpoint_dirs[1], SCOPE_DEPTH, STORED_SCOPE),
        ];
        if self.options.feature_length.is_some() {
            rules.push(RestoreRule::prefix_remap(
                &checkpoint_dirs[2],
                SCOPE_EMBEDDING,
                SCOPE_EMBEDDING,
            ));
        }
        restore(params, &rules)?;
        Ok(())
    }

    fn step_log_info(&mut self, ctx: &mut RunContext) -> Result<(), EvalError> {
        let structure = self
            .structure
            .as_ref()
            .ok_or(RuntimeComputeError::ModelNotBuilt)?;
        let batch = ctx.next_batch()?;
        let m = self.modality_len;

        let color_inputs = batch.inputs.slice(s![.., ..m]);
        let depth_inputs = batch.inputs.slice(s![.., m..]);
        let color_middle = structure
            .forward(&color_inputs, ctx.params(), SCOPE_COLOR, STAGE_MIDDLE, ctx.config())?
            .output;
        let depth_middle = structure
            .forward(&depth_inputs, ctx.params(), SCOPE_DEPTH, STAGE_MIDDLE, ctx.config())?
            .output;

        let color = unit_norm_rows(&self.project(&color_middle, ctx.params())?.view());
        let depth = unit_norm_rows(&self.project(&depth_middle, ctx.params())?.view());

        let distances = cosine_distances(&color, &depth);
        let mean = distances.iter().sum::<f64>() / distances.len().max(1) as f64;
        self.distance_sum += mean;
        self.distance_min = self.distance_min.min(mean);
        self.distance_max = self.distance_max.max(mean);
        self.steps_seen += 1;

        if ctx.step() % LOG_EVERY == 0 {
            info!(step = ctx.step(), distance = mean, "embedding step");
        }
        ctx.scalar("distance/mean", mean)?;
        Ok(())
    }

    fn last_step_log_info(&mut self, ctx: &mut RunContext) -> Result<(), EvalError> {
        self.step_log_info(ctx)?;
        let steps = self.steps_seen.max(1) as f64;
        let run_mean = self.distance_sum / steps;
        info!(
            steps = self.steps_seen,
            run_mean,
            run_min = self.distance_min,
            run_max = self.distance_max,
            "embedding evaluation complete"
        );
        ctx.scalar("distance/run_mean", run_mean)?;
        ctx.scalar("distance/run_min", self.distance_min)?;
        ctx.scalar("distance/run_max", self.distance_max)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn test_cosine_distance_of_identical_rows_is_zero() {
        let a = unit_norm_rows(&array![[1.0, 2.0], [3.0, 4.0]].view());
        let distances = cosine_distances(&a, &a.clone());
        for d in distances {
            assert!(d.abs() < 1e-6);
        }
    }

    #[test]
    fn test_cosine_distance_of_orthogonal_rows_is_one() {
        let a = array![[1.0, 0.0]];
        let b = array![[0.0, 1.0]];
        let distances = cosine_distances(&a, &b);
        assert!((distances[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_declares_both_modality_scopes() {
        let options = EmbeddingOptions {
            structure: StructureKind::Shadow,
            middle_len: 2,
            feature_length: None,
        };
        let mut params = ParameterSet::new();
        EmbeddingEvaluator::declare_params(
            &options,
            4,
            &mut params,
            &ComputationConfig::new(true, true),
        )
        .unwrap();
        assert_eq!(params.shape_of("Color/Encode/weights"), Some(&[4, 2][..]));
        assert_eq!(params.shape_of("Depth/Encode/weights"), Some(&[4, 2][..]));
        assert!(params.get("Embedding/weights").is_none());
    }

    #[test]
    fn test_feature_length_adds_shared_head() {
        let options = EmbeddingOptions {
            structure: StructureKind::Shadow,
            middle_len: 2,
            feature_length: Some(8),
        };
        let mut params = ParameterSet::new();
        EmbeddingEvaluator::declare_params(
            &options,
            4,
            &mut params,
            &ComputationConfig::new(true, true),
        )
        .unwrap();
        assert_eq!(params.shape_of("Embedding/weights"), Some(&[2, 8][..]));
        assert_eq!(params.shape_of("Embedding/biases"), Some(&[8][..]));
    }
}
