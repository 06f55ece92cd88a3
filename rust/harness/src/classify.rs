//! Gesture classification evaluator.
//!
//! Runs the autoencoder up to a chosen stage, feeds that representation into
//! a linear logits head and measures cross-entropy loss and accuracy per
//! batch. The final step additionally logs run-wide means.

use ndarray::{Array2, ArrayView1};
use serde::Deserialize;
use tracing::info;

use mmeval_core::{
    ComputationConfig, ParameterSet, STAGE_MIDDLE, Structure, StructureError, StructureKind,
};

use crate::{
    context::RunContext,
    evaluator::{BoundData, EvalError, Evaluator, RuntimeComputeError, bind_record_source},
    run::RunOptions,
};

const SCOPE: &str = "Classify";
const LOG_EVERY: u64 = 10;

fn default_structure() -> StructureKind {
    StructureKind::Shadow
}

fn default_middle_len() -> usize {
    64
}

fn default_final_stage() -> String {
    STAGE_MIDDLE.to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassifyOptions {
    #[serde(default = "default_structure")]
    pub structure: StructureKind,
    #[serde(default = "default_middle_len")]
    pub middle_len: usize,
    pub num_classes: usize,
    /// Stage whose output feeds the logits head.
    #[serde(default = "default_final_stage")]
    pub final_stage: String,
}

pub struct ClassifyEvaluator {
    options: ClassifyOptions,
    structure: Option<Box<dyn Structure>>,
    feature_len: usize,
    loss_sum: f64,
    accuracy_sum: f64,
    steps_seen: u64,
}

impl ClassifyEvaluator {
    #[must_use]
    pub fn new(options: ClassifyOptions) -> Self {
        Self {
            options,
            structure: None,
            feature_len: 0,
            loss_sum: 0.0,
            accuracy_sum: 0.0,
            steps_seen: 0,
        }
    }

    /// Declare the full parameter set of this evaluator, reusable for
    /// producing matching snapshots.
    pub fn declare_params(
        options: &ClassifyOptions,
        feature_len: usize,
        params: &mut ParameterSet,
        config: &ComputationConfig,
    ) -> Result<Box<dyn Structure>, EvalError> {
        let structure = options.structure.build(feature_len, options.middle_len);
        structure.declare(params, SCOPE, config)?;
        let width = structure.stage_width(&options.final_stage).ok_or_else(|| {
            StructureError::UnknownStage {
                structure: structure.name(),
                stage: options.final_stage.clone(),
                known: structure.stage_names(),
            }
        })?;
        params.declare(format!("{SCOPE}/Logits/weights"), &[width, options.num_classes])?;
        params.declare(format!("{SCOPE}/Logits/biases"), &[options.num_classes])?;
        Ok(structure)
    }
}

fn softmax_rows(logits: &Array2<f32>) -> Array2<f32> {
    let mut probs = logits.clone();
    for mut row in probs.rows_mut() {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        row.mapv_inplace(|v| (v - max).exp());
        let sum: f32 = row.sum();
        if sum > 0.0 {
            row.mapv_inplace(|v| v / sum);
        }
    }
    probs
}

fn mean_cross_entropy(probs: &Array2<f32>, labels: &ArrayView1<'_, u32>) -> f64 {
    let mut total = 0.0;
    for (row, &label) in labels.iter().enumerate() {
        let p = probs
            .get((row, label as usize))
            .copied()
            .unwrap_or(0.0)
            .max(1e-12);
        total += f64::from(-p.ln());
    }
    total / labels.len().max(1) as f64
}

fn accuracy(probs: &Array2<f32>, labels: &ArrayView1<'_, u32>) -> f64 {
    let mut hits = 0usize;
    for (row, &label) in labels.iter().enumerate() {
        let predicted = probs
            .row(row)
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(idx, _)| idx);
        if predicted == Some(label as usize) {
            hits += 1;
        }
    }
    hits as f64 / labels.len().max(1) as f64
}

impl Evaluator for ClassifyEvaluator {
    fn name(&self) -> &'static str {
        "classify"
    }

    fn used_scope(&self) -> &str {
        SCOPE
    }

    fn get_data(&mut self, options: &RunOptions) -> Result<BoundData, EvalError> {
        let bound = bind_record_source(options)?;
        self.feature_len = bound.descriptor.feature_len;
        Ok(bound)
    }

    fn compute(
        &mut self,
        params: &mut ParameterSet,
        config: &ComputationConfig,
    ) -> Result<(), EvalError> {
        let structure =
            Self::declare_params(&self.options, self.feature_len, params, config)?;
        self.structure = Some(structure);
        Ok(())
    }

    fn step_log_info(&mut self, ctx: &mut RunContext) -> Result<(), EvalError> {
        let structure = self
            .structure
            .as_ref()
            .ok_or(RuntimeComputeError::ModelNotBuilt)?;
        let batch = ctx.next_batch()?;

        let out = structure.forward(
            &batch.inputs.view(),
            ctx.params(),
            SCOPE,
            &self.options.final_stage,
            ctx.config(),
        )?;
        let weights = ctx.params().require_2d(&format!("{SCOPE}/Logits/weights"))?;
        let biases = ctx.params().require_1d(&format!("{SCOPE}/Logits/biases"))?;
        let logits = out.output.dot(&weights) + &biases;
        let probs = softmax_rows(&logits);

        let loss = mean_cross_entropy(&probs, &batch.labels.view());
        let acc = accuracy(&probs, &batch.labels.view());
        self.loss_sum += loss;
        self.accuracy_sum += acc;
        self.steps_seen += 1;

        if ctx.step() % LOG_EVERY == 0 {
            info!(step = ctx.step(), loss, accuracy = acc, "classify step");
        }
        ctx.scalar("loss", loss)?;
        ctx.scalar("accuracy", acc)?;
        Ok(())
    }

    fn last_step_log_info(&mut self, ctx: &mut RunContext) -> Result<(), EvalError> {
        self.step_log_info(ctx)?;
        let steps = self.steps_seen.max(1) as f64;
        let mean_loss = self.loss_sum / steps;
        let mean_accuracy = self.accuracy_sum / steps;
        info!(
            steps = self.steps_seen,
            mean_loss, mean_accuracy, "classification evaluation complete"
        );
        ctx.scalar("loss/mean", mean_loss)?;
        ctx.scalar("accuracy/mean", mean_accuracy)?;
        Ok(())
    }
}
