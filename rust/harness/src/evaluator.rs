//! The evaluator seam.
//!
//! An evaluator binds a dataset, declares its model computation, and decides
//! what each evaluation step measures and logs. The lifecycle around it
//! (context creation, feeding, restore, the step loop) lives in `run`.

use std::path::PathBuf;

use mmeval_checkpoint::{CheckpointError, RestoreRule, restore};
use mmeval_core::{ComputationConfig, ParamError, ParameterSet, StructureError};
use mmeval_data::{BatchSource, DataError, DatasetDescriptor, RecordBatcher, RecordDataset};

use crate::{context::RunContext, driver::ConfigError, run::RunOptions};

/// A dataset bound to one evaluation run, with the effective batch size.
pub struct BoundData {
    pub descriptor: DatasetDescriptor,
    pub source: Box<dyn BatchSource>,
    /// Resolved batch size; defaults to the whole split in one batch.
    pub batch_size: usize,
}

/// Open the record dataset named by the options and wrap it in a cycling
/// batcher. Shared by the built-in evaluators.
pub fn bind_record_source(options: &RunOptions) -> Result<BoundData, EvalError> {
    let dataset = RecordDataset::open(&options.source, options.split)?;
    let descriptor = dataset.descriptor();
    let batch_size = options.batch_size.unwrap_or(descriptor.sample_count);
    let batcher = RecordBatcher::new(dataset, batch_size, options.shuffle)?;
    Ok(BoundData {
        descriptor,
        source: Box::new(batcher),
        batch_size,
    })
}

/// One evaluation strategy: what to compute per batch and what to log.
///
/// Implementations only fill in the measurement; `EvaluationRun` drives the
/// lifecycle and calls these hooks in a fixed order.
pub trait Evaluator: Send {
    fn name(&self) -> &'static str;

    /// Bind the dataset and resolve the effective batch size.
    fn get_data(&mut self, options: &RunOptions) -> Result<BoundData, EvalError>;

    /// Root scope the model's parameters are declared under.
    fn used_scope(&self) -> &str {
        "Eval"
    }

    /// Declare parameters and build per-run compute state.
    fn compute(
        &mut self,
        params: &mut ParameterSet,
        config: &ComputationConfig,
    ) -> Result<(), EvalError>;

    /// Derive additional logged quantities from the compute outputs.
    fn compute_log_data(&mut self) -> Result<(), EvalError> {
        Ok(())
    }

    /// Restore parameters from checkpoints. The default expects exactly one
    /// directory and restores every entry of its latest snapshot.
    fn init_model(
        &mut self,
        params: &mut ParameterSet,
        checkpoint_dirs: &[PathBuf],
    ) -> Result<(), EvalError> {
        let [dir] = checkpoint_dirs else {
            return Err(CheckpointError::WrongDirCount {
                expected: 1,
                found: checkpoint_dirs.len(),
            }
            .into());
        };
        restore(params, &[RestoreRule::all(dir)])?;
        Ok(())
    }

    /// One regular evaluation step.
    fn step_log_info(&mut self, ctx: &mut RunContext) -> Result<(), EvalError>;

    /// The final evaluation step; defaults to a regular step.
    fn last_step_log_info(&mut self, ctx: &mut RunContext) -> Result<(), EvalError> {
        self.step_log_info(ctx)
    }
}

impl Evaluator for Box<dyn Evaluator> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn get_data(&mut self, options: &RunOptions) -> Result<BoundData, EvalError> {
        (**self).get_data(options)
    }

    fn used_scope(&self) -> &str {
        (**self).used_scope()
    }

    fn compute(
        &mut self,
        params: &mut ParameterSet,
        config: &ComputationConfig,
    ) -> Result<(), EvalError> {
        (**self).compute(params, config)
    }

    fn compute_log_data(&mut self) -> Result<(), EvalError> {
        (**self).compute_log_data()
    }

    fn init_model(
        &mut self,
        params: &mut ParameterSet,
        checkpoint_dirs: &[PathBuf],
    ) -> Result<(), EvalError> {
        (**self).init_model(params, checkpoint_dirs)
    }

    fn step_log_info(&mut self, ctx: &mut RunContext) -> Result<(), EvalError> {
        (**self).step_log_info(ctx)
    }

    fn last_step_log_info(&mut self, ctx: &mut RunContext) -> Result<(), EvalError> {
        (**self).last_step_log_info(ctx)
    }
}

/// Errors surfaced while the run is executing steps, as opposed to the
/// binding, building and restore phases before it.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeComputeError {
    #[error("background feeder failed")]
    Feeder(#[source] DataError),
    #[error("background feeder disconnected")]
    Disconnected,
    #[error("step executed before the model computation was built")]
    ModelNotBuilt,
    #[error(transparent)]
    Structure(#[from] StructureError),
    #[error("failed to write summary event: {0}")]
    Summary(#[source] std::io::Error),
}

/// Everything an evaluation run can fail with.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error(transparent)]
    Compute(#[from] RuntimeComputeError),
}

impl From<StructureError> for EvalError {
    fn from(err: StructureError) -> Self {
        Self::Compute(RuntimeComputeError::Structure(err))
    }
}

impl From<ParamError> for EvalError {
    fn from(err: ParamError) -> Self {
        Self::Compute(RuntimeComputeError::Structure(StructureError::Param(err)))
    }
}
