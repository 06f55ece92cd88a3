//! The one-shot evaluation run.
//!
//! Fixed lifecycle: bind data, build the model computation, derive log data,
//! create the execution context, start the background feeder, restore
//! parameters, then execute `number_of_steps - 1` regular steps and one
//! final step. A run object is consumed by `run()` and cannot be reused.

use std::path::PathBuf;

use mmeval_core::{ComputationConfig, ParameterSet};
use mmeval_data::Split;
use tracing::{debug, info};

use crate::{
    context::RunContext,
    evaluator::{EvalError, Evaluator, RuntimeComputeError},
    feeder::BackgroundFeeder,
    summary::SummaryWriter,
};

fn default_feeder_workers() -> usize {
    2
}

fn default_queue_capacity() -> usize {
    8
}

/// Options of a single evaluation run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Directory holding the record shards.
    pub source: PathBuf,
    /// Snapshot directories handed to `Evaluator::init_model`.
    pub checkpoint_dirs: Vec<PathBuf>,
    /// Where to write the scalar event log; no log is written when unset.
    pub log_dir: Option<PathBuf>,
    /// Total steps; defaults to one pass over the split.
    pub number_of_steps: Option<u64>,
    /// Samples per batch; defaults to the whole split.
    pub batch_size: Option<usize>,
    pub split: Split,
    pub shuffle: bool,
    pub use_batch_norm: bool,
    /// Normalize with per-batch statistics instead of restored moving ones.
    pub batch_stat: bool,
    pub feeder_workers: usize,
    pub queue_capacity: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            source: PathBuf::new(),
            checkpoint_dirs: Vec::new(),
            log_dir: None,
            number_of_steps: None,
            batch_size: None,
            split: Split::Validation,
            shuffle: false,
            use_batch_norm: true,
            batch_stat: false,
            feeder_workers: default_feeder_workers(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// What a finished run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub steps_executed: u64,
    pub number_of_steps: u64,
    pub batch_size: usize,
    pub sample_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunPhase {
    Uninitialized,
    DataBound,
    ModelBuilt,
    ParametersRestored,
    Running,
    Terminated,
}

/// Drives one evaluator through the evaluation lifecycle, once.
pub struct EvaluationRun<E: Evaluator> {
    evaluator: E,
    phase: RunPhase,
}

impl<E: Evaluator> EvaluationRun<E> {
    #[must_use]
    pub fn new(evaluator: E) -> Self {
        Self {
            evaluator,
            phase: RunPhase::Uninitialized,
        }
    }

    fn enter(&mut self, phase: RunPhase) {
        debug!(from = ?self.phase, to = ?phase, "run phase");
        self.phase = phase;
    }

    /// Execute the run. Consumes the run: the context, feeder and summary
    /// sink are released before this returns, on success and on failure.
    pub fn run(mut self, options: &RunOptions) -> Result<RunSummary, EvalError> {
        let bound = self.evaluator.get_data(options)?;
        self.enter(RunPhase::DataBound);
        let sample_count = bound.descriptor.sample_count;
        let batch_size = bound.batch_size;
        let number_of_steps = options
            .number_of_steps
            .unwrap_or_else(|| sample_count.div_ceil(batch_size.max(1)) as u64);
        info!(
            evaluator = self.evaluator.name(),
            scope = self.evaluator.used_scope(),
            split = %bound.descriptor.split,
            sample_count,
            batch_size,
            number_of_steps,
            "starting evaluation"
        );

        let config = ComputationConfig::new(options.batch_stat, options.use_batch_norm);
        let mut params = ParameterSet::new();
        self.evaluator.compute(&mut params, &config)?;
        self.evaluator.compute_log_data()?;
        self.enter(RunPhase::ModelBuilt);

        let summary = match options.log_dir.as_deref() {
            Some(dir) => {
                Some(SummaryWriter::create(dir).map_err(RuntimeComputeError::Summary)?)
            }
            None => None,
        };
        let feeder =
            BackgroundFeeder::start(bound.source, options.feeder_workers, options.queue_capacity);
        let mut ctx = RunContext::new(params, config, feeder, summary);

        let result = self.execute(&mut ctx, options, number_of_steps);
        let steps_executed = ctx.step();
        ctx.release();
        self.enter(RunPhase::Terminated);

        result.map(|()| RunSummary {
            steps_executed,
            number_of_steps,
            batch_size,
            sample_count,
        })
    }

    fn execute(
        &mut self,
        ctx: &mut RunContext,
        options: &RunOptions,
        number_of_steps: u64,
    ) -> Result<(), EvalError> {
        self.evaluator
            .init_model(ctx.params_mut(), &options.checkpoint_dirs)?;
        self.enter(RunPhase::ParametersRestored);

        self.enter(RunPhase::Running);
        if number_of_steps == 0 {
            info!("zero steps requested, nothing to evaluate");
            return Ok(());
        }
        for _ in 0..number_of_steps - 1 {
            self.evaluator.step_log_info(ctx)?;
            ctx.advance_step();
        }
        self.evaluator.last_step_log_info(ctx)?;
        ctx.advance_step();
        info!(steps = ctx.step(), "evaluation finished");
        Ok(())
    }
}
