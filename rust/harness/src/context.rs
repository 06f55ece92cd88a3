//! Per-run execution context.

use mmeval_core::{ComputationConfig, ParameterSet};
use mmeval_data::Batch;
use tracing::warn;

use crate::{evaluator::RuntimeComputeError, feeder::BackgroundFeeder, summary::SummaryWriter};

/// Everything an evaluator touches while stepping: restored parameters, the
/// batch queue, the step counter and the optional summary sink.
///
/// The context is created by `EvaluationRun` and released exactly once when
/// the run terminates, whether it finished or failed.
pub struct RunContext {
    params: ParameterSet,
    config: ComputationConfig,
    step: u64,
    feeder: Option<BackgroundFeeder>,
    summary: Option<SummaryWriter>,
}

impl RunContext {
    pub(crate) fn new(
        params: ParameterSet,
        config: ComputationConfig,
        feeder: BackgroundFeeder,
        summary: Option<SummaryWriter>,
    ) -> Self {
        Self {
            params,
            config,
            step: 0,
            feeder: Some(feeder),
            summary,
        }
    }

    #[must_use]
    pub fn params(&self) -> &ParameterSet {
        &self.params
    }

    pub(crate) fn params_mut(&mut self) -> &mut ParameterSet {
        &mut self.params
    }

    #[must_use]
    pub fn config(&self) -> &ComputationConfig {
        &self.config
    }

    /// Number of completed steps.
    #[must_use]
    pub fn step(&self) -> u64 {
        self.step
    }

    pub(crate) fn advance_step(&mut self) {
        self.step += 1;
    }

    /// Pull the next batch from the background feeder.
    pub fn next_batch(&mut self) -> Result<Batch, RuntimeComputeError> {
        match self.feeder.as_mut() {
            Some(feeder) => feeder.next(),
            None => Err(RuntimeComputeError::Disconnected),
        }
    }

    /// Record a scalar for the current step, if a log directory was given.
    pub fn scalar(&mut self, tag: &str, value: f64) -> Result<(), RuntimeComputeError> {
        if let Some(summary) = self.summary.as_mut() {
            summary
                .scalar(self.step, tag, value)
                .map_err(RuntimeComputeError::Summary)?;
        }
        Ok(())
    }

    /// Stop the feeder and close the summary sink. Idempotent.
    pub(crate) fn release(&mut self) {
        if let Some(mut feeder) = self.feeder.take() {
            feeder.stop();
        }
        drop(self.summary.take());
    }
}

impl Drop for RunContext {
    fn drop(&mut self) {
        if self.feeder.is_some() {
            warn!("run context dropped without release");
        }
        self.release();
    }
}
