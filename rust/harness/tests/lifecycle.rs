//! End-to-end evaluation runs over real shards and snapshots.

use std::path::{Path, PathBuf};

use tempfile::{TempDir, tempdir};

use mmeval_checkpoint::write_snapshot;
use mmeval_core::{ComputationConfig, ParameterSet, StructureKind};
use mmeval_data::{
    Batch, BatchSource, DataError, DatasetDescriptor, Split,
    shard::{RawSample, shard_file_name, write_shard},
};
use mmeval_harness::{
    BoundData, ClassifyEvaluator, ClassifyOptions, EmbeddingEvaluator, EmbeddingOptions,
    EvalError, EvaluationRun, Evaluator, RunContext, RunOptions, RuntimeComputeError,
};

fn write_dataset(dir: &Path, split: Split, count: usize, feature_len: usize) {
    let samples: Vec<_> = (0..count)
        .map(|i| RawSample {
            features: vec![(i % 3) as f32; feature_len],
            label: (i % 3) as u32,
        })
        .collect();
    let path = dir.join(shard_file_name(split, 0, 1));
    write_shard(&path, feature_len, &samples).unwrap();
}

fn classify_options() -> ClassifyOptions {
    ClassifyOptions {
        structure: StructureKind::Shadow,
        middle_len: 2,
        num_classes: 3,
        final_stage: "Middle".to_string(),
    }
}

/// Snapshot whose entries match what the classify evaluator declares.
fn write_classify_snapshot(feature_len: usize, config: &ComputationConfig) -> TempDir {
    let dir = tempdir().unwrap();
    let mut params = ParameterSet::new();
    ClassifyEvaluator::declare_params(&classify_options(), feature_len, &mut params, config)
        .unwrap();
    write_snapshot(dir.path(), "step-100", &params).unwrap();
    dir
}

fn event_lines(log_dir: &Path) -> Vec<serde_json::Value> {
    let content = std::fs::read_to_string(log_dir.join("events.jsonl")).unwrap();
    content
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn test_classify_run_executes_requested_steps() {
    let data_dir = tempdir().unwrap();
    write_dataset(data_dir.path(), Split::Validation, 5, 4);
    let ckpt = write_classify_snapshot(4, &ComputationConfig::default());
    let log_dir = tempdir().unwrap();

    let options = RunOptions {
        source: data_dir.path().to_path_buf(),
        checkpoint_dirs: vec![ckpt.path().to_path_buf()],
        log_dir: Some(log_dir.path().to_path_buf()),
        number_of_steps: Some(3),
        batch_size: Some(2),
        ..RunOptions::default()
    };

    let run = EvaluationRun::new(ClassifyEvaluator::new(classify_options()));
    let summary = run.run(&options).unwrap();

    assert_eq!(summary.steps_executed, 3);
    assert_eq!(summary.number_of_steps, 3);
    assert_eq!(summary.batch_size, 2);
    assert_eq!(summary.sample_count, 5);

    // loss + accuracy per step, then the two run means from the last step.
    let events = event_lines(log_dir.path());
    assert_eq!(events.len(), 8);
    assert_eq!(events[0]["tag"], "loss");
    assert_eq!(events[6]["tag"], "loss/mean");
    assert_eq!(events[7]["tag"], "accuracy/mean");
    assert_eq!(events[7]["step"], 2);
}

#[test]
fn test_defaults_evaluate_whole_split_in_one_step() {
    let data_dir = tempdir().unwrap();
    write_dataset(data_dir.path(), Split::Validation, 5, 4);
    let ckpt = write_classify_snapshot(4, &ComputationConfig::default());

    let options = RunOptions {
        source: data_dir.path().to_path_buf(),
        checkpoint_dirs: vec![ckpt.path().to_path_buf()],
        ..RunOptions::default()
    };

    let run = EvaluationRun::new(ClassifyEvaluator::new(classify_options()));
    let summary = run.run(&options).unwrap();

    // Unset batch size covers the split in one batch, hence one step.
    assert_eq!(summary.batch_size, 5);
    assert_eq!(summary.number_of_steps, 1);
    assert_eq!(summary.steps_executed, 1);
}

#[test]
fn test_steps_derived_from_sample_count_and_batch_size() {
    let data_dir = tempdir().unwrap();
    write_dataset(data_dir.path(), Split::Validation, 100, 4);
    let ckpt = write_classify_snapshot(4, &ComputationConfig::default());

    let options = RunOptions {
        source: data_dir.path().to_path_buf(),
        checkpoint_dirs: vec![ckpt.path().to_path_buf()],
        batch_size: Some(24),
        ..RunOptions::default()
    };

    let run = EvaluationRun::new(ClassifyEvaluator::new(classify_options()));
    let summary = run.run(&options).unwrap();

    // ceil(100 / 24) = 5: four regular steps and one final step.
    assert_eq!(summary.number_of_steps, 5);
    assert_eq!(summary.steps_executed, 5);
}

#[test]
fn test_zero_steps_is_a_noop() {
    let data_dir = tempdir().unwrap();
    write_dataset(data_dir.path(), Split::Validation, 5, 4);
    let ckpt = write_classify_snapshot(4, &ComputationConfig::default());
    let log_dir = tempdir().unwrap();

    let options = RunOptions {
        source: data_dir.path().to_path_buf(),
        checkpoint_dirs: vec![ckpt.path().to_path_buf()],
        log_dir: Some(log_dir.path().to_path_buf()),
        number_of_steps: Some(0),
        ..RunOptions::default()
    };

    let run = EvaluationRun::new(ClassifyEvaluator::new(classify_options()));
    let summary = run.run(&options).unwrap();
    assert_eq!(summary.steps_executed, 0);
    assert!(event_lines(log_dir.path()).is_empty());
}

#[test]
fn test_embedding_restores_both_modalities() {
    let data_dir = tempdir().unwrap();
    write_dataset(data_dir.path(), Split::Validation, 6, 8);

    // Each modality was trained on its own, storing parameters under CAE/.
    let embedding_options = EmbeddingOptions {
        structure: StructureKind::Shadow,
        middle_len: 2,
        feature_length: None,
    };
    let config = ComputationConfig::new(true, true);
    let structure = StructureKind::Shadow.build(4, 2);
    let mut stored = ParameterSet::new();
    structure.declare(&mut stored, "CAE", &config).unwrap();

    let color_ckpt = tempdir().unwrap();
    let depth_ckpt = tempdir().unwrap();
    write_snapshot(color_ckpt.path(), "final", &stored).unwrap();
    write_snapshot(depth_ckpt.path(), "final", &stored).unwrap();

    let log_dir = tempdir().unwrap();
    let options = RunOptions {
        source: data_dir.path().to_path_buf(),
        checkpoint_dirs: vec![
            color_ckpt.path().to_path_buf(),
            depth_ckpt.path().to_path_buf(),
        ],
        log_dir: Some(log_dir.path().to_path_buf()),
        number_of_steps: Some(2),
        batch_size: Some(3),
        batch_stat: true,
        ..RunOptions::default()
    };

    let run = EvaluationRun::new(EmbeddingEvaluator::new(embedding_options));
    let summary = run.run(&options).unwrap();
    assert_eq!(summary.steps_executed, 2);

    let events = event_lines(log_dir.path());
    // One distance per step plus the three run aggregates.
    assert_eq!(events.len(), 5);
    assert_eq!(events[0]["tag"], "distance/mean");
    assert_eq!(events[2]["tag"], "distance/run_mean");
}

#[test]
fn test_embedding_requires_two_checkpoints() {
    let data_dir = tempdir().unwrap();
    write_dataset(data_dir.path(), Split::Validation, 4, 8);

    let options = RunOptions {
        source: data_dir.path().to_path_buf(),
        checkpoint_dirs: vec![PathBuf::from("only-one")],
        number_of_steps: Some(1),
        batch_stat: true,
        ..RunOptions::default()
    };

    let run = EvaluationRun::new(EmbeddingEvaluator::new(EmbeddingOptions {
        structure: StructureKind::Shadow,
        middle_len: 2,
        feature_length: None,
    }));
    let err = run.run(&options).unwrap_err();
    assert!(matches!(
        err,
        EvalError::Checkpoint(mmeval_checkpoint::CheckpointError::WrongDirCount {
            expected: 2,
            found: 1
        })
    ));
}

#[test]
fn test_missing_checkpoint_fails_before_any_step() {
    let data_dir = tempdir().unwrap();
    write_dataset(data_dir.path(), Split::Validation, 5, 4);
    let empty_ckpt = tempdir().unwrap();
    let log_dir = tempdir().unwrap();

    let options = RunOptions {
        source: data_dir.path().to_path_buf(),
        checkpoint_dirs: vec![empty_ckpt.path().to_path_buf()],
        log_dir: Some(log_dir.path().to_path_buf()),
        ..RunOptions::default()
    };

    let run = EvaluationRun::new(ClassifyEvaluator::new(classify_options()));
    let err = run.run(&options).unwrap_err();
    assert!(matches!(
        err,
        EvalError::Checkpoint(mmeval_checkpoint::CheckpointError::NoCheckpoint(_))
    ));
    assert!(event_lines(log_dir.path()).is_empty());
}

/// Batch source that runs dry after a fixed number of batches.
struct FlakySource {
    remaining: u32,
}

impl BatchSource for FlakySource {
    fn next_batch(&mut self) -> Result<Batch, DataError> {
        if self.remaining == 0 {
            return Err(DataError::Empty(Split::Validation));
        }
        self.remaining -= 1;
        Ok(Batch {
            inputs: ndarray::Array2::zeros((1, 2)),
            labels: ndarray::Array1::zeros(1),
        })
    }
}

struct FlakyEvaluator;

impl Evaluator for FlakyEvaluator {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn get_data(&mut self, _options: &RunOptions) -> Result<BoundData, EvalError> {
        Ok(BoundData {
            descriptor: DatasetDescriptor {
                sample_count: 10,
                feature_len: 2,
                split: Split::Validation,
            },
            source: Box::new(FlakySource { remaining: 2 }),
            batch_size: 1,
        })
    }

    fn compute(
        &mut self,
        _params: &mut ParameterSet,
        _config: &ComputationConfig,
    ) -> Result<(), EvalError> {
        Ok(())
    }

    fn init_model(
        &mut self,
        _params: &mut ParameterSet,
        _checkpoint_dirs: &[PathBuf],
    ) -> Result<(), EvalError> {
        Ok(())
    }

    fn step_log_info(&mut self, ctx: &mut RunContext) -> Result<(), EvalError> {
        ctx.next_batch()?;
        ctx.scalar("ticks", 1.0)?;
        Ok(())
    }
}

#[test]
fn test_feeder_failure_aborts_but_keeps_earlier_events() {
    let log_dir = tempdir().unwrap();
    let options = RunOptions {
        log_dir: Some(log_dir.path().to_path_buf()),
        number_of_steps: Some(5),
        feeder_workers: 1,
        queue_capacity: 1,
        ..RunOptions::default()
    };

    let run = EvaluationRun::new(FlakyEvaluator);
    let err = run.run(&options).unwrap_err();
    assert!(matches!(
        err,
        EvalError::Compute(RuntimeComputeError::Feeder(_))
    ));

    let events = event_lines(log_dir.path());
    assert_eq!(events.len(), 2);
    assert_eq!(events[1]["tag"], "ticks");
}
