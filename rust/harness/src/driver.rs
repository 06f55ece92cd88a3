//! TOML run configuration.
//!
//! A config file has a `[run]` section mapping onto `RunOptions` and an
//! `[evaluator]` section naming the evaluator kind plus its typed options.
//! Unknown keys anywhere are rejected when the file is loaded, before any
//! data or checkpoint is touched.
//!
//! ```toml
//! [run]
//! source = "data/gestures"
//! checkpoint_dirs = ["ckpt/color", "ckpt/depth"]
//! log_dir = "logs/eval"
//! batch_size = 32
//!
//! [evaluator]
//! kind = "embedding"
//!
//! [evaluator.options]
//! middle_len = 128
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};

use mmeval_data::Split;

use crate::{
    classify::{ClassifyEvaluator, ClassifyOptions},
    embedding::{EmbeddingEvaluator, EmbeddingOptions},
    evaluator::Evaluator,
    run::RunOptions,
};

/// Errors raised while loading or interpreting a run configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("failed to parse config {0}: {1}")]
    Parse(PathBuf, toml::de::Error),
    #[error("unknown evaluator kind: {0}")]
    UnknownEvaluator(String),
    #[error("invalid evaluator options: {0}")]
    InvalidOptions(toml::de::Error),
    #[error("{0}")]
    Invalid(String),
}

fn default_split() -> Split {
    Split::Validation
}

fn default_batch_size() -> Option<usize> {
    Some(24)
}

fn default_true() -> bool {
    true
}

fn default_feeder_workers() -> usize {
    2
}

fn default_queue_capacity() -> usize {
    8
}

/// Accepts either one path or a list of paths.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<PathBuf>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(PathBuf),
        Many(Vec<PathBuf>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(path) => vec![path],
        OneOrMany::Many(paths) => paths,
    })
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunSection {
    pub source: PathBuf,
    #[serde(default, deserialize_with = "one_or_many")]
    pub checkpoint_dirs: Vec<PathBuf>,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    #[serde(default)]
    pub number_of_steps: Option<u64>,
    /// Samples per batch (default 24).
    #[serde(default = "default_batch_size")]
    pub batch_size: Option<usize>,
    #[serde(default = "default_split")]
    pub split: Split,
    #[serde(default)]
    pub shuffle: bool,
    #[serde(default = "default_true")]
    pub use_batch_norm: bool,
    #[serde(default)]
    pub batch_stat: bool,
    #[serde(default = "default_feeder_workers")]
    pub feeder_workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvaluatorSection {
    pub kind: String,
    #[serde(default)]
    pub options: toml::Table,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvalConfig {
    pub run: RunSection,
    pub evaluator: EvaluatorSection,
}

impl EvalConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::parse(&content).map_err(|e| match e {
            ConfigError::Parse(_, err) => ConfigError::Parse(path.to_path_buf(), err),
            other => other,
        })
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        // Validate evaluator options eagerly so typos fail at load time.
        config.build_evaluator()?;
        Ok(config)
    }

    #[must_use]
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            source: self.run.source.clone(),
            checkpoint_dirs: self.run.checkpoint_dirs.clone(),
            log_dir: self.run.log_dir.clone(),
            number_of_steps: self.run.number_of_steps,
            batch_size: self.run.batch_size,
            split: self.run.split,
            shuffle: self.run.shuffle,
            use_batch_norm: self.run.use_batch_norm,
            batch_stat: self.run.batch_stat,
            feeder_workers: self.run.feeder_workers,
            queue_capacity: self.run.queue_capacity,
        }
    }

    /// Instantiate the configured evaluator.
    pub fn build_evaluator(&self) -> Result<Box<dyn Evaluator>, ConfigError> {
        let options = toml::Value::Table(self.evaluator.options.clone());
        match self.evaluator.kind.as_str() {
            "classify" => {
                let options: ClassifyOptions =
                    options.try_into().map_err(ConfigError::InvalidOptions)?;
                Ok(Box::new(ClassifyEvaluator::new(options)))
            }
            "embedding" => {
                let options: EmbeddingOptions =
                    options.try_into().map_err(ConfigError::InvalidOptions)?;
                Ok(Box::new(EmbeddingEvaluator::new(options)))
            }
            other => Err(ConfigError::UnknownEvaluator(other.to_string())),
        }
    }
}
