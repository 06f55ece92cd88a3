//! mmeval CLI
//!
//! Runs configured evaluations over sharded gesture datasets, converts raw
//! datasets into shards and inspects parameter snapshots.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use mmeval_checkpoint::{latest_snapshot, read_snapshot};
use mmeval_data::{ConvertOptions, convert_dataset};
use mmeval_harness::{EvalConfig, EvaluationRun};

#[derive(Parser)]
#[command(name = "mmeval", about = "Multimodal gesture model evaluation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an evaluation described by a config file
    Run {
        /// Path to the eval.toml config file
        #[arg(short, long, default_value = "eval.toml")]
        config: PathBuf,

        /// Override the number of evaluation steps
        #[arg(long)]
        steps: Option<u64>,

        /// Override the batch size
        #[arg(long)]
        batch_size: Option<usize>,

        /// Override the summary log directory
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },

    /// Convert a raw dataset tree into sharded record files
    Convert {
        /// Dataset root with train/ and validation/ class directories
        #[arg(long)]
        dataset_dir: PathBuf,

        /// Where to write the shards and labels.txt
        #[arg(long)]
        output: PathBuf,

        /// Number of shards per split
        #[arg(long, default_value_t = 5)]
        num_shards: usize,

        /// Shuffle seed
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },

    /// Show the snapshots in a checkpoint directory
    Snapshots {
        #[arg(long)]
        dir: PathBuf,
    },

    /// List the entries of one snapshot file
    Inspect {
        #[arg(long)]
        snapshot: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            steps,
            batch_size,
            log_dir,
        } => {
            let config = EvalConfig::load(&config)?;
            let mut options = config.run_options();
            if steps.is_some() {
                options.number_of_steps = steps;
            }
            if batch_size.is_some() {
                options.batch_size = batch_size;
            }
            if log_dir.is_some() {
                options.log_dir = log_dir;
            }

            let evaluator = config.build_evaluator()?;
            let summary = EvaluationRun::new(evaluator).run(&options)?;

            println!("=== Evaluation Complete ===");
            println!("Samples: {}", summary.sample_count);
            println!("Batch size: {}", summary.batch_size);
            println!(
                "Steps: {} / {}",
                summary.steps_executed, summary.number_of_steps
            );
        }

        Commands::Convert {
            dataset_dir,
            output,
            num_shards,
            seed,
        } => {
            let summary =
                convert_dataset(&dataset_dir, &output, &ConvertOptions { num_shards, seed })?;
            println!("=== Conversion Complete ===");
            println!("Train samples: {}", summary.train_samples);
            println!("Validation samples: {}", summary.validation_samples);
            println!("Classes: {}", summary.num_classes);
            println!("Feature width: {}", summary.feature_len);
        }

        Commands::Snapshots { dir } => {
            let latest = latest_snapshot(&dir)?;
            let mut snapshots: Vec<_> = std::fs::read_dir(&dir)?
                .filter_map(std::result::Result::ok)
                .map(|entry| entry.path())
                .filter(|path| path.extension().is_some_and(|ext| ext == "snap"))
                .collect();
            snapshots.sort();

            for path in snapshots {
                let marker = if path == latest { " (latest)" } else { "" };
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    println!("{name}{marker}");
                }
            }
        }

        Commands::Inspect { snapshot } => {
            let entries = read_snapshot(&snapshot)?;
            println!("{} entries:", entries.len());
            for (name, value) in &entries {
                println!("  {name}: {:?}", value.shape());
            }
        }
    }

    Ok(())
}
