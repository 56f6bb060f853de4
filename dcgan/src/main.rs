//! Command line entry point: train a DCGAN on CIFAR-10, plot its training
//! log, or sample from a saved generator.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dcgan::plot::{DEFAULT_LOG, DEFAULT_OUTFILE, DEFAULT_TARGETS};
use dcgan::prelude::*;
use dcgan::updater::Dev;
use dfdx::prelude::*;
use rand::{rngs::StdRng, SeedableRng};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "dcgan")]
#[command(about = "DCGAN for CIFAR-10", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a generator/discriminator pair
    Train {
        /// JSON config file, command line flags take precedence
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Directory with the CIFAR-10 binary batches
        #[arg(long)]
        dataset: Option<PathBuf>,

        /// Output directory
        #[arg(short, long)]
        out: Option<PathBuf>,

        #[arg(long)]
        batch_size: Option<usize>,

        #[arg(long)]
        epochs: Option<usize>,

        #[arg(long)]
        max_iterations: Option<usize>,

        #[arg(long)]
        seed: Option<u64>,

        /// Also train on test_batch.bin
        #[arg(long)]
        with_test: bool,
    },

    /// Plot loss curves from a training log
    Plot {
        #[arg(long, default_value = DEFAULT_LOG)]
        log: PathBuf,

        /// Output image, `.svg` or `.png`
        #[arg(short, long, default_value = DEFAULT_OUTFILE)]
        out: PathBuf,

        /// Log keys to plot, repeatable
        #[arg(short, long)]
        target: Vec<String>,
    },

    /// Write a grid of samples from a saved generator
    Generate {
        /// A gen_iter_<n>.safetensors snapshot
        #[arg(long)]
        checkpoint: PathBuf,

        /// Config the generator was trained with
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(long, default_value = "10")]
        rows: usize,

        #[arg(long, default_value = "10")]
        cols: usize,

        #[arg(short, long, default_value = "samples.png")]
        out: PathBuf,

        #[arg(long, default_value = "0")]
        seed: u64,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<TrainConfig> {
    match path {
        Some(path) => TrainConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(TrainConfig::default()),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Train {
            config,
            dataset,
            out,
            batch_size,
            epochs,
            max_iterations,
            seed,
            with_test,
        } => {
            let mut cfg = load_config(config.as_ref())?;
            cfg.dataset = dataset.unwrap_or(cfg.dataset);
            cfg.out = out.unwrap_or(cfg.out);
            cfg.batch_size = batch_size.unwrap_or(cfg.batch_size);
            cfg.epochs = epochs.unwrap_or(cfg.epochs);
            cfg.max_iterations = max_iterations.or(cfg.max_iterations);
            cfg.seed = seed.unwrap_or(cfg.seed);
            cfg.validate()?;

            let data = if with_test {
                Cifar10::open_with_test(&cfg.dataset)
            } else {
                Cifar10::open(&cfg.dataset)
            }
            .with_context(|| format!("failed to load {}", cfg.dataset.display()))?;

            std::fs::create_dir_all(&cfg.out)?;
            let cfg_path = cfg.out.join("config.json");
            std::fs::write(&cfg_path, serde_json::to_string_pretty(&cfg)?)?;
            info!("wrote {}", cfg_path.display());

            let mut trainer = Trainer::new(cfg, data)?;
            let summary = trainer.run()?;
            if let Some(last) = summary.last {
                println!(
                    "{} iterations, {} epochs, gen/loss {:.4}, dis/loss {:.4}",
                    summary.iterations, summary.epochs, last.gen_loss, last.dis_loss
                );
            }
            println!("log written to {}", summary.log.display());
        }

        Commands::Plot { log, out, target } => {
            let targets: Vec<&str> = if target.is_empty() {
                DEFAULT_TARGETS.to_vec()
            } else {
                target.iter().map(String::as_str).collect()
            };
            plot_result(&log, &targets, &out)
                .with_context(|| format!("failed to plot {}", log.display()))?;
            println!("saved {}", out.display());
        }

        Commands::Generate {
            checkpoint,
            config,
            rows,
            cols,
            out,
            seed,
        } => {
            let cfg = load_config(config.as_ref())?;
            let dev = Dev::seed_from_u64(seed);
            let mut gen = dev.try_build_module::<f32>(cfg.generator())?;
            load_generator(&checkpoint, &mut gen)?;
            info!("loaded {}", checkpoint.display());

            let mut rng = StdRng::seed_from_u64(seed);
            save_sample_grid(&gen, &dev, rows, cols, &out, &mut rng)?;
            println!("saved {}", out.display());
        }
    }

    Ok(())
}
