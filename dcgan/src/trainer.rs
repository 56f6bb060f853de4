//! The epoch loop and its periodic side effects.
//!
//! Everything a run writes goes under [TrainConfig::out]:
//! - `log`: the JSON training log;
//! - `preview/image_iter_<n>.png`: a grid of samples every `sample_interval` iterations;
//! - `gen_iter_<n>.safetensors`, `dis_iter_<n>.safetensors`: snapshots every
//!   `snapshot_interval` iterations and at the end of the run.

use std::path::PathBuf;

use dfdx::data::ExactSizeDataset;
use rand::{rngs::StdRng, SeedableRng};

use crate::checkpoint::save_models;
use crate::config::TrainConfig;
use crate::data::{Cifar10, IMAGE_SIZE};
use crate::report::{LogEntry, LogReport, Trigger};
use crate::sample::save_sample_grid;
use crate::updater::{DcganUpdater, Dev, UpdateReport};
use crate::{Error, Result};

pub const SAMPLE_ROWS: usize = 10;
pub const SAMPLE_COLS: usize = 10;

/// What a finished run did.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainSummary {
    pub iterations: usize,
    /// Fully completed epochs.
    pub epochs: usize,
    pub last: Option<UpdateReport>,
    pub log: PathBuf,
}

pub struct Trainer {
    cfg: TrainConfig,
    dataset: Cifar10,
    updater: DcganUpdater,
    log: LogReport,
    rng: StdRng,
}

impl Trainer {
    /// Checks that `cfg` and `dataset` fit together and builds the networks
    /// on a device seeded with `cfg.seed`.
    pub fn new(cfg: TrainConfig, dataset: Cifar10) -> Result<Self> {
        cfg.validate()?;
        if cfg.image_size() != IMAGE_SIZE {
            return Err(Error::Config(format!(
                "bottom_width {} gives {}x{} images, the dataset holds {IMAGE_SIZE}x{IMAGE_SIZE}",
                cfg.bottom_width,
                cfg.image_size(),
                cfg.image_size(),
            )));
        }
        if dataset.num_batches(cfg.batch_size) == 0 {
            return Err(Error::Dataset(format!(
                "{} images do not fill a single batch of {}",
                dataset.len(),
                cfg.batch_size
            )));
        }
        let updater = DcganUpdater::new(&cfg, Dev::seed_from_u64(cfg.seed))?;
        let log = LogReport::new(&cfg.out, Trigger::try_from(cfg.log_interval)?);
        let rng = StdRng::seed_from_u64(cfg.seed);
        Ok(Self {
            cfg,
            dataset,
            updater,
            log,
            rng,
        })
    }

    pub fn config(&self) -> &TrainConfig {
        &self.cfg
    }

    pub fn updater(&self) -> &DcganUpdater {
        &self.updater
    }

    pub fn entries(&self) -> &[LogEntry] {
        self.log.entries()
    }

    /// Trains for `epochs` epochs, or until `max_iterations` updates are done.
    pub fn run(&mut self) -> Result<TrainSummary> {
        std::fs::create_dir_all(&self.cfg.out)?;
        let max_iterations = self.cfg.max_iterations.unwrap_or(usize::MAX);
        let dev = self.updater.device().clone();
        tracing::info!(
            out = %self.cfg.out.display(),
            images = self.dataset.len(),
            batch_size = self.cfg.batch_size,
            epochs = self.cfg.epochs,
            max_iterations = ?self.cfg.max_iterations,
            "starting training"
        );

        let mut completed = 0;
        let mut last = None;
        let mut last_snapshot = None;
        'epochs: for epoch in 1..=self.cfg.epochs {
            let mut batches = self
                .dataset
                .batches(&dev, self.cfg.batch_size, &mut self.rng)
                .peekable();
            while let Some(batch) = batches.next() {
                let report = self.updater.update_core(batch)?;
                let iteration = self.updater.iteration();
                last = Some(report);
                if batches.peek().is_none() {
                    completed = epoch;
                }
                tracing::debug!(
                    epoch,
                    iteration,
                    gen_loss = report.gen_loss,
                    dis_loss = report.dis_loss,
                    "update"
                );

                self.log.observe(&report);
                if let Some(entry) = self.log.on_iteration(completed, iteration)? {
                    log_entry(entry);
                }
                if iteration % self.cfg.sample_interval == 0 {
                    self.save_samples(iteration)?;
                }
                if iteration % self.cfg.snapshot_interval == 0 {
                    self.save_snapshot(iteration)?;
                    last_snapshot = Some(iteration);
                }
                if iteration >= max_iterations {
                    tracing::info!(iteration, "reached max_iterations");
                    break 'epochs;
                }
            }
            if let Some(entry) = self.log.on_epoch_end(completed, self.updater.iteration())? {
                log_entry(entry);
            }
        }

        let iterations = self.updater.iteration();
        if let Some(entry) = self.log.flush(completed, iterations)? {
            log_entry(entry);
        }
        if last_snapshot != Some(iterations) {
            self.save_snapshot(iterations)?;
        }
        tracing::info!(iterations, epochs = completed, "training finished");
        Ok(TrainSummary {
            iterations,
            epochs: completed,
            last,
            log: self.log.path().to_path_buf(),
        })
    }

    fn save_samples(&self, iteration: usize) -> Result<()> {
        let path = self
            .cfg
            .out
            .join("preview")
            .join(format!("image_iter_{iteration}.png"));
        // same latents at every iteration
        let mut rng = StdRng::seed_from_u64(self.cfg.seed);
        save_sample_grid(
            self.updater.generator(),
            self.updater.device(),
            SAMPLE_ROWS,
            SAMPLE_COLS,
            &path,
            &mut rng,
        )?;
        tracing::info!(iteration, path = %path.display(), "saved samples");
        Ok(())
    }

    fn save_snapshot(&self, iteration: usize) -> Result<()> {
        let (gen, dis) = save_models(
            &self.cfg.out,
            iteration,
            self.updater.generator(),
            self.updater.discriminator(),
        )?;
        tracing::info!(iteration, gen = %gen.display(), dis = %dis.display(), "saved snapshot");
        Ok(())
    }
}

fn log_entry(entry: &LogEntry) {
    tracing::info!(
        epoch = entry.epoch,
        iteration = entry.iteration,
        gen_loss = entry.gen_loss,
        dis_loss = entry.dis_loss,
        elapsed_time = entry.elapsed_time,
        "log"
    );
}
