//! Experiment configuration.
//!
//! [TrainConfig] can be loaded from a JSON file where every field is optional:
//!
//! ```json
//! { "batch_size": 64, "ch": 256, "max_iterations": 10000 }
//! ```

use std::path::{Path, PathBuf};

use dfdx::nn::optim::{AdamConfig, WeightDecay};
use serde::{Deserialize, Serialize};

use crate::nn::{DiscriminatorConfig, GeneratorConfig};
use crate::{Error, Result};

/// Hyperparameters and file locations of a training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Directory holding the CIFAR-10 binary batches.
    pub dataset: PathBuf,
    /// Output directory for the log, samples and snapshots.
    pub out: PathBuf,
    pub batch_size: usize,
    pub epochs: usize,
    /// Stops training early once this many updates are done.
    pub max_iterations: Option<usize>,
    pub n_hidden: usize,
    pub ch: usize,
    pub bottom_width: usize,
    /// Standard deviation of the initial weights.
    pub wscale: f64,
    /// Standard deviation of the discriminator's input/activation noise.
    pub noise_sigma: f64,
    pub lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub weight_decay: f64,
    /// Log every this many iterations. `None` logs once per epoch.
    pub log_interval: Option<usize>,
    pub snapshot_interval: usize,
    pub sample_interval: usize,
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            dataset: PathBuf::from("data/cifar-10-batches-bin"),
            out: PathBuf::from("result"),
            batch_size: 50,
            epochs: 1000,
            max_iterations: None,
            n_hidden: 100,
            ch: 512,
            bottom_width: 4,
            wscale: 0.02,
            noise_sigma: 0.2,
            lr: 2e-4,
            beta1: 0.5,
            beta2: 0.999,
            weight_decay: 1e-4,
            log_interval: None,
            snapshot_interval: 1000,
            sample_interval: 1000,
            seed: 0,
        }
    }
}

impl TrainConfig {
    /// Reads a JSON config. Missing fields keep their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let cfg: Self = serde_json::from_reader(std::io::BufReader::new(file))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size < 2 {
            return Err(Error::Config(format!(
                "batch_size must be at least 2, got {}",
                self.batch_size
            )));
        }
        if self.epochs == 0 {
            return Err(Error::Config("epochs must be positive".into()));
        }
        if self.max_iterations == Some(0) {
            return Err(Error::Config("max_iterations must be positive".into()));
        }
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(Error::Config(format!("lr must be positive, got {}", self.lr)));
        }
        for (name, beta) in [("beta1", self.beta1), ("beta2", self.beta2)] {
            if !(0.0..1.0).contains(&beta) {
                return Err(Error::Config(format!("{name} must be in [0, 1), got {beta}")));
            }
        }
        for (name, value) in [
            ("wscale", self.wscale),
            ("noise_sigma", self.noise_sigma),
            ("weight_decay", self.weight_decay),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(Error::Config(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        if self.log_interval == Some(0) {
            return Err(Error::Config("log_interval must be positive".into()));
        }
        if self.snapshot_interval == 0 || self.sample_interval == 0 {
            return Err(Error::Config(
                "snapshot_interval and sample_interval must be positive".into(),
            ));
        }
        self.generator().validate()?;
        self.discriminator().validate()
    }

    pub fn generator(&self) -> GeneratorConfig {
        GeneratorConfig::new(self.n_hidden, self.bottom_width, self.ch)
    }

    pub fn discriminator(&self) -> DiscriminatorConfig {
        DiscriminatorConfig::new(self.bottom_width, self.ch, self.noise_sigma)
    }

    /// Adam settings shared by both networks.
    pub fn adam(&self) -> AdamConfig {
        AdamConfig {
            lr: self.lr,
            betas: [self.beta1, self.beta2],
            eps: 1e-8,
            weight_decay: Some(WeightDecay::L2(self.weight_decay)),
        }
    }

    /// Spatial size of the images the networks work on.
    pub fn image_size(&self) -> usize {
        8 * self.bottom_width
    }
}
