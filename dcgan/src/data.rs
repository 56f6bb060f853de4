//! The CIFAR-10 binary distribution.
//!
//! Each `*.bin` file is a sequence of 3073 byte records: one label byte
//! followed by a 32x32 image stored channel major (1024 red, 1024 green, then
//! 1024 blue bytes).

use std::path::Path;

use dfdx::data::{ExactSizeDataset, IteratorBatchExt, IteratorStackExt};
use dfdx::prelude::*;
use rand::Rng;

use crate::nn::Images;
use crate::{Error, Result};

pub const IMAGE_SIZE: usize = 32;
pub const IMAGE_BYTES: usize = 3 * IMAGE_SIZE * IMAGE_SIZE;
pub const RECORD_BYTES: usize = 1 + IMAGE_BYTES;

pub const TRAIN_FILES: [&str; 5] = [
    "data_batch_1.bin",
    "data_batch_2.bin",
    "data_batch_3.bin",
    "data_batch_4.bin",
    "data_batch_5.bin",
];
pub const TEST_FILE: &str = "test_batch.bin";

/// CIFAR-10 images held in memory as raw bytes.
///
/// Labels are kept for completeness, the GAN itself is unconditional.
#[derive(Debug, Clone, Default)]
pub struct Cifar10 {
    pixels: Vec<u8>,
    labels: Vec<u8>,
}

impl Cifar10 {
    /// Loads the five training batches found in `dir`.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::load(dir.as_ref(), &TRAIN_FILES)
    }

    /// Loads the training batches and `test_batch.bin`.
    pub fn open_with_test<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let mut files = TRAIN_FILES.to_vec();
        files.push(TEST_FILE);
        Self::load(dir.as_ref(), &files)
    }

    fn load(dir: &Path, files: &[&str]) -> Result<Self> {
        if !dir.is_dir() {
            return Err(Error::Dataset(format!(
                "{} is not a directory",
                dir.display()
            )));
        }
        let mut dataset = Self::default();
        let mut found = 0;
        for name in files {
            let path = dir.join(name);
            if !path.is_file() {
                tracing::warn!(path = %path.display(), "missing CIFAR-10 batch file");
                continue;
            }
            let bytes = std::fs::read(&path)?;
            dataset.extend_from_bytes(&bytes).map_err(|reason| {
                Error::Dataset(format!("{}: {reason}", path.display()))
            })?;
            found += 1;
        }
        if found == 0 {
            return Err(Error::Dataset(format!(
                "no CIFAR-10 batch files in {}",
                dir.display()
            )));
        }
        tracing::info!(dir = %dir.display(), files = found, images = dataset.len(), "loaded CIFAR-10");
        Ok(dataset)
    }

    fn extend_from_bytes(&mut self, bytes: &[u8]) -> std::result::Result<(), String> {
        if bytes.len() % RECORD_BYTES != 0 {
            return Err(format!(
                "size {} is not a multiple of the {RECORD_BYTES} byte record size",
                bytes.len()
            ));
        }
        self.pixels.reserve(bytes.len() / RECORD_BYTES * IMAGE_BYTES);
        for record in bytes.chunks_exact(RECORD_BYTES) {
            self.labels.push(record[0]);
            self.pixels.extend_from_slice(&record[1..]);
        }
        Ok(())
    }

    /// Builds a dataset from already decoded images, `IMAGE_BYTES` per label.
    pub fn from_records(pixels: Vec<u8>, labels: Vec<u8>) -> Result<Self> {
        if pixels.len() != labels.len() * IMAGE_BYTES {
            return Err(Error::Dataset(format!(
                "{} pixel bytes do not match {} labels of {IMAGE_BYTES} bytes",
                pixels.len(),
                labels.len()
            )));
        }
        Ok(Self { pixels, labels })
    }

    pub fn image(&self, index: usize) -> &[u8] {
        &self.pixels[index * IMAGE_BYTES..(index + 1) * IMAGE_BYTES]
    }

    pub fn label(&self, index: usize) -> u8 {
        self.labels[index]
    }

    /// Number of full batches one epoch yields.
    pub fn num_batches(&self, batch_size: usize) -> usize {
        self.len() / batch_size
    }

    /// One shuffled epoch of `(batch_size, 3, 32, 32)` batches with raw pixel
    /// values in `0..=255`. The last incomplete batch is dropped.
    pub fn batches<'a, D: Device<f32>, R: Rng>(
        &'a self,
        dev: &'a D,
        batch_size: usize,
        rng: &mut R,
    ) -> impl Iterator<Item = Images<f32, D>> + 'a {
        let preprocess = move |(img, _): <Self as ExactSizeDataset>::Item<'a>| {
            let img = img.iter().map(|&p| p as f32).collect();
            dev.tensor_from_vec(img, (3, IMAGE_SIZE, IMAGE_SIZE))
        };
        self.shuffled(rng)
            .map(preprocess)
            .batch_exact(batch_size)
            .stack()
    }
}

impl ExactSizeDataset for Cifar10 {
    type Item<'a> = (&'a [u8], u8) where Self: 'a;
    fn get(&self, index: usize) -> Self::Item<'_> {
        (self.image(index), self.labels[index])
    }
    fn len(&self) -> usize {
        self.labels.len()
    }
}
