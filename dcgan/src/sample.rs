//! Image grids of generator samples.

use std::path::Path;

use dfdx::prelude::*;
use image::{Rgb, RgbImage};
use rand::Rng;
use rand_distr::Uniform;

use crate::nn::{Generator, Images, Latents, IMAGE_CHANNELS};
use crate::{Error, Result};

/// Draws `rows * cols` latents from `rng`, runs the generator in inference
/// mode, and tiles the results row major into one picture.
///
/// The latents come from `rng` rather than the device so that a fixed seed
/// shows the same points of the latent space at every snapshot.
pub fn sample_grid<D: Device<f32>, R: Rng>(
    gen: &Generator<f32, D>,
    dev: &D,
    rows: usize,
    cols: usize,
    rng: &mut R,
) -> Result<RgbImage>
where
    Generator<f32, D>: Module<Latents<f32, D>, Output = Images<f32, D>>,
{
    if rows == 0 || cols == 0 {
        return Err(Error::Config(format!(
            "sample grid must be at least 1x1, got {rows}x{cols}"
        )));
    }
    let n = rows * cols;
    let distr = Uniform::new(-1.0f32, 1.0);
    let z: Vec<f32> = (0..n * gen.n_hidden).map(|_| rng.sample(distr)).collect();
    let z = dev.try_tensor_from_vec(z, (n, gen.n_hidden))?;
    let x = gen.try_forward(z)?;
    let (_, _, h, w) = *x.shape();
    Ok(tile(&x.as_vec(), rows, cols, h, w))
}

/// `pixels` is `(rows * cols, 3, h, w)` in `[0, 1]`.
fn tile(pixels: &[f32], rows: usize, cols: usize, h: usize, w: usize) -> RgbImage {
    let plane = h * w;
    RgbImage::from_fn((cols * w) as u32, (rows * h) as u32, |px, py| {
        let (px, py) = (px as usize, py as usize);
        let img = (py / h) * cols + px / w;
        let offset = img * IMAGE_CHANNELS * plane + (py % h) * w + px % w;
        Rgb([0, 1, 2].map(|c| to_byte(pixels[offset + c * plane])))
    })
}

fn to_byte(v: f32) -> u8 {
    (v * 255.0).clamp(0.0, 255.0) as u8
}

/// Writes a `rows x cols` grid of samples to `path` as a PNG.
pub fn save_sample_grid<D: Device<f32>, R: Rng, P: AsRef<Path>>(
    gen: &Generator<f32, D>,
    dev: &D,
    rows: usize,
    cols: usize,
    path: P,
    rng: &mut R,
) -> Result<()>
where
    Generator<f32, D>: Module<Latents<f32, D>, Output = Images<f32, D>>,
{
    let grid = sample_grid(gen, dev, rows, cols, rng)?;
    let path = path.as_ref();
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    grid.save_with_format(path, image::ImageFormat::Png)?;
    tracing::debug!(path = %path.display(), rows, cols, "saved samples");
    Ok(())
}
