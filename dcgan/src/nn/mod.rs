//! The generator and discriminator networks, and the layers they need beyond
//! what `dfdx::nn` provides.
//!
//! Both networks follow the dfdx convention of a config struct that is turned
//! into a device-allocated module with `dev.build_module::<E>(config)`:
//! - `forward_mut` with an `OwnedTape` input is the training forward
//!   (batch statistics, noise injection);
//! - `forward` with a `NoneTape` input is the inference forward
//!   (running statistics, no noise).

mod batch_norm;
mod discriminator;
mod generator;
pub mod init;
mod noise;

pub use batch_norm::{CenteredBatchNorm2D, CenteredBatchNorm2DConfig};
pub use discriminator::{
    Discriminator, DiscriminatorConfig, DownBlock, DownBlockConfig, InputBlock, InputBlockConfig,
    RunningStats,
};
pub use generator::{Generator, GeneratorConfig, OutBlock, OutBlockConfig, UpBlock, UpBlockConfig};
pub use noise::GaussianNoise;

use dfdx::prelude::{Const, NoneTape, Tensor};

/// A batch of images in NCHW layout.
pub type Images<E, D, T = NoneTape> = Tensor<(usize, usize, usize, usize), E, D, T>;

/// A batch of flat feature vectors, e.g. the latent codes fed to the generator.
pub type Latents<E, D, T = NoneTape> = Tensor<(usize, usize), E, D, T>;

/// One discriminator logit per image.
pub type Logits<E, D, T = NoneTape> = Tensor<(usize, Const<1>), E, D, T>;

/// Negative slope of every leaky relu in the discriminator.
pub const LEAKY_SLOPE: f64 = 0.2;

/// Number of color channels of the generated images.
pub const IMAGE_CHANNELS: usize = 3;
