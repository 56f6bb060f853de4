use dfdx::prelude::*;
use num_traits::Float;
use rand_distr::{Distribution, StandardNormal};

use super::init::normal_;
use super::{CenteredBatchNorm2D, CenteredBatchNorm2DConfig, GaussianNoise, Images, Latents, Logits};
use super::{IMAGE_CHANNELS, LEAKY_SLOPE};

/// First stage: 3x3 convolution with a bias, noise, leaky relu.
#[derive(Debug, Clone, Sequential)]
#[built(InputBlock)]
pub struct InputBlockConfig {
    pub conv: Conv2DConfig<usize, usize, Const<3>, Const<1>, Const<1>>,
    pub bias: Bias2DConfig<usize>,
    pub noise: GaussianNoise,
    pub act: LeakyReLU,
}

impl InputBlockConfig {
    pub fn new(out_chan: usize, sigma: f64) -> Self {
        Self {
            conv: Conv2DConfig {
                in_chan: IMAGE_CHANNELS,
                out_chan,
                ..Default::default()
            },
            bias: Bias2DConfig(out_chan),
            noise: GaussianNoise { sigma },
            act: LeakyReLU(LEAKY_SLOPE),
        }
    }
}

/// Convolution, scale-free batch norm, noise, leaky relu.
///
/// `DownBlockConfig<Const<3>, Const<1>>` keeps the spatial size,
/// `DownBlockConfig<Const<4>, Const<2>>` halves it.
#[derive(Debug, Clone, Sequential)]
#[built(DownBlock)]
pub struct DownBlockConfig<K: Dim, S: Dim> {
    pub conv: Conv2DConfig<usize, usize, K, S, Const<1>>,
    pub bn: CenteredBatchNorm2DConfig<usize>,
    pub noise: GaussianNoise,
    pub act: LeakyReLU,
}

impl<K: Dim + Default, S: Dim + Default> DownBlockConfig<K, S> {
    pub fn new(in_chan: usize, out_chan: usize, sigma: f64) -> Self {
        Self {
            conv: Conv2DConfig {
                in_chan,
                out_chan,
                ..Default::default()
            },
            bn: CenteredBatchNorm2DConfig(out_chan),
            noise: GaussianNoise { sigma },
            act: LeakyReLU(LEAKY_SLOPE),
        }
    }
}

type Same = DownBlockConfig<Const<3>, Const<1>>;
type Halve = DownBlockConfig<Const<4>, Const<2>>;

/// Scores images, a large logit meaning "real".
///
/// The input is noised, then goes through seven convolution stages, three of
/// which halve the spatial size, and a final linear layer:
///
/// | layer | op | output (`ch = 512`) |
/// | --- | --- | --- |
/// | `noise` | gaussian noise | `(B, 3, 32, 32)` |
/// | `c0_0` | [InputBlockConfig] | `(B, 64, 32, 32)` |
/// | `c0_1` | k4 s2 [DownBlockConfig] | `(B, 128, 16, 16)` |
/// | `c1_0` | k3 s1 [DownBlockConfig] | `(B, 128, 16, 16)` |
/// | `c1_1` | k4 s2 [DownBlockConfig] | `(B, 256, 8, 8)` |
/// | `c2_0` | k3 s1 [DownBlockConfig] | `(B, 256, 8, 8)` |
/// | `c2_1` | k4 s2 [DownBlockConfig] | `(B, 512, 4, 4)` |
/// | `c3_0` | k3 s1 [DownBlockConfig] | `(B, 512, 4, 4)` |
/// | `l4` | flatten, linear | `(B, 1)` |
///
/// Images must be `8 * bottom_width` pixels wide and high, anything else
/// fails with [Error::WrongNumElements] at the flatten.
///
/// Noise is only added by [Module::forward_mut()]; [Module::forward()] is
/// deterministic.
#[derive(Debug, Clone, CustomModule)]
#[built(Discriminator)]
pub struct DiscriminatorConfig {
    pub noise: GaussianNoise,
    #[module]
    pub c0_0: InputBlockConfig,
    #[module]
    pub c0_1: Halve,
    #[module]
    pub c1_0: Same,
    #[module]
    pub c1_1: Halve,
    #[module]
    pub c2_0: Same,
    #[module]
    pub c2_1: Halve,
    #[module]
    pub c3_0: Same,
    #[module]
    pub l4: LinearConfig<usize, Const<1>>,
    pub bottom_width: usize,
    pub ch: usize,
}

impl Default for DiscriminatorConfig {
    fn default() -> Self {
        Self::new(4, 512, 0.2)
    }
}

impl DiscriminatorConfig {
    pub fn new(bottom_width: usize, ch: usize, noise_sigma: f64) -> Self {
        Self {
            noise: GaussianNoise { sigma: noise_sigma },
            c0_0: InputBlockConfig::new(ch / 8, noise_sigma),
            c0_1: Halve::new(ch / 8, ch / 4, noise_sigma),
            c1_0: Same::new(ch / 4, ch / 4, noise_sigma),
            c1_1: Halve::new(ch / 4, ch / 2, noise_sigma),
            c2_0: Same::new(ch / 2, ch / 2, noise_sigma),
            c2_1: Halve::new(ch / 2, ch, noise_sigma),
            c3_0: Same::new(ch, ch, noise_sigma),
            l4: LinearConfig::new(bottom_width * bottom_width * ch, Const),
            bottom_width,
            ch,
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.bottom_width == 0 {
            return Err(crate::Error::Config("bottom_width must be positive".into()));
        }
        if self.ch < 8 || self.ch % 8 != 0 {
            return Err(crate::Error::Config(format!(
                "ch must be a positive multiple of 8, got {}",
                self.ch
            )));
        }
        let sigma = self.noise.sigma;
        if !(sigma.is_finite() && sigma >= 0.0) {
            return Err(crate::Error::Config(format!(
                "noise sigma must be finite and non-negative, got {sigma}"
            )));
        }
        Ok(())
    }

    /// Spatial size of the images the discriminator accepts.
    pub fn image_size(&self) -> usize {
        8 * self.bottom_width
    }
}

/// `(running_mean, running_var)` of every batch norm, `c0_1` through `c3_0`.
pub type RunningStats<E, D> = [(Tensor<(usize,), E, D>, Tensor<(usize,), E, D>); 6];

impl<E: Dtype, D: Device<E>> Discriminator<E, D> {
    fn batch_norms(&self) -> [&CenteredBatchNorm2D<usize, E, D>; 6] {
        [
            &self.c0_1.bn,
            &self.c1_0.bn,
            &self.c1_1.bn,
            &self.c2_0.bn,
            &self.c2_1.bn,
            &self.c3_0.bn,
        ]
    }

    fn batch_norms_mut(&mut self) -> [&mut CenteredBatchNorm2D<usize, E, D>; 6] {
        [
            &mut self.c0_1.bn,
            &mut self.c1_0.bn,
            &mut self.c1_1.bn,
            &mut self.c2_0.bn,
            &mut self.c2_1.bn,
            &mut self.c3_0.bn,
        ]
    }

    pub fn running_stats(&self) -> RunningStats<E, D> {
        self.batch_norms()
            .map(|bn| (bn.running_mean.clone(), bn.running_var.clone()))
    }

    pub fn restore_running_stats(&mut self, stats: RunningStats<E, D>) {
        for (bn, (mean, var)) in self.batch_norms_mut().into_iter().zip(stats) {
            bn.running_mean = mean;
            bn.running_var = var;
        }
    }

    fn flatten<T: Tape<E, D>>(&self, h: Images<E, D, T>) -> Result<Latents<E, D, T>, Error> {
        let (batch, c, height, width) = *h.shape();
        let features = self.bottom_width * self.bottom_width * self.ch;
        if c * height * width != features {
            return Err(Error::WrongNumElements);
        }
        h.try_reshape_like(&(batch, features))
    }
}

impl<E, D> Discriminator<E, D>
where
    E: Dtype + Float,
    D: Device<E>,
    StandardNormal: Distribution<E>,
{
    /// Draws every convolution and linear weight from `N(0, wscale)` and
    /// zeroes the biases.
    pub fn init_weights(&mut self, wscale: f64) -> crate::Result<()> {
        normal_(&mut self.c0_0.conv.weight, wscale)?;
        self.c0_0.bias.bias.try_fill_with_zeros()?;
        for block in [&mut self.c0_1, &mut self.c1_1, &mut self.c2_1] {
            normal_(&mut block.conv.weight, wscale)?;
        }
        for block in [&mut self.c1_0, &mut self.c2_0, &mut self.c3_0] {
            normal_(&mut block.conv.weight, wscale)?;
        }
        normal_(&mut self.l4.weight, wscale)?;
        self.l4.bias.try_fill_with_zeros()?;
        Ok(())
    }
}

impl<E: Dtype, D: Device<E>, T: Tape<E, D>> Module<Images<E, D, T>> for Discriminator<E, D>
where
    GaussianNoise: Module<Images<E, D, T>, Output = Images<E, D, T>>,
    InputBlock<E, D>: Module<Images<E, D, T>, Output = Images<E, D, T>>,
    DownBlock<Const<4>, Const<2>, E, D>: Module<Images<E, D, T>, Output = Images<E, D, T>>,
    DownBlock<Const<3>, Const<1>, E, D>: Module<Images<E, D, T>, Output = Images<E, D, T>>,
    Linear<usize, Const<1>, E, D>: Module<Latents<E, D, T>, Output = Logits<E, D, T>>,
{
    type Output = Logits<E, D, T>;

    fn try_forward(&self, x: Images<E, D, T>) -> Result<Self::Output, Error> {
        let h = self.noise.try_forward(x)?;
        let h = self.c0_0.try_forward(h)?;
        let h = self.c0_1.try_forward(h)?;
        let h = self.c1_0.try_forward(h)?;
        let h = self.c1_1.try_forward(h)?;
        let h = self.c2_0.try_forward(h)?;
        let h = self.c2_1.try_forward(h)?;
        let h = self.c3_0.try_forward(h)?;
        self.l4.try_forward(self.flatten(h)?)
    }

    fn try_forward_mut(&mut self, x: Images<E, D, T>) -> Result<Self::Output, Error> {
        let h = self.noise.try_forward_mut(x)?;
        let h = self.c0_0.try_forward_mut(h)?;
        let h = self.c0_1.try_forward_mut(h)?;
        let h = self.c1_0.try_forward_mut(h)?;
        let h = self.c1_1.try_forward_mut(h)?;
        let h = self.c2_0.try_forward_mut(h)?;
        let h = self.c2_1.try_forward_mut(h)?;
        let h = self.c3_0.try_forward_mut(h)?;
        let h = self.flatten(h)?;
        self.l4.try_forward_mut(h)
    }
}
