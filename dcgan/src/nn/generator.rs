use dfdx::prelude::*;
use num_traits::Float;
use rand_distr::{uniform::SampleUniform, Distribution, StandardNormal, Uniform};

use super::init::normal_;
use super::{Images, Latents, IMAGE_CHANNELS};

/// Upsampling stage: a stride 2 deconvolution that doubles the spatial size,
/// followed by batch norm and relu.
#[derive(Debug, Clone, Sequential)]
#[built(UpBlock)]
pub struct UpBlockConfig {
    pub deconv: ConvTrans2DConfig<usize, usize, Const<4>, Const<2>, Const<1>>,
    pub bn: BatchNorm2DConfig<usize>,
    pub relu: ReLU,
}

impl UpBlockConfig {
    pub fn new(in_chan: usize, out_chan: usize) -> Self {
        Self {
            deconv: ConvTrans2DConfig {
                in_chan,
                out_chan,
                ..Default::default()
            },
            bn: BatchNorm2DConfig(out_chan),
            relu: ReLU,
        }
    }
}

/// Last stage: a size preserving 3x3 deconvolution to RGB, a bias, and a
/// sigmoid so pixels land in `(0, 1)`.
#[derive(Debug, Clone, Sequential)]
#[built(OutBlock)]
pub struct OutBlockConfig {
    pub deconv: ConvTrans2DConfig<usize, usize, Const<3>, Const<1>, Const<1>>,
    pub bias: Bias2DConfig<usize>,
    pub sigmoid: Sigmoid,
}

impl OutBlockConfig {
    pub fn new(in_chan: usize) -> Self {
        Self {
            deconv: ConvTrans2DConfig {
                in_chan,
                out_chan: IMAGE_CHANNELS,
                ..Default::default()
            },
            bias: Bias2DConfig(IMAGE_CHANNELS),
            sigmoid: Sigmoid,
        }
    }
}

/// Maps latent vectors to images.
///
/// With the default `bottom_width = 4` and `ch = 512`:
///
/// | layer | op | output |
/// | --- | --- | --- |
/// | `l0`, `bn0` | linear, batch norm, relu | `(B, 8192)` |
/// | | reshape | `(B, 512, 4, 4)` |
/// | `dc1` | [UpBlockConfig] | `(B, 256, 8, 8)` |
/// | `dc2` | [UpBlockConfig] | `(B, 128, 16, 16)` |
/// | `dc3` | [UpBlockConfig] | `(B, 64, 32, 32)` |
/// | `dc4` | [OutBlockConfig] | `(B, 3, 32, 32)` |
///
/// The deconvolutions feeding a batch norm carry no bias of their own, the
/// batch norm shift plays that role.
///
/// ```rust
/// # use dcgan::prelude::*;
/// # use dfdx::prelude::*;
/// let dev: Cpu = Default::default();
/// let mut gen = dev.build_module::<f32>(GeneratorConfig::new(10, 4, 16));
/// // training
/// let x = gen.forward_mut(gen.make_hidden(2).leaky_trace());
/// assert_eq!(x.shape(), &(2, 3, 32, 32));
/// // inference
/// let x = gen.forward(gen.make_hidden(2));
/// assert_eq!(x.shape(), &(2, 3, 32, 32));
/// ```
#[derive(Debug, Clone, CustomModule)]
#[built(Generator)]
pub struct GeneratorConfig {
    #[module]
    pub l0: LinearConfig<usize, usize>,
    #[module]
    pub bn0: BatchNorm1DConfig<usize>,
    #[module]
    pub dc1: UpBlockConfig,
    #[module]
    pub dc2: UpBlockConfig,
    #[module]
    pub dc3: UpBlockConfig,
    #[module]
    pub dc4: OutBlockConfig,
    pub n_hidden: usize,
    pub bottom_width: usize,
    pub ch: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self::new(100, 4, 512)
    }
}

impl GeneratorConfig {
    pub fn new(n_hidden: usize, bottom_width: usize, ch: usize) -> Self {
        let flat = bottom_width * bottom_width * ch;
        Self {
            l0: LinearConfig::new(n_hidden, flat),
            bn0: BatchNorm1DConfig(flat),
            dc1: UpBlockConfig::new(ch, ch / 2),
            dc2: UpBlockConfig::new(ch / 2, ch / 4),
            dc3: UpBlockConfig::new(ch / 4, ch / 8),
            dc4: OutBlockConfig::new(ch / 8),
            n_hidden,
            bottom_width,
            ch,
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.n_hidden == 0 {
            return Err(crate::Error::Config("n_hidden must be positive".into()));
        }
        if self.bottom_width == 0 {
            return Err(crate::Error::Config("bottom_width must be positive".into()));
        }
        if self.ch < 8 || self.ch % 8 != 0 {
            return Err(crate::Error::Config(format!(
                "ch must be a positive multiple of 8, got {}",
                self.ch
            )));
        }
        Ok(())
    }

    /// Spatial size of the generated images.
    pub fn image_size(&self) -> usize {
        8 * self.bottom_width
    }
}

impl<E: Dtype, D: Device<E>> Generator<E, D> {
    fn to_image<T: Tape<E, D>>(&self, h: Latents<E, D, T>) -> Result<Images<E, D, T>, Error> {
        let batch = h.shape().0;
        h.try_reshape_like(&(batch, self.ch, self.bottom_width, self.bottom_width))
    }
}

impl<E, D> Generator<E, D>
where
    E: Dtype + Float + SampleUniform,
    D: Device<E>,
    StandardNormal: Distribution<E>,
{
    /// Draws `batch` latent vectors uniformly from `[-1, 1)`.
    pub fn make_hidden(&self, batch: usize) -> Latents<E, D> {
        self.try_make_hidden(batch).unwrap()
    }

    /// Fallible version of [Generator::make_hidden]
    pub fn try_make_hidden(&self, batch: usize) -> Result<Latents<E, D>, Error> {
        let distr = Uniform::new(-E::one(), E::one());
        self.l0
            .weight
            .device()
            .try_sample_like(&(batch, self.n_hidden), distr)
    }

    /// Draws every linear and deconvolution weight from `N(0, wscale)` and
    /// zeroes the biases. Batch norms keep their reset state.
    pub fn init_weights(&mut self, wscale: f64) -> crate::Result<()> {
        normal_(&mut self.l0.weight, wscale)?;
        self.l0.bias.try_fill_with_zeros()?;
        for block in [&mut self.dc1, &mut self.dc2, &mut self.dc3] {
            normal_(&mut block.deconv.weight, wscale)?;
        }
        normal_(&mut self.dc4.deconv.weight, wscale)?;
        self.dc4.bias.bias.try_fill_with_zeros()?;
        Ok(())
    }
}

impl<E: Dtype, D: Device<E>, T: Tape<E, D>> Module<Latents<E, D, T>> for Generator<E, D>
where
    Linear<usize, usize, E, D>: Module<Latents<E, D, T>, Output = Latents<E, D, T>>,
    BatchNorm1D<usize, E, D>: Module<Latents<E, D, T>, Output = Latents<E, D, T>>,
    UpBlock<E, D>: Module<Images<E, D, T>, Output = Images<E, D, T>>,
    OutBlock<E, D>: Module<Images<E, D, T>, Output = Images<E, D, T>>,
{
    type Output = Images<E, D, T>;

    fn try_forward(&self, z: Latents<E, D, T>) -> Result<Self::Output, Error> {
        let h = self.bn0.try_forward(self.l0.try_forward(z)?)?.try_relu()?;
        let h = self.to_image(h)?;
        let h = self.dc1.try_forward(h)?;
        let h = self.dc2.try_forward(h)?;
        let h = self.dc3.try_forward(h)?;
        self.dc4.try_forward(h)
    }

    fn try_forward_mut(&mut self, z: Latents<E, D, T>) -> Result<Self::Output, Error> {
        let h = self.l0.try_forward_mut(z)?;
        let h = self.bn0.try_forward_mut(h)?.try_relu()?;
        let h = self.to_image(h)?;
        let h = self.dc1.try_forward_mut(h)?;
        let h = self.dc2.try_forward_mut(h)?;
        let h = self.dc3.try_forward_mut(h)?;
        self.dc4.try_forward_mut(h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::*;

    fn small() -> GeneratorConfig {
        GeneratorConfig::new(10, 4, 16)
    }

    #[test]
    fn test_generator_shapes() {
        let dev: TestDevice = Default::default();
        let gen = dev.build_module::<TestDtype>(small());
        assert_eq!(gen.l0.weight.shape(), &(4 * 4 * 16, 10));
        assert_eq!(gen.dc1.deconv.weight.shape().0, 16);
        assert_eq!(gen.dc3.deconv.weight.shape().1, 2);

        let z = gen.make_hidden(3);
        assert_eq!(z.shape(), &(3, 10));
        let x = gen.forward(z);
        assert_eq!(x.shape(), &(3, 3, 32, 32));
    }

    #[test]
    fn test_generator_bottom_width_scales_output() {
        let dev: TestDevice = Default::default();
        let cfg = GeneratorConfig::new(4, 2, 8);
        assert_eq!(cfg.image_size(), 16);
        let gen = dev.build_module::<TestDtype>(cfg);
        let x = gen.forward(gen.make_hidden(1));
        assert_eq!(x.shape(), &(1, 3, 16, 16));
    }

    #[test]
    fn test_make_hidden_range() {
        let dev = TestDevice::seed_from_u64(1);
        let gen = dev.build_module::<TestDtype>(small());
        let z = gen.make_hidden(100).as_vec();
        assert!(z.iter().all(|v| (-1.0..1.0).contains(v)));
        assert!(z.iter().any(|v| *v < -0.5));
        assert!(z.iter().any(|v| *v > 0.5));
    }

    #[test]
    fn test_generator_output_is_in_unit_interval() {
        let dev = TestDevice::seed_from_u64(0);
        let mut gen = dev.build_module::<TestDtype>(small());
        gen.init_weights(0.02).unwrap();

        let x = gen.forward_mut(gen.make_hidden(4).leaky_trace());
        assert!(x.as_vec().iter().all(|v| *v > 0.0 && *v < 1.0));

        let x = gen.forward(gen.make_hidden(4));
        assert!(x.as_vec().iter().all(|v| *v > 0.0 && *v < 1.0));
    }

    #[test]
    fn test_init_weights() {
        let dev = TestDevice::seed_from_u64(0);
        let mut gen = dev.build_module::<TestDtype>(small());
        gen.init_weights(0.02).unwrap();

        let w = gen.dc1.deconv.weight.as_vec();
        let n = w.len() as f32;
        let mean = w.iter().sum::<f32>() / n;
        let std = (w.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n).sqrt();
        assert!((std - 0.02).abs() < 2e-3, "std {std}");
        assert!(gen.l0.bias.as_vec().iter().all(|v| *v == 0.0));
        assert!(gen.dc4.bias.bias.as_vec().iter().all(|v| *v == 0.0));
        assert!(gen.bn0.scale.as_vec().iter().all(|v| *v == 1.0));

        assert!(matches!(
            gen.init_weights(-1.0),
            Err(crate::Error::Config(_))
        ));
    }

    #[test]
    fn test_generator_trains() {
        let dev = TestDevice::seed_from_u64(0);
        let mut gen = dev.build_module::<TestDtype>(small());
        gen.init_weights(0.02).unwrap();
        let mut grads = gen.alloc_grads();
        let mut opt = Adam::new(&gen, Default::default());

        let z = gen.make_hidden(2);
        let x = gen.forward_mut(z.traced(grads));
        let loss = x.square().mean();
        grads = loss.backward();
        assert_ne!(grads.get(&gen.l0.weight).as_vec(), vec![0.0; 10 * 256]);
        opt.update(&mut gen, &grads).unwrap();
        gen.zero_grads(&mut grads);
    }

    #[test]
    fn test_generator_config_validation() {
        small().validate().unwrap();
        GeneratorConfig::default().validate().unwrap();
        for cfg in [
            GeneratorConfig::new(0, 4, 16),
            GeneratorConfig::new(10, 0, 16),
            GeneratorConfig::new(10, 4, 12),
            GeneratorConfig::new(10, 4, 0),
        ] {
            assert!(matches!(cfg.validate(), Err(crate::Error::Config(_))));
        }
    }
}
