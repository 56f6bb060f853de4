use dfdx::prelude::*;
use rand_distr::{Distribution, StandardNormal};

/// Adds zero-mean gaussian noise with standard deviation `sigma` while training.
///
/// Like dropout this only does something in [Module::forward_mut()], where the
/// input carries an [OwnedTape]. [Module::forward()] is the identity, so an
/// evaluated discriminator is deterministic.
///
/// ```rust
/// # use dcgan::nn::GaussianNoise;
/// # use dfdx::prelude::*;
/// let dev: Cpu = Default::default();
/// let mut noise = GaussianNoise::default();
/// let x: Tensor<Rank1<4>, f32, _> = dev.zeros();
/// assert_eq!(noise.forward(x.clone()).array(), [0.0; 4]);
/// let noisy = noise.forward_mut(x.leaky_trace());
/// assert_ne!(noisy.array(), [0.0; 4]);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, CustomModule)]
pub struct GaussianNoise {
    pub sigma: f64,
}

impl Default for GaussianNoise {
    /// Sets `self.sigma` to `0.2`
    fn default() -> Self {
        Self { sigma: 0.2 }
    }
}

impl<S: Shape, E: Dtype, D: Device<E>, T: Tape<E, D>> Module<Tensor<S, E, D, T>> for GaussianNoise
where
    StandardNormal: Distribution<E>,
{
    type Output = Tensor<S, E, D, T>;

    /// Does nothing
    fn try_forward(&self, x: Tensor<S, E, D, T>) -> Result<Self::Output, Error> {
        assert!(!T::OWNS_TAPE);
        Ok(x)
    }

    /// Adds `sigma * N(0, 1)` to every element.
    fn try_forward_mut(&mut self, x: Tensor<S, E, D, T>) -> Result<Self::Output, Error> {
        assert!(T::OWNS_TAPE);
        if self.sigma == 0.0 {
            return Ok(x);
        }
        let noise = x
            .device()
            .try_sample_like(x.shape(), StandardNormal)?
            .try_mul(self.sigma)?;
        x.try_add(noise)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::*;

    #[test]
    fn test_noise_is_identity_without_tape() {
        let dev: TestDevice = Default::default();
        let x: Tensor<Rank2<3, 5>, TestDtype, _> = dev.sample_normal();
        let noise = GaussianNoise::default();
        assert_eq!(noise.forward(x.clone()).array(), x.array());
    }

    #[test]
    fn test_noise_statistics() {
        let dev = TestDevice::seed_from_u64(0);
        let x: Tensor<Rank1<10000>, TestDtype, _> = dev.ones();
        let mut noise = GaussianNoise { sigma: 0.2 };
        let y = noise.forward_mut(x.leaky_trace());

        let y = y.as_vec();
        let n = y.len() as f32;
        let mean = y.iter().sum::<f32>() / n;
        let var = y.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
        assert!((mean - 1.0).abs() < 0.01, "mean {mean}");
        assert!((var.sqrt() - 0.2).abs() < 0.01, "std {}", var.sqrt());
    }

    #[test]
    fn test_zero_sigma_is_identity_while_training() {
        let dev: TestDevice = Default::default();
        let x: Tensor<Rank2<2, 3>, TestDtype, _> = dev.sample_normal();
        let mut noise = GaussianNoise { sigma: 0.0 };
        let y = noise.forward_mut(x.leaky_trace());
        assert_eq!(y.array(), x.array());
    }

    #[test]
    fn test_noise_passes_gradient_through() {
        let dev: TestDevice = Default::default();
        let x: Tensor<Rank1<4>, TestDtype, _> = dev.zeros();
        let mut noise = GaussianNoise::default();
        let g = noise.forward_mut(x.leaky_trace()).sum().backward();
        assert_close_to_literal!(g.get(&x), [1.0; 4]);
    }
}
