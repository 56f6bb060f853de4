//! # dcgan
//!
//! A Deep Convolutional Generative Adversarial Network for CIFAR-10 sized
//! images (3x32x32), written on top of [dfdx].
//!
//! The crate is split into:
//! 1. [nn]: the [nn::Generator] and [nn::Discriminator] networks, plus the two
//!    layers dfdx does not ship ([nn::GaussianNoise] and [nn::CenteredBatchNorm2D]).
//! 2. [losses]: the softplus formulation of the adversarial objective.
//! 3. [updater]: one adversarial iteration (discriminator step, then generator step).
//! 4. [data], [report], [plot], [checkpoint], [sample] and [trainer]: everything
//!    needed to run an experiment end to end.
//!
//! # Training
//!
//! ```no_run
//! # use dcgan::prelude::*;
//! let cfg = TrainConfig::default();
//! let dataset = Cifar10::open(&cfg.dataset)?;
//! let mut trainer = Trainer::new(cfg, dataset)?;
//! let summary = trainer.run()?;
//! println!("finished after {} iterations", summary.iterations);
//! # Ok::<(), dcgan::Error>(())
//! ```
//!
//! # Networks
//!
//! Networks are built the usual dfdx way, from a config:
//!
//! ```no_run
//! # use dcgan::prelude::*;
//! # use dfdx::prelude::*;
//! let dev: Cpu = Default::default();
//! let gen = dev.build_module::<f32>(GeneratorConfig::new(100, 4, 64));
//! let z = gen.make_hidden(5);
//! let images = gen.forward(z);
//! assert_eq!(images.shape(), &(5, 3, 32, 32));
//! ```
//!
//! The convolution layers of dfdx need a nightly compiler; `build.rs` turns on
//! the `nightly` feature when it detects one.

#[cfg(not(feature = "nightly"))]
compile_error!("dcgan requires a nightly rustc (dfdx convolutions are nightly only)");

pub mod checkpoint;
pub mod config;
pub mod data;
mod error;
pub mod losses;
pub mod nn;
pub mod plot;
pub mod report;
pub mod sample;
pub mod trainer;
pub mod updater;

pub use error::{Error, Result};

/// Contains all the public items of this crate.
pub mod prelude {
    pub use crate::checkpoint::{load_discriminator, load_generator, save_models};
    pub use crate::config::TrainConfig;
    pub use crate::data::Cifar10;
    pub use crate::losses::{discriminator_loss, generator_loss, softplus};
    pub use crate::nn::{
        CenteredBatchNorm2D, CenteredBatchNorm2DConfig, Discriminator, DiscriminatorConfig,
        GaussianNoise, Generator, GeneratorConfig,
    };
    pub use crate::plot::{load_log, plot_result};
    pub use crate::report::{LogEntry, LogReport};
    pub use crate::sample::save_sample_grid;
    pub use crate::trainer::{TrainSummary, Trainer};
    pub use crate::updater::{DcganUpdater, UpdateReport};
}

#[cfg(test)]
pub(crate) mod tests {
    pub use num_traits::{Float, NumCast, Zero};

    pub type TestDevice = dfdx::tensor::Cpu;

    pub type TestDtype = f32;

    pub trait AssertClose {
        type Elem: std::fmt::Display + std::fmt::Debug + Copy;
        const DEFAULT_TOLERANCE: Self::Elem;
        fn get_default_tol(&self) -> Self::Elem {
            Self::DEFAULT_TOLERANCE
        }
        fn get_far_pair(
            &self,
            rhs: &Self,
            tolerance: Self::Elem,
        ) -> Option<(Self::Elem, Self::Elem)>;
        fn assert_close(&self, rhs: &Self, tolerance: Self::Elem)
        where
            Self: std::fmt::Debug,
        {
            if let Some((l, r)) = self.get_far_pair(rhs, tolerance) {
                panic!("lhs != rhs | {l} != {r}\n\n{self:?}\n\n{rhs:?}");
            }
        }
    }

    impl AssertClose for f32 {
        type Elem = f32;
        const DEFAULT_TOLERANCE: Self::Elem = 1e-6;
        fn get_far_pair(&self, rhs: &Self, tolerance: f32) -> Option<(f32, f32)> {
            if (self - rhs).abs() > tolerance {
                Some((*self, *rhs))
            } else {
                None
            }
        }
    }

    impl AssertClose for f64 {
        type Elem = f64;
        const DEFAULT_TOLERANCE: Self::Elem = 1e-6;
        fn get_far_pair(&self, rhs: &Self, tolerance: f64) -> Option<(f64, f64)> {
            if (self - rhs).abs() > tolerance {
                Some((*self, *rhs))
            } else {
                None
            }
        }
    }

    impl<T: AssertClose, const M: usize> AssertClose for [T; M] {
        type Elem = T::Elem;
        const DEFAULT_TOLERANCE: Self::Elem = T::DEFAULT_TOLERANCE;
        fn get_far_pair(
            &self,
            rhs: &Self,
            tolerance: Self::Elem,
        ) -> Option<(Self::Elem, Self::Elem)> {
            for (l, r) in self.iter().zip(rhs.iter()) {
                if let Some(pair) = l.get_far_pair(r, tolerance) {
                    return Some(pair);
                }
            }
            None
        }
    }

    impl<T: AssertClose> AssertClose for Vec<T> {
        type Elem = T::Elem;
        const DEFAULT_TOLERANCE: Self::Elem = T::DEFAULT_TOLERANCE;
        fn get_far_pair(
            &self,
            rhs: &Self,
            tolerance: Self::Elem,
        ) -> Option<(Self::Elem, Self::Elem)> {
            assert_eq!(self.len(), rhs.len(), "length mismatch");
            for (l, r) in self.iter().zip(rhs.iter()) {
                if let Some(pair) = l.get_far_pair(r, tolerance) {
                    return Some(pair);
                }
            }
            None
        }
    }

    pub trait NdMap {
        type Elem;
        type Mapped<O>;
        fn ndmap<O, F: Copy + FnMut(Self::Elem) -> O>(self, f: F) -> Self::Mapped<O>;
    }

    impl NdMap for f64 {
        type Elem = Self;
        type Mapped<O> = O;
        fn ndmap<O, F: Copy + FnMut(Self::Elem) -> O>(self, mut f: F) -> O {
            f(self)
        }
    }

    impl<T: NdMap, const M: usize> NdMap for [T; M] {
        type Elem = T::Elem;
        type Mapped<O> = [T::Mapped<O>; M];
        fn ndmap<O, F: Copy + FnMut(Self::Elem) -> O>(self, f: F) -> Self::Mapped<O> {
            self.map(|t| t.ndmap(f))
        }
    }

    macro_rules! assert_close_to_literal {
        ($Lhs:expr, $Rhs:expr) => {{
            let lhs = $Lhs.array();
            let rhs = $Rhs.ndmap(|x| num_traits::FromPrimitive::from_f64(x).unwrap());
            let tol = AssertClose::get_default_tol(&lhs);
            let far_pair = AssertClose::get_far_pair(&lhs, &rhs, tol);
            if let Some((l, r)) = far_pair {
                panic!("lhs != rhs | {l} != {r}");
            }
        }};
        ($Lhs:expr, $Rhs:expr, $Tolerance:expr) => {{
            let far_pair = $Lhs.array().get_far_pair(
                &$Rhs.ndmap(|x| num_traits::FromPrimitive::from_f64(x).unwrap()),
                num_traits::FromPrimitive::from_f64($Tolerance).unwrap(),
            );
            if let Some((l, r)) = far_pair {
                panic!("lhs != rhs | {l} != {r}");
            }
        }};
    }
    pub(crate) use assert_close_to_literal;
}
