//! Weight initialization.

use dfdx::prelude::{Device, Dtype, Shape, Tensor};
use num_traits::Float;
use rand_distr::{Distribution, Normal, StandardNormal};

use crate::{Error, Result};

/// Standard deviation used for every weight when nothing else is configured.
pub const DEFAULT_WSCALE: f64 = 0.02;

/// Fills `t` in place with samples from `N(0, std)`.
///
/// The tensor keeps its id, so optimizers and gradients built for it stay valid.
pub fn normal_<S: Shape, E, D>(t: &mut Tensor<S, E, D>, std: f64) -> Result<()>
where
    E: Dtype + Float,
    D: Device<E>,
    StandardNormal: Distribution<E>,
{
    check_wscale(std)?;
    let std = <E as num_traits::NumCast>::from(std)
        .ok_or_else(|| Error::Config(format!("wscale {std} does not fit the dtype")))?;
    let distr = Normal::new(E::zero(), std).map_err(|err| Error::Config(err.to_string()))?;
    t.try_fill_with_distr(distr)?;
    Ok(())
}

pub(crate) fn check_wscale(std: f64) -> Result<()> {
    if std.is_finite() && std >= 0.0 {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "wscale must be finite and non-negative, got {std}"
        )))
    }
}
