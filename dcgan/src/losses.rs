//! The adversarial objective in its softplus form.
//!
//! With `D(x) = sigmoid(y)` the usual GAN cross entropies become
//! `-ln D(x) = softplus(-y)` and `-ln(1 - D(x)) = softplus(y)`, which is what
//! both losses below compute directly on the logits.

use dfdx::prelude::*;

use crate::nn::Logits;

/// `ln(1 + exp(x))`, evaluated as `max(x, 0) + ln(1 + exp(-|x|))` so large
/// logits cannot overflow.
///
/// `max(x, 0)` is written as `(x + |x|) / 2`, which keeps the gradient at
/// `x = 0` equal to `sigmoid(0) = 0.5`.
pub fn softplus<S: Shape, E: Dtype, D: Device<E>, T: Tape<E, D>>(
    x: Tensor<S, E, D, T>,
) -> Result<Tensor<S, E, D, T>, Error> {
    let abs = x.retaped::<T>().try_abs()?;
    let tail = abs
        .retaped::<T>()
        .try_negate()?
        .try_exp()?
        .try_add(1.0)?
        .try_ln()?;
    x.try_add(abs)?.try_mul(0.5)?.try_add(tail)
}

/// `Σ softplus(-y_real) / B + Σ softplus(y_fake) / B`, where `B` is the
/// number of fake logits.
///
/// Each argument must carry the tape its own forward pass was recorded on;
/// the two tapes are merged in the returned loss.
pub fn discriminator_loss<E: Dtype, D: Device<E>, T: Tape<E, D> + Merge<T>>(
    y_fake: Logits<E, D, T>,
    y_real: Logits<E, D, T>,
) -> Result<Tensor<(), E, D, T>, Error> {
    let batch = y_fake.shape().0 as f64;
    let real = softplus(y_real.try_negate()?)?
        .try_sum::<(), _>()?
        .try_div(batch)?;
    let fake = softplus(y_fake)?.try_sum::<(), _>()?.try_div(batch)?;
    real.try_add(fake)
}

/// `Σ softplus(-y_fake) / B`
pub fn generator_loss<E: Dtype, D: Device<E>, T: Tape<E, D>>(
    y_fake: Logits<E, D, T>,
) -> Result<Tensor<(), E, D, T>, Error> {
    let batch = y_fake.shape().0 as f64;
    softplus(y_fake.try_negate()?)?
        .try_sum::<(), _>()?
        .try_div(batch)
}
