use dfdx::prelude::*;

/// Batch normalization for images without a learnable scale.
///
/// The normalized activations are only shifted by a learnable `bias`, the
/// scale is fixed to 1. Everything else follows dfdx's `BatchNorm2D`:
///
/// - `C` the channel dimension to keep. For 3d tensors this is the 0th
///   dimension. For 4d tensors, this is the 1st dimension.
///
/// # Training vs Inference
///
/// 1. **Training**: [Module::forward_mut()] and [OwnedTape] on the input tensor.
///    Normalizes with batch statistics and updates the running statistics
///    with momentum.
/// 2. **Inference**: [Module::forward()] and [NoneTape] on the input tensor.
///    Normalizes with the running statistics, which are left untouched.
///
/// ```rust
/// # use dcgan::nn::CenteredBatchNorm2DConfig;
/// # use dfdx::prelude::*;
/// let dev: Cpu = Default::default();
/// let bn = dev.build_module::<f32>(CenteredBatchNorm2DConfig(Const::<3>));
/// let _ = bn.forward(dev.zeros::<Rank3<3, 2, 2>>());
/// let _ = bn.forward(dev.zeros::<Rank4<4, 3, 2, 2>>());
/// ```
#[derive(Default, Clone, Copy, Debug)]
#[repr(transparent)]
pub struct CenteredBatchNorm2DConfig<C: Dim>(pub C);

impl<C: Dim, E: Dtype, D: Device<E>> BuildOnDevice<E, D> for CenteredBatchNorm2DConfig<C> {
    type Built = CenteredBatchNorm2D<C, E, D>;
    fn try_build_on_device(&self, device: &D) -> Result<Self::Built, Error> {
        Ok(CenteredBatchNorm2D {
            bias: device.try_zeros_like(&(self.0,))?,
            running_mean: device.try_zeros_like(&(self.0,))?,
            running_var: device.try_ones_like(&(self.0,))?,
            epsilon: 1e-5,
            momentum: 0.1,
        })
    }
}

/// See [CenteredBatchNorm2DConfig]
#[derive(Clone, Debug, UpdateParams, ZeroGrads, WithGrads, SaveSafeTensors, LoadSafeTensors)]
pub struct CenteredBatchNorm2D<C: Dim, Elem: Dtype, Dev: Device<Elem>> {
    #[param]
    #[serialize]
    pub bias: Tensor<(C,), Elem, Dev>,
    #[serialize]
    pub running_mean: Tensor<(C,), Elem, Dev>,
    #[serialize]
    pub running_var: Tensor<(C,), Elem, Dev>,
    #[serialize]
    pub epsilon: f64,
    #[serialize]
    pub momentum: f64,
}

impl<C: Dim, E: Dtype, D: Device<E>> ResetParams<E, D> for CenteredBatchNorm2D<C, E, D> {
    fn try_reset_params(&mut self) -> Result<(), Error> {
        self.bias.try_fill_with_zeros()?;
        self.running_mean.try_fill_with_zeros()?;
        self.running_var.try_fill_with_ones()
    }
}

impl<C: Dim, H: Dim, W: Dim, E: Dtype, D: Device<E>, T: Tape<E, D>>
    Module<Tensor<(C, H, W), E, D, T>> for CenteredBatchNorm2D<C, E, D>
{
    type Output = Tensor<(C, H, W), E, D, T>;
    fn try_forward(&self, x: Tensor<(C, H, W), E, D, T>) -> Result<Self::Output, Error> {
        assert!(!T::OWNS_TAPE);
        self.infer_fwd(x)
    }
    fn try_forward_mut(&mut self, x: Tensor<(C, H, W), E, D, T>) -> Result<Self::Output, Error> {
        assert!(T::OWNS_TAPE);
        self.train_fwd(x)
    }
}

impl<Batch: Dim, C: Dim, H: Dim, W: Dim, E: Dtype, D: Device<E>, T: Tape<E, D>>
    Module<Tensor<(Batch, C, H, W), E, D, T>> for CenteredBatchNorm2D<C, E, D>
{
    type Output = Tensor<(Batch, C, H, W), E, D, T>;
    fn try_forward(&self, x: Tensor<(Batch, C, H, W), E, D, T>) -> Result<Self::Output, Error> {
        assert!(!T::OWNS_TAPE);
        self.infer_fwd(x)
    }
    fn try_forward_mut(
        &mut self,
        x: Tensor<(Batch, C, H, W), E, D, T>,
    ) -> Result<Self::Output, Error> {
        assert!(T::OWNS_TAPE);
        self.train_fwd(x)
    }
}

impl<C: Dim, E: Dtype, D: Device<E>> CenteredBatchNorm2D<C, E, D> {
    fn train_fwd<S: Shape, T: Tape<E, D>, Ax: Axes>(
        &mut self,
        x: Tensor<S, E, D, T>,
    ) -> Result<Tensor<S, E, D, T>, Error>
    where
        S: HasAxes<Ax> + ReduceShapeTo<(C,), Ax>,
    {
        let n = <S as HasAxes<Ax>>::size(x.shape()) as f64;
        let shape = *x.shape();

        let mean_chan = x.retaped::<T>().try_mean::<(C,), _>()?;
        self.running_mean
            .try_axpy(1.0 - self.momentum, &mean_chan, self.momentum)?;

        let centered = x.try_sub(mean_chan.try_broadcast_like(&shape)?)?;

        let var_chan = centered
            .retaped::<T>()
            .try_square()?
            .try_mean::<(C,), _>()?;

        // running estimate uses the unbiased variance
        self.running_var.try_axpy(
            1.0 - self.momentum,
            &var_chan,
            self.momentum * n / (n - 1.0),
        )?;

        let std = var_chan
            .try_add(self.epsilon)?
            .try_sqrt()?
            .try_broadcast_like(&shape)?;
        let bias = self.bias.retaped::<T>().try_broadcast_like(&shape)?;

        centered.try_div(std)?.try_add(bias)
    }

    /// Normalizes `x` with the running statistics.
    pub fn infer_fwd<S: Shape, T: Tape<E, D>, Ax: Axes>(
        &self,
        x: Tensor<S, E, D, T>,
    ) -> Result<Tensor<S, E, D, T>, Error>
    where
        (C,): BroadcastShapeTo<S, Ax>,
    {
        let shape = *x.shape();
        let std = self
            .running_var
            .clone()
            .try_add(self.epsilon)?
            .try_sqrt()?
            .try_broadcast_like(&shape)?;
        let x = x.try_sub(self.running_mean.clone().try_broadcast_like(&shape)?)?;
        let x = x.try_div(std)?;
        x.try_add(self.bias.clone().try_broadcast_like(&shape)?)
    }
}
