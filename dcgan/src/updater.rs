//! One adversarial iteration.

use dfdx::prelude::*;

use crate::config::TrainConfig;
use crate::losses::{discriminator_loss, generator_loss};
use crate::nn::{Discriminator, Generator, Images, Latents, Logits};
use crate::{Error, Result};

/// Device every network and batch lives on.
pub type Dev = AutoDevice;

type Traced = OwnedTape<f32, Dev>;

/// Losses of one iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateReport {
    pub gen_loss: f64,
    pub dis_loss: f64,
}

/// Owns both networks and their optimizers, and alternates a discriminator
/// step and a generator step on every batch.
///
/// ```no_run
/// # use dcgan::prelude::*;
/// # use dcgan::updater::Dev;
/// # use dfdx::prelude::*;
/// let dev: Dev = Default::default();
/// let mut updater = DcganUpdater::new(&TrainConfig::default(), dev.clone())?;
/// let batch = dev.zeros_like(&(50, 3, 32, 32));
/// let report = updater.update_core(batch)?;
/// println!("gen/loss {} dis/loss {}", report.gen_loss, report.dis_loss);
/// # Ok::<(), dcgan::Error>(())
/// ```
pub struct DcganUpdater {
    dev: Dev,
    gen: Generator<f32, Dev>,
    dis: Discriminator<f32, Dev>,
    gen_opt: Adam<Generator<f32, Dev>, f32, Dev>,
    dis_opt: Adam<Discriminator<f32, Dev>, f32, Dev>,
    gen_grads: Gradients<f32, Dev>,
    dis_grads: Gradients<f32, Dev>,
    iteration: usize,
}

impl DcganUpdater {
    /// Builds both networks from `cfg`, draws their initial weights and sets
    /// up one Adam optimizer per network.
    pub fn new(cfg: &TrainConfig, dev: Dev) -> Result<Self> {
        cfg.validate()?;
        let mut gen = dev.try_build_module::<f32>(cfg.generator())?;
        let mut dis = dev.try_build_module::<f32>(cfg.discriminator())?;
        gen.init_weights(cfg.wscale)?;
        dis.init_weights(cfg.wscale)?;
        Self::from_models(gen, dis, cfg.adam(), dev)
    }

    /// Wraps already built (e.g. restored) networks.
    pub fn from_models(
        gen: Generator<f32, Dev>,
        dis: Discriminator<f32, Dev>,
        adam: AdamConfig,
        dev: Dev,
    ) -> Result<Self> {
        let gen_grads = gen.try_alloc_grads()?;
        let dis_grads = dis.try_alloc_grads()?;
        Ok(Self {
            gen_opt: Adam::new(&gen, adam),
            dis_opt: Adam::new(&dis, adam),
            dev,
            gen,
            dis,
            gen_grads,
            dis_grads,
            iteration: 0,
        })
    }

    pub fn generator(&self) -> &Generator<f32, Dev> {
        &self.gen
    }

    pub fn discriminator(&self) -> &Discriminator<f32, Dev> {
        &self.dis
    }

    pub fn device(&self) -> &Dev {
        &self.dev
    }

    /// Number of completed updates.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Runs one iteration on a batch of real images with pixel values in
    /// `0..=255`.
    ///
    /// The discriminator sees the real batch and the generated batch on one
    /// tape and is updated first. The generated batch is then scored again
    /// by the updated discriminator, on the generator's tape, for the
    /// generator's step.
    ///
    /// On error both gradient buffers are reallocated, so a failed iteration
    /// leaves nothing behind for the next one.
    pub fn update_core(&mut self, batch: Images<f32, Dev>) -> Result<UpdateReport> {
        let batch_size = batch.shape().0;
        if batch_size < 2 {
            return Err(Error::BatchTooSmall(batch_size));
        }
        let report = match self.step(batch) {
            Ok(report) => report,
            Err(err) => {
                self.reset_grads()?;
                return Err(err);
            }
        };
        self.iteration += 1;
        tracing::trace!(
            iteration = self.iteration,
            gen_loss = report.gen_loss,
            dis_loss = report.dis_loss,
            "update"
        );
        Ok(report)
    }

    /// Hands the networks back, e.g. for saving.
    pub fn into_models(self) -> (Generator<f32, Dev>, Discriminator<f32, Dev>) {
        (self.gen, self.dis)
    }

    fn step(&mut self, batch: Images<f32, Dev>) -> Result<UpdateReport> {
        let batch_size = batch.shape().0;
        let y_real = self.dis_forward_real(batch.try_div(255.0)?)?;
        let z = self.gen.try_make_hidden(batch_size)?;
        let x_fake = self.generate(z)?;
        let dis_loss = self.dis_step(y_real, &x_fake)?;
        let gen_loss = self.gen_step(x_fake)?;
        Ok(UpdateReport { gen_loss, dis_loss })
    }

    fn reset_grads(&mut self) -> Result<()> {
        self.gen_grads = self.gen.try_alloc_grads()?;
        self.dis_grads = self.dis.try_alloc_grads()?;
        Ok(())
    }

    /// Scores real images on the discriminator's tape.
    fn dis_forward_real(&mut self, x_real: Images<f32, Dev>) -> Result<Logits<f32, Dev, Traced>> {
        let grads = std::mem::replace(&mut self.dis_grads, Gradients::leaky());
        Ok(self.dis.try_forward_mut(x_real.traced(grads))?)
    }

    fn generate(&mut self, z: Latents<f32, Dev>) -> Result<Images<f32, Dev, Traced>> {
        let grads = std::mem::replace(&mut self.gen_grads, Gradients::leaky());
        Ok(self.gen.try_forward_mut(z.traced(grads))?)
    }

    /// `x_fake` is scored on a fresh tape that joins `y_real`'s in the loss,
    /// so no gradient reaches the generator.
    fn dis_step(
        &mut self,
        y_real: Logits<f32, Dev, Traced>,
        x_fake: &Images<f32, Dev, Traced>,
    ) -> Result<f64> {
        let y_fake = self.dis.try_forward_mut(x_fake.retaped::<Traced>())?;
        let loss = discriminator_loss(y_fake, y_real)?;
        let value = loss.array() as f64;
        self.dis_grads = loss.try_backward()?;
        self.dis_opt.update(&mut self.dis, &self.dis_grads)?;
        self.dis.try_zero_grads(&mut self.dis_grads)?;
        Ok(value)
    }

    /// Scores `x_fake` with the updated discriminator on the generator's
    /// tape. The discriminator's running statistics are put back afterwards,
    /// they already saw this batch in [Self::dis_step].
    fn gen_step(&mut self, x_fake: Images<f32, Dev, Traced>) -> Result<f64> {
        let stats = self.dis.running_stats();
        let y_fake = self.dis.try_forward_mut(x_fake);
        self.dis.restore_running_stats(stats);
        let loss = generator_loss(y_fake?)?;
        let value = loss.array() as f64;
        self.gen_grads = loss.try_backward()?;
        self.gen_opt.update(&mut self.gen, &self.gen_grads)?;
        self.gen.try_zero_grads(&mut self.gen_grads)?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> TrainConfig {
        TrainConfig {
            batch_size: 4,
            n_hidden: 8,
            ch: 16,
            ..Default::default()
        }
    }

    fn batch(dev: &Dev, size: usize) -> Images<f32, Dev> {
        let x: Images<f32, Dev> = dev.sample_uniform_like(&(size, 3, 32, 32));
        x.try_mul(255.0).unwrap()
    }

    fn dis_state(dis: &Discriminator<f32, Dev>) -> Vec<Vec<f32>> {
        let mut state = vec![dis.c0_0.conv.weight.as_vec(), dis.c0_0.bias.bias.as_vec()];
        for w in [&dis.c0_1.conv.weight, &dis.c1_1.conv.weight, &dis.c2_1.conv.weight] {
            state.push(w.as_vec());
        }
        for w in [&dis.c1_0.conv.weight, &dis.c2_0.conv.weight, &dis.c3_0.conv.weight] {
            state.push(w.as_vec());
        }
        for b in [
            &dis.c0_1.bn.bias,
            &dis.c1_0.bn.bias,
            &dis.c1_1.bn.bias,
            &dis.c2_0.bn.bias,
            &dis.c2_1.bn.bias,
            &dis.c3_0.bn.bias,
        ] {
            state.push(b.as_vec());
        }
        for (mean, var) in dis.running_stats() {
            state.push(mean.as_vec());
            state.push(var.as_vec());
        }
        state.push(dis.l4.weight.as_vec());
        state.push(dis.l4.bias.as_vec());
        state
    }

    #[test]
    fn test_update_changes_both_networks() {
        let dev = Dev::seed_from_u64(0);
        let mut updater = DcganUpdater::new(&small_config(), dev.clone()).unwrap();
        let gen_w = updater.generator().l0.weight.as_vec();
        let dis_w = updater.discriminator().l4.weight.as_vec();
        let dis_bias = updater.discriminator().c1_0.bn.bias.as_vec();

        let report = updater.update_core(batch(&dev, 4)).unwrap();
        assert!(report.gen_loss.is_finite() && report.gen_loss > 0.0);
        assert!(report.dis_loss.is_finite() && report.dis_loss > 0.0);
        assert_eq!(updater.iteration(), 1);

        assert_ne!(updater.generator().l0.weight.as_vec(), gen_w);
        assert_ne!(updater.discriminator().l4.weight.as_vec(), dis_w);
        assert_ne!(updater.discriminator().c1_0.bn.bias.as_vec(), dis_bias);
    }

    #[test]
    fn test_initial_losses_are_near_chance() {
        // with N(0, 0.02) weights every logit is close to 0, so the losses
        // start close to 2 ln 2 and ln 2
        let dev = Dev::seed_from_u64(1);
        let mut updater = DcganUpdater::new(&small_config(), dev.clone()).unwrap();
        let report = updater.update_core(batch(&dev, 4)).unwrap();
        let ln2 = std::f64::consts::LN_2;
        assert!((report.dis_loss - 2.0 * ln2).abs() < 0.3, "{report:?}");
        assert!((report.gen_loss - ln2).abs() < 0.3, "{report:?}");
    }

    #[test]
    fn test_gradients_are_zeroed_between_iterations() {
        let dev = Dev::seed_from_u64(2);
        let mut updater = DcganUpdater::new(&small_config(), dev.clone()).unwrap();
        for i in 1..=3 {
            updater.update_core(batch(&dev, 2)).unwrap();
            assert_eq!(updater.iteration(), i);
            let g = updater.gen_grads.get(&updater.gen.l0.weight).as_vec();
            assert!(g.iter().all(|v| *v == 0.0));
            let g = updater.dis_grads.get(&updater.dis.l4.weight).as_vec();
            assert!(g.iter().all(|v| *v == 0.0));
        }
    }

    #[test]
    fn test_batches_below_two_are_rejected() {
        let dev = Dev::seed_from_u64(3);
        let mut updater = DcganUpdater::new(&small_config(), dev.clone()).unwrap();
        for size in [0, 1] {
            assert!(matches!(
                updater.update_core(batch(&dev, size)),
                Err(Error::BatchTooSmall(n)) if n == size
            ));
        }
        assert_eq!(updater.iteration(), 0);

        updater.update_core(batch(&dev, 2)).unwrap();
        let var = updater.generator().bn0.running_var.as_vec();
        assert!(var.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_wrong_image_size_is_a_tensor_error() {
        let dev: Dev = Default::default();
        let mut updater = DcganUpdater::new(&small_config(), dev.clone()).unwrap();
        let x: Images<f32, Dev> = dev.zeros_like(&(2, 3, 16, 16));
        assert!(matches!(updater.update_core(x), Err(Error::Tensor(_))));
        assert_eq!(updater.iteration(), 0);
    }

    #[test]
    fn test_failed_update_keeps_only_parameter_gradients() {
        let dev = Dev::seed_from_u64(4);
        let mut updater = DcganUpdater::new(&small_config(), dev.clone()).unwrap();
        let x: Images<f32, Dev> = dev.zeros_like(&(2, 3, 16, 16));
        assert!(updater.update_core(x).is_err());

        // inputs are not parameters, backward must drop their gradients
        let x_real = batch(&dev, 2).try_div(255.0).unwrap();
        let z = updater.gen.make_hidden(2);
        let y_real = updater.dis_forward_real(x_real.clone()).unwrap();
        let x_fake = updater.generate(z.clone()).unwrap();
        updater.dis_step(y_real, &x_fake).unwrap();
        assert!(updater.dis_grads.get_ref_checked(&x_real).is_none());
        assert!(updater
            .dis_grads
            .get_ref_checked(&updater.dis.l4.weight)
            .is_some());

        updater.gen_step(x_fake).unwrap();
        assert!(updater.gen_grads.get_ref_checked(&z).is_none());
        assert!(updater
            .gen_grads
            .get_ref_checked(&updater.gen.l0.weight)
            .is_some());

        updater.update_core(batch(&dev, 2)).unwrap();
        assert_eq!(updater.iteration(), 1);
    }

    #[test]
    fn test_dis_step_leaves_generator_alone() {
        let dev = Dev::seed_from_u64(5);
        let mut updater = DcganUpdater::new(&small_config(), dev.clone()).unwrap();
        let gen_w = updater.gen.l0.weight.as_vec();
        let gen_out = updater.gen.dc4.deconv.weight.as_vec();
        let dis_before = dis_state(&updater.dis);

        let x_real = batch(&dev, 4).try_div(255.0).unwrap();
        let y_real = updater.dis_forward_real(x_real).unwrap();
        let z = updater.gen.make_hidden(4);
        let x_fake = updater.generate(z).unwrap();
        updater.dis_step(y_real, &x_fake).unwrap();

        assert_eq!(updater.gen.l0.weight.as_vec(), gen_w);
        assert_eq!(updater.gen.dc4.deconv.weight.as_vec(), gen_out);
        assert_ne!(dis_state(&updater.dis), dis_before);

        // the generator's tape is still whole
        let g = x_fake.sum().backward();
        let g_w = g.get(&updater.gen.l0.weight).as_vec();
        assert!(g_w.iter().any(|v| *v != 0.0));
    }

    #[test]
    fn test_gen_step_leaves_discriminator_alone() {
        let dev = Dev::seed_from_u64(6);
        let mut updater = DcganUpdater::new(&small_config(), dev.clone()).unwrap();
        let x_real = batch(&dev, 4).try_div(255.0).unwrap();
        let y_real = updater.dis_forward_real(x_real).unwrap();
        let z = updater.gen.make_hidden(4);
        let x_fake = updater.generate(z).unwrap();
        updater.dis_step(y_real, &x_fake).unwrap();

        let dis_before = dis_state(&updater.dis);
        let gen_w = updater.gen.l0.weight.as_vec();
        updater.gen_step(x_fake).unwrap();

        // parameters and running statistics
        assert_eq!(dis_state(&updater.dis), dis_before);
        let g = updater.dis_grads.get(&updater.dis.l4.weight).as_vec();
        assert!(g.iter().all(|v| *v == 0.0));
        assert_ne!(updater.gen.l0.weight.as_vec(), gen_w);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let cfg = TrainConfig {
            ch: 10,
            ..small_config()
        };
        assert!(matches!(
            DcganUpdater::new(&cfg, Default::default()),
            Err(Error::Config(_))
        ));
    }
}
