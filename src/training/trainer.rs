//! Training loop implementation for WGAN and SAGAN
//!
//! The WGAN loop follows the classic schedule: the critic is trained
//! several times per generator update, each time on a fresh batch with
//! its weights clipped (or regularised by a gradient penalty). The SAGAN
//! loop alternates one hinge-loss discriminator step with one generator
//! step per batch.

use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tch::{nn, nn::ModuleT, Device, Tensor};
use tracing::{info, warn};

use super::losses::{
    critic_loss_wasserstein, discriminator_loss_hinge, generator_loss_hinge,
    generator_loss_wasserstein, gradient_penalty, wasserstein_estimate,
};
use super::metrics::{EMATracker, TrainingMetrics};
use crate::data::DataLoader;
use crate::model::{Architecture, Gan};
use crate::utils::{save_checkpoint, save_grid, Config};

/// Generator iterations during which the critic gets the long schedule
pub const WARMUP_GEN_ITERATIONS: usize = 25;
/// Critic steps per generator step during warm-up and bursts
pub const BURST_CRITIC_ITERATIONS: usize = 100;
/// Every this many generator iterations the critic gets a burst
pub const BURST_EVERY: usize = 500;

/// Number of critic updates before the next generator update
///
/// The critic is trained to near-optimality early on and then
/// periodically, so its Wasserstein estimate stays meaningful.
pub fn critic_iterations(gen_iterations: usize, n_critic: usize) -> usize {
    if gen_iterations < WARMUP_GEN_ITERATIONS || gen_iterations % BURST_EVERY == 0 {
        BURST_CRITIC_ITERATIONS
    } else {
        n_critic
    }
}

/// Training configuration
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    /// Number of training epochs
    pub epochs: usize,
    /// Learning rate for generator
    pub gen_lr: f64,
    /// Learning rate for critic
    pub disc_lr: f64,
    /// Critic updates per generator update outside warm-up (WGAN)
    pub n_critic: usize,
    /// Critic weights are clamped to [-clip_value, clip_value] (WGAN)
    pub clip_value: f64,
    /// Gradient penalty weight; clipping is disabled when > 0
    pub gradient_penalty: f64,
    /// Save checkpoint every N epochs
    pub checkpoint_every: usize,
    /// Save a sample grid every N epochs (0 disables)
    pub sample_every: usize,
    /// Directory to save checkpoints
    pub checkpoint_dir: String,
    /// Directory to save sample grids
    pub sample_dir: String,
    /// Images in each sample grid
    pub num_samples: i64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 25,
            gen_lr: 1e-4,
            disc_lr: 1e-4,
            n_critic: 5,
            clip_value: 0.01,
            gradient_penalty: 0.0,
            checkpoint_every: 5,
            sample_every: 1,
            checkpoint_dir: "checkpoints".to_string(),
            sample_dir: "samples".to_string(),
            num_samples: 64,
        }
    }
}

impl TrainingConfig {
    /// Training section of the pipeline configuration
    pub fn from_config(config: &Config) -> Self {
        let training = &config.training;
        Self {
            epochs: training.epochs,
            gen_lr: training.gen_lr,
            disc_lr: training.disc_lr,
            n_critic: training.n_critic,
            clip_value: training.clip_value,
            gradient_penalty: training.gradient_penalty,
            checkpoint_every: training.checkpoint_every,
            sample_every: training.sample_every,
            checkpoint_dir: training.checkpoint_dir.clone(),
            sample_dir: training.sample_dir.clone(),
            ..Self::default()
        }
    }

    fn uses_gradient_penalty(&self) -> bool {
        self.gradient_penalty > 0.0
    }
}

/// Running sums over one epoch
#[derive(Debug, Default)]
struct EpochStats {
    gen_loss: f64,
    critic_loss: f64,
    wasserstein: f64,
    gen_steps: usize,
    critic_steps: usize,
}

impl EpochStats {
    fn averages(&self) -> (f64, f64, f64) {
        let gen_steps = self.gen_steps.max(1) as f64;
        let critic_steps = self.critic_steps.max(1) as f64;
        (
            self.gen_loss / gen_steps,
            self.critic_loss / critic_steps,
            self.wasserstein / critic_steps,
        )
    }
}

/// Optimizers and smoothed readouts shared by the epoch loops
struct StepState {
    gen_opt: nn::Optimizer,
    disc_opt: nn::Optimizer,
    gen_ema: EMATracker,
    critic_ema: EMATracker,
}

/// GAN Trainer
pub struct Trainer {
    config: TrainingConfig,
    device: Device,
    metrics: TrainingMetrics,
}

impl Trainer {
    /// Create a new trainer
    pub fn new(config: TrainingConfig, device: Device) -> Self {
        Self {
            config,
            device,
            metrics: TrainingMetrics::new(),
        }
    }

    /// Continue from metrics restored out of a checkpoint
    pub fn with_metrics(mut self, metrics: TrainingMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Train the model from scratch
    ///
    /// # Arguments
    ///
    /// * `model` - GAN to train
    /// * `data_loader` - DataLoader providing training batches
    ///
    /// # Returns
    ///
    /// Training metrics
    pub fn train(&mut self, model: &mut Gan, data_loader: &mut DataLoader) -> anyhow::Result<&TrainingMetrics> {
        self.train_from(model, data_loader, 0, 0)
    }

    /// Train the model starting after `start_epoch` completed epochs
    ///
    /// `gen_iterations` carries the generator update count over from a
    /// checkpoint so the critic schedule resumes where it stopped.
    pub fn train_from(
        &mut self,
        model: &mut Gan,
        data_loader: &mut DataLoader,
        start_epoch: usize,
        gen_iterations: usize,
    ) -> anyhow::Result<&TrainingMetrics> {
        if data_loader.num_batches() == 0 {
            anyhow::bail!(
                "Data loader yields no batches ({} images, batch size {})",
                data_loader.num_samples(),
                data_loader.batch_size()
            );
        }
        if start_epoch >= self.config.epochs {
            info!(
                "Already trained for {} of {} epochs, nothing to do",
                start_epoch, self.config.epochs
            );
            return Ok(&self.metrics);
        }

        let gp = self.config.uses_gradient_penalty();
        let mut state = StepState {
            gen_opt: model.gen_optimizer(self.config.gen_lr, gp)?,
            disc_opt: model.disc_optimizer(self.config.disc_lr, gp)?,
            gen_ema: EMATracker::new(0.1),
            critic_ema: EMATracker::new(0.1),
        };

        std::fs::create_dir_all(&self.config.checkpoint_dir)?;
        if self.config.sample_every > 0 {
            std::fs::create_dir_all(&self.config.sample_dir)?;
        }

        let fixed_noise = model.sample_noise(self.config.num_samples);
        let num_batches = data_loader.num_batches();
        let mut gen_iterations = gen_iterations;
        let mut last_checkpoint = None;

        info!(
            "Starting {} training for epochs {}..{}, {} batches per epoch",
            model.architecture(),
            start_epoch + 1,
            self.config.epochs,
            num_batches
        );

        for epoch in start_epoch..self.config.epochs {
            data_loader.reset();

            // Progress bar for epoch
            let pb = ProgressBar::new(num_batches as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
                    .progress_chars("##-"),
            );

            let stats = match model.architecture() {
                Architecture::Wgan => {
                    self.wgan_epoch(model, data_loader, &mut state, &mut gen_iterations, &pb)
                }
                Architecture::Sagan => {
                    self.sagan_epoch(model, data_loader, &mut state, &mut gen_iterations, &pb)
                }
            };

            pb.finish_with_message("done");

            if stats.critic_steps == 0 {
                anyhow::bail!("Epoch {} produced no batches", epoch + 1);
            }

            let (avg_gen_loss, avg_critic_loss, avg_wasserstein) = stats.averages();
            self.metrics
                .record_epoch(avg_gen_loss, avg_critic_loss, avg_wasserstein, gen_iterations);

            info!(
                "Epoch {}/{}: G_loss={:.4}, D_loss={:.4}, W_dist={:.4}, gen_iters={}",
                epoch + 1,
                self.config.epochs,
                avg_gen_loss,
                avg_critic_loss,
                avg_wasserstein,
                gen_iterations
            );

            if self.metrics.check_divergence(5) {
                warn!("Losses look divergent! Consider lowering learning rates.");
            }

            if self.config.sample_every > 0 && (epoch + 1) % self.config.sample_every == 0 {
                let path = sample_path(&self.config.sample_dir, epoch + 1);
                let samples = model.generate_from_noise(&fixed_noise);
                match save_grid(&samples, 8, 2, &path) {
                    Ok(()) => info!("Saved samples to {}", path.display()),
                    Err(e) => warn!("Failed to save samples: {}", e),
                }
            }

            if self.config.checkpoint_every > 0 && (epoch + 1) % self.config.checkpoint_every == 0 {
                self.checkpoint(model, epoch + 1, gen_iterations);
                last_checkpoint = Some(epoch + 1);
            }
        }

        if last_checkpoint != Some(self.config.epochs) {
            self.checkpoint(model, self.config.epochs, gen_iterations);
        }

        let metrics_path = Path::new(&self.config.checkpoint_dir).join("training_metrics.csv");
        if let Err(e) = self.metrics.save_csv(&metrics_path) {
            warn!("Failed to save metrics: {}", e);
        }

        Ok(&self.metrics)
    }

    fn checkpoint(&self, model: &Gan, epoch: usize, gen_iterations: usize) {
        match save_checkpoint(
            model,
            &self.metrics,
            epoch,
            gen_iterations,
            &self.config.checkpoint_dir,
        ) {
            Ok(path) => info!("Saved checkpoint at epoch {} to {}", epoch, path.display()),
            Err(e) => warn!("Failed to save checkpoint: {}", e),
        }
    }

    /// One pass over the loader with the WGAN critic schedule
    fn wgan_epoch(
        &self,
        model: &Gan,
        data_loader: &mut DataLoader,
        state: &mut StepState,
        gen_iterations: &mut usize,
        pb: &ProgressBar,
    ) -> EpochStats {
        let mut stats = EpochStats::default();
        let num_batches = data_loader.num_batches() as u64;
        let gp = self.config.uses_gradient_penalty();

        loop {
            // ========== Train Critic ==========
            let d_iters = critic_iterations(*gen_iterations, self.config.n_critic);
            let mut critic_steps = 0;

            while critic_steps < d_iters {
                let Some(real_data) = data_loader.next_tensor(self.device) else {
                    break;
                };
                critic_steps += 1;

                if !gp {
                    model.clip_critic(self.config.clip_value);
                }

                let noise = model.sample_noise(real_data.size()[0]);
                let fake_data = tch::no_grad(|| model.generator.forward_t(&noise, true));

                let real_output = model.critic.forward_t(&real_data, true);
                let fake_output = model.critic.forward_t(&fake_data, true);

                let mut d_loss = critic_loss_wasserstein(&real_output, &fake_output);
                if gp {
                    d_loss = d_loss
                        + gradient_penalty(model.critic.as_ref(), &real_data, &fake_data)
                            * self.config.gradient_penalty;
                }

                state.disc_opt.zero_grad();
                d_loss.backward();
                state.disc_opt.step();

                let d_value = d_loss.double_value(&[]);
                stats.critic_loss += d_value;
                stats.wasserstein +=
                    wasserstein_estimate(&real_output, &fake_output).double_value(&[]);
                stats.critic_steps += 1;
                state.critic_ema.update(d_value);
                pb.set_position(num_batches - data_loader.remaining_batches() as u64);
            }

            if critic_steps == 0 {
                break;
            }

            // ========== Train Generator ==========
            let noise = model.sample_noise(data_loader.batch_size() as i64);
            let fake_data = model.generator.forward_t(&noise, true);
            let fake_output = model.critic.forward_t(&fake_data, true);

            let g_loss = generator_loss_wasserstein(&fake_output);
            let g_value = self.generator_step(&mut state.gen_opt, &g_loss);

            stats.gen_loss += g_value;
            stats.gen_steps += 1;
            *gen_iterations += 1;
            state.gen_ema.update(g_value);

            pb.set_message(format!(
                "G: {:.4}, D: {:.4}, iters: {}",
                state.gen_ema.value(),
                state.critic_ema.value(),
                gen_iterations
            ));
        }

        stats
    }

    /// One pass over the loader alternating hinge-loss updates
    fn sagan_epoch(
        &self,
        model: &Gan,
        data_loader: &mut DataLoader,
        state: &mut StepState,
        gen_iterations: &mut usize,
        pb: &ProgressBar,
    ) -> EpochStats {
        let mut stats = EpochStats::default();

        while let Some(real_data) = data_loader.next_tensor(self.device) {
            let batch_size = real_data.size()[0];

            // ========== Train Discriminator ==========
            let noise = model.sample_noise(batch_size);
            let fake_data = tch::no_grad(|| model.generator.forward_t(&noise, true));

            let real_output = model.critic.forward_t(&real_data, true);
            let fake_output = model.critic.forward_t(&fake_data, true);

            let d_loss = discriminator_loss_hinge(&real_output, &fake_output);

            state.disc_opt.zero_grad();
            d_loss.backward();
            state.disc_opt.step();

            let d_value = d_loss.double_value(&[]);
            stats.critic_loss += d_value;
            stats.wasserstein += wasserstein_estimate(&real_output, &fake_output).double_value(&[]);
            stats.critic_steps += 1;
            state.critic_ema.update(d_value);

            // ========== Train Generator ==========
            let noise = model.sample_noise(batch_size);
            let fake_data = model.generator.forward_t(&noise, true);
            let fake_output = model.critic.forward_t(&fake_data, true);

            let g_loss = generator_loss_hinge(&fake_output);
            let g_value = self.generator_step(&mut state.gen_opt, &g_loss);

            stats.gen_loss += g_value;
            stats.gen_steps += 1;
            *gen_iterations += 1;
            state.gen_ema.update(g_value);

            pb.set_message(format!(
                "G: {:.4}, D: {:.4}",
                state.gen_ema.value(),
                state.critic_ema.value()
            ));
            pb.inc(1);
        }

        stats
    }

    fn generator_step(&self, gen_opt: &mut nn::Optimizer, g_loss: &Tensor) -> f64 {
        gen_opt.zero_grad();
        g_loss.backward();
        gen_opt.step();
        g_loss.double_value(&[])
    }

    /// Get training metrics
    pub fn metrics(&self) -> &TrainingMetrics {
        &self.metrics
    }

    /// Get configuration
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }
}

/// Path of the sample grid written after `epoch`
pub fn sample_path<P: AsRef<Path>>(sample_dir: P, epoch: usize) -> PathBuf {
    sample_dir.as_ref().join(format!("epoch_{:04}.png", epoch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GanConfig, ImageSize};
    use crate::utils::{find_latest_checkpoint, load_checkpoint_meta};
    use ndarray::Array4;
    use tempfile::tempdir;

    fn tiny_model(architecture: Architecture) -> Gan {
        let config = GanConfig {
            architecture,
            image_size: ImageSize::S64,
            latent_dim: 16,
            ngf: 8,
            ndf: 8,
            kernel_size: 4,
            channels: 3,
        };
        Gan::new(config, Device::Cpu).unwrap()
    }

    fn random_images(n: usize) -> Array4<f32> {
        Array4::from_shape_fn((n, 3, 64, 64), |(i, c, y, x)| {
            (((i + c + y + x) % 7) as f32 / 3.0) - 1.0
        })
    }

    fn test_config(dir: &Path, epochs: usize) -> TrainingConfig {
        TrainingConfig {
            epochs,
            checkpoint_every: 1,
            sample_every: 1,
            checkpoint_dir: dir.join("checkpoints").to_string_lossy().to_string(),
            sample_dir: dir.join("samples").to_string_lossy().to_string(),
            num_samples: 4,
            ..TrainingConfig::default()
        }
    }

    #[test]
    fn test_training_config_default() {
        let config = TrainingConfig::default();
        assert_eq!(config.epochs, 25);
        assert_eq!(config.n_critic, 5);
        assert_eq!(config.clip_value, 0.01);
        assert!(!config.uses_gradient_penalty());
    }

    #[test]
    fn test_training_config_from_config() {
        let config = TrainingConfig::from_config(&Config::sagan());
        assert_eq!(config.disc_lr, 4e-4);
        assert_eq!(config.n_critic, 1);
    }

    #[test]
    fn test_critic_schedule() {
        assert_eq!(critic_iterations(0, 5), 100);
        assert_eq!(critic_iterations(24, 5), 100);
        assert_eq!(critic_iterations(25, 5), 5);
        assert_eq!(critic_iterations(499, 5), 5);
        assert_eq!(critic_iterations(500, 5), 100);
        assert_eq!(critic_iterations(1000, 2), 100);
        assert_eq!(critic_iterations(1001, 2), 2);
    }

    #[test]
    fn test_wgan_epoch_consumes_loader() {
        let dir = tempdir().unwrap();
        let mut model = tiny_model(Architecture::Wgan);
        let mut loader = DataLoader::with_seed(random_images(6), 2, true, true, 1);

        let mut trainer = Trainer::new(test_config(dir.path(), 1), Device::Cpu);
        let metrics = trainer.train(&mut model, &mut loader).unwrap();

        // Warm-up: all three batches go to the critic, then one generator step
        assert_eq!(metrics.num_epochs(), 1);
        assert_eq!(metrics.gen_iterations, vec![1]);
        assert!(metrics.latest_critic_loss().unwrap().is_finite());

        // Weights are clamped before each critic step, so at most one
        // RMSprop update separates them from the bound
        for var in model.disc_vs.trainable_variables() {
            assert!(var.abs().max().double_value(&[]) <= 0.02);
        }

        assert!(dir.path().join("samples/epoch_0001.png").exists());
        let latest = find_latest_checkpoint(dir.path().join("checkpoints")).unwrap().unwrap();
        let meta = load_checkpoint_meta(&latest).unwrap();
        assert_eq!(meta.epoch, 1);
        assert_eq!(meta.gen_iterations, 1);
    }

    #[test]
    fn test_wgan_partial_burst_still_updates_generator() {
        let dir = tempdir().unwrap();
        let mut model = tiny_model(Architecture::Wgan);
        let mut loader = DataLoader::new(random_images(10), 2, false, true);

        let config = TrainingConfig {
            n_critic: 2,
            sample_every: 0,
            ..test_config(dir.path(), 1)
        };
        let mut trainer = Trainer::new(config, Device::Cpu);
        let metrics = trainer.train_from(&mut model, &mut loader, 0, WARMUP_GEN_ITERATIONS).unwrap();

        // Five batches after warm-up: 2 + 2 + 1 critic steps, each followed by a generator step
        assert_eq!(metrics.gen_iterations, vec![WARMUP_GEN_ITERATIONS + 3]);

        let latest = find_latest_checkpoint(dir.path().join("checkpoints")).unwrap().unwrap();
        assert_eq!(load_checkpoint_meta(&latest).unwrap().gen_iterations, 28);
    }

    #[test]
    fn test_wgan_gradient_penalty_run() {
        let dir = tempdir().unwrap();
        let mut model = tiny_model(Architecture::Wgan);
        let mut loader = DataLoader::new(random_images(4), 2, false, true);

        let config = TrainingConfig {
            gradient_penalty: 10.0,
            sample_every: 0,
            ..test_config(dir.path(), 1)
        };
        let mut trainer = Trainer::new(config, Device::Cpu);
        let metrics = trainer.train(&mut model, &mut loader).unwrap();

        assert_eq!(metrics.num_epochs(), 1);
        assert!(metrics.latest_gen_loss().unwrap().is_finite());
        assert!(!dir.path().join("samples").exists());
    }

    #[test]
    fn test_sagan_one_generator_step_per_batch() {
        let dir = tempdir().unwrap();
        let mut model = tiny_model(Architecture::Sagan);
        let mut loader = DataLoader::new(random_images(4), 2, false, true);

        let mut trainer = Trainer::new(test_config(dir.path(), 2), Device::Cpu);
        let metrics = trainer.train(&mut model, &mut loader).unwrap();

        assert_eq!(metrics.num_epochs(), 2);
        assert_eq!(metrics.gen_iterations, vec![2, 4]);
    }

    #[test]
    fn test_resume_skips_finished_epochs() {
        let dir = tempdir().unwrap();
        let mut model = tiny_model(Architecture::Sagan);
        let mut loader = DataLoader::new(random_images(2), 2, false, true);

        let mut previous = TrainingMetrics::new();
        previous.record_epoch(0.5, 1.5, 0.1, 1);

        let mut trainer = Trainer::new(test_config(dir.path(), 2), Device::Cpu).with_metrics(previous);
        let metrics = trainer.train_from(&mut model, &mut loader, 1, 1).unwrap();

        assert_eq!(metrics.num_epochs(), 2);
        assert_eq!(metrics.gen_iterations, vec![1, 2]);
        assert!(dir.path().join("samples/epoch_0002.png").exists());
        assert!(!dir.path().join("samples/epoch_0001.png").exists());
    }

    #[test]
    fn test_empty_loader_is_an_error() {
        let dir = tempdir().unwrap();
        let mut model = tiny_model(Architecture::Wgan);
        // Fewer images than one batch with drop_last
        let mut loader = DataLoader::new(random_images(1), 4, false, true);

        let mut trainer = Trainer::new(test_config(dir.path(), 1), Device::Cpu);
        assert!(trainer.train(&mut model, &mut loader).is_err());
    }
}
