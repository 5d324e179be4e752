//! GAN wrapper combining a generator and a critic
//!
//! Owns both networks together with their variable stores so that
//! optimizers, weight clipping and checkpointing can treat each side
//! independently.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tch::{nn, nn::ModuleT, nn::OptimizerConfig, nn::VarStore, Device, Kind, Tensor};

use super::sagan::{SaganDiscriminator, SaganGenerator};
use super::wgan::{WganCritic, WganGenerator};

/// Network family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    /// DCGAN networks trained with the Wasserstein objective
    Wgan,
    /// Spectrally normalised networks with self-attention, hinge loss
    Sagan,
}

impl FromStr for Architecture {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "wgan" => Ok(Architecture::Wgan),
            "sagan" | "self-attention" => Ok(Architecture::Sagan),
            other => anyhow::bail!("Unknown architecture: {}", other),
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::Wgan => write!(f, "wgan"),
            Architecture::Sagan => write!(f, "sagan"),
        }
    }
}

/// Supported output resolutions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum ImageSize {
    S64,
    S128,
}

impl ImageSize {
    /// Side length in pixels
    pub fn pixels(self) -> i64 {
        match self {
            ImageSize::S64 => 64,
            ImageSize::S128 => 128,
        }
    }

    /// Filter multipliers of the generator stages, 4x4 map first
    pub fn generator_multipliers(self) -> &'static [i64] {
        match self {
            ImageSize::S64 => &[8, 4, 2, 1],
            ImageSize::S128 => &[16, 8, 4, 2, 1],
        }
    }

    /// Filter multipliers of the critic stages, full resolution first
    pub fn critic_multipliers(self) -> &'static [i64] {
        match self {
            ImageSize::S64 => &[1, 2, 4, 8],
            ImageSize::S128 => &[1, 2, 4, 8, 16],
        }
    }
}

impl TryFrom<i64> for ImageSize {
    type Error = anyhow::Error;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            64 => Ok(ImageSize::S64),
            128 => Ok(ImageSize::S128),
            other => anyhow::bail!("Unsupported image size {}: expected 64 or 128", other),
        }
    }
}

impl From<ImageSize> for i64 {
    fn from(size: ImageSize) -> Self {
        size.pixels()
    }
}

/// Shape of a GAN; stored in checkpoints so models can be rebuilt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GanConfig {
    pub architecture: Architecture,
    pub image_size: ImageSize,
    pub latent_dim: i64,
    pub ngf: i64,
    pub ndf: i64,
    pub kernel_size: i64,
    pub channels: i64,
}

impl Default for GanConfig {
    fn default() -> Self {
        Self {
            architecture: Architecture::Wgan,
            image_size: ImageSize::S64,
            latent_dim: 100,
            ngf: 64,
            ndf: 64,
            kernel_size: 4,
            channels: 3,
        }
    }
}

/// Optimizer family and its hyper-parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OptimizerKind {
    /// RMSprop, used with weight clipping where momentum destabilises the critic
    RmsProp,
    /// Adam with explicit betas
    Adam { beta1: f64, beta2: f64 },
}

impl OptimizerKind {
    /// Optimizer used for a given architecture
    ///
    /// * WGAN with weight clipping: RMSprop
    /// * WGAN with gradient penalty: Adam(0.5, 0.9)
    /// * SAGAN: Adam(0.0, 0.9)
    pub fn for_training(architecture: Architecture, gradient_penalty: bool) -> Self {
        match (architecture, gradient_penalty) {
            (Architecture::Wgan, false) => OptimizerKind::RmsProp,
            (Architecture::Wgan, true) => OptimizerKind::Adam {
                beta1: 0.5,
                beta2: 0.9,
            },
            (Architecture::Sagan, _) => OptimizerKind::Adam {
                beta1: 0.0,
                beta2: 0.9,
            },
        }
    }

    fn build(self, vs: &VarStore, lr: f64) -> anyhow::Result<nn::Optimizer> {
        let optimizer = match self {
            OptimizerKind::RmsProp => nn::RmsProp::default().build(vs, lr)?,
            OptimizerKind::Adam { beta1, beta2 } => nn::Adam {
                beta1,
                beta2,
                ..Default::default()
            }
            .build(vs, lr)?,
        };
        Ok(optimizer)
    }
}

/// Complete GAN model
pub struct Gan {
    /// Generator network
    pub generator: Box<dyn ModuleT>,
    /// Critic (discriminator) network
    pub critic: Box<dyn ModuleT>,
    /// Variable store for generator
    pub gen_vs: VarStore,
    /// Variable store for critic
    pub disc_vs: VarStore,
    /// Device (CPU/GPU)
    pub device: Device,
    config: GanConfig,
}

impl Gan {
    /// Create a new GAN model
    pub fn new(config: GanConfig, device: Device) -> anyhow::Result<Self> {
        if config.latent_dim <= 0 || config.ngf <= 0 || config.ndf <= 0 {
            anyhow::bail!("Latent dimension and filter counts must be > 0");
        }
        if config.channels <= 0 {
            anyhow::bail!("Channel count must be > 0");
        }

        let gen_vs = VarStore::new(device);
        let disc_vs = VarStore::new(device);
        let gen_root = gen_vs.root();
        let disc_root = disc_vs.root();

        let (generator, critic): (Box<dyn ModuleT>, Box<dyn ModuleT>) = match config.architecture {
            Architecture::Wgan => (
                Box::new(WganGenerator::new(
                    &gen_root,
                    config.image_size,
                    config.kernel_size,
                    config.latent_dim,
                    config.ngf,
                    config.channels,
                )),
                Box::new(WganCritic::new(
                    &disc_root,
                    config.image_size,
                    config.kernel_size,
                    config.ndf,
                    config.channels,
                )),
            ),
            Architecture::Sagan => (
                Box::new(SaganGenerator::new(
                    &gen_root,
                    config.image_size,
                    config.kernel_size,
                    config.latent_dim,
                    config.ngf,
                    config.channels,
                )),
                Box::new(SaganDiscriminator::new(
                    &disc_root,
                    config.image_size,
                    config.kernel_size,
                    config.ndf,
                    config.channels,
                )),
            ),
        };

        Ok(Self {
            generator,
            critic,
            gen_vs,
            disc_vs,
            device,
            config,
        })
    }

    /// Random latent vectors of shape (num_samples, latent_dim)
    pub fn sample_noise(&self, num_samples: i64) -> Tensor {
        Tensor::randn(
            [num_samples, self.config.latent_dim],
            (Kind::Float, self.device),
        )
    }

    /// Generate images in inference mode
    ///
    /// # Returns
    ///
    /// Tensor of shape (num_samples, channels, size, size) in [-1, 1]
    pub fn generate(&self, num_samples: i64) -> Tensor {
        let noise = self.sample_noise(num_samples);
        self.generate_from_noise(&noise)
    }

    /// Generate images from specific noise vectors
    pub fn generate_from_noise(&self, noise: &Tensor) -> Tensor {
        tch::no_grad(|| self.generator.forward_t(&noise.to_device(self.device), false))
    }

    /// Critic scores of a batch of images (inference mode)
    pub fn critique(&self, images: &Tensor) -> Tensor {
        tch::no_grad(|| self.critic.forward_t(&images.to_device(self.device), false))
    }

    /// Walk linearly between two points in latent space
    ///
    /// # Arguments
    ///
    /// * `z1` - First latent vector, shape (latent_dim,)
    /// * `z2` - Second latent vector, shape (latent_dim,)
    /// * `steps` - Number of images, endpoints included
    ///
    /// # Returns
    ///
    /// Tensor of shape (steps, channels, size, size)
    pub fn interpolate(&self, z1: &Tensor, z2: &Tensor, steps: i64) -> Tensor {
        let steps = steps.max(1);
        let mut points = Vec::with_capacity(steps as usize);

        for i in 0..steps {
            let alpha = if steps == 1 {
                0.0
            } else {
                i as f64 / (steps - 1) as f64
            };
            points.push(z1 * (1.0 - alpha) + z2 * alpha);
        }

        self.generate_from_noise(&Tensor::stack(&points, 0))
    }

    /// Optimizer for the generator
    pub fn gen_optimizer(&self, lr: f64, gradient_penalty: bool) -> anyhow::Result<nn::Optimizer> {
        OptimizerKind::for_training(self.config.architecture, gradient_penalty).build(&self.gen_vs, lr)
    }

    /// Optimizer for the critic
    pub fn disc_optimizer(&self, lr: f64, gradient_penalty: bool) -> anyhow::Result<nn::Optimizer> {
        OptimizerKind::for_training(self.config.architecture, gradient_penalty).build(&self.disc_vs, lr)
    }

    /// Clamp every trainable critic parameter to [-bound, bound]
    pub fn clip_critic(&self, bound: f64) {
        tch::no_grad(|| {
            for mut var in self.disc_vs.trainable_variables() {
                let _ = var.clamp_(-bound, bound);
            }
        });
    }

    /// Save model weights
    pub fn save<P: AsRef<Path>>(&self, gen_path: P, disc_path: P) -> anyhow::Result<()> {
        self.gen_vs.save(gen_path)?;
        self.disc_vs.save(disc_path)?;
        Ok(())
    }

    /// Load model weights
    pub fn load<P: AsRef<Path>>(&mut self, gen_path: P, disc_path: P) -> anyhow::Result<()> {
        self.gen_vs.load(gen_path)?;
        self.disc_vs.load(disc_path)?;
        Ok(())
    }

    pub fn config(&self) -> &GanConfig {
        &self.config
    }

    pub fn architecture(&self) -> Architecture {
        self.config.architecture
    }

    pub fn latent_dim(&self) -> i64 {
        self.config.latent_dim
    }

    pub fn image_size(&self) -> ImageSize {
        self.config.image_size
    }
}
