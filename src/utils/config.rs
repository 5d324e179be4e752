//! Configuration management
//!
//! Provides unified configuration for the whole pipeline: scraping,
//! dataset preparation, model shape and the training schedule.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::data::ScrapeConfig;
use crate::model::{Architecture, GanConfig, ImageSize};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data configuration
    pub data: DataConfig,
    /// Model configuration
    pub model: ModelConfig,
    /// Training configuration
    pub training: TrainingConfigFile,
    /// Scraper configuration
    #[serde(default)]
    pub scrape: ScrapeConfig,
}

/// Data-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Root folder of training images (one subfolder per label)
    pub image_dir: String,
    /// Side length of the square training images (64 or 128)
    pub image_size: i64,
    /// Batch size
    pub batch_size: usize,
    /// Add horizontally mirrored copies of every image
    pub hflip: bool,
}

/// Model-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// "wgan" or "sagan"
    pub architecture: Architecture,
    /// Latent dimension size
    pub latent_dim: i64,
    /// Base filters for generator
    pub ngf: i64,
    /// Base filters for critic
    pub ndf: i64,
    /// Convolution kernel size
    pub kernel_size: i64,
    /// Image channels (3 for RGB)
    pub channels: i64,
}

/// Training-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfigFile {
    /// Number of epochs
    pub epochs: usize,
    /// Generator learning rate
    pub gen_lr: f64,
    /// Critic learning rate
    pub disc_lr: f64,
    /// Critic steps per generator step once warm-up is over
    pub n_critic: usize,
    /// WGAN weight clipping bound
    pub clip_value: f64,
    /// Gradient penalty weight; 0 keeps weight clipping
    pub gradient_penalty: f64,
    /// Checkpoint save frequency (epochs)
    pub checkpoint_every: usize,
    /// Sample grid frequency (epochs)
    pub sample_every: usize,
    /// Checkpoint directory
    pub checkpoint_dir: String,
    /// Sample grid directory
    pub sample_dir: String,
    /// Device: "cpu" or "cuda"
    pub device: String,
    /// Random seed for torch and the data loader
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data: DataConfig {
                image_dir: "data/raw".to_string(),
                image_size: 64,
                batch_size: 64,
                hflip: true,
            },
            model: ModelConfig {
                architecture: Architecture::Wgan,
                latent_dim: 100,
                ngf: 64,
                ndf: 64,
                kernel_size: 4,
                channels: 3,
            },
            training: TrainingConfigFile {
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
                device: "cpu".to_string(),
                seed: None,
            },
            scrape: ScrapeConfig::default(),
        }
    }
}

impl Config {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults for the Self-Attention GAN: hinge loss with the two
    /// time-scale learning rates and a single critic step.
    pub fn sagan() -> Self {
        let mut config = Self::default();
        config.model.architecture = Architecture::Sagan;
        config.training.gen_lr = 1e-4;
        config.training.disc_lr = 4e-4;
        config.training.n_critic = 1;
        config
    }

    /// Switch to another network family
    ///
    /// The learning rates and critic steps follow the new family's
    /// defaults; everything else is kept. No-op for the current family.
    pub fn with_architecture(mut self, architecture: Architecture) -> Self {
        if self.model.architecture != architecture {
            let preset = match architecture {
                Architecture::Wgan => Self::default(),
                Architecture::Sagan => Self::sagan(),
            };
            self.model.architecture = architecture;
            self.training.gen_lr = preset.training.gen_lr;
            self.training.disc_lr = preset.training.disc_lr;
            self.training.n_critic = preset.training.n_critic;
        }
        self
    }

    /// Load configuration, choosing the format from the file extension
    pub fn load(path: &str) -> anyhow::Result<Self> {
        if path.ends_with(".toml") {
            Self::from_toml(path)
        } else {
            Self::from_json(path)
        }
    }

    /// Save configuration, choosing the format from the file extension
    pub fn save(&self, path: &str) -> anyhow::Result<()> {
        if path.ends_with(".toml") {
            self.save_toml(path)
        } else {
            self.save_json(path)
        }
    }

    /// Load configuration from TOML file
    pub fn from_toml(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_toml(&self, path: &str) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration from JSON file
    pub fn from_json(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to JSON file
    pub fn save_json(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get device from configuration
    pub fn get_device(&self) -> tch::Device {
        match self.training.device.to_lowercase().as_str() {
            "cuda" | "gpu" => {
                if tch::Cuda::is_available() {
                    tch::Device::Cuda(0)
                } else {
                    tracing::warn!("CUDA requested but not available, falling back to CPU");
                    tch::Device::Cpu
                }
            }
            _ => tch::Device::Cpu,
        }
    }

    /// Model shape as understood by [`crate::model::Gan`]
    pub fn gan_config(&self) -> anyhow::Result<GanConfig> {
        Ok(GanConfig {
            architecture: self.model.architecture,
            image_size: ImageSize::try_from(self.data.image_size)?,
            latent_dim: self.model.latent_dim,
            ngf: self.model.ngf,
            ndf: self.model.ndf,
            kernel_size: self.model.kernel_size,
            channels: self.model.channels,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        ImageSize::try_from(self.data.image_size)?;
        if self.data.batch_size == 0 {
            anyhow::bail!("Batch size must be > 0");
        }
        if self.model.latent_dim <= 0 {
            anyhow::bail!("Latent dimension must be > 0");
        }
        if self.model.ngf <= 0 || self.model.ndf <= 0 {
            anyhow::bail!("Filter counts must be > 0");
        }
        if self.model.architecture == Architecture::Sagan
            && (self.model.ngf < 8 || self.model.ndf < 8)
        {
            anyhow::bail!("Self-attention needs at least 8 generator and critic filters");
        }
        if self.model.kernel_size != 4 {
            anyhow::bail!("Kernel size must be 4 so each stage doubles the resolution");
        }
        if self.model.channels != 1 && self.model.channels != 3 {
            anyhow::bail!("Only 1 or 3 image channels are supported");
        }
        if self.training.epochs == 0 {
            anyhow::bail!("Number of epochs must be > 0");
        }
        if self.training.n_critic == 0 {
            anyhow::bail!("Critic steps must be > 0");
        }
        if self.training.clip_value <= 0.0 && self.training.gradient_penalty <= 0.0 {
            anyhow::bail!("WGAN needs either weight clipping or a gradient penalty");
        }
        if self.training.gen_lr <= 0.0 || self.training.disc_lr <= 0.0 {
            anyhow::bail!("Learning rates must be > 0");
        }
        self.scrape.validate()?;
        Ok(())
    }
}

/// Create default configuration file if it doesn't exist
pub fn ensure_config_exists(path: &str) -> anyhow::Result<Config> {
    if Path::new(path).exists() {
        Config::load(path)
    } else {
        let config = Config::default();
        config.save(path)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.data.image_size, 64);
        assert_eq!(config.model.latent_dim, 100);
        assert_eq!(config.model.architecture, Architecture::Wgan);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_with_architecture_switches_training_defaults() {
        let mut config = Config::default();
        config.training.epochs = 7;
        config.training.gen_lr = 2e-4;

        let sagan = config.clone().with_architecture(Architecture::Sagan);
        assert_eq!(sagan.model.architecture, Architecture::Sagan);
        assert_eq!(sagan.training.gen_lr, 1e-4);
        assert_eq!(sagan.training.disc_lr, 4e-4);
        assert_eq!(sagan.training.n_critic, 1);
        assert_eq!(sagan.training.epochs, 7);

        // Same family keeps the file's values
        let same = config.with_architecture(Architecture::Wgan);
        assert_eq!(same.training.gen_lr, 2e-4);

        let back = sagan.with_architecture(Architecture::Wgan);
        assert_eq!(back.training.disc_lr, 1e-4);
        assert_eq!(back.training.n_critic, 5);
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = Config::sagan();
        let json = serde_json::to_string(&config).unwrap();
        let loaded: Config = serde_json::from_str(&json).unwrap();

        assert_eq!(loaded.model.architecture, Architecture::Sagan);
        assert_eq!(loaded.training.disc_lr, 4e-4);
    }

    #[test]
    fn test_config_toml_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let path = path.to_str().unwrap();

        let created = ensure_config_exists(path).unwrap();
        assert!(Path::new(path).exists());

        let loaded = Config::load(path).unwrap();
        assert_eq!(loaded.data.image_dir, created.data.image_dir);
        assert_eq!(loaded.scrape.queries, created.scrape.queries);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.data.image_size = 96;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.training.clip_value = 0.0;
        assert!(config.validate().is_err());
        config.training.gradient_penalty = 10.0;
        assert!(config.validate().is_ok());

        let mut config = Config::default();
        config.model.kernel_size = 3;
        assert!(config.validate().is_err());

        let mut config = Config::sagan();
        config.model.ngf = 4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_gan_config_from_config() {
        let mut config = Config::default();
        config.data.image_size = 128;
        let gan = config.gan_config().unwrap();
        assert_eq!(gan.image_size, ImageSize::S128);
        assert_eq!(gan.latent_dim, 100);
    }
}
