//! Animal Art GAN
//!
//! Main entry point providing CLI interface for:
//! - Scraping animal images from an image search
//! - Training a WGAN or SAGAN on the scraped images
//! - Generating sample grids and latent-space interpolations

use anyhow::Result;
use clap::{Parser, Subcommand};
use ndarray::Array4;
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use animal_art_gan::{
    data::{DataLoader, ImageFolder, ImageScraper},
    model::{Architecture, Gan, GanConfig},
    training::{Trainer, TrainingConfig, TrainingMetrics},
    utils::{
        find_latest_checkpoint, load_checkpoint, load_checkpoint_meta, model_from_checkpoint,
        save_grid, save_individual, Config,
    },
};

/// Generate animal art with Wasserstein and Self-Attention GANs
#[derive(Parser)]
#[command(name = "animal_art_gan")]
#[command(version = "0.1.0")]
#[command(about = "Scrape animal images, train a GAN on them and render generated art")]
struct Cli {
    /// Path to configuration file (.json or .toml)
    #[arg(short, long, default_value = "config.json")]
    config: String,

    /// Verbosity level
    #[arg(short, long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download images for each search query
    Scrape {
        /// Search query; repeat for several animals
        #[arg(short, long)]
        query: Vec<String>,

        /// Images to download per query
        #[arg(short = 'n', long)]
        per_query: Option<usize>,

        /// Output directory (one subfolder per query)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Train the GAN
    Train {
        /// Image folder to train on
        #[arg(short, long)]
        data: Option<String>,

        /// Number of epochs
        #[arg(short, long)]
        epochs: Option<usize>,

        /// Network family: wgan or sagan
        #[arg(short, long)]
        arch: Option<Architecture>,

        /// Resume from a checkpoint directory, or "latest"
        #[arg(long)]
        resume: Option<String>,
    },

    /// Generate a grid of samples
    Generate {
        /// Checkpoint directory, or a directory of checkpoints
        #[arg(short, long)]
        model: String,

        /// Number of samples to generate
        #[arg(short, long, default_value = "64")]
        num_samples: i64,

        /// Images per grid row
        #[arg(long, default_value = "8")]
        nrow: usize,

        /// Output image path
        #[arg(short, long, default_value = "generated.png")]
        output: String,

        /// Also write every sample to this directory
        #[arg(long)]
        individual: Option<String>,
    },

    /// Walk between two random points in latent space
    Interpolate {
        /// Checkpoint directory, or a directory of checkpoints
        #[arg(short, long)]
        model: String,

        /// Number of images along the path
        #[arg(short, long, default_value = "10")]
        steps: i64,

        /// Output image path
        #[arg(short, long, default_value = "interpolation.png")]
        output: String,
    },

    /// Initialize default configuration file
    Init {
        /// Output configuration file path
        #[arg(short, long, default_value = "config.json")]
        output: String,

        /// Write the defaults of this network family
        #[arg(short, long, default_value = "wgan")]
        arch: Architecture,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = match cli.verbosity.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Scrape {
            query,
            per_query,
            output,
        } => {
            scrape_images(&cli.config, query, per_query, output).await?;
        }
        Commands::Train {
            data,
            epochs,
            arch,
            resume,
        } => {
            train_model(&cli.config, data, epochs, arch, resume)?;
        }
        Commands::Generate {
            model,
            num_samples,
            nrow,
            output,
            individual,
        } => {
            generate_samples(&cli.config, &model, num_samples, nrow, &output, individual)?;
        }
        Commands::Interpolate {
            model,
            steps,
            output,
        } => {
            interpolate(&cli.config, &model, steps, &output)?;
        }
        Commands::Init { output, arch } => {
            init_config(&output, arch)?;
        }
    }

    Ok(())
}

/// Load the configuration file, falling back to the defaults of `arch`
fn load_config(config_path: &str, arch: Option<Architecture>) -> Result<Config> {
    if Path::new(config_path).exists() {
        let config = Config::load(config_path)?;
        Ok(match arch {
            Some(arch) => config.with_architecture(arch),
            None => config,
        })
    } else {
        info!("Config file not found, using defaults");
        Ok(match arch {
            Some(Architecture::Sagan) => Config::sagan(),
            _ => Config::default(),
        })
    }
}

/// A checkpoint directory itself, or the newest checkpoint below it
fn resolve_checkpoint(path: &str) -> Result<PathBuf> {
    let path = Path::new(path);
    if path.join("meta.json").exists() {
        return Ok(path.to_path_buf());
    }
    find_latest_checkpoint(path)?
        .ok_or_else(|| anyhow::anyhow!("No checkpoint found in {}", path.display()))
}

/// Model to train, with the epoch and generator iteration it starts from
fn prepare_model(
    config: &Config,
    resume: Option<&str>,
    device: tch::Device,
) -> Result<(Gan, usize, usize, TrainingMetrics)> {
    let Some(resume) = resume else {
        return Ok((Gan::new(config.gan_config()?, device)?, 0, 0, TrainingMetrics::new()));
    };

    let checkpoint = if resume == "latest" {
        resolve_checkpoint(&config.training.checkpoint_dir)?
    } else {
        resolve_checkpoint(resume)?
    };

    let meta = load_checkpoint_meta(&checkpoint)?;
    if meta.config != config.gan_config()? {
        warn!("Checkpoint model shape differs from the configuration; using the checkpoint's");
    }

    let mut model = Gan::new(meta.config, device)?;
    let (epoch, gen_iterations, metrics) = load_checkpoint(&mut model, &checkpoint)?;
    info!("Resumed from epoch {} ({} generator iterations)", epoch, gen_iterations);
    Ok((model, epoch, gen_iterations, metrics))
}

/// Training images sized and coloured for `model`
fn load_images(config: &Config, model: &GanConfig) -> Result<Array4<f32>> {
    let pixels = model.image_size.pixels();
    if pixels != config.data.image_size {
        warn!(
            "Loading images at {} px to match the model instead of the configured {} px",
            pixels, config.data.image_size
        );
    }

    let mut folder = ImageFolder::open(&config.data.image_dir, pixels as u32, config.data.hflip)?;
    if model.channels == 1 {
        folder = folder.grayscale();
    }
    folder.load_all()
}

/// Download training images
async fn scrape_images(
    config_path: &str,
    queries: Vec<String>,
    per_query: Option<usize>,
    output: Option<String>,
) -> Result<()> {
    let mut config = load_config(config_path, None)?.scrape;
    if !queries.is_empty() {
        config.queries = queries;
    }
    if let Some(n) = per_query {
        config.images_per_query = n;
    }
    if let Some(output) = output {
        config.output_dir = output;
    }

    info!(
        "Scraping {} images for each of {:?} into {}",
        config.images_per_query, config.queries, config.output_dir
    );

    let scraper = ImageScraper::new(config)?;
    let summary = scraper.scrape_all().await?;

    for (label, count) in &summary.per_label {
        info!("  - {}: {} new images", label, count);
    }
    info!("Manifest: {}", summary.manifest.display());

    Ok(())
}

/// Train the GAN
fn train_model(
    config_path: &str,
    data: Option<String>,
    epochs: Option<usize>,
    arch: Option<Architecture>,
    resume: Option<String>,
) -> Result<()> {
    let mut config = load_config(config_path, arch)?;
    if let Some(data) = data {
        config.data.image_dir = data;
    }
    if let Some(epochs) = epochs {
        config.training.epochs = epochs;
    }
    config.validate()?;

    if let Some(seed) = config.training.seed {
        tch::manual_seed(seed as i64);
    }

    let device = config.get_device();
    info!("Using device: {:?}", device);

    // Create model, resuming from a checkpoint if requested
    let (mut model, start_epoch, gen_iterations, metrics) =
        prepare_model(&config, resume.as_deref(), device)?;

    // Load images at the model's resolution
    info!("Loading images from {}", config.data.image_dir);
    let images = load_images(&config, model.config())?;

    let mut data_loader = match config.training.seed {
        Some(seed) => DataLoader::with_seed(images, config.data.batch_size, true, true, seed),
        None => DataLoader::new(images, config.data.batch_size, true, true),
    };

    let training_config = TrainingConfig::from_config(&config);
    let mut trainer = Trainer::new(training_config, device).with_metrics(metrics);

    let metrics = trainer.train_from(&mut model, &mut data_loader, start_epoch, gen_iterations)?;

    info!(
        "Training complete. Final G_loss: {:.4}, D_loss: {:.4}, W_dist: {:.4}",
        metrics.latest_gen_loss().unwrap_or(0.0),
        metrics.latest_critic_loss().unwrap_or(0.0),
        metrics.latest_wasserstein().unwrap_or(0.0)
    );

    Ok(())
}

/// Generate a sample grid
fn generate_samples(
    config_path: &str,
    model_path: &str,
    num_samples: i64,
    nrow: usize,
    output_path: &str,
    individual: Option<String>,
) -> Result<()> {
    if num_samples <= 0 {
        anyhow::bail!("Number of samples must be > 0");
    }

    let device = load_config(config_path, None)?.get_device();
    let checkpoint = resolve_checkpoint(model_path)?;
    let model = model_from_checkpoint(&checkpoint, device)?;
    info!("Loaded {} model from {}", model.architecture(), checkpoint.display());

    info!("Generating {} samples", num_samples);
    let samples = model.generate(num_samples);

    save_grid(&samples, nrow, 2, output_path)?;
    info!("Saved sample grid to {}", output_path);

    if let Some(dir) = individual {
        let paths = save_individual(&samples, &dir, "sample")?;
        info!("Saved {} individual samples to {}", paths.len(), dir);
    }

    Ok(())
}

/// Render a latent-space interpolation strip
fn interpolate(config_path: &str, model_path: &str, steps: i64, output_path: &str) -> Result<()> {
    if steps < 2 {
        anyhow::bail!("Interpolation needs at least 2 steps");
    }

    let device = load_config(config_path, None)?.get_device();
    let checkpoint = resolve_checkpoint(model_path)?;
    let model = model_from_checkpoint(&checkpoint, device)?;

    let endpoints = model.sample_noise(2);
    let images = model.interpolate(&endpoints.get(0), &endpoints.get(1), steps);

    save_grid(&images, steps as usize, 2, output_path)?;
    info!("Saved {}-step interpolation to {}", steps, output_path);

    Ok(())
}

/// Initialize default configuration file
fn init_config(output_path: &str, arch: Architecture) -> Result<()> {
    let config = match arch {
        Architecture::Wgan => Config::default(),
        Architecture::Sagan => Config::sagan(),
    };
    config.save(output_path)?;

    info!("Created default {} configuration at {}", arch, output_path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use animal_art_gan::model::ImageSize;
    use animal_art_gan::utils::save_checkpoint;
    use image::{Rgb, RgbImage};
    use tch::{Device, Tensor};
    use tempfile::tempdir;

    fn small_gan(image_size: ImageSize) -> GanConfig {
        GanConfig {
            architecture: Architecture::Wgan,
            image_size,
            latent_dim: 16,
            ngf: 8,
            ndf: 8,
            kernel_size: 4,
            channels: 3,
        }
    }

    fn write_images(dir: &Path, count: u32) {
        std::fs::create_dir_all(dir).unwrap();
        for i in 0..count {
            RgbImage::from_pixel(150, 140, Rgb([30 * i as u8, 90, 160]))
                .save(dir.join(format!("fox_{}.png", i)))
                .unwrap();
        }
    }

    #[test]
    fn test_resolve_checkpoint_accepts_parent_directory() {
        let dir = tempdir().unwrap();
        let root = dir.path().to_str().unwrap();
        assert!(resolve_checkpoint(root).is_err());

        let model = Gan::new(small_gan(ImageSize::S64), Device::Cpu).unwrap();
        let metrics = TrainingMetrics::new();
        for epoch in [1, 3, 2] {
            save_checkpoint(&model, &metrics, epoch, epoch, dir.path()).unwrap();
        }

        let newest = resolve_checkpoint(root).unwrap();
        assert!(newest.ends_with("checkpoint_epoch_0003"));

        // A checkpoint directory resolves to itself
        let direct = dir.path().join("checkpoint_epoch_0001");
        assert_eq!(resolve_checkpoint(direct.to_str().unwrap()).unwrap(), direct);
    }

    #[test]
    fn test_resume_loads_images_at_checkpoint_size() {
        let dir = tempdir().unwrap();
        let checkpoints = dir.path().join("checkpoints");
        let model = Gan::new(small_gan(ImageSize::S128), Device::Cpu).unwrap();
        save_checkpoint(&model, &TrainingMetrics::new(), 4, 40, &checkpoints).unwrap();

        let data_dir = dir.path().join("data/fox");
        write_images(&data_dir, 2);

        let mut config = Config::default();
        config.data.image_dir = dir.path().join("data").to_string_lossy().to_string();
        config.data.hflip = false;
        config.training.checkpoint_dir = checkpoints.to_string_lossy().to_string();
        assert_eq!(config.data.image_size, 64);

        let (resumed, epoch, gen_iterations, _) =
            prepare_model(&config, Some("latest"), Device::Cpu).unwrap();
        assert_eq!((epoch, gen_iterations), (4, 40));
        assert_eq!(resumed.image_size(), ImageSize::S128);

        let images = load_images(&config, resumed.config()).unwrap();
        assert_eq!(images.shape(), &[2, 3, 128, 128]);

        let values: Vec<f32> = images.iter().copied().collect();
        let batch = Tensor::from_slice(&values).view([2, 3, 128, 128]);
        assert_eq!(resumed.critique(&batch).size(), vec![2]);
    }

    #[test]
    fn test_fresh_model_follows_config() {
        let mut config = Config::default();
        config.model.ngf = 8;
        config.model.ndf = 8;
        let (model, epoch, gen_iterations, metrics) =
            prepare_model(&config, None, Device::Cpu).unwrap();
        assert_eq!((epoch, gen_iterations), (0, 0));
        assert_eq!(metrics.num_epochs(), 0);
        assert_eq!(model.config(), &config.gan_config().unwrap());
    }
}
