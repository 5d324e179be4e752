//! # Animal Art GAN
//!
//! This crate scrapes animal pictures from an image search, trains a
//! Wasserstein GAN or a Self-Attention GAN on them and renders grids of
//! generated samples.
//!
//! ## Modules
//!
//! - `data`: Image scraping, image folder dataset and batching
//! - `model`: WGAN and SAGAN architectures (generators and critics)
//! - `training`: Training loops, loss functions and metrics
//! - `utils`: Configuration, checkpoints and sample grids

pub mod data;
pub mod model;
pub mod training;
pub mod utils;

pub use data::{DataLoader, ImageFolder, ImageScraper, ScrapeConfig};
pub use model::{Architecture, Gan, GanConfig, ImageSize};
pub use training::{Trainer, TrainingConfig, TrainingMetrics};
pub use utils::{load_checkpoint, model_from_checkpoint, save_checkpoint, Config};
