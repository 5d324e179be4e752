//! Model module containing the GAN architectures
//!
//! This module provides:
//! - Shared convolution blocks
//! - Wasserstein GAN generator and critic
//! - Spectral normalisation and self-attention layers
//! - Self-Attention GAN generator and discriminator
//! - `Gan` wrapper combining a generator with its critic

mod attention;
mod blocks;
mod gan;
mod sagan;
mod wgan;

pub use attention::{SelfAttention, SnConv2d, SnConvTranspose2d, SpectralNorm};
pub use blocks::{ConvBlock, DeconvBlock};
pub use gan::{Architecture, Gan, GanConfig, ImageSize, OptimizerKind};
pub use sagan::{SaganDiscriminator, SaganGenerator};
pub use wgan::{WganCritic, WganGenerator};
