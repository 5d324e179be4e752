//! Training module for WGAN and SAGAN
//!
//! This module provides:
//! - Training loops with the WGAN critic schedule and SAGAN alternation
//! - Loss functions (Wasserstein, hinge, gradient penalty)
//! - Training configuration and metrics

mod losses;
mod metrics;
mod trainer;

pub use losses::{
    critic_loss_wasserstein, discriminator_loss_hinge, generator_loss_hinge,
    generator_loss_wasserstein, gradient_penalty, wasserstein_estimate,
};
pub use metrics::{EMATracker, TrainingMetrics};
pub use trainer::{
    critic_iterations, sample_path, Trainer, TrainingConfig, BURST_CRITIC_ITERATIONS, BURST_EVERY,
    WARMUP_GEN_ITERATIONS,
};
