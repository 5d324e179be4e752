//! Utility module with helper functions
//!
//! This module provides:
//! - Configuration handling
//! - Checkpoint save/load utilities
//! - Sample grid rendering

mod checkpoint;
mod config;
mod image_grid;

pub use checkpoint::{
    find_latest_checkpoint, list_checkpoints, load_checkpoint, load_checkpoint_meta,
    model_from_checkpoint, save_checkpoint, CheckpointMeta,
};
pub use config::{
    ensure_config_exists, Config, DataConfig, ModelConfig, TrainingConfigFile,
};
pub use image_grid::{make_grid, save_grid, save_individual, tensor_to_images};
