//! Checkpoint save/load utilities
//!
//! Provides functions for saving and loading model checkpoints
//! along with training state. Each checkpoint is a directory
//! `checkpoint_epoch_NNNN` holding both weight files, `meta.json`
//! and the metrics recorded so far.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tch::Device;

use crate::model::{Gan, GanConfig};
use crate::training::TrainingMetrics;

const CHECKPOINT_PREFIX: &str = "checkpoint_epoch_";
const GENERATOR_FILE: &str = "generator.pt";
const DISCRIMINATOR_FILE: &str = "discriminator.pt";
const META_FILE: &str = "meta.json";
const METRICS_FILE: &str = "metrics.csv";

/// Checkpoint metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    /// Completed epochs
    pub epoch: usize,
    /// Generator updates performed so far
    pub gen_iterations: usize,
    /// Generator loss at checkpoint
    pub gen_loss: f64,
    /// Critic loss at checkpoint
    pub critic_loss: f64,
    /// Timestamp of checkpoint
    pub timestamp: String,
    /// Model shape needed to rebuild the networks
    pub config: GanConfig,
}

/// Save a complete checkpoint (model + metadata)
///
/// # Arguments
///
/// * `model` - GAN model to save
/// * `metrics` - Training metrics
/// * `epoch` - Completed epochs
/// * `gen_iterations` - Generator updates so far
/// * `dir` - Directory to save checkpoint
///
/// # Returns
///
/// Path to saved checkpoint
pub fn save_checkpoint<P: AsRef<Path>>(
    model: &Gan,
    metrics: &TrainingMetrics,
    epoch: usize,
    gen_iterations: usize,
    dir: P,
) -> anyhow::Result<PathBuf> {
    let checkpoint_dir = dir.as_ref().join(format!("{}{:04}", CHECKPOINT_PREFIX, epoch));
    std::fs::create_dir_all(&checkpoint_dir)?;

    // Save model weights
    model.save(
        checkpoint_dir.join(GENERATOR_FILE),
        checkpoint_dir.join(DISCRIMINATOR_FILE),
    )?;

    let meta = CheckpointMeta {
        epoch,
        gen_iterations,
        gen_loss: metrics.latest_gen_loss().unwrap_or(0.0),
        critic_loss: metrics.latest_critic_loss().unwrap_or(0.0),
        timestamp: chrono::Utc::now().to_rfc3339(),
        config: model.config().clone(),
    };

    let meta_json = serde_json::to_string_pretty(&meta)?;
    std::fs::write(checkpoint_dir.join(META_FILE), meta_json)?;

    metrics.save_csv(checkpoint_dir.join(METRICS_FILE))?;

    tracing::debug!("Wrote checkpoint files to {}", checkpoint_dir.display());
    Ok(checkpoint_dir)
}

/// Load checkpoint metadata
pub fn load_checkpoint_meta<P: AsRef<Path>>(checkpoint_dir: P) -> anyhow::Result<CheckpointMeta> {
    let meta_path = checkpoint_dir.as_ref().join(META_FILE);
    let content = std::fs::read_to_string(&meta_path)?;
    let meta: CheckpointMeta = serde_json::from_str(&content)?;
    Ok(meta)
}

/// Load a complete checkpoint
///
/// # Arguments
///
/// * `model` - GAN model to load weights into; must have the checkpoint's shape
/// * `checkpoint_dir` - Directory containing checkpoint
///
/// # Returns
///
/// Tuple of (epoch, gen_iterations, metrics)
pub fn load_checkpoint<P: AsRef<Path>>(
    model: &mut Gan,
    checkpoint_dir: P,
) -> anyhow::Result<(usize, usize, TrainingMetrics)> {
    let checkpoint_dir = checkpoint_dir.as_ref();
    let meta = load_checkpoint_meta(checkpoint_dir)?;

    if &meta.config != model.config() {
        anyhow::bail!(
            "Checkpoint {} was saved for {:?}, model is {:?}",
            checkpoint_dir.display(),
            meta.config,
            model.config()
        );
    }

    model.load(
        checkpoint_dir.join(GENERATOR_FILE),
        checkpoint_dir.join(DISCRIMINATOR_FILE),
    )?;

    let metrics_path = checkpoint_dir.join(METRICS_FILE);
    let metrics = if metrics_path.exists() {
        TrainingMetrics::load_csv(&metrics_path)?
    } else {
        TrainingMetrics::new()
    };

    tracing::info!(
        "Loaded checkpoint from {} (epoch {})",
        checkpoint_dir.display(),
        meta.epoch
    );
    Ok((meta.epoch, meta.gen_iterations, metrics))
}

/// Rebuild a GAN from the shape stored in a checkpoint and load its weights
pub fn model_from_checkpoint<P: AsRef<Path>>(checkpoint_dir: P, device: Device) -> anyhow::Result<Gan> {
    let checkpoint_dir = checkpoint_dir.as_ref();
    let meta = load_checkpoint_meta(checkpoint_dir)?;
    let mut model = Gan::new(meta.config, device)?;
    model.load(
        checkpoint_dir.join(GENERATOR_FILE),
        checkpoint_dir.join(DISCRIMINATOR_FILE),
    )?;
    Ok(model)
}

/// Epoch number encoded in a checkpoint directory name
fn checkpoint_epoch(name: &str) -> Option<usize> {
    name.strip_prefix(CHECKPOINT_PREFIX)?.parse().ok()
}

/// Checkpoint directories ordered by epoch
fn checkpoint_dirs(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut checkpoints: Vec<(usize, PathBuf)> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|e| {
            let epoch = checkpoint_epoch(e.file_name().to_str()?)?;
            Some((epoch, e.path()))
        })
        .collect();

    checkpoints.sort_by_key(|(epoch, _)| *epoch);
    Ok(checkpoints.into_iter().map(|(_, path)| path).collect())
}

/// Find the latest checkpoint in a directory
pub fn find_latest_checkpoint<P: AsRef<Path>>(dir: P) -> anyhow::Result<Option<PathBuf>> {
    Ok(checkpoint_dirs(dir.as_ref())?.pop())
}

/// List all readable checkpoints in a directory, oldest first
pub fn list_checkpoints<P: AsRef<Path>>(dir: P) -> anyhow::Result<Vec<(PathBuf, CheckpointMeta)>> {
    Ok(checkpoint_dirs(dir.as_ref())?
        .into_iter()
        .filter_map(|path| load_checkpoint_meta(&path).ok().map(|meta| (path, meta)))
        .collect())
}
