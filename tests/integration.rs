//! Integration tests for the image-to-samples pipeline

use animal_art_gan::data::{DataLoader, ImageFolder};
use animal_art_gan::model::{Architecture, Gan, GanConfig, ImageSize};
use animal_art_gan::training::{Trainer, TrainingConfig};
use animal_art_gan::utils::{
    find_latest_checkpoint, list_checkpoints, load_checkpoint, model_from_checkpoint, save_grid,
    Config,
};
use image::{Rgb, RgbImage};
use std::path::Path;
use tch::Device;
use tempfile::tempdir;

/// Write a small labelled dataset of striped pictures
fn write_dataset(root: &Path) {
    for (label, colour) in [("cat", [200u8, 120, 40]), ("owl", [60, 60, 160])] {
        let dir = root.join(label);
        std::fs::create_dir_all(&dir).unwrap();
        for i in 0..3u32 {
            let img = RgbImage::from_fn(80 + i * 10, 72, |x, _| {
                if (x / 8) % 2 == 0 {
                    Rgb(colour)
                } else {
                    Rgb([255, 255, 255])
                }
            });
            img.save(dir.join(format!("{}_{}.png", label, i))).unwrap();
        }
    }
}

fn small_gan(architecture: Architecture) -> GanConfig {
    GanConfig {
        architecture,
        image_size: ImageSize::S64,
        latent_dim: 16,
        ngf: 8,
        ndf: 8,
        kernel_size: 4,
        channels: 3,
    }
}

fn training_config(root: &Path, epochs: usize) -> TrainingConfig {
    TrainingConfig {
        epochs,
        checkpoint_every: 1,
        sample_every: 1,
        checkpoint_dir: root.join("checkpoints").to_string_lossy().to_string(),
        sample_dir: root.join("samples").to_string_lossy().to_string(),
        num_samples: 4,
        ..TrainingConfig::default()
    }
}

/// Images on disk through training to a rendered grid from a reloaded model
#[test]
fn test_complete_pipeline() {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().join("data");
    write_dataset(&data_dir);

    let folder = ImageFolder::open(&data_dir, 64, true).unwrap();
    assert_eq!(folder.labels(), vec!["cat", "owl"]);
    let images = folder.load_all().unwrap();
    assert_eq!(images.shape(), &[12, 3, 64, 64]);

    let mut loader = DataLoader::with_seed(images, 4, true, true, 3);
    let mut model = Gan::new(small_gan(Architecture::Wgan), Device::Cpu).unwrap();

    let mut trainer = Trainer::new(training_config(dir.path(), 1), Device::Cpu);
    let metrics = trainer.train(&mut model, &mut loader).unwrap();
    assert_eq!(metrics.num_epochs(), 1);

    let checkpoint = find_latest_checkpoint(dir.path().join("checkpoints"))
        .unwrap()
        .unwrap();
    let reloaded = model_from_checkpoint(&checkpoint, Device::Cpu).unwrap();
    assert_eq!(reloaded.config(), model.config());

    let samples = reloaded.generate(6);
    let grid_path = dir.path().join("grid.png");
    save_grid(&samples, 3, 2, &grid_path).unwrap();

    let grid = image::open(&grid_path).unwrap();
    assert_eq!((grid.width(), grid.height()), (3 * 66 + 2, 2 * 66 + 2));
    assert!(dir.path().join("samples/epoch_0001.png").exists());
}

/// Training resumes from a checkpoint without repeating finished epochs
#[test]
fn test_resume_training() {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().join("data");
    write_dataset(&data_dir);

    let images = ImageFolder::open(&data_dir, 64, false)
        .unwrap()
        .load_all()
        .unwrap();

    let mut loader = DataLoader::new(images.clone(), 2, true, true);
    let mut model = Gan::new(small_gan(Architecture::Sagan), Device::Cpu).unwrap();
    Trainer::new(training_config(dir.path(), 1), Device::Cpu)
        .train(&mut model, &mut loader)
        .unwrap();

    let checkpoint = find_latest_checkpoint(dir.path().join("checkpoints"))
        .unwrap()
        .unwrap();
    let mut resumed = Gan::new(small_gan(Architecture::Sagan), Device::Cpu).unwrap();
    let (epoch, gen_iterations, metrics) = load_checkpoint(&mut resumed, &checkpoint).unwrap();
    assert_eq!(epoch, 1);
    assert_eq!(gen_iterations, 3);

    let mut loader = DataLoader::new(images, 2, true, true);
    let mut trainer =
        Trainer::new(training_config(dir.path(), 2), Device::Cpu).with_metrics(metrics);
    let metrics = trainer
        .train_from(&mut resumed, &mut loader, epoch, gen_iterations)
        .unwrap();

    assert_eq!(metrics.gen_iterations, vec![3, 6]);

    let epochs: Vec<usize> = list_checkpoints(dir.path().join("checkpoints"))
        .unwrap()
        .into_iter()
        .map(|(_, meta)| meta.epoch)
        .collect();
    assert_eq!(epochs, vec![1, 2]);
}

/// The default configuration builds a model that produces images
#[test]
fn test_config_builds_model() {
    let mut config = Config::sagan();
    config.model.ngf = 8;
    config.model.ndf = 8;
    config.model.latent_dim = 16;
    config.validate().unwrap();

    let model = Gan::new(config.gan_config().unwrap(), Device::Cpu).unwrap();
    let images = model.generate(2);
    assert_eq!(images.size(), vec![2, 3, 64, 64]);

    let max = images.abs().max().double_value(&[]);
    assert!(max <= 1.0);
}
