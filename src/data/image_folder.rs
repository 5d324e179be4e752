//! Image folder dataset
//!
//! Loads every image below a root directory, resizes the shorter side to
//! the training resolution, centre-crops to a square and scales pixels to
//! [-1, 1] to match the generator's tanh output.

use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use ndarray::{s, Array3, Array4, ArrayView3, Axis};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// File extensions treated as images
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "gif", "webp"];

/// Label given to images directly under the root folder
const ROOT_LABEL: &str = "unlabeled";

/// One image file and the folder it came from
#[derive(Debug, Clone, PartialEq)]
pub struct ImageEntry {
    pub path: PathBuf,
    pub label: String,
}

/// Dataset of images on disk
#[derive(Debug, Clone)]
pub struct ImageFolder {
    root: PathBuf,
    image_size: u32,
    channels: usize,
    hflip: bool,
    entries: Vec<ImageEntry>,
}

impl ImageFolder {
    /// Index all images below `root`
    ///
    /// # Arguments
    ///
    /// * `root` - Dataset folder, usually one subfolder per animal
    /// * `image_size` - Side length of the square output images
    /// * `hflip` - Also emit a mirrored copy of every image
    pub fn open<P: AsRef<Path>>(root: P, image_size: u32, hflip: bool) -> anyhow::Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            anyhow::bail!("Image folder {} does not exist", root.display());
        }
        if image_size == 0 {
            anyhow::bail!("Image size must be > 0");
        }

        let mut files = Vec::new();
        collect_image_files(&root, &mut files)?;
        files.sort();

        if files.is_empty() {
            anyhow::bail!("No images found in {}", root.display());
        }

        let entries = files
            .into_iter()
            .map(|path| {
                let label = label_for(&root, &path);
                ImageEntry { path, label }
            })
            .collect();

        Ok(Self {
            root,
            image_size,
            channels: 3,
            hflip,
            entries,
        })
    }

    /// Load single-channel images instead of RGB
    pub fn grayscale(mut self) -> Self {
        self.channels = 1;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entries(&self) -> &[ImageEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Distinct labels in sorted order
    pub fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.entries.iter().map(|e| e.label.clone()).collect();
        labels.sort();
        labels.dedup();
        labels
    }

    /// Decode and stack every image
    ///
    /// Unreadable files are skipped with a warning.
    ///
    /// # Returns
    ///
    /// Array of shape (num_images, channels, size, size); twice as many
    /// images when mirroring is enabled.
    pub fn load_all(&self) -> anyhow::Result<Array4<f32>> {
        let mut images: Vec<Array3<f32>> = Vec::with_capacity(self.entries.len());

        for entry in &self.entries {
            match load_image(&entry.path, self.image_size, self.channels) {
                Ok(image) => {
                    if self.hflip {
                        images.push(image.slice(s![.., .., ..;-1]).to_owned());
                    }
                    images.push(image);
                }
                Err(e) => warn!("Skipping {}: {}", entry.path.display(), e),
            }
        }

        if images.is_empty() {
            anyhow::bail!("None of the images in {} could be loaded", self.root.display());
        }

        let views: Vec<ArrayView3<f32>> = images.iter().map(|img| img.view()).collect();
        let stacked = ndarray::stack(Axis(0), &views)?;

        info!(
            "Loaded {} images ({} files, {} labels) at {}x{}",
            stacked.shape()[0],
            self.entries.len(),
            self.labels().len(),
            self.image_size,
            self.image_size
        );
        Ok(stacked)
    }
}

fn collect_image_files(dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_image_files(&path, files)?;
        } else if has_image_extension(&path) {
            files.push(path);
        }
    }
    Ok(())
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn label_for(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let mut components = relative.components();
    match (components.next(), components.next()) {
        (Some(first), Some(_)) => first.as_os_str().to_string_lossy().to_string(),
        _ => ROOT_LABEL.to_string(),
    }
}

/// Resize so the shorter side equals `size`, then centre-crop to a square
pub fn resize_and_crop(image: &DynamicImage, size: u32) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    let scale = size as f64 / width.min(height) as f64;
    let new_width = ((width as f64 * scale).round() as u32).max(size);
    let new_height = ((height as f64 * scale).round() as u32).max(size);

    let resized = image.resize_exact(new_width, new_height, FilterType::Triangle);
    let x = (new_width - size) / 2;
    let y = (new_height - size) / 2;
    resized.crop_imm(x, y, size, size)
}

/// Pixel value in [0, 255] to [-1, 1]
fn normalize_pixel(p: u8) -> f32 {
    (p as f32 / 255.0 - 0.5) / 0.5
}

/// [-1, 1] back to a pixel value, clamping out-of-range inputs
fn denormalize_pixel(v: f32) -> u8 {
    ((v.clamp(-1.0, 1.0) * 0.5 + 0.5) * 255.0).round() as u8
}

/// Load one image as a (channels, size, size) array in [-1, 1]
pub fn load_image<P: AsRef<Path>>(path: P, size: u32, channels: usize) -> anyhow::Result<Array3<f32>> {
    let image = image::open(path.as_ref())?;
    Ok(image_to_array(&resize_and_crop(&image, size), channels))
}

/// Convert a decoded image to (channels, height, width) in [-1, 1]
pub fn image_to_array(image: &DynamicImage, channels: usize) -> Array3<f32> {
    let (width, height) = (image.width() as usize, image.height() as usize);

    if channels == 1 {
        let gray = image.to_luma8();
        Array3::from_shape_fn((1, height, width), |(_, y, x)| {
            normalize_pixel(gray.get_pixel(x as u32, y as u32)[0])
        })
    } else {
        let rgb = image.to_rgb8();
        Array3::from_shape_fn((3, height, width), |(c, y, x)| {
            normalize_pixel(rgb.get_pixel(x as u32, y as u32)[c])
        })
    }
}

/// Convert a (channels, height, width) array in [-1, 1] to an RGB image
///
/// Single-channel input is replicated across the three colour channels.
pub fn array_to_image(chw: ArrayView3<f32>) -> RgbImage {
    let (channels, height, width) = chw.dim();
    let mut image = RgbImage::new(width as u32, height as u32);

    for y in 0..height {
        for x in 0..width {
            let pixel = if channels == 1 {
                let v = denormalize_pixel(chw[[0, y, x]]);
                Rgb([v, v, v])
            } else {
                Rgb([
                    denormalize_pixel(chw[[0, y, x]]),
                    denormalize_pixel(chw[[1, y, x]]),
                    denormalize_pixel(chw[[2, y, x]]),
                ])
            };
            image.put_pixel(x as u32, y as u32, pixel);
        }
    }

    image
}
