//! Sample visualisation
//!
//! Converts generator output to images and tiles a batch into one grid
//! picture with black padding between the tiles.

use image::RgbImage;
use ndarray::{Array4, Axis};
use std::path::{Path, PathBuf};
use tch::{Device, Kind, Tensor};

use crate::data::array_to_image;

/// Copy an (N, C, H, W) tensor in [-1, 1] to an ndarray on the host
fn tensor_to_array(images: &Tensor) -> anyhow::Result<Array4<f32>> {
    let size = images.size();
    if size.len() != 4 {
        anyhow::bail!("Expected a 4D image batch, got shape {:?}", size);
    }
    let channels = size[1];
    if channels != 1 && channels != 3 {
        anyhow::bail!("Expected 1 or 3 channels, got {}", channels);
    }

    let flat = images
        .detach()
        .to_device(Device::Cpu)
        .to_kind(Kind::Float)
        .contiguous()
        .view([-1]);
    let values = Vec::<f32>::try_from(&flat)?;
    let shape = (
        size[0] as usize,
        size[1] as usize,
        size[2] as usize,
        size[3] as usize,
    );
    Ok(Array4::from_shape_vec(shape, values)?)
}

/// Convert every image of a batch to an RGB picture
pub fn tensor_to_images(images: &Tensor) -> anyhow::Result<Vec<RgbImage>> {
    let array = tensor_to_array(images)?;
    Ok(array.axis_iter(Axis(0)).map(array_to_image).collect())
}

/// Tile a batch of images into a single picture
///
/// # Arguments
///
/// * `images` - Tensor of shape (N, C, H, W) with values in [-1, 1]
/// * `nrow` - Images per grid row
/// * `padding` - Pixels of black border around each tile
pub fn make_grid(images: &Tensor, nrow: usize, padding: u32) -> anyhow::Result<RgbImage> {
    let tiles = tensor_to_images(images)?;
    if tiles.is_empty() {
        anyhow::bail!("Cannot build a grid from an empty batch");
    }

    let columns = nrow.clamp(1, tiles.len());
    let rows = tiles.len().div_ceil(columns);
    let (tile_width, tile_height) = tiles[0].dimensions();
    let cell_width = tile_width + padding;
    let cell_height = tile_height + padding;

    let mut grid = RgbImage::new(
        columns as u32 * cell_width + padding,
        rows as u32 * cell_height + padding,
    );

    for (i, tile) in tiles.iter().enumerate() {
        let x = (i % columns) as u32 * cell_width + padding;
        let y = (i / columns) as u32 * cell_height + padding;
        image::imageops::replace(&mut grid, tile, x as i64, y as i64);
    }

    Ok(grid)
}

/// Tile a batch into a grid and write it to `path`
pub fn save_grid<P: AsRef<Path>>(
    images: &Tensor,
    nrow: usize,
    padding: u32,
    path: P,
) -> anyhow::Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    make_grid(images, nrow, padding)?.save(path)?;
    Ok(())
}

/// Write each image of a batch to `dir/{prefix}_NNNN.png`
pub fn save_individual<P: AsRef<Path>>(
    images: &Tensor,
    dir: P,
    prefix: &str,
) -> anyhow::Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;

    let mut paths = Vec::new();
    for (i, image) in tensor_to_images(images)?.iter().enumerate() {
        let path = dir.join(format!("{}_{:04}.png", prefix, i));
        image.save(&path)?;
        paths.push(path);
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::tempdir;

    fn solid_batch(n: i64, channels: i64, value: f64) -> Tensor {
        Tensor::full([n, channels, 4, 6], value, (Kind::Float, Device::Cpu))
    }

    #[test]
    fn test_grid_dimensions() {
        // 5 images, 2 per row: 3 rows
        let grid = make_grid(&solid_batch(5, 3, 1.0), 2, 2).unwrap();
        assert_eq!(grid.dimensions(), (2 * (6 + 2) + 2, 3 * (4 + 2) + 2));

        // Fewer images than nrow: a single row of them
        let grid = make_grid(&solid_batch(3, 3, 1.0), 8, 0).unwrap();
        assert_eq!(grid.dimensions(), (18, 4));
    }

    #[test]
    fn test_grid_padding_is_black() {
        let grid = make_grid(&solid_batch(4, 3, 1.0), 2, 1).unwrap();
        assert_eq!(grid.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(grid.get_pixel(1, 1), &Rgb([255, 255, 255]));
        // Border between the two columns
        assert_eq!(grid.get_pixel(7, 1), &Rgb([0, 0, 0]));
        // Empty cell in a partly filled last row stays black
        let grid = make_grid(&solid_batch(3, 3, 1.0), 2, 1).unwrap();
        assert_eq!(grid.get_pixel(10, 7), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_grayscale_and_value_range() {
        let images = tensor_to_images(&solid_batch(2, 1, -1.0)).unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].dimensions(), (6, 4));
        assert_eq!(images[0].get_pixel(0, 0), &Rgb([0, 0, 0]));

        let clipped = tensor_to_images(&solid_batch(1, 3, 5.0)).unwrap();
        assert_eq!(clipped[0].get_pixel(2, 2), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_rejects_bad_shapes() {
        let flat = Tensor::zeros([4, 16], (Kind::Float, Device::Cpu));
        assert!(make_grid(&flat, 2, 2).is_err());
        assert!(make_grid(&solid_batch(2, 2, 0.0), 2, 2).is_err());
        assert!(make_grid(&solid_batch(0, 3, 0.0), 2, 2).is_err());
    }

    #[test]
    fn test_save_grid_and_individual() {
        let dir = tempdir().unwrap();
        let batch = solid_batch(3, 3, 0.0);

        let grid_path = dir.path().join("nested/grid.png");
        save_grid(&batch, 2, 2, &grid_path).unwrap();
        assert!(grid_path.exists());

        let paths = save_individual(&batch, dir.path().join("single"), "cat").unwrap();
        assert_eq!(paths.len(), 3);
        assert!(paths[2].ends_with("cat_0002.png"));
        let reloaded = image::open(&paths[0]).unwrap().to_rgb8();
        assert_eq!(reloaded.dimensions(), (6, 4));
    }
}
