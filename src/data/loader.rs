//! DataLoader for batching and iterating over training images
//!
//! Provides batching for GAN training with support for:
//! - Random shuffling (optionally seeded)
//! - Drop last incomplete batch
//! - Conversion of batches to tensors on the training device

use ndarray::{Array4, ArrayView4, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tch::{Device, Tensor};

/// DataLoader for iterating over batched images
pub struct DataLoader {
    /// Full dataset of shape (num_images, channels, height, width)
    data: Array4<f32>,
    /// Batch size
    batch_size: usize,
    /// Whether to shuffle data each epoch
    shuffle: bool,
    /// Whether to drop the last incomplete batch
    drop_last: bool,
    /// Current indices for iteration
    indices: Vec<usize>,
    /// Current position in iteration
    current_idx: usize,
    rng: StdRng,
}

impl DataLoader {
    /// Create a new DataLoader
    ///
    /// # Arguments
    ///
    /// * `data` - 4D array of shape (num_images, channels, height, width)
    /// * `batch_size` - Number of images per batch
    /// * `shuffle` - Whether to shuffle data each epoch
    /// * `drop_last` - Whether to drop incomplete final batch
    pub fn new(data: Array4<f32>, batch_size: usize, shuffle: bool, drop_last: bool) -> Self {
        Self::build(data, batch_size, shuffle, drop_last, StdRng::from_entropy())
    }

    /// Create a DataLoader whose shuffling order is reproducible
    pub fn with_seed(
        data: Array4<f32>,
        batch_size: usize,
        shuffle: bool,
        drop_last: bool,
        seed: u64,
    ) -> Self {
        Self::build(data, batch_size, shuffle, drop_last, StdRng::seed_from_u64(seed))
    }

    fn build(
        data: Array4<f32>,
        batch_size: usize,
        shuffle: bool,
        drop_last: bool,
        rng: StdRng,
    ) -> Self {
        let num_samples = data.shape()[0];
        let indices: Vec<usize> = (0..num_samples).collect();

        let mut loader = Self {
            data,
            batch_size: batch_size.max(1),
            shuffle,
            drop_last,
            indices,
            current_idx: 0,
            rng,
        };

        if shuffle {
            loader.shuffle_indices();
        }

        loader
    }

    /// Get the number of batches per epoch
    pub fn num_batches(&self) -> usize {
        let num_samples = self.num_samples();
        if self.drop_last {
            num_samples / self.batch_size
        } else {
            (num_samples + self.batch_size - 1) / self.batch_size
        }
    }

    /// Get total number of images
    pub fn num_samples(&self) -> usize {
        self.data.shape()[0]
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Batches left before the epoch ends
    pub fn remaining_batches(&self) -> usize {
        let remaining = self.num_samples().saturating_sub(self.current_idx);
        if self.drop_last {
            remaining / self.batch_size
        } else {
            (remaining + self.batch_size - 1) / self.batch_size
        }
    }

    /// Shape of a single image (channels, height, width)
    pub fn image_shape(&self) -> (usize, usize, usize) {
        let shape = self.data.shape();
        (shape[1], shape[2], shape[3])
    }

    /// Shuffle indices for a new epoch
    fn shuffle_indices(&mut self) {
        self.indices.shuffle(&mut self.rng);
    }

    /// Reset for new epoch
    pub fn reset(&mut self) {
        self.current_idx = 0;
        if self.shuffle {
            self.shuffle_indices();
        }
    }

    /// Get next batch
    ///
    /// Returns None when epoch is complete
    pub fn next_batch(&mut self) -> Option<Array4<f32>> {
        let num_samples = self.indices.len();
        let start = self.current_idx;

        if start >= num_samples {
            return None;
        }

        let end = (start + self.batch_size).min(num_samples);

        // Skip incomplete batch if drop_last
        if self.drop_last && end - start < self.batch_size {
            return None;
        }

        let batch = self.data.select(Axis(0), &self.indices[start..end]);
        self.current_idx = end;
        Some(batch)
    }

    /// Next batch as a float tensor on `device`
    pub fn next_tensor(&mut self, device: Device) -> Option<Tensor> {
        self.next_batch().map(|batch| batch_to_tensor(&batch, device))
    }

    /// Iterate over all batches of a fresh epoch
    pub fn iter(&mut self) -> DataLoaderIter<'_> {
        self.reset();
        DataLoaderIter { loader: self }
    }

    /// Get a view of the underlying data
    pub fn data(&self) -> ArrayView4<'_, f32> {
        self.data.view()
    }
}

/// Copy an (N, C, H, W) batch into a tensor
pub fn batch_to_tensor(batch: &Array4<f32>, device: Device) -> Tensor {
    let shape: Vec<i64> = batch.shape().iter().map(|&d| d as i64).collect();
    let values: Vec<f32> = batch.iter().copied().collect();
    Tensor::from_slice(&values)
        .view(shape.as_slice())
        .to_device(device)
}

/// Iterator adapter for DataLoader
pub struct DataLoaderIter<'a> {
    loader: &'a mut DataLoader,
}

impl<'a> Iterator for DataLoaderIter<'a> {
    type Item = Array4<f32>;

    fn next(&mut self) -> Option<Self::Item> {
        self.loader.next_batch()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(n: usize) -> Array4<f32> {
        Array4::from_shape_fn((n, 1, 2, 2), |(i, _, _, _)| i as f32)
    }

    #[test]
    fn test_dataloader_basic() {
        // 10 images, 1 channel, 2x2
        let mut loader = DataLoader::new(numbered(10), 3, false, false);

        assert_eq!(loader.num_batches(), 4); // ceil(10/3) = 4
        assert_eq!(loader.num_samples(), 10);

        let mut batch_count = 0;
        while let Some(batch) = loader.next_batch() {
            batch_count += 1;
            if batch_count < 4 {
                assert_eq!(batch.shape()[0], 3);
            } else {
                assert_eq!(batch.shape()[0], 1); // Last batch has 1 image
            }
        }
        assert_eq!(batch_count, 4);
    }

    #[test]
    fn test_dataloader_drop_last() {
        let mut loader = DataLoader::new(numbered(10), 3, false, true);

        assert_eq!(loader.num_batches(), 3); // floor(10/3) = 3
        assert_eq!(loader.remaining_batches(), 3);

        let mut batch_count = 0;
        while let Some(batch) = loader.next_batch() {
            batch_count += 1;
            assert_eq!(batch.shape()[0], 3);
        }
        assert_eq!(batch_count, 3);
        assert_eq!(loader.remaining_batches(), 0);
    }

    #[test]
    fn test_dataloader_iter() {
        let mut loader = DataLoader::new(numbered(10), 5, false, true);

        let batches: Vec<_> = loader.iter().collect();
        assert_eq!(batches.len(), 2);
    }

    #[test]
    fn test_shuffle_covers_every_image_once() {
        let mut loader = DataLoader::with_seed(numbered(12), 4, true, false, 7);

        let mut seen: Vec<usize> = loader
            .iter()
            .flat_map(|batch| {
                batch
                    .outer_iter()
                    .map(|img| img[[0, 0, 0]] as usize)
                    .collect::<Vec<_>>()
            })
            .collect();
        seen.sort();
        assert_eq!(seen, (0..12).collect::<Vec<_>>());
    }

    #[test]
    fn test_seeded_shuffle_is_reproducible() {
        let mut a = DataLoader::with_seed(numbered(20), 5, true, false, 42);
        let mut b = DataLoader::with_seed(numbered(20), 5, true, false, 42);

        assert_eq!(a.next_batch(), b.next_batch());
    }

    #[test]
    fn test_next_tensor() {
        let mut loader = DataLoader::new(numbered(4), 2, false, true);
        let tensor = loader.next_tensor(Device::Cpu).unwrap();

        assert_eq!(tensor.size(), vec![2, 1, 2, 2]);
        assert_eq!(tensor.double_value(&[1, 0, 1, 1]), 1.0);
    }
}
