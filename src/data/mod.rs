//! Data module for collecting and preparing the animal image dataset
//!
//! This module provides:
//! - Web scraper for downloading images from an image search
//! - Image folder dataset with resizing and normalisation
//! - DataLoader for batching images

mod image_folder;
mod loader;
mod scraper;

pub use image_folder::{
    array_to_image, image_to_array, load_image, resize_and_crop, ImageEntry, ImageFolder,
    IMAGE_EXTENSIONS,
};
pub use loader::{batch_to_tensor, DataLoader};
pub use scraper::{
    append_manifest, load_manifest, sanitize_label, DownloadedImage, ImageScraper, LinkExtractor,
    ScrapeConfig, ScrapeError, ScrapeSummary, ScrapedRecord,
};
