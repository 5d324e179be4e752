//! Standalone binary for downloading training images
//!
//! Usage:
//!   cargo run --bin scrape_images -- --query "cat painting" --query "owl" --count 50

use anyhow::Result;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use animal_art_gan::data::{ImageScraper, ScrapeConfig};

/// Download animal images from an image search
#[derive(Parser)]
#[command(name = "scrape_images")]
#[command(about = "Download images per search query into labelled folders")]
struct Args {
    /// Search query; repeat for several animals
    #[arg(short, long, required = true)]
    query: Vec<String>,

    /// Images to download per query
    #[arg(short, long, default_value = "100")]
    count: usize,

    /// Output directory
    #[arg(short, long, default_value = "data/raw")]
    output: String,

    /// Parallel downloads
    #[arg(long, default_value = "8")]
    concurrency: usize,

    /// Smallest accepted width and height in pixels
    #[arg(long, default_value = "64")]
    min_dimension: u32,

    /// Verbosity level
    #[arg(short, long, default_value = "info")]
    verbosity: String,
}

fn log_level(verbosity: &str) -> Level {
    match verbosity.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level(&args.verbosity))
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = ScrapeConfig {
        queries: args.query,
        images_per_query: args.count,
        concurrency: args.concurrency,
        min_dimension: args.min_dimension,
        output_dir: args.output,
        ..ScrapeConfig::default()
    };

    let scraper = ImageScraper::new(config)?;
    let summary = scraper.scrape_all().await?;

    println!("\nDownloaded images:");
    for (label, count) in &summary.per_label {
        println!("  {:<24} {}", label, count);
    }
    println!("  {:<24} {}", "total", summary.total());

    info!("Manifest written to {}", summary.manifest.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_flag() {
        let args = Args::try_parse_from(["scrape_images", "-q", "owl", "-v", "DEBUG"]).unwrap();
        assert_eq!(log_level(&args.verbosity), Level::DEBUG);

        let args = Args::try_parse_from(["scrape_images", "--query", "owl"]).unwrap();
        assert_eq!(log_level(&args.verbosity), Level::INFO);
        assert_eq!(log_level("loud"), Level::INFO);
    }
}
