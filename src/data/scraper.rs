//! Web scraper for building the animal image dataset
//!
//! Pages through an image search endpoint for every configured query,
//! pulls candidate image links out of the returned HTML and downloads them
//! with bounded concurrency. Every download is decoded before it is kept,
//! so the dataset only ever contains readable images of a usable size.
//! Files are named by the SHA-256 of their bytes which de-duplicates
//! across queries, pages and repeated runs.

use futures::stream::{self, StreamExt};
use image::ImageFormat;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

/// Default search endpoint; `{query}`, `{page}` and `{offset}` are substituted
const DEFAULT_SEARCH_URL: &str = "https://www.bing.com/images/async?q={query}&first={offset}&count=35";

/// Results per search page, used to derive `{offset}`
const RESULTS_PER_PAGE: usize = 35;

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Errors raised while scraping a single page or image
#[derive(Error, Debug)]
pub enum ScrapeError {
    /// Transport-level failure
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    /// Payload larger than the configured limit
    #[error("{url} exceeds the {limit} byte limit")]
    TooLarge { url: String, limit: usize },

    /// Payload is not an image we can decode
    #[error("{url} is not a decodable image: {source}")]
    Decode {
        url: String,
        #[source]
        source: image::ImageError,
    },

    /// Image decoded but is too small to train on
    #[error("{url} is {width}x{height}, below the {min}px minimum")]
    TooSmall {
        url: String,
        width: u32,
        height: u32,
        min: u32,
    },

    /// Invalid scraper configuration
    #[error("Invalid scraper configuration: {0}")]
    Config(String),

    /// Filesystem failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Scraper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeConfig {
    /// Search terms, one output folder each
    pub queries: Vec<String>,
    /// Images to keep per query
    pub images_per_query: usize,
    /// Simultaneous downloads
    pub concurrency: usize,
    /// Pause between search pages in milliseconds
    pub delay_ms: u64,
    /// Largest accepted download in bytes
    pub max_bytes: usize,
    /// Smallest accepted image side in pixels
    pub min_dimension: u32,
    /// Give up on a query after this many result pages
    pub max_pages: usize,
    /// Search endpoint template
    pub search_url: String,
    /// Root folder for downloaded images
    pub output_dir: String,
    /// User agent sent with every request
    pub user_agent: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            queries: vec![
                "cat".to_string(),
                "dog".to_string(),
                "fox".to_string(),
                "owl".to_string(),
            ],
            images_per_query: 100,
            concurrency: 8,
            delay_ms: 100,
            max_bytes: 10 * 1024 * 1024,
            min_dimension: 64,
            max_pages: 20,
            search_url: DEFAULT_SEARCH_URL.to_string(),
            output_dir: "data/raw".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: 30,
        }
    }
}

impl ScrapeConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ScrapeError> {
        if self.concurrency == 0 {
            return Err(ScrapeError::Config("concurrency must be > 0".to_string()));
        }
        if self.max_bytes == 0 {
            return Err(ScrapeError::Config("max_bytes must be > 0".to_string()));
        }
        if !self.search_url.contains("{query}") {
            return Err(ScrapeError::Config(
                "search_url must contain a {query} placeholder".to_string(),
            ));
        }
        Ok(())
    }
}

/// A decoded, validated download
#[derive(Debug, Clone)]
pub struct DownloadedImage {
    pub url: String,
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    /// Hex SHA-256 of `bytes`
    pub sha256: String,
}

impl DownloadedImage {
    /// File name derived from the content hash and detected format
    pub fn file_name(&self) -> String {
        let ext = self.format.extensions_str().first().copied().unwrap_or("img");
        format!("{}.{}", self.sha256, ext)
    }
}

/// One row of the scrape manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedRecord {
    pub label: String,
    pub url: String,
    pub path: String,
    pub width: u32,
    pub height: u32,
    pub sha256: String,
}

/// Outcome of a full scrape
#[derive(Debug, Clone, Default)]
pub struct ScrapeSummary {
    /// Images saved per label, in query order
    pub per_label: Vec<(String, usize)>,
    /// Path of the manifest that was appended to
    pub manifest: PathBuf,
}

impl ScrapeSummary {
    pub fn total(&self) -> usize {
        self.per_label.iter().map(|(_, n)| n).sum()
    }
}

/// Pulls image links out of search-result HTML
#[derive(Debug, Clone)]
pub struct LinkExtractor {
    murl: Regex,
    img_src: Regex,
}

impl LinkExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            // Full-size links embedded as JSON in result metadata
            murl: Regex::new(r#""murl"\s*:\s*"([^"]+)""#)?,
            img_src: Regex::new(r#"(?i)<img[^>]*?\s(?:data-src|src)\s*=\s*["']([^"']+)["']"#)?,
        })
    }

    /// Candidate image URLs in page order, absolute and de-duplicated
    ///
    /// # Arguments
    ///
    /// * `html` - Raw page body
    /// * `page_url` - URL the page was fetched from, for relative links
    pub fn extract(&self, html: &str, page_url: &str) -> Vec<String> {
        let html = html
            .replace("&quot;", "\"")
            .replace("&amp;", "&")
            .replace("\\/", "/");
        let base = Url::parse(page_url).ok();

        let candidates = self
            .murl
            .captures_iter(&html)
            .chain(self.img_src.captures_iter(&html))
            .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim().to_string()));

        let mut seen = HashSet::new();
        let mut urls = Vec::new();

        for link in candidates {
            if link.starts_with("data:") {
                continue;
            }
            let resolved = match Url::parse(&link) {
                Ok(url) => Some(url),
                Err(_) => base.as_ref().and_then(|b| b.join(&link).ok()),
            };
            let Some(resolved) = resolved else {
                continue;
            };
            if resolved.scheme() != "http" && resolved.scheme() != "https" {
                continue;
            }
            let resolved = resolved.to_string();
            if seen.insert(resolved.clone()) {
                urls.push(resolved);
            }
        }

        urls
    }
}

/// Folder name for a query: lowercase, non-alphanumerics collapsed to `_`
pub fn sanitize_label(query: &str) -> String {
    let mut label = String::with_capacity(query.len());
    for c in query.trim().to_lowercase().chars() {
        if c.is_alphanumeric() {
            label.push(c);
        } else if !label.ends_with('_') {
            label.push('_');
        }
    }
    let label = label.trim_matches('_').to_string();
    if label.is_empty() {
        "unlabeled".to_string()
    } else {
        label
    }
}

/// Image search scraper
#[derive(Debug, Clone)]
pub struct ImageScraper {
    client: Client,
    config: ScrapeConfig,
    extractor: LinkExtractor,
}

impl ImageScraper {
    /// Create a scraper with its own HTTP client
    pub fn new(config: ScrapeConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Self::with_client(client, config)
    }

    /// Create a scraper on top of an existing client
    pub fn with_client(client: Client, config: ScrapeConfig) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self {
            client,
            config,
            extractor: LinkExtractor::new()?,
        })
    }

    pub fn config(&self) -> &ScrapeConfig {
        &self.config
    }

    /// Search page URL for a query
    pub fn search_page_url(&self, query: &str, page: usize) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
        self.config
            .search_url
            .replace("{query}", &encoded)
            .replace("{page}", &page.to_string())
            .replace("{offset}", &(page * RESULTS_PER_PAGE).to_string())
    }

    /// Fetch the HTML of one search page
    pub async fn fetch_search_page(&self, query: &str, page: usize) -> Result<String, ScrapeError> {
        let url = self.search_page_url(query, page);
        debug!("Fetching search page {}", url);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ScrapeError::Status {
                url,
                status: response.status().as_u16(),
            });
        }
        Ok(response.text().await?)
    }

    /// Image URLs found on one search page
    pub async fn search(&self, query: &str, page: usize) -> Result<Vec<String>, ScrapeError> {
        let html = self.fetch_search_page(query, page).await?;
        Ok(self.extractor.extract(&html, &self.search_page_url(query, page)))
    }

    /// Download and validate a single image
    pub async fn download_image(&self, url: &str) -> Result<DownloadedImage, ScrapeError> {
        let limit = self.config.max_bytes;
        let mut response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(ScrapeError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        if response.content_length().is_some_and(|len| len as usize > limit) {
            return Err(ScrapeError::TooLarge {
                url: url.to_string(),
                limit,
            });
        }

        // Content-Length may be missing or wrong, so the limit also holds per chunk
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if bytes.len() + chunk.len() > limit {
                return Err(ScrapeError::TooLarge {
                    url: url.to_string(),
                    limit,
                });
            }
            bytes.extend_from_slice(&chunk);
        }

        let decode_err = |source: image::ImageError| ScrapeError::Decode {
            url: url.to_string(),
            source,
        };
        let format = image::guess_format(&bytes).map_err(decode_err)?;
        let decoded = image::load_from_memory_with_format(&bytes, format).map_err(decode_err)?;

        let (width, height) = (decoded.width(), decoded.height());
        if width.min(height) < self.config.min_dimension {
            return Err(ScrapeError::TooSmall {
                url: url.to_string(),
                width,
                height,
                min: self.config.min_dimension,
            });
        }

        Ok(DownloadedImage {
            url: url.to_string(),
            sha256: hex::encode(Sha256::digest(&bytes)),
            bytes,
            format,
            width,
            height,
        })
    }

    /// Scrape one query into `output_dir/<label>/`
    ///
    /// Stops once `images_per_query` new images are saved, the search
    /// stops returning unseen links, or `max_pages` pages were read.
    pub async fn scrape_query(&self, query: &str) -> anyhow::Result<Vec<ScrapedRecord>> {
        let label = sanitize_label(query);
        let dir = Path::new(&self.config.output_dir).join(&label);
        std::fs::create_dir_all(&dir)?;

        let target = self.config.images_per_query;
        let mut known_hashes = existing_hashes(&dir)?;
        let mut seen_urls: HashSet<String> = HashSet::new();
        let mut pending: VecDeque<String> = VecDeque::new();
        let mut records = Vec::new();
        let mut page = 0;
        let mut exhausted = false;

        info!("Scraping '{}' into {}", query, dir.display());

        while records.len() < target {
            if pending.is_empty() {
                if exhausted || page >= self.config.max_pages {
                    break;
                }
                if page > 0 {
                    tokio::time::sleep(Duration::from_millis(self.config.delay_ms)).await;
                }

                match self.search(query, page).await {
                    Ok(urls) => {
                        let before = pending.len();
                        pending.extend(urls.into_iter().filter(|u| seen_urls.insert(u.clone())));
                        if pending.len() == before {
                            exhausted = true;
                        }
                    }
                    Err(e) => {
                        warn!("Search page {} for '{}' failed: {}", page, query, e);
                        exhausted = true;
                    }
                }
                page += 1;
                continue;
            }

            let wanted = (target - records.len()).max(1);
            let take = wanted.min(pending.len());
            let batch: Vec<String> = pending.drain(..take).collect();

            let results: Vec<(String, Result<DownloadedImage, ScrapeError>)> = stream::iter(batch)
                .map(|url| async move {
                    let result = self.download_image(&url).await;
                    (url, result)
                })
                .buffer_unordered(self.config.concurrency)
                .collect()
                .await;

            for (url, result) in results {
                match result {
                    Ok(image) => {
                        if records.len() >= target {
                            break;
                        }
                        if !known_hashes.insert(image.sha256.clone()) {
                            debug!("Duplicate image {}", url);
                            continue;
                        }
                        let path = dir.join(image.file_name());
                        std::fs::write(&path, &image.bytes)?;
                        records.push(ScrapedRecord {
                            label: label.clone(),
                            url,
                            path: path.to_string_lossy().to_string(),
                            width: image.width,
                            height: image.height,
                            sha256: image.sha256,
                        });
                    }
                    Err(e) => warn!("Skipping {}: {}", url, e),
                }
            }
        }

        if records.len() < target {
            warn!(
                "Only saved {} of {} images for '{}'",
                records.len(),
                target,
                query
            );
        } else {
            info!("Saved {} images for '{}'", records.len(), query);
        }

        Ok(records)
    }

    /// Scrape every configured query and append to `manifest.csv`
    pub async fn scrape_all(&self) -> anyhow::Result<ScrapeSummary> {
        std::fs::create_dir_all(&self.config.output_dir)?;
        let manifest = Path::new(&self.config.output_dir).join("manifest.csv");
        let mut summary = ScrapeSummary {
            per_label: Vec::new(),
            manifest: manifest.clone(),
        };

        for query in &self.config.queries {
            let records = self.scrape_query(query).await?;
            append_manifest(&manifest, &records)?;
            summary.per_label.push((sanitize_label(query), records.len()));
        }

        info!(
            "Scraped {} images across {} queries",
            summary.total(),
            summary.per_label.len()
        );
        Ok(summary)
    }
}

/// Content hashes of images already saved in a label folder
fn existing_hashes(dir: &Path) -> std::io::Result<HashSet<String>> {
    let mut hashes = HashSet::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            if stem.len() == 64 && stem.chars().all(|c| c.is_ascii_hexdigit()) {
                hashes.insert(stem.to_string());
            }
        }
    }
    Ok(hashes)
}

/// Append records to the manifest, writing the header only for a new file
pub fn append_manifest(path: &Path, records: &[ScrapedRecord]) -> anyhow::Result<()> {
    if records.is_empty() {
        return Ok(());
    }
    let is_new = !path.exists();
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(is_new)
        .from_writer(file);

    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read every row of a manifest
pub fn load_manifest(path: &Path) -> anyhow::Result<Vec<ScrapedRecord>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut records = Vec::new();
    for record in reader.deserialize() {
        records.push(record?);
    }
    Ok(records)
}
