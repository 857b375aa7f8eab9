//! Image acquisition pipeline: download, validate and deterministically
//! name breed photos into a training-data directory tree.
//!
//! Files land at `{sink}/{breed}/{breed}_{index}_{hash8}{ext}` where
//! `hash8` derives from the source URL, so the path is known before any
//! bytes move and re-runs skip work already on disk.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ImagesConfig;
use crate::error::FetchError;
use crate::retry::RetryConfig;
use crate::scraper::fetcher::Fetcher;
use crate::types::{BreedRecord, ImageAsset};

/// First 8 hex characters of the SHA-256 of the source URL
fn url_hash8(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let hex = format!("{:x}", digest);
    hex[..8].to_string()
}

/// File extension from the URL path; defaults to `.jpg` when the URL
/// has none worth keeping
fn extension_for(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    match Path::new(path).extension().and_then(|e| e.to_str()) {
        Some(ext) if !ext.is_empty() && ext.len() <= 4 => format!(".{}", ext.to_lowercase()),
        _ => ".jpg".to_string(),
    }
}

/// Deterministic target path for one image of one breed
pub fn image_path(sink: &Path, breed: &str, index: usize, url: &str) -> PathBuf {
    let file_name = format!("{}_{}_{}{}", breed, index, url_hash8(url), extension_for(url));
    sink.join(breed).join(file_name)
}

/// Downloads a breed record's images into the sink directory
pub struct ImagePipeline {
    fetcher: Fetcher,
    sink_dir: PathBuf,
}

impl ImagePipeline {
    pub fn new(config: &ImagesConfig, user_agent: &str) -> anyhow::Result<Self> {
        let fetcher = Fetcher::with_policy(
            user_agent,
            Duration::from_millis(config.download_delay_ms),
            RetryConfig::download(),
        )?;
        Ok(Self {
            fetcher,
            sink_dir: PathBuf::from(&config.sink_dir),
        })
    }

    /// Download every image URL on the record. Assets that fail
    /// validation come back with `valid: false`; nothing here aborts
    /// the batch.
    pub async fn download_images(&self, record: &BreedRecord) -> Vec<ImageAsset> {
        let mut assets = Vec::new();
        for (index, url) in record.images.iter().enumerate() {
            match self.download_one(&record.name, index, url).await {
                Ok(asset) | Err(asset) => assets.push(asset),
            }
        }

        let valid = assets.iter().filter(|a| a.valid).count();
        info!(
            "{}: {} images valid, {} failed",
            record.name,
            valid,
            assets.len() - valid
        );
        assets
    }

    /// Download and validate a single image; `Err` carries the failed
    /// asset record
    async fn download_one(
        &self,
        breed: &str,
        index: usize,
        url: &str,
    ) -> Result<ImageAsset, ImageAsset> {
        let path = image_path(&self.sink_dir, breed, index, url);

        // Idempotent re-run: the deterministic path is the dedup record
        if path.exists() {
            debug!("already downloaded: {}", path.display());
            return Ok(existing_asset(url, &path).await);
        }

        if let Some(dir) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                return Err(failed_asset(url, &path, &format!("mkdir failed: {}", e)));
            }
        }

        let (bytes, content_type) = match self.fetcher.fetch_bytes(url).await {
            Ok(result) => result,
            Err(e) => return Err(failed_asset(url, &path, &e.to_string())),
        };

        if let Some(ct) = &content_type {
            if !ct.starts_with("image/") {
                let reason = FetchError::ContentType(ct.clone()).to_string();
                warn!("{}: {}", url, reason);
                return Err(failed_asset(url, &path, &reason));
            }
        }

        if let Err(e) = tokio::fs::write(&path, &bytes).await {
            return Err(failed_asset(url, &path, &format!("write failed: {}", e)));
        }

        // Decode the written file to confirm it is structurally a
        // valid image; delete it when it is not
        let dimensions = match image::open(&path) {
            Ok(img) => (img.width(), img.height()),
            Err(e) => {
                warn!("invalid image {} from {}: {}", path.display(), url, e);
                let _ = tokio::fs::remove_file(&path).await;
                return Err(failed_asset(url, &path, &format!("decode failed: {}", e)));
            }
        };

        let content_hash = format!("{:x}", Sha256::digest(&bytes));
        debug!(
            "downloaded {} ({}x{})",
            path.display(),
            dimensions.0,
            dimensions.1
        );

        Ok(ImageAsset {
            source_url: url.to_string(),
            content_hash,
            local_path: path,
            dimensions,
            valid: true,
        })
    }
}

/// Asset record for a file already present from a previous run
async fn existing_asset(url: &str, path: &Path) -> ImageAsset {
    let (content_hash, dimensions, valid) = match tokio::fs::read(path).await {
        Ok(bytes) => {
            let hash = format!("{:x}", Sha256::digest(&bytes));
            match image::load_from_memory(&bytes) {
                Ok(img) => (hash, (img.width(), img.height()), true),
                Err(_) => (hash, (0, 0), false),
            }
        }
        Err(_) => (String::new(), (0, 0), false),
    };
    ImageAsset {
        source_url: url.to_string(),
        content_hash,
        local_path: path.to_path_buf(),
        dimensions,
        valid,
    }
}

fn failed_asset(url: &str, path: &Path, reason: &str) -> ImageAsset {
    debug!("image failed: {} ({})", url, reason);
    ImageAsset {
        source_url: url.to_string(),
        content_hash: String::new(),
        local_path: path.to_path_buf(),
        dimensions: (0, 0),
        valid: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImagesConfig;
    use crate::types::BreedRecord;
    use tempfile::TempDir;

    fn record_with_images(name: &str, images: Vec<String>) -> BreedRecord {
        BreedRecord {
            name: name.to_string(),
            prices: Vec::new(),
            availability: Vec::new(),
            description: String::new(),
            location: None,
            images,
            source_url: "https://hatchery.example/products/test".to_string(),
        }
    }

    fn pipeline_into(dir: &TempDir) -> ImagePipeline {
        let config = ImagesConfig {
            sink_dir: dir.path().to_string_lossy().to_string(),
            download_delay_ms: 1,
        };
        ImagePipeline::new(&config, "TestAgent/1.0").unwrap()
    }

    #[test]
    fn test_deterministic_image_path() {
        let a = image_path(
            Path::new("/sink"),
            "Buff_Orpington",
            0,
            "https://cdn.example/buff.jpg",
        );
        let b = image_path(
            Path::new("/sink"),
            "Buff_Orpington",
            0,
            "https://cdn.example/buff.jpg",
        );
        assert_eq!(a, b);
        assert!(a.starts_with("/sink/Buff_Orpington"));
        let name = a.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("Buff_Orpington_0_"));
        assert!(name.ends_with(".jpg"));
    }

    #[test]
    fn test_distinct_urls_get_distinct_paths() {
        let a = image_path(Path::new("/s"), "Silkie", 0, "https://cdn.example/a.jpg");
        let b = image_path(Path::new("/s"), "Silkie", 0, "https://cdn.example/b.jpg");
        assert_ne!(a, b);
    }

    #[test]
    fn test_extension_default_and_case() {
        assert_eq!(extension_for("https://cdn.example/a.PNG"), ".png");
        assert_eq!(extension_for("https://cdn.example/a.webp?x=1"), ".webp");
        assert_eq!(extension_for("https://cdn.example/no-extension"), ".jpg");
        assert_eq!(extension_for("https://cdn.example/weird.verylongext"), ".jpg");
    }

    #[tokio::test]
    async fn test_existing_file_skips_download() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline_into(&dir);
        let url = "https://cdn.example/silkie.png";

        // Seed a real image at the deterministic path; the pipeline
        // must not touch the network for it
        let path = image_path(dir.path(), "Silkie", 0, url);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let img = image::RgbImage::from_pixel(2, 3, image::Rgb([200, 150, 40]));
        img.save(&path).unwrap();

        let record = record_with_images("Silkie", vec![url.to_string()]);
        let assets = pipeline.download_images(&record).await;

        assert_eq!(assets.len(), 1);
        assert!(assets[0].valid);
        assert_eq!(assets[0].dimensions, (2, 3));
        assert_eq!(assets[0].local_path, path);
        assert!(!assets[0].content_hash.is_empty());
    }

    #[tokio::test]
    async fn test_rerun_yields_identical_file_set() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline_into(&dir);
        let url = "https://cdn.example/buff.png";

        let path = image_path(dir.path(), "Buff_Orpington", 0, url);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        image::RgbImage::from_pixel(1, 1, image::Rgb([0, 0, 0]))
            .save(&path)
            .unwrap();

        let record = record_with_images("Buff_Orpington", vec![url.to_string()]);
        let first = pipeline.download_images(&record).await;
        let second = pipeline.download_images(&record).await;

        let files: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .collect();
        assert_eq!(files.len(), 1);
        assert_eq!(first[0].local_path, second[0].local_path);
        assert_eq!(first[0].content_hash, second[0].content_hash);
    }
}
