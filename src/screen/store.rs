use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::Local;
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, DynamicImage, RgbaImage};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::types::error::StorageError;
use crate::types::screen::ScreenshotRef;

const FILE_PREFIX: &str = "screenshot_";
const FILE_EXT: &str = ".jpg";

/// Persists screenshots and hands back a stable reference.
#[async_trait]
pub trait ScreenshotStore: Send + Sync {
    async fn save(&self, image: Arc<RgbaImage>) -> Result<ScreenshotRef, StorageError>;

    /// Deletes artifacts older than `retention`, returning how many went away.
    async fn cleanup(&self, retention: Duration) -> Result<usize, StorageError>;
}

/// JPEG files named `screenshot_<yyyyMMdd_HHmmss>.jpg` under one directory.
pub struct JpegScreenshotStore {
    dir: PathBuf,
    quality: u8,
}

impl JpegScreenshotStore {
    pub fn new(dir: impl Into<PathBuf>, quality: u8) -> Self {
        Self {
            dir: dir.into(),
            quality: quality.clamp(1, 100),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn create_unique(&self, stamp: &str) -> Result<(tokio::fs::File, PathBuf), StorageError> {
        let mut attempt = 0u32;
        loop {
            let name = if attempt == 0 {
                format!("{}{}{}", FILE_PREFIX, stamp, FILE_EXT)
            } else {
                format!("{}{}_{}{}", FILE_PREFIX, stamp, attempt, FILE_EXT)
            };
            let path = self.dir.join(name);
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => return Ok((file, path)),
                Err(e) if e.kind() == IoErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

pub fn encode_jpeg(image: &RgbaImage, quality: u8) -> Result<Vec<u8>, StorageError> {
    let rgb = DynamicImage::ImageRgba8(image.clone()).into_rgb8();
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)
        .map_err(|e| StorageError::Encode(e.to_string()))?;
    Ok(buf)
}

/// Writes `bytes` to `file`. On failure the half-written file is removed.
async fn write_or_discard(mut file: tokio::fs::File, path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let written = match file.write_all(bytes).await {
        Ok(()) => file.flush().await,
        Err(e) => Err(e),
    };
    let Err(e) = written else {
        return Ok(());
    };
    drop(file);
    if let Err(remove) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %remove, "failed to remove partial screenshot");
    }
    Err(e.into())
}

fn is_artifact(name: &str) -> bool {
    name.starts_with(FILE_PREFIX) && name.ends_with(FILE_EXT)
}

#[async_trait]
impl ScreenshotStore for JpegScreenshotStore {
    async fn save(&self, image: Arc<RgbaImage>) -> Result<ScreenshotRef, StorageError> {
        let quality = self.quality;
        let bytes = tokio::task::spawn_blocking(move || encode_jpeg(&image, quality))
            .await
            .map_err(|e| StorageError::Join(e.to_string()))??;

        tokio::fs::create_dir_all(&self.dir).await?;
        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let (file, path) = self.create_unique(&stamp).await?;
        write_or_discard(file, &path, &bytes).await?;

        debug!(path = %path.display(), bytes = bytes.len(), "screenshot saved");
        Ok(ScreenshotRef::new(path.display().to_string()))
    }

    async fn cleanup(&self, retention: Duration) -> Result<usize, StorageError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let now = SystemTime::now();
        let mut deleted = 0usize;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !is_artifact(name) {
                continue;
            }
            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(m) => m,
                Err(e) => {
                    warn!(file = name, error = %e, "cannot read screenshot mtime");
                    continue;
                }
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age < retention {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => deleted += 1,
                Err(e) => warn!(file = name, error = %e, "failed to delete old screenshot"),
            }
        }
        if deleted > 0 {
            info!(deleted, dir = %self.dir.display(), "old screenshots removed");
        }
        Ok(deleted)
    }
}

/// Keeps encoded screenshots in memory. Used for dry runs.
#[derive(Default)]
pub struct MemoryScreenshotStore {
    saved: Mutex<Vec<(ScreenshotRef, SystemTime, (u32, u32))>>,
}

impl MemoryScreenshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.saved.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ScreenshotStore for MemoryScreenshotStore {
    async fn save(&self, image: Arc<RgbaImage>) -> Result<ScreenshotRef, StorageError> {
        let mut saved = self
            .saved
            .lock()
            .map_err(|e| StorageError::Encode(e.to_string()))?;
        let reference = ScreenshotRef::new(format!("memory://screenshot/{}", saved.len()));
        saved.push((reference.clone(), SystemTime::now(), image.dimensions()));
        Ok(reference)
    }

    async fn cleanup(&self, retention: Duration) -> Result<usize, StorageError> {
        let mut saved = self
            .saved
            .lock()
            .map_err(|e| StorageError::Encode(e.to_string()))?;
        let now = SystemTime::now();
        let before = saved.len();
        saved.retain(|(_, at, _)| now.duration_since(*at).unwrap_or_default() < retention);
        Ok(before - saved.len())
    }
}
