//! Append-only on-disk log produced in Pass 1 and consumed in Pass 2.
//!
//! One JSON line per processed page, so Pass 2 can stream the work list
//! without Pass 1 ever holding the whole document in memory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::domain::BlockType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripEntry {
    pub strip_id: String,
    pub path: PathBuf,
    /// Member block ids ordered top-to-bottom.
    pub block_ids: Vec<String>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CropEntry {
    pub block_id: String,
    pub block_type: BlockType,
    pub page_index: u32,
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub is_stamp: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageManifest {
    pub page_index: u32,
    pub raster_width: u32,
    pub raster_height: u32,
    pub strips: Vec<StripEntry>,
    pub images: Vec<CropEntry>,
}

impl PageManifest {
    pub fn unit_count(&self) -> usize {
        self.strips.len() + self.images.len()
    }
}

/// Append-only writer over the JSON Lines manifest file.
pub struct ManifestWriter {
    file: fs::File,
    path: PathBuf,
}

impl ManifestWriter {
    pub async fn create(path: &Path) -> std::io::Result<Self> {
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub async fn append(&mut self, page: &PageManifest) -> std::io::Result<()> {
        let mut line = serde_json::to_string(page)?;
        line.push('\n');
        self.file.write_all(line.as_bytes()).await?;
        self.file.flush().await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub async fn load_manifest(path: &Path) -> std::io::Result<Vec<PageManifest>> {
    let raw = fs::read_to_string(path).await?;
    let mut pages = Vec::new();
    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let page: PageManifest = serde_json::from_str(line)?;
        pages.push(page);
    }
    Ok(pages)
}

/// Remove crop images and the manifest itself; crop PDFs survive for the
/// artifact phase.
pub async fn cleanup_manifest_files(path: &Path) {
    let pages = match load_manifest(path).await {
        Ok(pages) => pages,
        Err(_) => Vec::new(),
    };
    for page in pages {
        for strip in page.strips {
            let _ = fs::remove_file(&strip.path).await;
        }
        for image in page.images {
            let _ = fs::remove_file(&image.path).await;
        }
    }
    let _ = fs::remove_file(path).await;
}
