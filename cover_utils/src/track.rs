//! Track Records
//!
//! Typed view of the metadata the download step hands over, and the per-track
//! record the orchestrator owns for one batch.
//!
//! Field fallback order when building a [`TrackRecord`]:
//! - image: the last thumbnail that has a `filepath`
//! - output directory: `requested_downloads[0].__finaldir`, then the parent of
//!   `requested_downloads[0].filepath`, then the image's own directory
//! - title: `title`, then `id`, then `"untitled"`

use serde::Deserialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::hasher::{perceptual_hash_len, FingerprintPair, DEFAULT_HASH_SIZE};
use crate::upscale::{SCRATCH_INPUT, SCRATCH_OUTPUT};

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "jpe", "jfif", "webp", "gif", "bmp", "tif", "tiff"];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Thumbnail {
    #[serde(default)]
    pub filepath: Option<PathBuf>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestedDownload {
    #[serde(rename = "__finaldir", default)]
    pub final_dir: Option<PathBuf>,
    #[serde(default)]
    pub filepath: Option<PathBuf>,
}

/// Metadata for a single download or a playlist of them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DownloadInfo {
    #[serde(rename = "_type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub thumbnails: Vec<Thumbnail>,
    #[serde(default)]
    pub requested_downloads: Vec<RequestedDownload>,
    #[serde(default)]
    pub entries: Vec<DownloadInfo>,
}

impl DownloadInfo {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn is_playlist(&self) -> bool {
        self.kind.as_deref() == Some("playlist")
    }

    fn image_path(&self) -> Option<&Path> {
        self.thumbnails.iter().rev().find_map(|t| t.filepath.as_deref())
    }

    fn output_dir(&self) -> Option<PathBuf> {
        let download = self.requested_downloads.first();
        download
            .and_then(|d| d.final_dir.clone())
            .or_else(|| {
                download
                    .and_then(|d| d.filepath.as_deref())
                    .and_then(Path::parent)
                    .map(Path::to_path_buf)
            })
            .or_else(|| self.image_path().and_then(Path::parent).map(Path::to_path_buf))
    }

    fn display_title(&self) -> String {
        self.title
            .clone()
            .or_else(|| self.id.clone())
            .unwrap_or_else(|| "untitled".to_string())
    }
}

/// One track of a batch. `output_path` starts as the source image and ends as
/// the path of the cover to attach.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackRecord {
    pub title: String,
    pub image_path: PathBuf,
    pub output_dir: PathBuf,
    pub output_path: PathBuf,
    pub fingerprints: Option<FingerprintPair>,
}

impl TrackRecord {
    pub fn new(title: impl Into<String>, image_path: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        let image_path = image_path.into();
        Self {
            title: title.into(),
            output_path: image_path.clone(),
            image_path,
            output_dir: output_dir.into(),
            fingerprints: None,
        }
    }

    /// `None` when the metadata carries no usable image, or when the image is
    /// one of the upscaler's scratch files.
    pub fn from_info(info: &DownloadInfo) -> Option<Self> {
        let image = info.image_path()?;
        let output_dir = info.output_dir().unwrap_or_else(|| PathBuf::from("."));
        if is_scratch_file(image, &output_dir) {
            tracing::warn!(path = %image.display(), "Image uses a reserved scratch name, skipping");
            return None;
        }
        Some(Self::new(info.display_title(), image, output_dir))
    }
}

/// Expand a download into its tracks: a playlist yields its entries, anything
/// else is a single track.
pub fn tracks_from_info(info: &DownloadInfo) -> Vec<TrackRecord> {
    let entries: Vec<&DownloadInfo> = if info.is_playlist() {
        info.entries.iter().collect()
    } else {
        vec![info]
    };

    entries
        .into_iter()
        .filter_map(|entry| {
            let record = TrackRecord::from_info(entry);
            if record.is_none() {
                tracing::warn!(title = %entry.display_title(), "No cover image in metadata, skipping track");
            }
            record
        })
        .collect()
}

pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.as_str()))
}

fn same_dir(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// `temp.png` / `temp_out.png` inside the output directory belong to the upscaler.
pub fn is_scratch_file(path: &Path, output_dir: &Path) -> bool {
    let reserved = path
        .file_name()
        .is_some_and(|name| name == SCRATCH_INPUT || name == SCRATCH_OUTPUT);
    reserved && path.parent().is_some_and(|parent| same_dir(parent, output_dir))
}

/// `{perceptual hash}.png`, as written for a bucket.
fn is_bucket_output_name(path: &Path) -> bool {
    let is_png = path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("png"));
    let stem = path.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    is_png
        && stem.len() == perceptual_hash_len(DEFAULT_HASH_SIZE)
        && stem.chars().all(|c| c.is_ascii_hexdigit())
}

/// Every image in `dir` as one batch, in path order, written to `output_dir`.
///
/// Covers written by an earlier run are left out: a nested `output_dir` is not
/// descended into, and when `output_dir` is `dir` itself its `{hash}.png` files
/// and scratch files are skipped.
pub fn tracks_from_directory(dir: &Path, output_dir: &Path, recursive: bool) -> Vec<TrackRecord> {
    let walker = if recursive {
        WalkDir::new(dir).follow_links(true)
    } else {
        WalkDir::new(dir).max_depth(1)
    };

    let mut images: Vec<PathBuf> = walker
        .into_iter()
        .filter_entry(|e| !(e.depth() > 0 && e.file_type().is_dir() && same_dir(e.path(), output_dir)))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| has_image_extension(e.path()))
        .filter(|e| {
            let path = e.path();
            let in_output_dir = path.parent().is_some_and(|p| same_dir(p, output_dir));
            !(in_output_dir && (is_bucket_output_name(path) || is_scratch_file(path, output_dir)))
        })
        .map(|e| e.path().to_path_buf())
        .collect();
    images.sort();

    images
        .into_iter()
        .map(|path| {
            let title = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "untitled".to_string());
            TrackRecord::new(title, path, output_dir)
        })
        .collect()
}
