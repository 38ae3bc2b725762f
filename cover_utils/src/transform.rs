//! Transform Pipeline
//!
//! crop → optional AI upscale → optional interpolation resize → export.
//! "Size" is always the shorter image side.

use image::DynamicImage;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::{ImageConfig, Interpolation};
use crate::errors::{CoverArtError, Result};
use crate::hasher::open_image;
use crate::upscale::{upscale_to_target, UpscaleOutcome, Upscaler};

/// Everything one transform needs besides the image itself.
pub struct TransformContext<'a> {
    pub config: &'a ImageConfig,
    pub upscaler: Option<&'a dyn Upscaler>,
    pub running: &'a AtomicBool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransformOutcome {
    pub source: PathBuf,
    pub output_path: PathBuf,
    pub source_size: (u32, u32),
    pub final_size: (u32, u32),
    pub upscale: Option<UpscaleOutcome>,
    pub resized: bool,
    pub exported: bool,
}

/// Center-crop the longer side down to the shorter one.
pub fn crop_square(image: DynamicImage) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    if width == height {
        return image;
    }
    let side = width.min(height);
    let x = (width - side) / 2;
    let y = (height - side) / 2;
    image.crop_imm(x, y, side, side)
}

/// Resize to exactly `target`×`target`, shrinking too. `None` leaves the image alone.
pub fn resize_to_target(image: DynamicImage, target: u32, interpolation: Interpolation) -> DynamicImage {
    match interpolation.filter() {
        Some(filter) => image.resize_exact(target, target, filter),
        None => image,
    }
}

/// Write `image` to `path`, creating the parent directory. Format follows the extension.
pub fn export_image(image: &DynamicImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| CoverArtError::io(parent, e))?;
    }
    image.save(path).map_err(|e| match e {
        image::ImageError::IoError(io) => CoverArtError::io(path, io),
        other => CoverArtError::decode(path, &other),
    })
}

fn ensure_running(running: &AtomicBool) -> Result<()> {
    if running.load(Ordering::SeqCst) {
        Ok(())
    } else {
        Err(CoverArtError::Cancelled)
    }
}

/// Run the pipeline on `source` and write the result to `output`.
///
/// Fails when the source cannot be decoded or the batch is cancelled. An export
/// failure is logged and reported through [`TransformOutcome::exported`].
pub fn transform_image(source: &Path, output: &Path, ctx: &TransformContext<'_>) -> Result<TransformOutcome> {
    let target = ctx.config.image_size_target;

    ensure_running(ctx.running)?;
    let image = open_image(source)?;
    let source_size = (image.width(), image.height());

    let mut working = crop_square(image);
    tracing::debug!(
        source = %source.display(),
        "Cropped {}x{} to {}x{}",
        source_size.0,
        source_size.1,
        working.width(),
        working.height()
    );

    let mut upscale = None;
    if let Some(upscaler) = ctx.upscaler {
        ensure_running(ctx.running)?;
        let size = working.width().min(working.height());
        if target > size {
            let scratch_dir = output.parent().unwrap_or_else(|| Path::new("."));
            let (upscaled, outcome) = upscale_to_target(upscaler, working, target, scratch_dir, ctx.running)?;
            if let Some(e) = outcome.exhausted_error() {
                tracing::error!(error = %e, "Upscale stage stopped, continuing with last good image");
            }
            working = upscaled;
            upscale = Some(outcome);
        } else {
            tracing::info!(size, target, "Image already at or above target, skipping upscale");
        }
    }

    ensure_running(ctx.running)?;
    let resized = ctx.config.interpolation != Interpolation::None;
    if resized {
        tracing::info!(
            method = ctx.config.interpolation.label(),
            "Resizing {}x{} to {}x{}",
            working.width(),
            working.height(),
            target,
            target
        );
        working = resize_to_target(working, target, ctx.config.interpolation);
    }

    ensure_running(ctx.running)?;
    let exported = match export_image(&working, output) {
        Ok(()) => {
            tracing::info!(path = %output.display(), "Saved cover");
            true
        }
        Err(e) => {
            tracing::error!(path = %output.display(), error = %e, "Failed to save cover");
            false
        }
    };

    Ok(TransformOutcome {
        source: source.to_path_buf(),
        output_path: output.to_path_buf(),
        source_size,
        final_size: (working.width(), working.height()),
        upscale,
        resized,
        exported,
    })
}
