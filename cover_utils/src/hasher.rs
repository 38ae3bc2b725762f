//! Image Fingerprints
//!
//! Two tiers of fingerprint per cover:
//! - SHA-256 over the raw file bytes, cheap and exact, recognises byte-identical
//!   downloads
//! - a difference hash (dHash) over a shrunk grayscale copy, lossy, groups
//!   covers that merely look alike

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::errors::{CoverArtError, Result};

/// Default dHash grid, giving a 64-bit fingerprint.
pub const DEFAULT_HASH_SIZE: u32 = 8;

const READ_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FingerprintPair {
    pub cryptographic: String,
    pub perceptual: String,
}

/// Hex SHA-256 of the file, read in fixed-size chunks.
pub fn cryptographic_hash(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| CoverArtError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_CHUNK_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer).map_err(|e| CoverArtError::io(path, e))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

pub fn open_image(path: &Path) -> Result<DynamicImage> {
    image::open(path).map_err(|e| match e {
        image::ImageError::IoError(io) => CoverArtError::io(path, io),
        other => CoverArtError::decode(path, &other),
    })
}

/// Number of hex digits in a dHash of the given grid size.
pub fn perceptual_hash_len(size: u32) -> usize {
    (size as usize * size as usize).div_ceil(4)
}

/// The hash reported for images that could not be decoded.
pub fn zero_hash(size: u32) -> String {
    "0".repeat(perceptual_hash_len(size))
}

/// Difference hash of an already decoded image; `None` yields [`zero_hash`].
pub fn perceptual_hash(image: Option<&DynamicImage>, size: u32) -> String {
    let size = size.max(1);
    let Some(image) = image else {
        return zero_hash(size);
    };

    let gray = image.to_luma8();
    let shrunk = imageops::resize(&gray, size + 1, size, FilterType::Triangle);
    pack_difference_bits(&shrunk, size)
}

/// Decode `path` and hash it. Never fails: undecodable files get the zero hash.
pub fn perceptual_hash_file(path: &Path, size: u32) -> String {
    match open_image(path) {
        Ok(image) => perceptual_hash(Some(&image), size),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Image did not decode, using empty hash");
            zero_hash(size)
        }
    }
}

/// Bit `y * size + x` is set when pixel (x, y) is brighter than (x + 1, y).
/// `shrunk` must be `(size + 1) x size`.
fn pack_difference_bits(shrunk: &GrayImage, size: u32) -> String {
    let bits: Vec<bool> = (0..size)
        .flat_map(|y| (0..size).map(move |x| (x, y)))
        .map(|(x, y)| shrunk.get_pixel(x, y)[0] > shrunk.get_pixel(x + 1, y)[0])
        .collect();

    // Most significant nibble first, like formatting the packed integer.
    (0..perceptual_hash_len(size))
        .rev()
        .map(|nibble| {
            let value = (0..4).fold(0u32, |acc, b| {
                let set = bits.get(nibble * 4 + b).copied().unwrap_or(false);
                acc | (u32::from(set) << b)
            });
            char::from_digit(value, 16).unwrap_or('0')
        })
        .collect()
}
