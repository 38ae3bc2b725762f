//! Cover-art deduplication and scaling for downloaded tracks
//!
//! Shared by the cover_boost tools:
//! - Two-tier fingerprints (SHA-256 + difference hash)
//! - Dedup index and selection policy (single / each unique / most common)
//! - Transform pipeline: crop, AI upscale, interpolation resize, export
//! - External upscaler adapter with a bounded retry budget
//! - Batch orchestration with cooperative cancellation
//! - Logging, configuration, summary reporting

pub mod batch;
pub mod config;
pub mod dedup;
pub mod errors;
pub mod hasher;
pub mod logging;
pub mod orchestrator;
pub mod progress;
pub mod report;
pub mod selection;
pub mod track;
pub mod transform;
pub mod types;
pub mod upscale;

pub use batch::BatchResult;
pub use config::{EngineSpec, GroupMode, ImageConfig, Interpolation, DEFAULT_CONFIG_PATH, DEFAULT_TARGET_SIZE};
pub use dedup::{DedupIndex, HashBucket};
pub use errors::{CoverArtError, ErrorCategory, Result};
pub use hasher::{cryptographic_hash, perceptual_hash, perceptual_hash_file, FingerprintPair};
pub use logging::{init_logging, LogConfig};
pub use orchestrator::{BatchOutput, BatchReport, CoverBatch, SkippedRecord};
pub use progress::create_spinner;
pub use report::print_summary_report;
pub use selection::{BatchShape, SelectionPlan};
pub use track::{tracks_from_directory, tracks_from_info, DownloadInfo, TrackRecord};
pub use transform::{crop_square, transform_image, TransformContext, TransformOutcome};
pub use upscale::{ExternalEngine, UpscaleOutcome, Upscaler};
