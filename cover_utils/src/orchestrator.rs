//! Orchestrator
//!
//! Owns the track records of one batch and drives the pipeline over them:
//! fingerprint every record, bucket them in the dedup index, let the selection
//! policy pick what to transform, run the transform once per chosen bucket and
//! hand back one output path per record.
//!
//! Hashing runs on the rayon pool. Everything that touches the index runs on the
//! calling thread, in record order, so bucket order and tie-breaks are stable.
//!
//! Cancellation is cooperative: the shared running flag is checked before each
//! record, each bucket, each pipeline stage and each upscale step. A cancelled
//! batch returns [`CoverArtError::Cancelled`] and no partial outputs.

use rayon::prelude::*;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::batch::BatchResult;
use crate::config::ImageConfig;
use crate::dedup::DedupIndex;
use crate::errors::{CoverArtError, Result};
use crate::hasher::{cryptographic_hash, perceptual_hash_file, zero_hash, DEFAULT_HASH_SIZE};
use crate::selection::{self, BatchShape};
use crate::track::TrackRecord;
use crate::transform::{transform_image, TransformContext, TransformOutcome};
use crate::upscale::Upscaler;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRecord {
    pub record: usize,
    pub title: String,
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub shape: BatchShape,
    pub records: usize,
    pub buckets: usize,
    /// Transform pipeline runs in this call, failed ones included.
    pub invocations: usize,
    pub perceptual_hashes: usize,
    pub export_failures: usize,
    pub transforms: Vec<TransformOutcome>,
    pub skipped: Vec<SkippedRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutput {
    /// One path per record, in record order.
    pub outputs: Vec<PathBuf>,
    pub report: BatchReport,
}

impl BatchOutput {
    /// Per-track tally for the summary report.
    pub fn summary(&self) -> BatchResult {
        let mut result = BatchResult::new();
        let skipped: HashMap<usize, &SkippedRecord> =
            self.report.skipped.iter().map(|s| (s.record, s)).collect();
        let unwritten: HashSet<&PathBuf> = self
            .report
            .transforms
            .iter()
            .filter(|t| !t.exported)
            .map(|t| &t.output_path)
            .collect();

        for (record, output) in self.outputs.iter().enumerate() {
            if let Some(skip) = skipped.get(&record) {
                result.skip(skip.path.clone(), skip.reason.clone());
            } else if unwritten.contains(output) {
                result.fail(output.clone(), "cover could not be written".to_string());
            } else {
                result.success();
            }
        }
        result
    }
}

pub struct CoverBatch {
    config: ImageConfig,
    records: Vec<TrackRecord>,
    index: DedupIndex,
    upscaler: Option<Box<dyn Upscaler>>,
    running: Arc<AtomicBool>,
}

impl CoverBatch {
    /// Validates `config` and resolves its AI engine, if any.
    pub fn new(config: ImageConfig) -> Result<Self> {
        config.validate()?;
        let upscaler = config
            .resolve_upscaler()?
            .map(|engine| Box::new(engine) as Box<dyn Upscaler>);

        Ok(Self {
            config,
            records: Vec::new(),
            index: DedupIndex::new(),
            upscaler,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Replace the configured engine, e.g. with an in-process one.
    pub fn with_upscaler(mut self, upscaler: Box<dyn Upscaler>) -> Self {
        self.upscaler = Some(upscaler);
        self
    }

    pub fn with_running_flag(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = running;
        self
    }

    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Start a new batch. Buckets from the previous one are dropped, and so are
    /// fingerprints carried in from an earlier batch, so every record is bucketed
    /// into the fresh index.
    pub fn set_records(&mut self, records: Vec<TrackRecord>) {
        self.records = records;
        for record in &mut self.records {
            record.fingerprints = None;
            record.output_path = record.image_path.clone();
        }
        self.index.clear();
    }

    /// Append to the current batch, keeping existing buckets.
    pub fn add_records(&mut self, records: impl IntoIterator<Item = TrackRecord>) {
        self.records.extend(records);
    }

    pub fn records(&self) -> &[TrackRecord] {
        &self.records
    }

    pub fn index(&self) -> &DedupIndex {
        &self.index
    }

    pub fn config(&self) -> &ImageConfig {
        &self.config
    }

    fn ensure_running(&self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CoverArtError::Cancelled)
        }
    }

    pub fn run(&mut self) -> Result<BatchOutput> {
        self.ensure_running()?;
        let mut skipped = Vec::new();

        let perceptual_hashes = self.classify_pending(&mut skipped)?;

        let plan = selection::plan(&self.index, self.config.group_mode);
        tracing::info!(
            shape = %plan.shape,
            buckets = self.index.len(),
            to_transform = plan.transform.len(),
            "Selected covers to process"
        );

        let mut transforms = Vec::new();
        let mut failed_buckets: HashMap<String, String> = HashMap::new();
        let mut invocations = 0;

        for key in &plan.transform {
            self.ensure_running()?;
            let Some(bucket) = self.index.bucket(key) else {
                continue;
            };
            let source = self.records[bucket.representative].image_path.clone();
            let output = bucket.output_path.clone();
            let ctx = TransformContext {
                config: &self.config,
                upscaler: self.upscaler.as_deref(),
                running: &self.running,
            };

            tracing::info!(hash = %key, source = %source.display(), "Processing cover");
            invocations += 1;
            match transform_image(&source, &output, &ctx) {
                Ok(outcome) => {
                    self.index.mark_processed(key);
                    transforms.push(outcome);
                }
                Err(e) if !e.is_recoverable() => return Err(e),
                Err(e) => {
                    tracing::error!(
                        hash = %key,
                        source = %source.display(),
                        category = %e.category(),
                        error = %e,
                        "Failed to process cover, tracks keep their source image"
                    );
                    failed_buckets.insert(key.clone(), e.to_string());
                }
            }
        }

        let outputs = self.assign_outputs(plan.reassign_to.as_deref(), &failed_buckets, &mut skipped);
        skipped.sort_by_key(|s| s.record);

        let report = BatchReport {
            shape: plan.shape,
            records: self.records.len(),
            buckets: self.index.len(),
            invocations,
            perceptual_hashes,
            export_failures: transforms.iter().filter(|t| !t.exported).count(),
            transforms,
            skipped,
        };
        tracing::info!(
            records = report.records,
            buckets = report.buckets,
            invocations = report.invocations,
            skipped = report.skipped.len(),
            "Batch finished"
        );

        Ok(BatchOutput { outputs, report })
    }

    /// Fingerprint and bucket every record not classified yet. Returns how many
    /// perceptual hashes had to be computed.
    fn classify_pending(&mut self, skipped: &mut Vec<SkippedRecord>) -> Result<usize> {
        let pending: Vec<usize> = (0..self.records.len())
            .filter(|&i| self.records[i].fingerprints.is_none())
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }

        let running = &self.running;
        let records = &self.records;
        let hashed: Vec<(usize, Option<Result<String>>)> = pending
            .par_iter()
            .map(|&i| {
                if !running.load(Ordering::SeqCst) {
                    return (i, None);
                }
                (i, Some(cryptographic_hash(&records[i].image_path)))
            })
            .collect();
        self.ensure_running()?;

        let mut classified = Vec::with_capacity(hashed.len());
        for (i, result) in hashed {
            match result {
                Some(Ok(crypto)) => classified.push((i, crypto)),
                Some(Err(e)) => {
                    let record = &self.records[i];
                    tracing::warn!(
                        title = %record.title,
                        path = %record.image_path.display(),
                        error = %e,
                        "Could not read cover, track keeps its source image"
                    );
                    skipped.push(SkippedRecord {
                        record: i,
                        title: record.title.clone(),
                        path: record.image_path.clone(),
                        reason: e.to_string(),
                    });
                }
                None => return Err(CoverArtError::Cancelled),
            }
        }

        // One perceptual hash per cryptographic hash the index has not seen.
        let mut unseen: Vec<(&str, PathBuf)> = Vec::new();
        let mut queued = HashSet::new();
        for (i, crypto) in &classified {
            if self.index.memoized_perceptual(crypto).is_none() && queued.insert(crypto.as_str()) {
                unseen.push((crypto.as_str(), self.records[*i].image_path.clone()));
            }
        }

        let hash_size = DEFAULT_HASH_SIZE;
        let computed: HashMap<String, String> = unseen
            .par_iter()
            .filter(|_| running.load(Ordering::SeqCst))
            .map(|(crypto, path)| (crypto.to_string(), perceptual_hash_file(path, hash_size)))
            .collect();
        self.ensure_running()?;
        let perceptual_hashes = computed.len();

        for (i, crypto) in &classified {
            self.ensure_running()?;
            let root = self.records[*i].output_dir.clone();
            let pair = self.index.classify(*i, crypto, &root, || {
                computed.get(crypto).cloned().unwrap_or_else(|| zero_hash(hash_size))
            });
            tracing::debug!(
                title = %self.records[*i].title,
                hash = %pair.perceptual,
                "Classified cover"
            );
            self.records[*i].fingerprints = Some(pair);
        }

        Ok(perceptual_hashes)
    }

    fn assign_outputs(
        &mut self,
        reassign_to: Option<&str>,
        failed_buckets: &HashMap<String, String>,
        skipped: &mut Vec<SkippedRecord>,
    ) -> Vec<PathBuf> {
        let mut outputs = Vec::with_capacity(self.records.len());

        for (i, record) in self.records.iter_mut().enumerate() {
            let key = match (&record.fingerprints, reassign_to) {
                (None, _) => None,
                (Some(_), Some(winner)) => Some(winner.to_string()),
                (Some(pair), None) => Some(pair.perceptual.clone()),
            };

            record.output_path = match key {
                None => record.image_path.clone(),
                Some(key) => {
                    if let Some(reason) = failed_buckets.get(&key) {
                        skipped.push(SkippedRecord {
                            record: i,
                            title: record.title.clone(),
                            path: record.image_path.clone(),
                            reason: reason.clone(),
                        });
                        record.image_path.clone()
                    } else if let Some(bucket) = self.index.bucket(&key) {
                        bucket.output_path.clone()
                    } else {
                        tracing::warn!(title = %record.title, hash = %key, "No bucket for track, keeping source image");
                        record.image_path.clone()
                    }
                }
            };
            outputs.push(record.output_path.clone());
        }
        outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GroupMode, Interpolation};
    use crate::transform::export_image;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn striped(path: &Path, vertical: bool) {
        let img = RgbImage::from_fn(40, 40, |x, y| {
            let v = if vertical { x } else { y };
            if (v / 5) % 2 == 0 {
                Rgb([250, 250, 250])
            } else {
                Rgb([5, 5, 5])
            }
        });
        export_image(&DynamicImage::ImageRgb8(img), path).unwrap();
    }

    fn batch(mode: GroupMode) -> CoverBatch {
        CoverBatch::new(ImageConfig {
            image_size_target: 16,
            group_mode: mode,
            interpolation: Interpolation::Linear,
            ..ImageConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_empty_batch() {
        let mut batch = batch(GroupMode::MostCommon);
        let output = batch.run().unwrap();
        assert!(output.outputs.is_empty());
        assert_eq!(output.report.shape, BatchShape::Empty);
        assert_eq!(output.report.invocations, 0);
    }

    #[test]
    fn test_unreadable_record_is_skipped() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.png");
        striped(&good, true);
        let missing = dir.path().join("missing.png");

        let mut batch = batch(GroupMode::EachUnique);
        batch.set_records(vec![
            TrackRecord::new("good", &good, dir.path()),
            TrackRecord::new("missing", &missing, dir.path()),
        ]);
        let output = batch.run().unwrap();

        assert_eq!(output.outputs[1], missing);
        assert_ne!(output.outputs[0], good);
        assert_eq!(output.report.skipped.len(), 1);
        assert_eq!(output.report.skipped[0].record, 1);
        assert_eq!(output.report.shape, BatchShape::Single);

        let summary = output.summary();
        assert_eq!((summary.succeeded, summary.skipped), (1, 1));
    }

    #[test]
    fn test_undecodable_bucket_reverts_to_source() {
        let dir = TempDir::new().unwrap();
        let broken = dir.path().join("broken.png");
        fs::write(&broken, b"garbage").unwrap();

        let mut batch = batch(GroupMode::EachUnique);
        batch.set_records(vec![TrackRecord::new("broken", &broken, dir.path())]);
        let output = batch.run().unwrap();

        assert_eq!(output.outputs, vec![broken.clone()]);
        assert_eq!(output.report.invocations, 1);
        assert_eq!(output.report.skipped.len(), 1);
        assert!(!batch.index().buckets()[0].processed);
        assert_eq!(batch.records()[0].fingerprints.as_ref().unwrap().perceptual, zero_hash(8));
    }

    #[test]
    fn test_set_records_resets_index() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.png");
        striped(&a, true);

        let mut batch = batch(GroupMode::MostCommon);
        batch.set_records(vec![TrackRecord::new("a", &a, dir.path())]);
        batch.run().unwrap();
        assert_eq!(batch.index().len(), 1);

        batch.set_records(Vec::new());
        assert!(batch.index().is_empty());
    }

    #[test]
    fn test_reused_records_are_bucketed_again() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.png");
        striped(&a, true);

        let mut batch = batch(GroupMode::EachUnique);
        batch.set_records(vec![TrackRecord::new("a", &a, dir.path())]);
        let first = batch.run().unwrap();
        assert!(batch.records()[0].fingerprints.is_some());

        batch.set_records(batch.records().to_vec());
        assert!(batch.records()[0].fingerprints.is_none());
        assert_eq!(batch.records()[0].output_path, a);

        let second = batch.run().unwrap();
        assert_eq!(second.report.buckets, 1);
        assert_eq!(second.report.invocations, 1);
        assert_eq!(second.outputs, first.outputs);
        assert!(second.report.skipped.is_empty());
    }

    #[test]
    fn test_add_records_reuses_processed_buckets() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        striped(&a, true);
        striped(&b, false);

        let mut batch = batch(GroupMode::EachUnique);
        batch.set_records(vec![TrackRecord::new("a", &a, dir.path())]);
        let first = batch.run().unwrap();
        assert_eq!(first.report.invocations, 1);

        batch.add_records(vec![
            TrackRecord::new("a again", &a, dir.path()),
            TrackRecord::new("b", &b, dir.path()),
        ]);
        let second = batch.run().unwrap();

        assert_eq!(second.report.invocations, 1);
        assert_eq!(second.report.perceptual_hashes, 1);
        assert_eq!(second.outputs[0], second.outputs[1]);
        assert_ne!(second.outputs[0], second.outputs[2]);
    }

    #[test]
    fn test_cleared_flag_cancels_run() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.png");
        striped(&a, true);

        let running = Arc::new(AtomicBool::new(true));
        let mut batch = batch(GroupMode::MostCommon).with_running_flag(Arc::clone(&running));
        batch.set_records(vec![TrackRecord::new("a", &a, dir.path())]);
        running.store(false, Ordering::SeqCst);

        assert!(matches!(batch.run(), Err(CoverArtError::Cancelled)));
    }
}
