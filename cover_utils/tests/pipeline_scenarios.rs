//! End-to-end batches through `CoverBatch`, with synthetic covers on disk and
//! in-process or scripted upscalers.

use cover_utils::transform::export_image;
use cover_utils::upscale::{SCRATCH_INPUT, SCRATCH_OUTPUT};
use cover_utils::{
    tracks_from_directory, BatchShape, CoverArtError, CoverBatch, EngineSpec, GroupMode, ImageConfig,
    Interpolation, TrackRecord, Upscaler,
};
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

#[derive(Clone, Copy)]
enum Pattern {
    BrightLeft,
    BrightRight,
    /// Bright-left on the top half, bright-right on the bottom half.
    Split,
}

fn write_cover(path: &Path, width: u32, height: u32, pattern: Pattern) {
    let img = RgbImage::from_fn(width, height, |x, y| {
        let rising = (x * 255 / (width - 1)) as u8;
        let v = match pattern {
            Pattern::BrightLeft => 255 - rising,
            Pattern::BrightRight => rising,
            Pattern::Split if y < height / 2 => 255 - rising,
            Pattern::Split => rising,
        };
        Rgb([v, v / 2, 255 - v])
    });
    export_image(&DynamicImage::ImageRgb8(img), path).unwrap();
}

fn config(target: u32, mode: GroupMode, interpolation: Interpolation) -> ImageConfig {
    ImageConfig {
        image_size_target: target,
        group_mode: mode,
        interpolation,
        ai_method: None,
        ..ImageConfig::default()
    }
}

fn dimensions(path: &Path) -> (u32, u32) {
    let img = image::open(path).unwrap();
    (img.width(), img.height())
}

/// Scales in-process and counts calls; fails every call when `broken`.
struct CountingUpscaler {
    calls: Arc<AtomicU32>,
    broken: bool,
}

impl Upscaler for CountingUpscaler {
    fn name(&self) -> &str {
        "counting"
    }

    fn upscale(&self, input: &Path, output: &Path, scale: u32) -> cover_utils::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.broken {
            return Err(CoverArtError::Engine {
                engine: "counting".to_string(),
                exit_code: Some(1),
                output: "device lost".to_string(),
            });
        }
        let img = image::open(input).map_err(|e| CoverArtError::decode(input, &e))?;
        let bigger = img.resize_exact(img.width() * scale, img.height() * scale, FilterType::Nearest);
        export_image(&bigger, output)
    }
}

/// Scales in-process like a working engine, but clears the batch's running
/// flag on its first call, as a Ctrl-C during the first cover would.
struct InterruptingUpscaler {
    calls: Arc<AtomicU32>,
    running: Arc<AtomicBool>,
}

impl Upscaler for InterruptingUpscaler {
    fn name(&self) -> &str {
        "interrupting"
    }

    fn upscale(&self, input: &Path, output: &Path, scale: u32) -> cover_utils::Result<()> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.running.store(false, Ordering::SeqCst);
        }
        let img = image::open(input).map_err(|e| CoverArtError::decode(input, &e))?;
        let bigger = img.resize_exact(img.width() * scale, img.height() * scale, FilterType::Nearest);
        export_image(&bigger, output)
    }
}

#[test]
fn single_track_is_resized_to_target() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("single.png");
    write_cover(&source, 500, 500, Pattern::BrightLeft);
    let out_dir = dir.path().join("covers");

    let mut batch = CoverBatch::new(config(1024, GroupMode::EachUnique, Interpolation::Lanczos)).unwrap();
    batch.set_records(vec![TrackRecord::new("Single", &source, &out_dir)]);
    let output = batch.run().unwrap();

    assert_eq!(output.report.shape, BatchShape::Single);
    assert_eq!(output.report.buckets, 1);
    assert_eq!(output.report.invocations, 1);
    assert_eq!(output.outputs.len(), 1);
    assert!(output.outputs[0].starts_with(&out_dir));
    assert_eq!(dimensions(&output.outputs[0]), (1024, 1024));
    assert_eq!(batch.records()[0].output_path, output.outputs[0]);
}

#[test]
fn identical_covers_share_one_bucket_under_most_common() {
    let dir = TempDir::new().unwrap();
    let first = dir.path().join("01.png");
    write_cover(&first, 120, 100, Pattern::BrightRight);
    let mut records = vec![TrackRecord::new("One", &first, dir.path())];
    for name in ["02.png", "03.png"] {
        let copy = dir.path().join(name);
        fs::copy(&first, &copy).unwrap();
        records.push(TrackRecord::new(name, copy, dir.path()));
    }

    let mut batch = CoverBatch::new(config(64, GroupMode::MostCommon, Interpolation::Linear)).unwrap();
    batch.set_records(records);
    let output = batch.run().unwrap();

    assert_eq!(output.report.buckets, 1);
    assert_eq!(batch.index().buckets()[0].frequency, 3);
    assert_eq!(output.report.invocations, 1);
    assert_eq!(output.report.perceptual_hashes, 1);
    assert!(output.outputs.iter().all(|p| *p == output.outputs[0]));
    assert_eq!(dimensions(&output.outputs[0]), (64, 64));
}

#[test]
fn distinct_covers_each_processed_once() {
    let dir = TempDir::new().unwrap();
    let patterns = [Pattern::BrightLeft, Pattern::BrightRight, Pattern::Split];
    let records: Vec<TrackRecord> = patterns
        .iter()
        .enumerate()
        .map(|(i, pattern)| {
            let path = dir.path().join(format!("{}.png", i));
            write_cover(&path, 90, 80, *pattern);
            TrackRecord::new(format!("Track {}", i), path, dir.path())
        })
        .collect();

    let mut batch = CoverBatch::new(config(32, GroupMode::EachUnique, Interpolation::Area)).unwrap();
    batch.set_records(records);
    let output = batch.run().unwrap();

    assert_eq!(output.report.shape, BatchShape::Group(GroupMode::EachUnique));
    assert_eq!(output.report.buckets, 3);
    assert_eq!(output.report.invocations, 3);
    let distinct: HashSet<&PathBuf> = output.outputs.iter().collect();
    assert_eq!(distinct.len(), 3);
    for path in &output.outputs {
        assert_eq!(dimensions(path), (32, 32));
    }

    let again = batch.run().unwrap();
    assert_eq!(again.report.invocations, 0);
    assert_eq!(again.report.perceptual_hashes, 0);
    assert_eq!(again.outputs, output.outputs);
}

#[test]
fn most_common_reassigns_every_track() {
    let dir = TempDir::new().unwrap();
    let odd = dir.path().join("odd.png");
    let common = dir.path().join("common.png");
    let common_copy = dir.path().join("common_copy.png");
    write_cover(&odd, 60, 60, Pattern::Split);
    write_cover(&common, 60, 60, Pattern::BrightLeft);
    fs::copy(&common, &common_copy).unwrap();

    let mut batch = CoverBatch::new(config(16, GroupMode::MostCommon, Interpolation::Linear)).unwrap();
    batch.set_records(vec![
        TrackRecord::new("odd", &odd, dir.path()),
        TrackRecord::new("common", &common, dir.path()),
        TrackRecord::new("common copy", &common_copy, dir.path()),
    ]);
    let output = batch.run().unwrap();

    let winner = batch
        .index()
        .most_common()
        .map(|b| b.output_path.clone())
        .unwrap();
    assert_eq!(output.report.invocations, 1);
    assert_eq!(output.outputs, vec![winner.clone(), winner.clone(), winner]);

    let odd_bucket = &batch.index().buckets()[0];
    assert!(!odd_bucket.processed);
    assert!(!odd_bucket.output_path.exists());
}

#[test]
fn failing_engine_aborts_upscale_but_still_downscales() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("tiny.png");
    write_cover(&source, 5, 3, Pattern::BrightLeft);

    let calls = Arc::new(AtomicU32::new(0));
    let engine = CountingUpscaler {
        calls: Arc::clone(&calls),
        broken: true,
    };
    let mut batch = CoverBatch::new(config(1024, GroupMode::EachUnique, Interpolation::Linear))
        .unwrap()
        .with_upscaler(Box::new(engine));
    batch.set_records(vec![TrackRecord::new("tiny", &source, dir.path())]);
    let output = batch.run().unwrap();

    // 3 -> 12 -> 48 -> 192 -> 768 (4th failure stops here)
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    let upscale = output.report.transforms[0].upscale.clone().unwrap();
    assert!(upscale.exhausted);
    assert_eq!(upscale.failures, 4);
    assert_eq!(upscale.steps_succeeded, 0);
    assert_eq!(upscale.achieved_size, 768);

    assert_eq!(dimensions(&output.outputs[0]), (1024, 1024));
    assert!(output.report.skipped.is_empty());
    assert!(!dir.path().join(SCRATCH_INPUT).exists());
    assert!(!dir.path().join(SCRATCH_OUTPUT).exists());
}

#[test]
fn working_engine_upscales_in_steps_of_four() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("small.png");
    write_cover(&source, 5, 5, Pattern::BrightRight);

    let calls = Arc::new(AtomicU32::new(0));
    let engine = CountingUpscaler {
        calls: Arc::clone(&calls),
        broken: false,
    };
    let mut batch = CoverBatch::new(config(64, GroupMode::MostCommon, Interpolation::None))
        .unwrap()
        .with_upscaler(Box::new(engine));
    batch.set_records(vec![TrackRecord::new("small", &source, dir.path())]);
    let output = batch.run().unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(dimensions(&output.outputs[0]), (80, 80));
}

#[cfg(unix)]
#[test]
fn scripted_engine_exit_codes_count_against_budget() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let ai_root = dir.path().join("ai");
    fs::create_dir_all(&ai_root).unwrap();
    let script = ai_root.join("broken-sr");
    fs::write(&script, "#!/bin/sh\necho call >> \"$(dirname \"$0\")/calls.log\"\nexit 3\n").unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

    let source = dir.path().join("cover.png");
    write_cover(&source, 4, 4, Pattern::Split);

    let config = ImageConfig {
        ai_method: Some("BrokenSR".to_string()),
        ai_directory: ai_root.clone(),
        ai_engines: vec![EngineSpec::new(
            "BrokenSR",
            "{root}/broken-sr",
            r#"-i "{input}" -o "{output}" -s {scale}"#,
        )],
        ..config(512, GroupMode::EachUnique, Interpolation::Lanczos)
    };
    let mut batch = CoverBatch::new(config).unwrap();
    batch.set_records(vec![TrackRecord::new("cover", &source, dir.path())]);
    let output = batch.run().unwrap();

    let log = fs::read_to_string(ai_root.join("calls.log")).unwrap();
    assert_eq!(log.lines().count(), 4);
    assert_eq!(dimensions(&output.outputs[0]), (512, 512));
}

#[test]
fn cancelling_mid_batch_leaves_remaining_buckets_untouched() {
    let dir = TempDir::new().unwrap();
    let out_dir = dir.path().join("covers");
    let patterns = [Pattern::BrightLeft, Pattern::BrightRight, Pattern::Split];
    let records: Vec<TrackRecord> = patterns
        .iter()
        .enumerate()
        .map(|(i, pattern)| {
            let path = dir.path().join(format!("{}.png", i));
            write_cover(&path, 20, 20, *pattern);
            TrackRecord::new(format!("Track {}", i), path, &out_dir)
        })
        .collect();
    let sources: Vec<PathBuf> = records.iter().map(|r| r.image_path.clone()).collect();

    let running = Arc::new(AtomicBool::new(true));
    let calls = Arc::new(AtomicU32::new(0));
    let engine = InterruptingUpscaler {
        calls: Arc::clone(&calls),
        running: Arc::clone(&running),
    };
    let mut batch = CoverBatch::new(config(1024, GroupMode::EachUnique, Interpolation::Linear))
        .unwrap()
        .with_running_flag(Arc::clone(&running))
        .with_upscaler(Box::new(engine));
    batch.set_records(records);

    let result = batch.run();
    assert!(matches!(result, Err(CoverArtError::Cancelled)));

    // 20 -> 80 ran, the flag was seen before 80 -> 320.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(batch.index().len(), 3);
    for bucket in batch.index().buckets() {
        assert!(!bucket.processed);
        assert!(!bucket.output_path.exists());
    }
    for (record, source) in batch.records().iter().zip(&sources) {
        assert_eq!(&record.output_path, source);
    }
    assert!(!out_dir.join(SCRATCH_INPUT).exists());
    assert!(!out_dir.join(SCRATCH_OUTPUT).exists());
}

#[test]
fn listing_a_processed_folder_again_finds_only_the_sources() {
    let dir = TempDir::new().unwrap();
    write_cover(&dir.path().join("a.png"), 40, 40, Pattern::BrightLeft);
    write_cover(&dir.path().join("b.png"), 40, 40, Pattern::BrightRight);
    let out_dir = dir.path().join("covers");

    let records = tracks_from_directory(dir.path(), &out_dir, true);
    assert_eq!(records.len(), 2);
    let mut batch = CoverBatch::new(config(16, GroupMode::EachUnique, Interpolation::Linear)).unwrap();
    batch.set_records(records);
    let output = batch.run().unwrap();
    assert_eq!(output.report.invocations, 2);
    assert!(output.outputs.iter().all(|p| p.starts_with(&out_dir) && p.exists()));

    let again = tracks_from_directory(dir.path(), &out_dir, true);
    let titles: Vec<&str> = again.iter().map(|r| r.title.as_str()).collect();
    assert_eq!(titles, vec!["a", "b"]);

    // Writing covers next to the sources is skipped the same way.
    let mut in_place = CoverBatch::new(config(16, GroupMode::EachUnique, Interpolation::Linear)).unwrap();
    in_place.set_records(tracks_from_directory(dir.path(), dir.path(), false));
    in_place.run().unwrap();
    assert_eq!(tracks_from_directory(dir.path(), dir.path(), false).len(), 2);
}
