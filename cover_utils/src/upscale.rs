//! Upscale Engine Adapter
//!
//! AI upscalers are external executables driven through two scratch files in
//! the batch root: the working image is written to `temp.png`, the engine
//! writes `temp_out.png`, which becomes the new working image. Each call
//! scales by 4x; the loop repeats until the requested size reaches the target.
//!
//! A request tolerates [`UPSCALE_MAX_RETRIES`] failed steps. A failed step keeps
//! the previous working image but still multiplies the requested size, so the
//! loop always terminates.
//!
//! [`UPSCALE_MAX_RETRIES`]: crate::types::UPSCALE_MAX_RETRIES

use image::DynamicImage;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::EngineSpec;
use crate::errors::{CoverArtError, Result};
use crate::hasher::open_image;
use crate::logging::execute_external_command;
use crate::transform::export_image;
use crate::types::RetryBudget;

pub const UPSCALE_STEP: u32 = 4;
pub const SCRATCH_INPUT: &str = "temp.png";
pub const SCRATCH_OUTPUT: &str = "temp_out.png";

/// Narrow seam for anything that can upscale one image file into another.
pub trait Upscaler: Send + Sync {
    fn name(&self) -> &str;

    fn upscale(&self, input: &Path, output: &Path, scale: u32) -> Result<()>;
}

/// Replace every `{key}` in `template` with its value. Unknown keys stay as-is.
pub fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    values.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{}}}", key), value)
    })
}

/// Split an argument template on whitespace; double quotes group an argument
/// and are dropped.
pub fn split_arguments(template: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for c in template.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    args.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        args.push(current);
    }
    args
}

/// An upscaler executable configured by an [`EngineSpec`].
#[derive(Debug, Clone)]
pub struct ExternalEngine {
    name: String,
    program: PathBuf,
    options: String,
    root: PathBuf,
}

impl ExternalEngine {
    pub fn from_spec(spec: &EngineSpec, root: &Path) -> Self {
        Self {
            name: spec.name.clone(),
            program: spec.executable(root),
            options: spec.options.clone(),
            root: root.to_path_buf(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Tokenised before substitution, so paths containing spaces stay whole.
    pub fn arguments(&self, input: &Path, output: &Path, scale: u32) -> Vec<String> {
        let root = self.root.to_string_lossy();
        let input = input.to_string_lossy();
        let output = output.to_string_lossy();
        let scale = scale.to_string();
        let values = [
            ("root", root.as_ref()),
            ("input", input.as_ref()),
            ("output", output.as_ref()),
            ("scale", scale.as_str()),
        ];

        split_arguments(&self.options)
            .iter()
            .map(|arg| fill_template(arg, &values))
            .collect()
    }
}

impl Upscaler for ExternalEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn upscale(&self, input: &Path, output: &Path, scale: u32) -> Result<()> {
        let args = self.arguments(input, output, scale);
        let result = execute_external_command(&self.name, &self.program, &args).map_err(|e| {
            CoverArtError::Engine {
                engine: self.name.clone(),
                exit_code: None,
                output: e.to_string(),
            }
        })?;

        if result.success() {
            Ok(())
        } else {
            Err(CoverArtError::Engine {
                engine: self.name.clone(),
                exit_code: result.exit_code,
                output: result.combined_output(),
            })
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpscaleOutcome {
    pub initial_size: u32,
    /// Requested size after the last step; failed steps count too.
    pub achieved_size: u32,
    pub steps_attempted: u32,
    pub steps_succeeded: u32,
    pub failures: u32,
    pub exhausted: bool,
}

impl UpscaleOutcome {
    pub fn exhausted_error(&self) -> Option<CoverArtError> {
        self.exhausted.then(|| CoverArtError::ExhaustedRetries {
            failures: self.failures,
            achieved: self.achieved_size,
        })
    }
}

/// Upscale `working` until its requested size reaches `target`.
///
/// Returns the last successfully read working image. Only cancellation is an
/// error; step failures and an exhausted budget are reported in the outcome.
pub fn upscale_to_target(
    upscaler: &dyn Upscaler,
    working: DynamicImage,
    target: u32,
    scratch_dir: &Path,
    running: &AtomicBool,
) -> Result<(DynamicImage, UpscaleOutcome)> {
    let initial = working.width().min(working.height());
    let mut outcome = UpscaleOutcome {
        initial_size: initial,
        achieved_size: initial,
        ..UpscaleOutcome::default()
    };

    if initial == 0 {
        tracing::warn!("Image has no pixels, skipping upscale");
        return Ok((working, outcome));
    }
    if target <= initial {
        tracing::info!(size = initial, target, "Size is not smaller than target, skipping upscale");
        return Ok((working, outcome));
    }

    let input = scratch_dir.join(SCRATCH_INPUT);
    let output = scratch_dir.join(SCRATCH_OUTPUT);
    let mut budget = RetryBudget::for_upscale(upscaler.name());
    let mut working = working;
    let mut size = initial;

    while target > size {
        if !running.load(Ordering::SeqCst) {
            cleanup_scratch(&input, &output);
            return Err(CoverArtError::Cancelled);
        }

        let next = size.saturating_mul(UPSCALE_STEP);
        tracing::info!(
            engine = upscaler.name(),
            "Upscaling from {}x{} to {}x{}",
            size,
            size,
            next,
            next
        );

        outcome.steps_attempted += 1;
        let step = run_step(upscaler, &working, &input, &output);
        size = next;
        outcome.achieved_size = size;

        match step {
            Ok(upscaled) => {
                working = upscaled;
                outcome.steps_succeeded += 1;
            }
            Err(e) => {
                outcome.failures += 1;
                match budget.record_failure() {
                    Ok(left) => {
                        tracing::warn!(error = %e, "Error upscaling image, {} retry(s) left", left);
                    }
                    Err(exhausted) => {
                        outcome.exhausted = true;
                        tracing::error!(error = %e, reason = %exhausted, "Failed to upscale image");
                        break;
                    }
                }
            }
        }
    }

    cleanup_scratch(&input, &output);
    Ok((working, outcome))
}

fn run_step(
    upscaler: &dyn Upscaler,
    working: &DynamicImage,
    input: &Path,
    output: &Path,
) -> Result<DynamicImage> {
    export_image(working, input)?;
    // A stale output from an earlier step must not pass for this step's result.
    if output.exists() {
        fs::remove_file(output).map_err(|e| CoverArtError::io(output, e))?;
    }
    upscaler.upscale(input, output, UPSCALE_STEP)?;
    open_image(output)
}

fn cleanup_scratch(input: &Path, output: &Path) {
    for path in [input, output] {
        if path.exists() {
            if let Err(e) = fs::remove_file(path) {
                tracing::debug!(path = %path.display(), error = %e, "Could not remove scratch file");
            }
        }
    }
}
