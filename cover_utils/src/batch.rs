//! Batch Result
//!
//! Per-track tally of one batch as shown to the user: a track succeeded when it
//! ended up pointing at a transformed cover, was skipped when it kept its source
//! image, and failed when its cover could not be written.

use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchResult {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: Vec<(PathBuf, String)>,
    pub skip_reasons: Vec<(PathBuf, String)>,
}

impl BatchResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn success(&mut self) {
        self.total += 1;
        self.succeeded += 1;
    }

    pub fn fail(&mut self, path: PathBuf, error: String) {
        self.total += 1;
        self.failed += 1;
        self.errors.push((path, error));
    }

    pub fn skip(&mut self, path: PathBuf, reason: String) {
        self.total += 1;
        self.skipped += 1;
        self.skip_reasons.push((path, reason));
    }

    /// Percentage of tracks that got a transformed cover; an empty batch is 100%.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            (self.succeeded as f64 / self.total as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_result_tally() {
        let mut result = BatchResult::new();
        result.success();
        result.success();
        result.fail(PathBuf::from("/music/a.png"), "Permission denied".to_string());
        result.skip(PathBuf::from("/music/b.jpg"), "unreadable".to_string());

        assert_eq!(result.total, 4);
        assert_eq!(result.total, result.succeeded + result.failed + result.skipped);
        assert_eq!(result.errors[0].1, "Permission denied");
        assert_eq!(result.skip_reasons[0].0, PathBuf::from("/music/b.jpg"));
    }

    #[test]
    fn test_success_rate() {
        let cases = [(0, 0, 0, 100.0), (3, 1, 0, 75.0), (1, 0, 1, 50.0), (0, 2, 2, 0.0)];

        for (ok, failed, skipped, expected) in cases {
            let mut result = BatchResult::new();
            (0..ok).for_each(|_| result.success());
            for i in 0..failed {
                result.fail(PathBuf::from(format!("f{}.png", i)), "E".to_string());
            }
            for i in 0..skipped {
                result.skip(PathBuf::from(format!("s{}.png", i)), "S".to_string());
            }
            assert!(
                (result.success_rate() - expected).abs() < 0.001,
                "{}/{}/{} expected {}%, got {}%",
                ok,
                failed,
                skipped,
                expected,
                result.success_rate()
            );
        }
    }
}
