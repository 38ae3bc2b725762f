//! Dedup Index
//!
//! Buckets keyed by perceptual hash, kept in first-seen order. Each bucket
//! counts how many records share the hash, where its transformed cover will be
//! written, and whether that has happened yet.
//!
//! A memo from cryptographic to perceptual hash lets byte-identical files skip
//! the expensive perceptual hasher entirely.

use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::hasher::FingerprintPair;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HashBucket {
    pub key: String,
    pub frequency: usize,
    pub output_path: PathBuf,
    pub processed: bool,
    /// Record that created the bucket; its image is the one transformed.
    pub representative: usize,
    pub members: Vec<usize>,
}

/// `{root}/{perceptual hash}.png`
pub fn bucket_output_path(root: &Path, key: &str) -> PathBuf {
    root.join(format!("{}.png", key))
}

#[derive(Debug, Default)]
pub struct DedupIndex {
    buckets: Vec<HashBucket>,
    by_key: HashMap<String, usize>,
    perceptual_memo: HashMap<String, String>,
}

impl DedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every bucket and memoized hash.
    pub fn clear(&mut self) {
        self.buckets.clear();
        self.by_key.clear();
        self.perceptual_memo.clear();
    }

    pub fn memoized_perceptual(&self, cryptographic: &str) -> Option<&str> {
        self.perceptual_memo.get(cryptographic).map(String::as_str)
    }

    /// Classify one record. `compute_perceptual` only runs when this
    /// cryptographic hash has not been seen before.
    pub fn classify<F>(
        &mut self,
        record: usize,
        cryptographic: &str,
        root: &Path,
        compute_perceptual: F,
    ) -> FingerprintPair
    where
        F: FnOnce() -> String,
    {
        let perceptual = match self.perceptual_memo.get(cryptographic) {
            Some(known) => {
                tracing::debug!(record, hash = %known, "Identical image seen before, reusing hash");
                known.clone()
            }
            None => {
                let computed = compute_perceptual();
                self.perceptual_memo
                    .insert(cryptographic.to_string(), computed.clone());
                computed
            }
        };

        self.insert(record, &perceptual, root);

        FingerprintPair {
            cryptographic: cryptographic.to_string(),
            perceptual,
        }
    }

    /// Count `record` under `key`, creating the bucket on first sight.
    pub fn insert(&mut self, record: usize, key: &str, root: &Path) -> &HashBucket {
        let slot = match self.by_key.get(key) {
            Some(&slot) => {
                let bucket = &mut self.buckets[slot];
                bucket.frequency += 1;
                bucket.members.push(record);
                slot
            }
            None => {
                let slot = self.buckets.len();
                self.buckets.push(HashBucket {
                    key: key.to_string(),
                    frequency: 1,
                    output_path: bucket_output_path(root, key),
                    processed: false,
                    representative: record,
                    members: vec![record],
                });
                self.by_key.insert(key.to_string(), slot);
                slot
            }
        };
        &self.buckets[slot]
    }

    pub fn bucket(&self, key: &str) -> Option<&HashBucket> {
        self.by_key.get(key).map(|&slot| &self.buckets[slot])
    }

    pub fn buckets(&self) -> &[HashBucket] {
        &self.buckets
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Highest frequency wins; on a tie the earlier bucket is kept.
    pub fn most_common(&self) -> Option<&HashBucket> {
        self.buckets.iter().fold(None, |best: Option<&HashBucket>, bucket| match best {
            Some(current) if current.frequency >= bucket.frequency => Some(current),
            _ => Some(bucket),
        })
    }

    pub fn mark_processed(&mut self, key: &str) {
        if let Some(&slot) = self.by_key.get(key) {
            self.buckets[slot].processed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_bucket_created_then_incremented() {
        let mut index = DedupIndex::new();
        let root = Path::new("/covers");

        let bucket = index.insert(0, "00ff00ff00ff00ff", root);
        assert_eq!(bucket.frequency, 1);
        assert_eq!(bucket.output_path, PathBuf::from("/covers/00ff00ff00ff00ff.png"));
        assert!(!bucket.processed);

        let bucket = index.insert(3, "00ff00ff00ff00ff", Path::new("/elsewhere"));
        assert_eq!(bucket.frequency, 2);
        assert_eq!(bucket.members, vec![0, 3]);
        assert_eq!(bucket.representative, 0);
        // first creation decides the output path
        assert_eq!(bucket.output_path, PathBuf::from("/covers/00ff00ff00ff00ff.png"));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_classify_memoizes_by_cryptographic_hash() {
        let mut index = DedupIndex::new();
        let root = Path::new("/covers");
        let calls = Cell::new(0);
        let compute = || {
            calls.set(calls.get() + 1);
            "1234123412341234".to_string()
        };

        let first = index.classify(0, "sha-a", root, compute);
        let second = index.classify(1, "sha-a", root, || {
            calls.set(calls.get() + 1);
            "ffffffffffffffff".to_string()
        });

        assert_eq!(calls.get(), 1);
        assert_eq!(first.perceptual, second.perceptual);
        assert_eq!(index.bucket("1234123412341234").unwrap().frequency, 2);
        assert_eq!(index.memoized_perceptual("sha-a"), Some("1234123412341234"));
    }

    #[test]
    fn test_different_bytes_same_look_share_bucket() {
        let mut index = DedupIndex::new();
        let root = Path::new("/covers");
        index.classify(0, "sha-a", root, || "abab".to_string());
        index.classify(1, "sha-b", root, || "abab".to_string());

        assert_eq!(index.len(), 1);
        assert_eq!(index.buckets()[0].frequency, 2);
    }

    #[test]
    fn test_most_common_prefers_first_on_tie() {
        let mut index = DedupIndex::new();
        let root = Path::new("/covers");
        index.insert(0, "aaaa", root);
        index.insert(1, "bbbb", root);
        index.insert(2, "bbbb", root);
        index.insert(3, "aaaa", root);
        index.insert(4, "cccc", root);

        assert_eq!(index.most_common().unwrap().key, "aaaa");

        index.insert(5, "cccc", root);
        index.insert(6, "cccc", root);
        assert_eq!(index.most_common().unwrap().key, "cccc");
    }

    #[test]
    fn test_clear_and_mark_processed() {
        let mut index = DedupIndex::new();
        let root = Path::new("/covers");
        index.classify(0, "sha-a", root, || "aaaa".to_string());
        index.mark_processed("aaaa");
        assert!(index.bucket("aaaa").unwrap().processed);

        index.clear();
        assert!(index.is_empty());
        assert!(index.most_common().is_none());
        assert!(index.memoized_perceptual("sha-a").is_none());
    }
}
