//! Collection comparison between two folders
//!
//! Quick comparison works on file names alone and optionally verifies that
//! same-named files carry identical content. Deep comparison ignores names
//! entirely and matches by content digest, so it recognizes a renamed copy
//! of the same ROM on the other side.

use crate::cache::{CacheKey, HashCache};
use crate::error::Result;
use crate::hashing::{self, HashAlgorithm};
use crate::models::{Completion, ErrorCategory, FileRecord, OperationError};
use crate::progress::{CancelFlag, ProgressTracker};
use crate::scanner::Scanner;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// How two collections are matched up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareMethod {
    /// Match by file name
    Quick,
    /// Match by content digest
    Deep,
}

/// A name present on both sides whose content differs
#[derive(Debug, Clone)]
pub struct MismatchedPair {
    pub name: String,
    pub source: FileRecord,
    pub target: FileRecord,
}

/// Result of comparing two folders
#[derive(Debug, Default)]
pub struct CompareOutcome {
    /// Files present only in the source folder
    pub only_in_source: Vec<FileRecord>,
    /// Files present only in the target folder
    pub only_in_target: Vec<FileRecord>,
    /// Matched pairs, source record first
    pub in_both: Vec<(FileRecord, FileRecord)>,
    /// Same-named pairs with differing content (quick integrity check only)
    pub mismatched: Vec<MismatchedPair>,
    /// Files that passed the filter on the source side
    pub source_count: usize,
    /// Files that passed the filter on the target side
    pub target_count: usize,
    /// Files the filter rejected on the source side
    pub source_excluded: usize,
    /// Files the filter rejected on the target side
    pub target_excluded: usize,
    /// Per-file failures that did not abort the comparison
    pub errors: Vec<OperationError>,
    /// How the comparison ended
    pub completion: Completion,
    /// Hash-cache hits during the comparison
    pub cache_hits: u64,
}

/// Compares two ROM folders
#[derive(Debug, Clone, Copy)]
pub struct Comparator {
    pub method: CompareMethod,
    /// For quick comparison, also hash same-named pairs and report mismatches
    pub verify_integrity: bool,
    /// Digest used for integrity checks and deep comparison
    pub algorithm: HashAlgorithm,
    /// Scanner applied identically to both sides
    pub scanner: Scanner,
}

impl Default for Comparator {
    fn default() -> Self {
        Self {
            method: CompareMethod::Quick,
            verify_integrity: false,
            algorithm: HashAlgorithm::Sha1,
            scanner: Scanner::default(),
        }
    }
}

impl Comparator {
    /// Compare the source folder against the target folder.
    pub async fn compare(
        &self,
        source: &Path,
        target: &Path,
        cache: &mut HashCache,
        tracker: &ProgressTracker,
        cancel: &CancelFlag,
    ) -> Result<CompareOutcome> {
        let source_scan = self
            .scanner
            .scan_counted(source, cancel)
            .await
            .map_err(|e| crate::error::Error::io(source, e))?;
        let target_scan = self
            .scanner
            .scan_counted(target, cancel)
            .await
            .map_err(|e| crate::error::Error::io(target, e))?;

        let mut outcome = match self.method {
            CompareMethod::Quick => {
                self.compare_quick(source_scan.records, target_scan.records, cache, tracker, cancel)
                    .await
            }
            CompareMethod::Deep => {
                self.compare_deep(source_scan.records, target_scan.records, cache, tracker, cancel)
                    .await
            }
        };
        outcome.source_excluded = source_scan.excluded;
        outcome.target_excluded = target_scan.excluded;
        outcome.cache_hits = cache.hits();
        info!(
            only_source = outcome.only_in_source.len(),
            only_target = outcome.only_in_target.len(),
            matched = outcome.in_both.len(),
            mismatched = outcome.mismatched.len(),
            "comparison complete"
        );
        tracker.emit();
        Ok(outcome)
    }

    async fn compare_quick(
        &self,
        source_records: Vec<FileRecord>,
        target_records: Vec<FileRecord>,
        cache: &mut HashCache,
        tracker: &ProgressTracker,
        cancel: &CancelFlag,
    ) -> CompareOutcome {
        let mut outcome = CompareOutcome {
            source_count: source_records.len(),
            target_count: target_records.len(),
            ..Default::default()
        };

        let mut target_by_name: HashMap<String, FileRecord> = target_records
            .into_iter()
            .map(|r| (r.name.clone(), r))
            .collect();

        let mut pairs = Vec::new();
        for record in source_records {
            match target_by_name.remove(&record.name) {
                Some(target_record) => pairs.push((record, target_record)),
                None => outcome.only_in_source.push(record),
            }
        }
        let mut leftover: Vec<FileRecord> = target_by_name.into_values().collect();
        leftover.sort_by(|a, b| a.name.cmp(&b.name));
        outcome.only_in_target = leftover;

        if self.verify_integrity {
            tracker.set_total_files(pairs.len() as u64);
            for (source_record, target_record) in pairs {
                if cancel.is_cancelled() {
                    outcome.completion = Completion::Cancelled;
                    return outcome;
                }
                tracker.set_current_file(Some(source_record.path.clone()));
                let source_hash = self.hash_through_cache(&source_record, cache).await;
                let target_hash = self.hash_through_cache(&target_record, cache).await;
                match (source_hash, target_hash) {
                    (Ok(a), Ok(b)) if a != b => outcome.mismatched.push(MismatchedPair {
                        name: source_record.name.clone(),
                        source: source_record.clone(),
                        target: target_record.clone(),
                    }),
                    (Ok(_), Ok(_)) => {}
                    (Err(e), _) | (_, Err(e)) => outcome.errors.push(OperationError::for_file(
                        e.to_string(),
                        &source_record.path,
                        ErrorCategory::HashComputation,
                    )),
                }
                tracker.set_cache_hits(cache.hits());
                tracker.increment_files_processed();
                outcome.in_both.push((source_record, target_record));
            }
        } else {
            outcome.in_both = pairs;
        }
        outcome.completion = Completion::Completed;
        outcome
    }

    async fn compare_deep(
        &self,
        source_records: Vec<FileRecord>,
        target_records: Vec<FileRecord>,
        cache: &mut HashCache,
        tracker: &ProgressTracker,
        cancel: &CancelFlag,
    ) -> CompareOutcome {
        let mut outcome = CompareOutcome {
            source_count: source_records.len(),
            target_count: target_records.len(),
            ..Default::default()
        };
        tracker.set_total_files((source_records.len() + target_records.len()) as u64);

        let Some(source_by_digest) =
            self.digest_side(source_records, cache, tracker, cancel, &mut outcome).await
        else {
            outcome.completion = Completion::Cancelled;
            return outcome;
        };
        let Some(mut target_by_digest) =
            self.digest_side(target_records, cache, tracker, cancel, &mut outcome).await
        else {
            outcome.completion = Completion::Cancelled;
            return outcome;
        };

        for (digest, source_record) in source_by_digest {
            match target_by_digest.remove(&digest) {
                Some(target_record) => outcome.in_both.push((source_record, target_record)),
                None => outcome.only_in_source.push(source_record),
            }
        }
        let mut leftover: Vec<FileRecord> = target_by_digest.into_values().collect();
        leftover.sort_by(|a, b| a.name.cmp(&b.name));
        outcome.only_in_target = leftover;
        outcome.only_in_source.sort_by(|a, b| a.name.cmp(&b.name));
        outcome.in_both.sort_by(|a, b| a.0.name.cmp(&b.0.name));
        outcome.completion = Completion::Completed;
        outcome
    }

    /// Digest one side into a map. The first file seen with a given digest
    /// represents it; later same-content files on the same side are
    /// duplicates and do not affect the comparison. Returns `None` on
    /// cancellation.
    async fn digest_side(
        &self,
        records: Vec<FileRecord>,
        cache: &mut HashCache,
        tracker: &ProgressTracker,
        cancel: &CancelFlag,
        outcome: &mut CompareOutcome,
    ) -> Option<HashMap<String, FileRecord>> {
        let mut by_digest = HashMap::new();
        for record in records {
            if cancel.is_cancelled() {
                return None;
            }
            tracker.set_current_file(Some(record.path.clone()));
            match self.hash_through_cache(&record, cache).await {
                Ok(digest) => {
                    by_digest.entry(digest).or_insert(record);
                }
                Err(e) => outcome.errors.push(OperationError::for_file(
                    e.to_string(),
                    &record.path,
                    ErrorCategory::HashComputation,
                )),
            }
            tracker.set_cache_hits(cache.hits());
            tracker.increment_files_processed();
        }
        Some(by_digest)
    }

    async fn hash_through_cache(
        &self,
        record: &FileRecord,
        cache: &mut HashCache,
    ) -> Result<String> {
        let key = CacheKey::for_file(&record.path, self.algorithm)?;
        if let Some(digest) = cache.get(&key) {
            return Ok(digest);
        }
        let digest = hashing::hash_file(&record.path, self.algorithm).await?;
        cache.insert(&key, &digest);
        Ok(digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, TempDir) {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        std::fs::write(source.path().join("shared.md"), b"same").unwrap();
        std::fs::write(target.path().join("shared.md"), b"same").unwrap();
        std::fs::write(source.path().join("source only.md"), b"aaa").unwrap();
        std::fs::write(target.path().join("target only.md"), b"bbb").unwrap();
        (source, target)
    }

    async fn run(comparator: Comparator, source: &Path, target: &Path) -> CompareOutcome {
        let mut cache = HashCache::new();
        comparator
            .compare(
                source,
                target,
                &mut cache,
                &ProgressTracker::new(),
                &CancelFlag::new(),
            )
            .await
            .unwrap()
    }

    fn names(records: &[FileRecord]) -> Vec<&str> {
        records.iter().map(|r| r.name.as_str()).collect()
    }

    #[tokio::test]
    async fn quick_compare_partitions_by_name() {
        let (source, target) = setup();
        let outcome = run(Comparator::default(), source.path(), target.path()).await;

        assert_eq!(names(&outcome.only_in_source), vec!["source only.md"]);
        assert_eq!(names(&outcome.only_in_target), vec!["target only.md"]);
        assert_eq!(outcome.in_both.len(), 1);
        assert_eq!(outcome.source_count, 2);
        assert_eq!(outcome.target_count, 2);
        assert!(outcome.mismatched.is_empty());
        assert_eq!(outcome.completion, Completion::Completed);
    }

    #[tokio::test]
    async fn integrity_check_flags_differing_content() {
        let (source, target) = setup();
        // Same name, different bytes.
        std::fs::write(source.path().join("rotten.md"), b"good copy").unwrap();
        std::fs::write(target.path().join("rotten.md"), b"bad copy!").unwrap();

        let comparator = Comparator {
            verify_integrity: true,
            ..Comparator::default()
        };
        let outcome = run(comparator, source.path(), target.path()).await;

        assert_eq!(outcome.mismatched.len(), 1);
        assert_eq!(outcome.mismatched[0].name, "rotten.md");
        assert_eq!(outcome.in_both.len(), 2);
        assert!(outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn deep_compare_matches_renamed_content() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        std::fs::write(source.path().join("Game (USA).md"), b"identical bytes").unwrap();
        std::fs::write(target.path().join("game_us.md"), b"identical bytes").unwrap();
        std::fs::write(source.path().join("unique.md"), b"only here").unwrap();

        let comparator = Comparator {
            method: CompareMethod::Deep,
            ..Comparator::default()
        };
        let outcome = run(comparator, source.path(), target.path()).await;

        assert_eq!(outcome.in_both.len(), 1);
        assert_eq!(outcome.in_both[0].0.name, "Game (USA).md");
        assert_eq!(outcome.in_both[0].1.name, "game_us.md");
        assert_eq!(names(&outcome.only_in_source), vec!["unique.md"]);
        assert!(outcome.only_in_target.is_empty());
    }

    #[tokio::test]
    async fn deep_compare_first_wins_within_a_side() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        // Two same-content files on the source side map to one digest entry.
        std::fs::write(source.path().join("a.md"), b"dup content").unwrap();
        std::fs::write(source.path().join("b.md"), b"dup content").unwrap();
        std::fs::write(target.path().join("c.md"), b"dup content").unwrap();

        let comparator = Comparator {
            method: CompareMethod::Deep,
            ..Comparator::default()
        };
        let outcome = run(comparator, source.path(), target.path()).await;

        assert_eq!(outcome.in_both.len(), 1);
        assert_eq!(outcome.in_both[0].0.name, "a.md");
        assert!(outcome.only_in_source.is_empty());
    }

    #[tokio::test]
    async fn junk_files_are_counted_as_excluded() {
        let (source, target) = setup();
        std::fs::write(source.path().join("cover.png"), b"img").unwrap();

        let outcome = run(Comparator::default(), source.path(), target.path()).await;
        assert_eq!(outcome.source_count, 2);
        assert_eq!(outcome.source_excluded, 1);
        assert_eq!(outcome.target_excluded, 0);
    }
}
