//! Duplicate detection across a scanned file set
//!
//! Files are bucketed by a single content digest; buckets with one member
//! are not duplicates and are dropped. Archives are hashed as opaque files
//! here, so a zipped ROM and its loose payload are intentionally treated as
//! different content. Keep strategies pick which member of each group
//! survives a delete pass.

use crate::cache::{CacheKey, HashCache};
use crate::error::Result;
use crate::hashing::{self, HashAlgorithm};
use crate::models::{
    Completion, DuplicateGroup, ErrorCategory, FileRecord, OperationError,
};
use crate::progress::{CancelFlag, ProgressTracker};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::SystemTime;
use tracing::{debug, info};

/// Region and revision markers scored for the pattern strategy, matched
/// case-insensitively as substrings. The best match wins.
const REGION_SCORES: &[(&str, i64)] = &[
    ("usa", 100),
    ("(u)", 90),
    ("(world)", 80),
    ("europe", 70),
    ("(e)", 60),
    ("japan", 50),
    ("(j)", 40),
];

/// How the kept member of each duplicate group is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeepStrategy {
    /// Score names by region and revision markers, keep the best
    Pattern,
    /// Keep the largest member
    Largest,
    /// Keep the smallest member
    Smallest,
    /// Keep the member with the earliest modification time
    Oldest,
    /// Keep the member with the latest modification time
    Newest,
    /// Leave the current selection untouched
    Manual,
}

/// Result of one duplicate scan
#[derive(Debug, Default)]
pub struct DuplicateScanOutcome {
    /// Groups of two or more files with identical content
    pub groups: Vec<DuplicateGroup>,
    /// Per-file failures that did not abort the scan
    pub errors: Vec<OperationError>,
    /// How the scan ended
    pub completion: Completion,
    /// Hash-cache hits during the scan
    pub cache_hits: u64,
}

impl DuplicateScanOutcome {
    /// Bytes recoverable by deleting everything but the kept members.
    pub fn total_wasted_bytes(&self) -> u64 {
        self.groups.iter().map(|g| g.wasted_bytes).sum()
    }
}

/// Groups files by content digest
#[derive(Debug, Clone, Copy)]
pub struct DuplicateScanner {
    /// Digest used for bucketing
    pub algorithm: HashAlgorithm,
}

impl Default for DuplicateScanner {
    fn default() -> Self {
        Self {
            algorithm: HashAlgorithm::Sha1,
        }
    }
}

impl DuplicateScanner {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self { algorithm }
    }

    /// Hash every record and group identical content.
    ///
    /// Group member order is first-seen order from the input, which is also
    /// the default keep order. Files that fail to hash are reported and
    /// left out of all groups.
    pub async fn scan(
        &self,
        records: Vec<FileRecord>,
        cache: &mut HashCache,
        tracker: &ProgressTracker,
        cancel: &CancelFlag,
    ) -> DuplicateScanOutcome {
        let mut outcome = DuplicateScanOutcome::default();
        let mut buckets: HashMap<String, Vec<FileRecord>> = HashMap::new();
        let mut digest_order: Vec<String> = Vec::new();
        tracker.set_total_files(records.len() as u64);

        for record in records {
            if cancel.is_cancelled() {
                outcome.completion = Completion::Cancelled;
                tracker.emit();
                return outcome;
            }
            tracker.set_current_file(Some(record.path.clone()));

            match self.hash_through_cache(&record, cache).await {
                Ok(digest) => {
                    let bucket = buckets.entry(digest.clone()).or_insert_with(|| {
                        digest_order.push(digest);
                        Vec::new()
                    });
                    bucket.push(record);
                }
                Err(e) => {
                    outcome.errors.push(OperationError::for_file(
                        e.to_string(),
                        &record.path,
                        ErrorCategory::HashComputation,
                    ));
                }
            }
            tracker.set_cache_hits(cache.hits());
            tracker.increment_files_processed();
        }

        for digest in digest_order {
            let members = buckets.remove(&digest).unwrap_or_default();
            if members.len() < 2 {
                continue;
            }
            debug!(digest = %digest, members = members.len(), "duplicate group");
            outcome.groups.push(DuplicateGroup::new(digest, members));
            tracker.increment_duplicates_found();
        }

        info!(
            groups = outcome.groups.len(),
            wasted_bytes = outcome.total_wasted_bytes(),
            "duplicate scan complete"
        );
        outcome.cache_hits = cache.hits();
        outcome.completion = Completion::Completed;
        tracker.emit();
        outcome
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

/// Re-pick the kept member of every group using the given strategy.
///
/// Ties keep the earliest member in group order, so the default first-seen
/// choice survives whenever the strategy has no preference. Groups whose
/// members carry no modification times are left untouched by the time-based
/// strategies.
pub fn apply_keep_strategy(groups: &mut [DuplicateGroup], strategy: KeepStrategy) {
    if strategy == KeepStrategy::Manual {
        return;
    }
    for group in groups.iter_mut() {
        if let Some(keep) = pick_keep(&group.members, strategy) {
            group.set_keep(keep);
        }
    }
}

fn pick_keep(members: &[FileRecord], strategy: KeepStrategy) -> Option<usize> {
    match strategy {
        KeepStrategy::Manual => None,
        KeepStrategy::Pattern => max_by_key_first(members, |m| pattern_score(&m.name)),
        KeepStrategy::Largest => max_by_key_first(members, |m| m.size as i64),
        KeepStrategy::Smallest => max_by_key_first(members, |m| -(m.size as i64)),
        KeepStrategy::Oldest => extreme_by_time(members, |a, b| a < b),
        KeepStrategy::Newest => extreme_by_time(members, |a, b| a > b),
    }
}

/// Index of the member with the highest key; first member wins ties.
fn max_by_key_first(members: &[FileRecord], key: impl Fn(&FileRecord) -> i64) -> Option<usize> {
    let mut best: Option<(usize, i64)> = None;
    for (i, member) in members.iter().enumerate() {
        let score = key(member);
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((i, score)),
        }
    }
    best.map(|(i, _)| i)
}

fn extreme_by_time(
    members: &[FileRecord],
    better: impl Fn(SystemTime, SystemTime) -> bool,
) -> Option<usize> {
    let mut best: Option<(usize, SystemTime)> = None;
    for (i, member) in members.iter().enumerate() {
        let Some(time) = member.modified else { continue };
        match best {
            Some((_, best_time)) if !better(time, best_time) => {}
            _ => best = Some((i, time)),
        }
    }
    best.map(|(i, _)| i)
}

/// Result of deleting the non-kept members of selected groups
#[derive(Debug, Default)]
pub struct DeleteOutcome {
    /// Paths removed from disk
    pub deleted: Vec<std::path::PathBuf>,
    /// Bytes freed by the removals
    pub bytes_freed: u64,
    /// Per-file failures
    pub errors: Vec<OperationError>,
}

/// Delete every non-kept member of each selected group.
///
/// Unselected groups are skipped entirely. A member that fails to delete is
/// reported and the pass continues.
pub async fn delete_duplicates(groups: &[DuplicateGroup]) -> DeleteOutcome {
    let mut outcome = DeleteOutcome::default();
    for group in groups.iter().filter(|g| g.selected) {
        for member in group.doomed() {
            match tokio::fs::remove_file(&member.path).await {
                Ok(()) => {
                    debug!(path = %member.path.display(), "deleted duplicate");
                    outcome.deleted.push(member.path.clone());
                    outcome.bytes_freed += member.size;
                }
                Err(e) => outcome.errors.push(OperationError::for_file(
                    format!("failed to delete: {e}"),
                    &member.path,
                    ErrorCategory::FileSystem,
                )),
            }
        }
    }
    info!(
        deleted = outcome.deleted.len(),
        bytes_freed = outcome.bytes_freed,
        "duplicate delete pass complete"
    );
    outcome
}

/// Score a file name by its region and revision markers.
///
/// The best-matching region marker sets the base score, a revision marker
/// adds ten, and every `(` and `[` subtracts one so a clean name beats a
/// heavily tagged one within the same region. Counting opening characters
/// equals counting tag pairs whenever the name's brackets are balanced.
pub fn pattern_score(name: &str) -> i64 {
    let lower = name.to_lowercase();
    let mut score = REGION_SCORES
        .iter()
        .filter(|(marker, _)| lower.contains(marker))
        .map(|&(_, value)| value)
        .max()
        .unwrap_or(0);
    if lower.contains("rev 1") || lower.contains("rev1") {
        score += 10;
    }
    score -= lower.matches('(').count() as i64;
    score -= lower.matches('[').count() as i64;
    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    fn record(name: &str, size: u64, mtime: Option<u64>) -> FileRecord {
        FileRecord::new(
            PathBuf::from(format!("/roms/{name}")),
            size,
            mtime.map(|secs| SystemTime::UNIX_EPOCH + Duration::from_secs(secs)),
        )
    }

    #[test]
    fn region_scores_rank_usa_above_europe_above_japan() {
        let usa = pattern_score("Game (USA).md");
        let europe = pattern_score("Game (Europe).md");
        let japan = pattern_score("Game (Japan).md");
        assert!(usa > europe);
        assert!(europe > japan);
    }

    #[test]
    fn revision_bonus_and_tag_penalty() {
        assert!(pattern_score("Game (USA) (Rev 1).md") > pattern_score("Game (USA).md"));
        assert!(pattern_score("Game (USA).md") > pattern_score("Game (USA) (Beta) [b1].md"));
        assert_eq!(pattern_score("Game.md"), 0);
    }

    #[test]
    fn pattern_strategy_keeps_best_scored_member() {
        let mut groups = vec![DuplicateGroup::new(
            "abcd".to_string(),
            vec![
                record("Game (Japan).md", 10, None),
                record("Game (USA).md", 10, None),
                record("Game (Europe).md", 10, None),
            ],
        )];
        apply_keep_strategy(&mut groups, KeepStrategy::Pattern);
        assert_eq!(groups[0].kept().name, "Game (USA).md");
    }

    #[test]
    fn size_strategies_pick_extremes_first_seen_on_tie() {
        let mut groups = vec![DuplicateGroup::new(
            "abcd".to_string(),
            vec![record("a.md", 5, None), record("b.md", 9, None), record("c.md", 9, None)],
        )];
        apply_keep_strategy(&mut groups, KeepStrategy::Largest);
        assert_eq!(groups[0].kept().name, "b.md");
        apply_keep_strategy(&mut groups, KeepStrategy::Smallest);
        assert_eq!(groups[0].kept().name, "a.md");
    }

    #[test]
    fn time_strategies_fall_back_to_first_seen_without_mtimes() {
        let mut groups = vec![DuplicateGroup::new(
            "abcd".to_string(),
            vec![record("a.md", 1, None), record("b.md", 1, None)],
        )];
        apply_keep_strategy(&mut groups, KeepStrategy::Oldest);
        assert_eq!(groups[0].keep, 0);

        let mut groups = vec![DuplicateGroup::new(
            "abcd".to_string(),
            vec![
                record("a.md", 1, Some(2000)),
                record("b.md", 1, Some(1000)),
                record("c.md", 1, Some(3000)),
            ],
        )];
        apply_keep_strategy(&mut groups, KeepStrategy::Oldest);
        assert_eq!(groups[0].kept().name, "b.md");
        apply_keep_strategy(&mut groups, KeepStrategy::Newest);
        assert_eq!(groups[0].kept().name, "c.md");
    }

    #[test]
    fn manual_strategy_preserves_selection() {
        let mut groups = vec![DuplicateGroup::new(
            "abcd".to_string(),
            vec![record("a.md", 1, None), record("b.md", 1, None)],
        )];
        groups[0].set_keep(1);
        apply_keep_strategy(&mut groups, KeepStrategy::Manual);
        assert_eq!(groups[0].keep, 1);
    }

    #[tokio::test]
    async fn scan_groups_identical_content_and_drops_singletons() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("Game (USA).md");
        let b = dir.path().join("Game (Japan).md");
        let c = dir.path().join("Other.md");
        std::fs::write(&a, b"same bytes").unwrap();
        std::fs::write(&b, b"same bytes").unwrap();
        std::fs::write(&c, b"different").unwrap();

        let records = vec![
            FileRecord::from_path(&a).unwrap(),
            FileRecord::from_path(&b).unwrap(),
            FileRecord::from_path(&c).unwrap(),
        ];

        let mut cache = HashCache::new();
        let scanner = DuplicateScanner::default();
        let outcome = scanner
            .scan(records, &mut cache, &ProgressTracker::new(), &CancelFlag::new())
            .await;

        assert_eq!(outcome.completion, Completion::Completed);
        assert_eq!(outcome.groups.len(), 1);
        assert_eq!(outcome.groups[0].members.len(), 2);
        assert_eq!(outcome.groups[0].members[0].name, "Game (USA).md");
        assert_eq!(outcome.groups[0].wasted_bytes, 10);
        assert!(outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn second_scan_hits_the_cache() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.md");
        let b = dir.path().join("b.md");
        std::fs::write(&a, b"xx").unwrap();
        std::fs::write(&b, b"xx").unwrap();
        let records = vec![FileRecord::from_path(&a).unwrap(), FileRecord::from_path(&b).unwrap()];

        let mut cache = HashCache::new();
        let scanner = DuplicateScanner::default();
        let first = scanner
            .scan(records.clone(), &mut cache, &ProgressTracker::new(), &CancelFlag::new())
            .await;
        assert_eq!(first.cache_hits, 0);

        let second = scanner
            .scan(records, &mut cache, &ProgressTracker::new(), &CancelFlag::new())
            .await;
        assert_eq!(second.cache_hits, 2);
        assert_eq!(second.groups.len(), 1);
    }

    #[tokio::test]
    async fn delete_pass_honors_selection_and_keep() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.md");
        let b = dir.path().join("b.md");
        let c = dir.path().join("c.md");
        let d = dir.path().join("d.md");
        for p in [&a, &b, &c, &d] {
            std::fs::write(p, b"xx").unwrap();
        }

        let mut selected = DuplicateGroup::new(
            "g1".to_string(),
            vec![FileRecord::from_path(&a).unwrap(), FileRecord::from_path(&b).unwrap()],
        );
        selected.selected = true;
        selected.set_keep(1);
        let unselected = DuplicateGroup::new(
            "g2".to_string(),
            vec![FileRecord::from_path(&c).unwrap(), FileRecord::from_path(&d).unwrap()],
        );

        let outcome = delete_duplicates(&[selected, unselected]).await;
        assert_eq!(outcome.deleted, vec![a.clone()]);
        assert_eq!(outcome.bytes_freed, 2);
        assert!(outcome.errors.is_empty());
        assert!(!a.exists());
        assert!(b.exists());
        assert!(c.exists() && d.exists());
    }

    #[tokio::test]
    async fn unreadable_file_is_an_error_not_a_member() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.md");
        std::fs::write(&a, b"xx").unwrap();

        let records = vec![
            FileRecord::from_path(&a).unwrap(),
            FileRecord::new(PathBuf::from("/nonexistent/b.md"), 2, None),
        ];

        let mut cache = HashCache::new();
        let outcome = DuplicateScanner::default()
            .scan(records, &mut cache, &ProgressTracker::new(), &CancelFlag::new())
            .await;

        assert!(outcome.groups.is_empty());
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].category, ErrorCategory::HashComputation);
    }
}
