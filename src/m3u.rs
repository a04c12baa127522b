//! Multi-disc detection and M3U playlist generation
//!
//! Disc files sharing a base name are grouped, moved into a `.hidden`
//! subfolder, and replaced by one `.m3u` playlist so front-ends show a
//! single entry per game. Recursive scans never descend into `.hidden`,
//! which keeps tucked-away discs out of later scans.

use crate::models::{Completion, ErrorCategory, FileRecord, OperationError};
use crate::progress::{CancelFlag, ProgressTracker};
use crate::scanner::HIDDEN_DISC_FOLDER;
use regex::Regex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::LazyLock;
use tracing::{debug, info};

/// Matches `(Disc 1)`, `(Disk 2)`, `(CD 3)` style tags, capturing the number.
static DISC_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*\((?:Disc|Disk|CD)\s*(\d+)\)").expect("disc tag pattern is valid")
});

/// One multi-disc game found in a scan
#[derive(Debug, Clone)]
pub struct MultiDiscSet {
    /// Game name with the disc tag stripped, used for the playlist name
    pub base_name: String,
    /// Folder the discs live in
    pub folder: PathBuf,
    /// Discs in ascending disc-number order
    pub discs: Vec<FileRecord>,
}

impl MultiDiscSet {
    /// Path of the playlist this set produces.
    pub fn playlist_path(&self) -> PathBuf {
        self.folder.join(format!("{}.m3u", self.base_name))
    }
}

/// Result of a playlist creation pass
#[derive(Debug, Default)]
pub struct M3uOutcome {
    /// Playlists written
    pub playlists: Vec<PathBuf>,
    /// Per-set failures
    pub errors: Vec<OperationError>,
    /// How the pass ended
    pub completion: Completion,
}

/// Disc number from a file name, when it carries a disc tag.
pub fn disc_number(name: &str) -> Option<u32> {
    DISC_TAG
        .captures(name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Group scanned files into multi-disc sets.
///
/// Files group by folder and by their name with the disc tag removed; a
/// set needs at least two discs. Single tagged discs and untagged files
/// are left alone.
pub fn find_multi_disc_sets(records: &[FileRecord]) -> Vec<MultiDiscSet> {
    let mut groups: HashMap<(PathBuf, String), Vec<(u32, FileRecord)>> = HashMap::new();
    let mut order: Vec<(PathBuf, String)> = Vec::new();

    for record in records {
        let Some(number) = disc_number(&record.name) else {
            continue;
        };
        let Some(folder) = record.path.parent() else {
            continue;
        };
        let stem = record
            .name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(&record.name);
        let base = DISC_TAG.replace_all(stem, "").trim().to_string();
        if base.is_empty() {
            continue;
        }
        let key = (folder.to_path_buf(), base);
        let group = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            Vec::new()
        });
        group.push((number, record.clone()));
    }

    let mut sets = Vec::new();
    for key in order {
        let mut discs = groups.remove(&key).unwrap_or_default();
        if discs.len() < 2 {
            continue;
        }
        discs.sort_by_key(|(number, _)| *number);
        let (folder, base_name) = key;
        debug!(base = %base_name, discs = discs.len(), "multi-disc set");
        sets.push(MultiDiscSet {
            base_name,
            folder,
            discs: discs.into_iter().map(|(_, record)| record).collect(),
        });
    }
    sets
}

/// Move each set's discs into `.hidden` and write its playlist.
///
/// Sets are processed independently; a failure while moving one set's
/// discs is reported and the remaining sets still proceed. Playlist lines
/// reference the hidden copies relative to the playlist's folder.
pub async fn create_playlists(
    sets: &[MultiDiscSet],
    tracker: &ProgressTracker,
    cancel: &CancelFlag,
) -> M3uOutcome {
    let mut outcome = M3uOutcome::default();
    tracker.set_total_files(sets.len() as u64);

    for set in sets {
        if cancel.is_cancelled() {
            outcome.completion = Completion::Cancelled;
            tracker.emit();
            return outcome;
        }
        tracker.set_current_file(Some(set.playlist_path()));

        if let Err(e) = tuck_away_set(set).await {
            outcome.errors.push(e);
        } else {
            outcome.playlists.push(set.playlist_path());
        }
        tracker.increment_files_processed();
    }

    info!(playlists = outcome.playlists.len(), "playlist pass complete");
    outcome.completion = Completion::Completed;
    tracker.emit();
    outcome
}

async fn tuck_away_set(set: &MultiDiscSet) -> Result<(), OperationError> {
    let hidden = set.folder.join(HIDDEN_DISC_FOLDER);
    tokio::fs::create_dir_all(&hidden).await.map_err(|e| {
        OperationError::for_file(
            format!("cannot create disc folder: {e}"),
            &hidden,
            ErrorCategory::FileSystem,
        )
    })?;

    let mut lines = String::new();
    for disc in &set.discs {
        let destination = hidden.join(&disc.name);
        tokio::fs::rename(&disc.path, &destination).await.map_err(|e| {
            OperationError::for_file(
                format!("cannot move disc into '{HIDDEN_DISC_FOLDER}': {e}"),
                &disc.path,
                ErrorCategory::FileSystem,
            )
        })?;
        lines.push_str(&format!("{HIDDEN_DISC_FOLDER}/{}\n", disc.name));
    }

    let playlist = set.playlist_path();
    tokio::fs::write(&playlist, lines).await.map_err(|e| {
        OperationError::for_file(
            format!("cannot write playlist: {e}"),
            &playlist,
            ErrorCategory::FileSystem,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(dir: &TempDir, name: &str) -> FileRecord {
        let path = dir.path().join(name);
        std::fs::write(&path, b"disc data").unwrap();
        FileRecord::from_path(&path).unwrap()
    }

    #[test]
    fn disc_tags_parse_case_insensitively() {
        assert_eq!(disc_number("Game (Disc 1).chd"), Some(1));
        assert_eq!(disc_number("Game (disk 2).chd"), Some(2));
        assert_eq!(disc_number("Game (CD3).chd"), Some(3));
        assert_eq!(disc_number("Game (USA).chd"), None);
        assert_eq!(disc_number("Game.chd"), None);
    }

    #[test]
    fn grouping_requires_two_discs_and_same_base() {
        let dir = TempDir::new().unwrap();
        let records = vec![
            record(&dir, "Final Quest (Disc 2).chd"),
            record(&dir, "Final Quest (Disc 1).chd"),
            record(&dir, "Lone Disc (Disc 1).chd"),
            record(&dir, "Plain Game.chd"),
        ];

        let sets = find_multi_disc_sets(&records);
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].base_name, "Final Quest");
        let names: Vec<&str> = sets[0].discs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Final Quest (Disc 1).chd", "Final Quest (Disc 2).chd"]);
    }

    #[test]
    fn base_name_keeps_other_tags() {
        let dir = TempDir::new().unwrap();
        let records = vec![
            record(&dir, "Game (USA) (Disc 1).chd"),
            record(&dir, "Game (USA) (Disc 2).chd"),
        ];
        let sets = find_multi_disc_sets(&records);
        assert_eq!(sets[0].base_name, "Game (USA)");
    }

    #[tokio::test]
    async fn playlist_creation_moves_discs_and_writes_m3u() {
        let dir = TempDir::new().unwrap();
        let records = vec![
            record(&dir, "Game (Disc 1).chd"),
            record(&dir, "Game (Disc 2).chd"),
        ];
        let sets = find_multi_disc_sets(&records);

        let outcome = create_playlists(&sets, &ProgressTracker::new(), &CancelFlag::new()).await;
        assert_eq!(outcome.completion, Completion::Completed);
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.playlists, vec![dir.path().join("Game.m3u")]);

        assert!(dir.path().join(".hidden/Game (Disc 1).chd").exists());
        assert!(!dir.path().join("Game (Disc 1).chd").exists());

        let playlist = std::fs::read_to_string(dir.path().join("Game.m3u")).unwrap();
        assert_eq!(playlist, ".hidden/Game (Disc 1).chd\n.hidden/Game (Disc 2).chd\n");
    }

    #[tokio::test]
    async fn missing_disc_fails_only_its_set() {
        let dir = TempDir::new().unwrap();
        let a1 = record(&dir, "A (Disc 1).chd");
        let a2 = record(&dir, "A (Disc 2).chd");
        let records = vec![
            a1,
            a2,
            record(&dir, "B (Disc 1).chd"),
            record(&dir, "B (Disc 2).chd"),
        ];
        let sets = find_multi_disc_sets(&records);
        std::fs::remove_file(dir.path().join("A (Disc 2).chd")).unwrap();

        let outcome = create_playlists(&sets, &ProgressTracker::new(), &CancelFlag::new()).await;
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.playlists, vec![dir.path().join("B.m3u")]);
        assert!(dir.path().join(".hidden/B (Disc 1).chd").exists());
    }
}
