//! Data models shared across the library

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// One entry in a loaded folder listing.
///
/// Created when a folder is scanned; immutable until the next scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileRecord {
    /// File name including extension
    pub name: String,
    /// File size in bytes
    pub size: u64,
    /// Absolute path
    pub path: PathBuf,
    /// Last modification time, if the filesystem reported one
    pub modified: Option<SystemTime>,
}

impl FileRecord {
    /// Build a record from a path and its metadata.
    pub fn new(path: PathBuf, size: u64, modified: Option<SystemTime>) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            name,
            size,
            path,
            modified,
        }
    }

    /// Read metadata from disk and build a record.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        Ok(Self::new(path.to_path_buf(), meta.len(), meta.modified().ok()))
    }

    /// Lowercased file extension with leading dot, e.g. `".zip"`.
    pub fn extension_lower(&self) -> Option<String> {
        extension_lower(&self.path)
    }
}

/// Lowercased extension of a path, with leading dot.
pub(crate) fn extension_lower(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
}

/// A group of files with byte-identical content.
///
/// Invariants: `members.len() >= 2`, `keep < members.len()`, and
/// `wasted_bytes == members[0].size * (members.len() - 1)` (all members share
/// one size because grouping is by content hash).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroup {
    /// Content hash shared by every member
    pub digest: String,
    /// All files with this hash, in directory-listing order
    pub members: Vec<FileRecord>,
    /// Index into `members` of the file marked "keep"
    pub keep: usize,
    /// Bytes reclaimable by deleting everything but the kept member
    pub wasted_bytes: u64,
    /// Whether this group is included in a delete operation
    pub selected: bool,
}

impl DuplicateGroup {
    /// Create a group. The first member (directory order) is kept by default.
    pub fn new(digest: String, members: Vec<FileRecord>) -> Self {
        debug_assert!(members.len() >= 2);
        let wasted_bytes = members
            .first()
            .map(|m| m.size * (members.len() as u64 - 1))
            .unwrap_or(0);
        Self {
            digest,
            members,
            keep: 0,
            wasted_bytes,
            selected: false,
        }
    }

    /// Mark one member as kept; every other member flips to delete.
    ///
    /// Exactly one member is kept at all times, so this is the only mutator.
    pub fn set_keep(&mut self, index: usize) {
        if index < self.members.len() {
            self.keep = index;
        }
    }

    /// The member currently marked "keep".
    pub fn kept(&self) -> &FileRecord {
        &self.members[self.keep]
    }

    /// Members currently marked "delete".
    pub fn doomed(&self) -> impl Iterator<Item = &FileRecord> {
        let keep = self.keep;
        self.members
            .iter()
            .enumerate()
            .filter(move |(i, _)| *i != keep)
            .map(|(_, m)| m)
    }
}

/// A candidate rename produced by a regex transform or a DAT match.
#[derive(Debug, Clone, PartialEq)]
pub struct RenamePlanEntry {
    /// Current absolute path
    pub old_path: PathBuf,
    /// Target absolute path after the rename
    pub new_path: PathBuf,
    /// Current file name
    pub old_name: String,
    /// Target file name
    pub new_name: String,
}

impl RenamePlanEntry {
    /// Build an entry that renames `old_path` to `new_name` in place.
    pub fn new(old_path: PathBuf, new_name: String) -> Self {
        let old_name = old_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let new_path = old_path
            .parent()
            .map(|p| p.join(&new_name))
            .unwrap_or_else(|| PathBuf::from(&new_name));
        Self {
            old_path,
            new_path,
            old_name,
            new_name,
        }
    }
}

/// One applied rename, recorded for undo as `(new_path, old_path)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UndoLogEntry {
    /// Where the file lives now
    pub new_path: PathBuf,
    /// Where it came from
    pub old_path: PathBuf,
}

/// Error attached to one item of a batch; the batch continues past it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationError {
    /// Human-readable message
    pub message: String,
    /// File the error applies to, if any
    pub file_path: Option<PathBuf>,
    /// Error category
    pub category: ErrorCategory,
}

impl OperationError {
    /// Build an error tied to a file.
    pub fn for_file(
        message: impl Into<String>,
        path: impl Into<PathBuf>,
        category: ErrorCategory,
    ) -> Self {
        Self {
            message: message.into(),
            file_path: Some(path.into()),
            category,
        }
    }
}

/// Categories of per-item errors
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCategory {
    FileSystem,
    HashComputation,
    Archive,
    Rename,
    Sidecar,
    Conversion,
}

/// How a long-running operation ended.
///
/// `Cancelled` is a distinct terminal state: the worker observed the
/// cooperative cancellation flag between files and stopped enqueueing work.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Completion {
    #[default]
    Completed,
    Cancelled,
}

/// Snapshot of a long operation's progress, for the shell to render
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressUpdate {
    /// Files processed so far
    pub files_processed: u64,
    /// Total files in this operation, once known
    pub total_files: u64,
    /// File currently being worked on
    pub current_file: Option<PathBuf>,
    /// Duplicate groups found so far (duplicate scans only)
    pub duplicates_found: u64,
    /// Hash-cache hits so far
    pub cache_hits: u64,
}

impl ProgressUpdate {
    /// Create an empty progress snapshot.
    pub fn new() -> Self {
        Self {
            files_processed: 0,
            total_files: 0,
            current_file: None,
            duplicates_found: 0,
            cache_hits: 0,
        }
    }

    /// Percentage complete, 0–100.
    pub fn percentage(&self) -> f64 {
        if self.total_files == 0 {
            0.0
        } else {
            (self.files_processed as f64 / self.total_files as f64) * 100.0
        }
    }
}

impl Default for ProgressUpdate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_group_defaults_to_first_member() {
        let members = vec![
            FileRecord::new(PathBuf::from("/roms/a.nes"), 100, None),
            FileRecord::new(PathBuf::from("/roms/b.nes"), 100, None),
            FileRecord::new(PathBuf::from("/roms/c.nes"), 100, None),
        ];
        let group = DuplicateGroup::new("abcd".into(), members);
        assert_eq!(group.keep, 0);
        assert_eq!(group.kept().name, "a.nes");
        assert_eq!(group.wasted_bytes, 200);
        assert_eq!(group.doomed().count(), 2);
    }

    #[test]
    fn set_keep_flips_previous_keeper() {
        let members = vec![
            FileRecord::new(PathBuf::from("/roms/a.nes"), 64, None),
            FileRecord::new(PathBuf::from("/roms/b.nes"), 64, None),
        ];
        let mut group = DuplicateGroup::new("ffff".into(), members);
        group.set_keep(1);
        assert_eq!(group.kept().name, "b.nes");
        let doomed: Vec<_> = group.doomed().map(|m| m.name.clone()).collect();
        assert_eq!(doomed, vec!["a.nes"]);
        // Out-of-range index is ignored
        group.set_keep(9);
        assert_eq!(group.keep, 1);
    }

    #[test]
    fn rename_plan_entry_targets_same_folder() {
        let entry = RenamePlanEntry::new(
            PathBuf::from("/roms/old name.zip"),
            "New Name.zip".to_string(),
        );
        assert_eq!(entry.old_name, "old name.zip");
        assert_eq!(entry.new_path, PathBuf::from("/roms/New Name.zip"));
    }

    #[test]
    fn extension_is_lowercased_with_dot() {
        let rec = FileRecord::new(PathBuf::from("/roms/Game.ZIP"), 1, None);
        assert_eq!(rec.extension_lower().as_deref(), Some(".zip"));
        let none = FileRecord::new(PathBuf::from("/roms/Makefile"), 1, None);
        assert_eq!(none.extension_lower(), None);
    }

    #[test]
    fn progress_percentage_handles_zero_total() {
        let mut p = ProgressUpdate::new();
        assert_eq!(p.percentage(), 0.0);
        p.total_files = 4;
        p.files_processed = 1;
        assert_eq!(p.percentage(), 25.0);
    }
}
