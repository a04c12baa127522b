//! Directory scanning and ROM file filtering
//!
//! Filtering runs as a precedence chain: files inside excluded folders are
//! dropped first, whitelisted ROM extensions are accepted, blacklisted junk
//! extensions are rejected, and anything unrecognized is left out. The
//! whitelist wins over the blacklist, so `.md` means Mega Drive here, not
//! Markdown.

use crate::models::{extension_lower, FileRecord};
use crate::progress::CancelFlag;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// Extensions accepted as ROM or disc image files, lowercase, with dot.
const ROM_EXTENSIONS: &[&str] = &[
    ".nds", ".gba", ".gbc", ".gb", ".sfc", ".smc", ".nes", ".n64", ".z64", ".v64", ".md", ".smd",
    ".gen", ".gg", ".sms", ".pce", ".ngp", ".ngc", ".ws", ".wsc", ".bin", ".iso", ".cue", ".chd",
    ".cso", ".gcm", ".rvz", ".wbfs", ".wad", ".dol", ".elf", ".nsp", ".xci", ".nca", ".zip",
    ".7z", ".rar", ".gz",
];

/// Extensions always rejected when not whitelisted.
const JUNK_EXTENSIONS: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".gif", ".bmp", ".webp", ".tiff", ".ico", ".pdf", ".txt", ".doc",
    ".docx", ".rtf", ".exe", ".dll", ".bat", ".sh", ".msi", ".mp4", ".avi", ".mkv", ".mp3",
    ".wav", ".flac", ".xml", ".json", ".dat", ".ini", ".cfg", ".db", ".tmp", ".log", ".bak",
];

/// Folder names whose contents are never ROMs, matched case-insensitively
/// against any path component.
const EXCLUDED_FOLDERS: &[&str] = &[
    "media", "screenshots", "manuals", "boxart", "box art", "images", "saves", "savedata",
    "docs", "documentation", "videos",
];

/// Folder used to tuck away multi-disc files behind an M3U playlist.
/// Never descended into during recursive scans.
pub const HIDDEN_DISC_FOLDER: &str = ".hidden";

/// Whether a lowercase dotted extension is on the ROM whitelist.
pub fn is_rom_extension(ext: &str) -> bool {
    ROM_EXTENSIONS.contains(&ext)
}

/// File selection mode for a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterMode {
    /// Apply the ROM extension filter chain
    RomsOnly,
    /// Include every regular file, bypassing the filter chain
    AllFiles,
}

/// How far a scan reaches from its starting folder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanScope {
    /// Files directly inside the folder
    FolderOnly,
    /// The folder and all of its subfolders
    Recursive,
    /// The folder's parent and all of its subfolders, spanning sibling
    /// collection folders
    ParentFolder,
}

/// Whether a path component names an excluded folder.
fn is_excluded_component(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower == HIDDEN_DISC_FOLDER || EXCLUDED_FOLDERS.contains(&lower.as_str())
}

/// Apply the filter chain to a single file path.
///
/// Only the portion of the path below `root` is checked for excluded
/// folder components, so scanning `/mnt/Media/roms` does not exclude
/// everything under it.
pub fn should_include(path: &Path, root: &Path, mode: FilterMode) -> bool {
    if mode == FilterMode::AllFiles {
        return true;
    }
    let relative = path.strip_prefix(root).unwrap_or(path);
    if let Some(parent) = relative.parent() {
        for component in parent.components() {
            if let Some(name) = component.as_os_str().to_str() {
                if is_excluded_component(name) {
                    return false;
                }
            }
        }
    }
    match extension_lower(path) {
        Some(ext) if is_rom_extension(&ext) => true,
        Some(ext) if JUNK_EXTENSIONS.contains(&ext.as_str()) => false,
        _ => false,
    }
}

/// Filesystem scanner producing filtered [`FileRecord`] lists
#[derive(Debug, Clone, Copy)]
pub struct Scanner {
    /// Reach of the scan relative to the starting folder
    pub scope: ScanScope,
    /// File selection mode
    pub mode: FilterMode,
}

impl Default for Scanner {
    fn default() -> Self {
        Self {
            scope: ScanScope::FolderOnly,
            mode: FilterMode::RomsOnly,
        }
    }
}

impl Scanner {
    pub fn new(scope: ScanScope, mode: FilterMode) -> Self {
        Self { scope, mode }
    }

    /// Scan the folder and return records for every matching file.
    ///
    /// The cancel flag is checked once per file; a cancelled scan returns
    /// the records collected so far.
    pub async fn scan(&self, folder: &Path, cancel: &CancelFlag) -> std::io::Result<Vec<FileRecord>> {
        Ok(self.scan_counted(folder, cancel).await?.records)
    }

    /// Like [`Scanner::scan`], but also reports how many files the filter
    /// rejected. Comparison reports surface that count.
    pub async fn scan_counted(&self, folder: &Path, cancel: &CancelFlag) -> std::io::Result<ScanOutcome> {
        let folder = folder.to_path_buf();
        let scanner = *self;
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || scanner.scan_sync(&folder, &cancel))
            .await
            .expect("scan task panicked")
    }

    /// Synchronous form of [`Scanner::scan_counted`].
    pub fn scan_sync(&self, folder: &Path, cancel: &CancelFlag) -> std::io::Result<ScanOutcome> {
        let mut outcome = match self.scope {
            ScanScope::FolderOnly => self.scan_flat(folder, folder, cancel)?,
            ScanScope::ParentFolder => {
                let parent = folder.parent().unwrap_or(folder);
                self.scan_recursive(parent, cancel)?
            }
            ScanScope::Recursive => self.scan_recursive(folder, cancel)?,
        };
        outcome.records.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(
            folder = %folder.display(),
            files = outcome.records.len(),
            excluded = outcome.excluded,
            "scan complete"
        );
        Ok(outcome)
    }

    fn scan_flat(&self, folder: &Path, root: &Path, cancel: &CancelFlag) -> std::io::Result<ScanOutcome> {
        let mut outcome = ScanOutcome::default();
        for entry in std::fs::read_dir(folder)? {
            if cancel.is_cancelled() {
                break;
            }
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if !should_include(&path, root, self.mode) {
                outcome.excluded += 1;
                continue;
            }
            if let Ok(record) = FileRecord::from_path(&path) {
                outcome.records.push(record);
            }
        }
        Ok(outcome)
    }

    fn scan_recursive(&self, folder: &Path, cancel: &CancelFlag) -> std::io::Result<ScanOutcome> {
        let prune = self.mode == FilterMode::RomsOnly;
        let walker = WalkDir::new(folder).into_iter().filter_entry(move |entry| {
            if !entry.file_type().is_dir() {
                return true;
            }
            if !prune {
                return true;
            }
            match entry.file_name().to_str() {
                Some(name) => !is_excluded_component(name),
                None => true,
            }
        });

        let mut outcome = ScanOutcome::default();
        for entry in walker {
            if cancel.is_cancelled() {
                break;
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if !should_include(path, folder, self.mode) {
                outcome.excluded += 1;
                continue;
            }
            if let Ok(record) = FileRecord::from_path(path) {
                outcome.records.push(record);
            }
        }
        Ok(outcome)
    }
}

/// A scan's matching files plus a count of what the filter rejected
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Matching files, sorted by name
    pub records: Vec<FileRecord>,
    /// Files seen but rejected by the filter chain
    pub excluded: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn touch(dir: &TempDir, relative: &str) -> PathBuf {
        let path = dir.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, b"x").unwrap();
        path
    }

    fn names(records: &[FileRecord]) -> Vec<&str> {
        records.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn whitelist_beats_blacklist_for_md() {
        let root = Path::new("/roms");
        assert!(should_include(Path::new("/roms/sonic.md"), root, FilterMode::RomsOnly));
        assert!(!should_include(Path::new("/roms/readme.txt"), root, FilterMode::RomsOnly));
    }

    #[test]
    fn unknown_extensions_are_excluded() {
        let root = Path::new("/roms");
        assert!(!should_include(Path::new("/roms/game.xyz"), root, FilterMode::RomsOnly));
        assert!(!should_include(Path::new("/roms/noext"), root, FilterMode::RomsOnly));
    }

    #[test]
    fn excluded_folder_wins_over_whitelist() {
        let root = Path::new("/roms");
        assert!(!should_include(
            Path::new("/roms/Screenshots/game.nes"),
            root,
            FilterMode::RomsOnly
        ));
        assert!(!should_include(
            Path::new("/roms/nested/Box Art/game.zip"),
            root,
            FilterMode::RomsOnly
        ));
    }

    #[test]
    fn excluded_names_above_the_root_do_not_count() {
        let root = Path::new("/mnt/Media/roms");
        assert!(should_include(
            Path::new("/mnt/Media/roms/game.gba"),
            root,
            FilterMode::RomsOnly
        ));
    }

    #[test]
    fn all_files_bypasses_the_chain() {
        let root = Path::new("/roms");
        assert!(should_include(Path::new("/roms/docs/readme.txt"), root, FilterMode::AllFiles));
    }

    #[tokio::test]
    async fn folder_only_ignores_subfolders() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "zelda.nes");
        touch(&dir, "notes.txt");
        touch(&dir, "sub/mario.nes");

        let scanner = Scanner::new(ScanScope::FolderOnly, FilterMode::RomsOnly);
        let records = scanner.scan(dir.path(), &CancelFlag::new()).await.unwrap();
        assert_eq!(names(&records), vec!["zelda.nes"]);
    }

    #[tokio::test]
    async fn recursive_prunes_excluded_and_hidden_folders() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "zelda.nes");
        touch(&dir, "gba/metroid.gba");
        touch(&dir, "Manuals/zelda.zip");
        touch(&dir, ".hidden/game (Disc 1).chd");

        let scanner = Scanner::new(ScanScope::Recursive, FilterMode::RomsOnly);
        let records = scanner.scan(dir.path(), &CancelFlag::new()).await.unwrap();
        assert_eq!(names(&records), vec!["metroid.gba", "zelda.nes"]);
    }

    #[tokio::test]
    async fn parent_scope_spans_sibling_folders() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "loose.gbc");
        touch(&dir, "megadrive/sonic.md");
        touch(&dir, "snes/mario.sfc");
        touch(&dir, "Manuals/sonic.zip");

        // Scanning from one system folder reaches every sibling system.
        let scanner = Scanner::new(ScanScope::ParentFolder, FilterMode::RomsOnly);
        let records = scanner
            .scan(&dir.path().join("megadrive"), &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(names(&records), vec!["loose.gbc", "mario.sfc", "sonic.md"]);
    }

    #[tokio::test]
    async fn cancelled_scan_stops_early() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "a.nes");
        touch(&dir, "b.nes");

        let cancel = CancelFlag::new();
        cancel.cancel();
        let scanner = Scanner::default();
        let records = scanner.scan(dir.path(), &cancel).await.unwrap();
        assert!(records.is_empty());
    }
}
