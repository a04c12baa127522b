//! DAT file parsing and hash-based ROM identification
//!
//! Logiqx-style DAT files carry `<game>` elements (MAME flavors use
//! `<machine>`); both are read and merged into one index. Each `<rom>`
//! child contributes its crc/md5/sha1 attributes, lowercased, all pointing
//! at the game's canonical name. Matching honors hash precedence: CRC32
//! first, then MD5, then SHA1.

use crate::cache::HashCache;
use crate::error::{Error, Result};
use crate::hashing::{self, HashDigest};
use crate::models::{Completion, ErrorCategory, FileRecord, OperationError};
use crate::progress::{CancelFlag, ProgressTracker};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Hash lookup tables built from one DAT file
#[derive(Debug, Default)]
pub struct DatIndex {
    by_crc32: HashMap<String, String>,
    by_md5: HashMap<String, String>,
    by_sha1: HashMap<String, String>,
    /// DAT header name, when the file carries one
    pub name: Option<String>,
    /// Number of game entries read
    pub entry_count: usize,
}

impl DatIndex {
    /// Load and parse a DAT file from disk.
    pub async fn load(path: &Path) -> Result<Self> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let contents = std::fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
            Self::parse(&contents, &path)
        })
        .await
        .expect("dat parse task panicked")
    }

    /// Parse DAT XML content. `path` is only used in error messages.
    pub fn parse(xml: &str, path: &Path) -> Result<Self> {
        let doc = roxmltree::Document::parse(xml).map_err(|e| Error::DatParse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut index = Self::default();

        index.name = doc
            .descendants()
            .find(|n| n.has_tag_name("header"))
            .and_then(|header| header.children().find(|n| n.has_tag_name("name")))
            .and_then(|n| n.text())
            .map(|s| s.trim().to_string());

        for game in doc
            .descendants()
            .filter(|n| n.has_tag_name("game") || n.has_tag_name("machine"))
        {
            let Some(game_name) = game.attribute("name") else {
                continue;
            };
            index.entry_count += 1;
            for rom in game.children().filter(|n| n.has_tag_name("rom")) {
                if let Some(crc) = rom.attribute("crc") {
                    index.by_crc32.insert(crc.to_lowercase(), game_name.to_string());
                }
                if let Some(md5) = rom.attribute("md5") {
                    index.by_md5.insert(md5.to_lowercase(), game_name.to_string());
                }
                if let Some(sha1) = rom.attribute("sha1") {
                    index.by_sha1.insert(sha1.to_lowercase(), game_name.to_string());
                }
            }
        }

        if index.entry_count == 0 {
            return Err(Error::DatParse {
                path: path.to_path_buf(),
                reason: "no game or machine entries found".to_string(),
            });
        }

        info!(
            path = %path.display(),
            entries = index.entry_count,
            "parsed DAT index"
        );
        Ok(index)
    }

    /// Look up the canonical name for a digest, CRC32 before MD5 before SHA1.
    pub fn lookup(&self, digest: &HashDigest) -> Option<&str> {
        self.by_crc32
            .get(&digest.crc32)
            .or_else(|| self.by_md5.get(&digest.md5))
            .or_else(|| self.by_sha1.get(&digest.sha1))
            .map(String::as_str)
    }

    /// Number of distinct hashes indexed across all three tables.
    pub fn hash_count(&self) -> usize {
        self.by_crc32.len() + self.by_md5.len() + self.by_sha1.len()
    }
}

/// Outcome of matching one file against the index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStatus {
    /// Matched, and the file name differs from the canonical one
    NeedsRename,
    /// Matched, and the file already carries the canonical name
    AlreadyCorrect,
}

/// One identified file
#[derive(Debug, Clone)]
pub struct DatMatchEntry {
    /// The scanned file
    pub record: FileRecord,
    /// Canonical name recorded in the DAT
    pub dat_name: String,
    /// Canonical name with the file's original extension kept
    pub proposed_name: String,
    pub status: MatchStatus,
}

/// Result of a matching pass over a set of scanned files
#[derive(Debug, Default)]
pub struct MatchOutcome {
    /// Files whose content was found in the DAT
    pub matched: Vec<DatMatchEntry>,
    /// Files with no DAT entry for any of their three hashes
    pub unmatched: Vec<FileRecord>,
    /// Per-file failures that did not abort the pass
    pub errors: Vec<OperationError>,
    /// How the pass ended
    pub completion: Completion,
    /// Hash-cache hits during the pass
    pub cache_hits: u64,
}

/// The canonical name plus the file's own extension, case preserved from
/// disk. The name itself is taken verbatim; a game called
/// `Super Mario Bros. 3` keeps its trailing `. 3`. A zipped ROM keeps its
/// `.zip` extension even though the DAT describes the payload.
fn proposed_name(dat_name: &str, record_path: &Path) -> String {
    match record_path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{dat_name}.{ext}"),
        None => dat_name.to_string(),
    }
}

/// Matches scanned files against a [`DatIndex`], hashing through the cache
pub struct DatMatcher {
    index: DatIndex,
}

impl DatMatcher {
    pub fn new(index: DatIndex) -> Self {
        Self { index }
    }

    pub fn index(&self) -> &DatIndex {
        &self.index
    }

    /// Hash each record and classify it against the index.
    ///
    /// Files are processed one at a time. A file that cannot be hashed is
    /// reported in `errors` and skipped; the pass continues.
    pub async fn match_files(
        &self,
        records: Vec<FileRecord>,
        cache: &mut HashCache,
        tracker: &ProgressTracker,
        cancel: &CancelFlag,
    ) -> MatchOutcome {
        let mut outcome = MatchOutcome::default();
        tracker.set_total_files(records.len() as u64);

        for record in records {
            if cancel.is_cancelled() {
                outcome.completion = Completion::Cancelled;
                tracker.emit();
                return outcome;
            }
            tracker.set_current_file(Some(record.path.clone()));

            let digest = match self.digest_through_cache(&record, cache).await {
                Ok(digest) => digest,
                Err(e) => {
                    let category = match e {
                        Error::BadArchive { .. } | Error::NoRomInArchive(_) => ErrorCategory::Archive,
                        _ => ErrorCategory::HashComputation,
                    };
                    outcome
                        .errors
                        .push(OperationError::for_file(e.to_string(), &record.path, category));
                    tracker.increment_files_processed();
                    continue;
                }
            };

            match self.index.lookup(&digest) {
                Some(dat_name) => {
                    let proposed = proposed_name(dat_name, &record.path);
                    let status = if proposed == record.name {
                        MatchStatus::AlreadyCorrect
                    } else {
                        MatchStatus::NeedsRename
                    };
                    debug!(file = %record.name, dat_name, "matched against index");
                    outcome.matched.push(DatMatchEntry {
                        record,
                        dat_name: dat_name.to_string(),
                        proposed_name: proposed,
                        status,
                    });
                }
                None => outcome.unmatched.push(record),
            }
            tracker.set_cache_hits(cache.hits());
            tracker.increment_files_processed();
        }

        outcome.cache_hits = cache.hits();
        outcome.completion = Completion::Completed;
        tracker.emit();
        outcome
    }

    async fn digest_through_cache(
        &self,
        record: &FileRecord,
        cache: &mut HashCache,
    ) -> Result<HashDigest> {
        if let Some(digest) = cache.get_digest(&record.path) {
            return Ok(digest);
        }
        let digest = hashing::digest_file(&record.path).await?;
        cache.insert_digest(&record.path, &digest)?;
        Ok(digest)
    }
}
