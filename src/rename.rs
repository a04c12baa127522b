//! Rename planning, execution, and undo
//!
//! Planning and execution are separate passes. The planner resolves target
//! name collisions up front, against both the batch itself and files
//! already on disk, so execution never discovers a conflict mid-batch.
//! Execution produces an undo log that can reverse the batch as long as the
//! renamed files have not moved again.

use crate::models::{
    extension_lower, Completion, ErrorCategory, OperationError, RenamePlanEntry, UndoLogEntry,
};
use crate::progress::{CancelFlag, ProgressTracker};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Rename attempts per file before giving up.
const MAX_ATTEMPTS: u32 = 5;
/// Base delay for the exponential retry backoff.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// How target-name collisions are resolved during planning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollisionStrategy {
    /// Skip every file whose target collides
    Skip,
    /// First claimant gets the name, the rest are skipped
    KeepFirst,
    /// Number colliding targets with `_1`, `_2` suffixes before the extension
    Suffix,
}

/// An entry dropped from the plan, with the reason
#[derive(Debug, Clone)]
pub struct SkippedRename {
    pub entry: RenamePlanEntry,
    pub reason: String,
}

/// A collision-free batch ready for execution
#[derive(Debug, Default)]
pub struct RenamePlan {
    /// Entries to execute, in request order
    pub entries: Vec<RenamePlanEntry>,
    /// Requests dropped during collision resolution
    pub skipped: Vec<SkippedRename>,
}

/// Builds collision-free rename plans
#[derive(Debug, Clone, Copy)]
pub struct RenamePlanner {
    pub strategy: CollisionStrategy,
}

impl Default for RenamePlanner {
    fn default() -> Self {
        Self {
            strategy: CollisionStrategy::Suffix,
        }
    }
}

impl RenamePlanner {
    pub fn new(strategy: CollisionStrategy) -> Self {
        Self { strategy }
    }

    /// Resolve collisions in a batch of rename requests.
    ///
    /// Targets are compared case-insensitively within each folder, so the
    /// plan stays safe on case-insensitive filesystems. A target already on
    /// disk counts as occupied unless that file is itself being renamed
    /// away in this batch.
    pub fn plan(&self, requests: Vec<RenamePlanEntry>) -> RenamePlan {
        let mut plan = RenamePlan::default();

        // Names vacated by the batch no longer occupy their folder.
        let vacated: HashSet<(PathBuf, String)> = requests
            .iter()
            .map(|r| (parent_of(&r.old_path), r.old_name.to_lowercase()))
            .collect();

        // Claimants per (folder, lowercase target), in request order.
        let mut claims: HashMap<(PathBuf, String), Vec<usize>> = HashMap::new();
        let mut order: Vec<(PathBuf, String)> = Vec::new();
        for (i, request) in requests.iter().enumerate() {
            let key = (parent_of(&request.old_path), request.new_name.to_lowercase());
            let claimants = claims.entry(key.clone()).or_insert_with(|| {
                order.push(key);
                Vec::new()
            });
            claimants.push(i);
        }

        let mut occupied: HashSet<(PathBuf, String)> = HashSet::new();
        let mut resolved: Vec<Option<RenamePlanEntry>> = vec![None; requests.len()];
        let mut skipped: Vec<(usize, String)> = Vec::new();

        for key in order {
            let claimants = &claims[&key];
            let (folder, target_lower) = &key;
            let disk_occupied = requests[claimants[0]].new_path.exists()
                && !vacated.contains(&(folder.clone(), target_lower.clone()));
            let contested = claimants.len() > 1 || disk_occupied;

            if !contested {
                occupied.insert(key.clone());
                resolved[claimants[0]] = Some(requests[claimants[0]].clone());
                continue;
            }

            match self.strategy {
                CollisionStrategy::Skip => {
                    for &i in claimants {
                        skipped.push((i, format!("target name '{}' collides", requests[i].new_name)));
                    }
                }
                CollisionStrategy::KeepFirst => {
                    let mut iter = claimants.iter();
                    if disk_occupied {
                        for &i in claimants {
                            skipped.push((i, format!("target '{}' already exists", requests[i].new_name)));
                        }
                    } else {
                        let &first = iter.next().unwrap_or(&claimants[0]);
                        occupied.insert(key.clone());
                        resolved[first] = Some(requests[first].clone());
                        for &i in iter {
                            skipped.push((i, format!("target name '{}' taken by earlier file", requests[i].new_name)));
                        }
                    }
                }
                CollisionStrategy::Suffix => {
                    // Every claimant of a contested name is numbered, so
                    // three files wanting `Game.zip` come out as
                    // `Game_1.zip` through `Game_3.zip`.
                    let mut next_suffix = 1u32;
                    for &i in claimants {
                        let entry = loop {
                            let candidate = suffixed_name(&requests[i].new_name, next_suffix);
                            next_suffix += 1;
                            let candidate_key = (folder.clone(), candidate.to_lowercase());
                            let on_disk = folder.join(&candidate).exists()
                                && !vacated.contains(&candidate_key);
                            if !occupied.contains(&candidate_key) && !on_disk {
                                break RenamePlanEntry::new(requests[i].old_path.clone(), candidate);
                            }
                        };
                        occupied.insert((folder.clone(), entry.new_name.to_lowercase()));
                        resolved[i] = Some(entry);
                    }
                }
            }
        }

        for entry in resolved.iter_mut().filter_map(Option::take) {
            plan.entries.push(entry);
        }
        for (i, reason) in skipped {
            warn!(file = %requests[i].old_name, reason = %reason, "rename request skipped");
            plan.skipped.push(SkippedRename {
                entry: requests[i].clone(),
                reason,
            });
        }
        plan
    }
}

/// Build rename requests from a regex substitution over file names.
///
/// The pattern is validated before any file is considered, so a bad
/// pattern is one error up front instead of one per file. Files whose name
/// the substitution leaves unchanged produce no request.
pub fn regex_rename_requests(
    records: &[crate::models::FileRecord],
    pattern: &str,
    replacement: &str,
) -> crate::error::Result<Vec<RenamePlanEntry>> {
    let re = regex::Regex::new(pattern)?;
    let mut requests = Vec::new();
    for record in records {
        let new_name = re.replace_all(&record.name, replacement);
        if new_name != record.name {
            requests.push(RenamePlanEntry::new(record.path.clone(), new_name.into_owned()));
        }
    }
    Ok(requests)
}

fn parent_of(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}

/// Insert `_{n}` before the extension: `Game.md` becomes `Game_1.md`.
fn suffixed_name(name: &str, n: u32) -> String {
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{}_{n}{}", &name[..dot], &name[dot..]),
        _ => format!("{name}_{n}"),
    }
}

/// Result of executing a rename plan
#[derive(Debug, Default)]
pub struct RenameOutcome {
    /// Reversal log, one entry per successful rename, in execution order
    pub undo_log: Vec<UndoLogEntry>,
    /// Per-file failures that did not abort the batch
    pub errors: Vec<OperationError>,
    /// How the batch ended
    pub completion: Completion,
}

/// Execute a plan entry by entry.
///
/// Transient failures (locked or briefly held files) are retried with
/// exponential backoff, with a copy-and-remove fallback on the penultimate
/// attempt; other failures are immediate per-file errors. Entries whose
/// old and new names are equal are skipped silently.
pub async fn execute_plan(
    plan: &RenamePlan,
    tracker: &ProgressTracker,
    cancel: &CancelFlag,
) -> RenameOutcome {
    let mut outcome = RenameOutcome::default();
    tracker.set_total_files(plan.entries.len() as u64);

    for entry in &plan.entries {
        if cancel.is_cancelled() {
            outcome.completion = Completion::Cancelled;
            tracker.emit();
            return outcome;
        }
        tracker.set_current_file(Some(entry.old_path.clone()));

        if entry.old_name == entry.new_name {
            tracker.increment_files_processed();
            continue;
        }

        match rename_with_retry(&entry.old_path, &entry.new_path).await {
            Ok(()) => {
                debug!(from = %entry.old_name, to = %entry.new_name, "renamed");
                outcome.undo_log.push(UndoLogEntry {
                    new_path: entry.new_path.clone(),
                    old_path: entry.old_path.clone(),
                });
            }
            Err(e) => outcome.errors.push(OperationError::for_file(
                format!("rename to '{}' failed: {e}", entry.new_name),
                &entry.old_path,
                ErrorCategory::Rename,
            )),
        }
        tracker.increment_files_processed();
    }

    info!(
        renamed = outcome.undo_log.len(),
        failed = outcome.errors.len(),
        "rename batch complete"
    );
    outcome.completion = Completion::Completed;
    tracker.emit();
    outcome
}

/// Error classes worth retrying: the file is locked or briefly held by
/// another process. Anything else (missing source, bad path) will not get
/// better by waiting.
fn is_transient(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::WouldBlock
    )
}

async fn rename_with_retry(from: &Path, to: &Path) -> std::io::Result<()> {
    let mut last_error = None;
    for attempt in 0..MAX_ATTEMPTS {
        match tokio::fs::rename(from, to).await {
            Ok(()) => return Ok(()),
            Err(e) if is_transient(&e) => {
                // Copy-and-remove handles locks that block rename itself
                // but not reads.
                if attempt == MAX_ATTEMPTS - 2 {
                    if copy_and_remove(from, to).await.is_ok() {
                        return Ok(());
                    }
                }
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
        if attempt + 1 < MAX_ATTEMPTS {
            tokio::time::sleep(RETRY_BASE_DELAY * 2u32.pow(attempt)).await;
        }
    }
    Err(last_error.unwrap_or_else(|| std::io::Error::other("rename failed")))
}

async fn copy_and_remove(from: &Path, to: &Path) -> std::io::Result<()> {
    tokio::fs::copy(from, to).await?;
    tokio::fs::remove_file(from).await
}

/// Result of an undo pass
#[derive(Debug, Default)]
pub struct UndoOutcome {
    /// Entries successfully reversed
    pub restored: Vec<UndoLogEntry>,
    /// Entries that could not be reversed
    pub errors: Vec<OperationError>,
}

/// Reverse a rename batch using its undo log.
///
/// Entries are processed newest first. An entry fails when the file is no
/// longer at its new location or the old name has been taken since; other
/// entries still proceed.
pub async fn undo_renames(undo_log: &[UndoLogEntry]) -> UndoOutcome {
    let mut outcome = UndoOutcome::default();
    for entry in undo_log.iter().rev() {
        if !entry.new_path.exists() {
            outcome.errors.push(OperationError::for_file(
                "file is no longer at its renamed location".to_string(),
                &entry.new_path,
                ErrorCategory::Rename,
            ));
            continue;
        }
        if entry.old_path.exists() {
            outcome.errors.push(OperationError::for_file(
                "original name is occupied by another file".to_string(),
                &entry.old_path,
                ErrorCategory::Rename,
            ));
            continue;
        }
        match tokio::fs::rename(&entry.new_path, &entry.old_path).await {
            Ok(()) => outcome.restored.push(entry.clone()),
            Err(e) => outcome.errors.push(OperationError::for_file(
                format!("undo rename failed: {e}"),
                &entry.new_path,
                ErrorCategory::Rename,
            )),
        }
    }
    info!(restored = outcome.restored.len(), failed = outcome.errors.len(), "undo complete");
    outcome
}

/// Rewrite `FILE` references inside `.cue` sheets after a rename batch.
///
/// For every folder containing a renamed `.bin`, each cue sheet in that
/// folder has its `FILE "..."` lines checked; a quoted reference whose base
/// name matches a renamed file is replaced with the new name. Returns the
/// cue files rewritten and any failures.
pub async fn update_cue_references(undo_log: &[UndoLogEntry]) -> (Vec<PathBuf>, Vec<OperationError>) {
    let mut renamed_by_folder: HashMap<PathBuf, HashMap<String, String>> = HashMap::new();
    for entry in undo_log {
        if extension_lower(&entry.old_path).as_deref() != Some(".bin") {
            continue;
        }
        let (Some(old_name), Some(new_name)) = (
            entry.old_path.file_name().map(|n| n.to_string_lossy().into_owned()),
            entry.new_path.file_name().map(|n| n.to_string_lossy().into_owned()),
        ) else {
            continue;
        };
        renamed_by_folder
            .entry(parent_of(&entry.old_path))
            .or_default()
            .insert(old_name, new_name);
    }

    let mut updated = Vec::new();
    let mut errors = Vec::new();
    for (folder, renames) in renamed_by_folder {
        let entries = match std::fs::read_dir(&folder) {
            Ok(entries) => entries,
            Err(e) => {
                errors.push(OperationError::for_file(
                    format!("cannot list folder for cue update: {e}"),
                    &folder,
                    ErrorCategory::Sidecar,
                ));
                continue;
            }
        };
        for dir_entry in entries.flatten() {
            let path = dir_entry.path();
            if extension_lower(&path).as_deref() != Some(".cue") {
                continue;
            }
            match rewrite_cue(&path, &renames).await {
                Ok(true) => updated.push(path),
                Ok(false) => {}
                Err(e) => errors.push(OperationError::for_file(
                    format!("cue update failed: {e}"),
                    &path,
                    ErrorCategory::Sidecar,
                )),
            }
        }
    }
    (updated, errors)
}

async fn rewrite_cue(path: &Path, renames: &HashMap<String, String>) -> std::io::Result<bool> {
    let contents = tokio::fs::read_to_string(path).await?;
    let mut changed = false;
    let mut lines: Vec<String> = Vec::new();
    for line in contents.lines() {
        if line.trim_start().to_uppercase().starts_with("FILE") {
            let parts: Vec<&str> = line.split('"').collect();
            if parts.len() >= 3 {
                let referenced = parts[1];
                let base = Path::new(referenced)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| referenced.to_string());
                if let Some(new_name) = renames.get(&base) {
                    lines.push(line.replace(&format!("\"{referenced}\""), &format!("\"{new_name}\"")));
                    changed = true;
                    continue;
                }
            }
        }
        lines.push(line.to_string());
    }
    if changed {
        let mut output = lines.join("\n");
        if contents.ends_with('\n') {
            output.push('\n');
        }
        tokio::fs::write(path, output).await?;
        debug!(path = %path.display(), "rewrote cue references");
    }
    Ok(changed)
}
