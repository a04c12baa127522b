//! CHD conversion through an external `chdman` binary
//!
//! The tool is located once, before any work is queued: next to the
//! running executable first, then on `PATH`. A missing tool is a single
//! blocking error rather than one failure per file. Each conversion runs
//! `chdman createcd` with a hard timeout, and a failed or timed-out run
//! removes its partial output.

use crate::error::{Error, Result};
use crate::models::{extension_lower, Completion, ErrorCategory, FileRecord, OperationError};
use crate::progress::{CancelFlag, ProgressTracker};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

const CHDMAN_BINARY: &str = "chdman";
/// Hard ceiling per conversion; large discs can legitimately take minutes.
const CONVERSION_TIMEOUT: Duration = Duration::from_secs(600);

/// Result of a conversion pass
#[derive(Debug, Default)]
pub struct ConvertOutcome {
    /// CHD files produced
    pub converted: Vec<PathBuf>,
    /// Inputs skipped because their CHD already exists
    pub skipped: Vec<PathBuf>,
    /// Per-file failures that did not abort the pass
    pub errors: Vec<OperationError>,
    /// How the pass ended
    pub completion: Completion,
}

/// Runs `chdman createcd` over disc images
#[derive(Debug, Clone)]
pub struct ChdConverter {
    chdman: PathBuf,
}

impl ChdConverter {
    /// Locate `chdman` next to the running executable, then on `PATH`.
    pub fn locate() -> Result<Self> {
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                let local = dir.join(chdman_file_name());
                if local.is_file() {
                    return Ok(Self { chdman: local });
                }
            }
        }
        match which::which(CHDMAN_BINARY) {
            Ok(path) => Ok(Self { chdman: path }),
            Err(_) => Err(Error::ToolMissing(CHDMAN_BINARY.to_string())),
        }
    }

    /// Use a known `chdman` binary.
    pub fn with_path(chdman: PathBuf) -> Self {
        Self { chdman }
    }

    pub fn chdman_path(&self) -> &Path {
        &self.chdman
    }

    /// Convert each disc image to CHD, one at a time.
    ///
    /// Inputs whose `.chd` already exists are skipped. With `delete_source`
    /// a successfully converted `.cue` also takes its referenced track
    /// files with it.
    pub async fn convert_files(
        &self,
        records: &[FileRecord],
        delete_source: bool,
        tracker: &ProgressTracker,
        cancel: &CancelFlag,
    ) -> ConvertOutcome {
        let mut outcome = ConvertOutcome::default();
        tracker.set_total_files(records.len() as u64);

        for record in records {
            if cancel.is_cancelled() {
                outcome.completion = Completion::Cancelled;
                tracker.emit();
                return outcome;
            }
            tracker.set_current_file(Some(record.path.clone()));

            let output = record.path.with_extension("chd");
            if output.exists() {
                debug!(file = %record.name, "chd already exists, skipping");
                outcome.skipped.push(record.path.clone());
                tracker.increment_files_processed();
                continue;
            }

            match self.convert_one(&record.path, &output).await {
                Ok(()) => {
                    debug!(file = %record.name, "converted to chd");
                    if delete_source {
                        delete_source_files(&record.path, &mut outcome.errors).await;
                    }
                    outcome.converted.push(output);
                }
                Err(message) => {
                    cleanup_partial_output(&output).await;
                    outcome.errors.push(OperationError::for_file(
                        message,
                        &record.path,
                        ErrorCategory::Conversion,
                    ));
                }
            }
            tracker.increment_files_processed();
        }

        info!(
            converted = outcome.converted.len(),
            skipped = outcome.skipped.len(),
            "conversion pass complete"
        );
        outcome.completion = Completion::Completed;
        tracker.emit();
        outcome
    }

    async fn convert_one(&self, input: &Path, output: &Path) -> std::result::Result<(), String> {
        let mut command = Command::new(&self.chdman);
        command
            .arg("createcd")
            .arg("-i")
            .arg(input)
            .arg("-o")
            .arg(output)
            .kill_on_drop(true);

        let run = async {
            let result = command
                .output()
                .await
                .map_err(|e| format!("failed to run chdman: {e}"))?;
            if result.status.success() {
                Ok(())
            } else {
                let stderr = String::from_utf8_lossy(&result.stderr);
                Err(format!(
                    "chdman exited with {}: {}",
                    result.status,
                    stderr.trim()
                ))
            }
        };

        match tokio::time::timeout(CONVERSION_TIMEOUT, run).await {
            Ok(result) => result,
            Err(_) => Err(format!(
                "chdman timed out after {} seconds",
                CONVERSION_TIMEOUT.as_secs()
            )),
        }
    }
}

fn chdman_file_name() -> &'static str {
    if cfg!(windows) {
        "chdman.exe"
    } else {
        CHDMAN_BINARY
    }
}

async fn cleanup_partial_output(output: &Path) {
    if output.exists() {
        if let Err(e) = tokio::fs::remove_file(output).await {
            warn!(path = %output.display(), error = %e, "could not remove partial chd");
        }
    }
}

/// Remove a converted source. A cue sheet's referenced track files go too.
async fn delete_source_files(source: &Path, errors: &mut Vec<OperationError>) {
    if extension_lower(source).as_deref() == Some(".cue") {
        for track in cue_track_files(source).await {
            if let Err(e) = tokio::fs::remove_file(&track).await {
                errors.push(OperationError::for_file(
                    format!("converted but track file not deleted: {e}"),
                    &track,
                    ErrorCategory::FileSystem,
                ));
            }
        }
    }
    if let Err(e) = tokio::fs::remove_file(source).await {
        errors.push(OperationError::for_file(
            format!("converted but source not deleted: {e}"),
            source,
            ErrorCategory::FileSystem,
        ));
    }
}

/// Paths referenced by `FILE "..."` lines of a cue sheet, resolved against
/// the sheet's folder.
async fn cue_track_files(cue: &Path) -> Vec<PathBuf> {
    let Ok(contents) = tokio::fs::read_to_string(cue).await else {
        return Vec::new();
    };
    let folder = cue.parent().unwrap_or_else(|| Path::new("."));
    let mut tracks = Vec::new();
    for line in contents.lines() {
        if !line.trim_start().to_uppercase().starts_with("FILE") {
            continue;
        }
        let parts: Vec<&str> = line.split('"').collect();
        if parts.len() >= 3 {
            tracks.push(folder.join(parts[1]));
        }
    }
    tracks
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(dir: &TempDir, name: &str, content: &[u8]) -> FileRecord {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        FileRecord::from_path(&path).unwrap()
    }

    #[test]
    fn missing_tool_is_a_blocking_error() {
        // An explicit bogus path never resolves; `locate` itself depends on
        // the host environment, so exercise the failure through `which`.
        let result = which::which("definitely-not-chdman-on-this-host");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn existing_chd_is_skipped_without_running_the_tool() {
        let dir = TempDir::new().unwrap();
        let cue = record(&dir, "game.cue", b"FILE \"game.bin\" BINARY\n");
        std::fs::write(dir.path().join("game.chd"), b"already here").unwrap();

        // The bogus binary would fail if invoked; a skip never reaches it.
        let converter = ChdConverter::with_path(PathBuf::from("/nonexistent/chdman"));
        let outcome = converter
            .convert_files(&[cue.clone()], false, &ProgressTracker::new(), &CancelFlag::new())
            .await;

        assert_eq!(outcome.skipped, vec![cue.path]);
        assert!(outcome.converted.is_empty());
        assert!(outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn failed_tool_reports_conversion_error() {
        let dir = TempDir::new().unwrap();
        let cue = record(&dir, "game.cue", b"FILE \"game.bin\" BINARY\n");

        let converter = ChdConverter::with_path(PathBuf::from("/nonexistent/chdman"));
        let outcome = converter
            .convert_files(&[cue], false, &ProgressTracker::new(), &CancelFlag::new())
            .await;

        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].category, ErrorCategory::Conversion);
        assert_eq!(outcome.completion, Completion::Completed);
    }

    #[tokio::test]
    async fn cue_tracks_resolve_against_the_sheet_folder() {
        let dir = TempDir::new().unwrap();
        let cue = dir.path().join("game.cue");
        std::fs::write(
            &cue,
            "FILE \"track01.bin\" BINARY\n  TRACK 01 MODE2/2352\nFILE \"track02.bin\" BINARY\n",
        )
        .unwrap();

        let tracks = cue_track_files(&cue).await;
        assert_eq!(
            tracks,
            vec![dir.path().join("track01.bin"), dir.path().join("track02.bin")]
        );
    }

    #[tokio::test]
    async fn successful_conversion_can_delete_cue_and_tracks() {
        let dir = TempDir::new().unwrap();
        let cue = record(&dir, "game.cue", b"FILE \"track01.bin\" BINARY\n");
        std::fs::write(dir.path().join("track01.bin"), b"track data").unwrap();

        // A shell standing in for chdman that writes its output file.
        let fake = dir.path().join("fake-chdman.sh");
        std::fs::write(&fake, "#!/bin/sh\nwhile [ \"$1\" != \"-o\" ]; do shift; done\ntouch \"$2\"\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let converter = ChdConverter::with_path(fake);
        let outcome = converter
            .convert_files(&[cue], true, &ProgressTracker::new(), &CancelFlag::new())
            .await;

        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.converted, vec![dir.path().join("game.chd")]);
        assert!(!dir.path().join("game.cue").exists());
        assert!(!dir.path().join("track01.bin").exists());
    }
}
