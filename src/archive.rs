//! ZIP compression and extraction of ROM files
//!
//! Compression produces one archive per file, deflate, named after the
//! file's stem. Extraction refuses to overwrite: if any entry of an
//! archive would land on an existing file, the whole archive is skipped so
//! a set is never half extracted.

use crate::models::{Completion, ErrorCategory, FileRecord, OperationError};
use crate::progress::{CancelFlag, ProgressTracker};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Result of a compress or extract pass
#[derive(Debug, Default)]
pub struct ArchiveOutcome {
    /// Archives written (compress) or archives fully extracted (extract)
    pub processed: Vec<PathBuf>,
    /// Per-file failures that did not abort the pass
    pub errors: Vec<OperationError>,
    /// How the pass ended
    pub completion: Completion,
}

/// Compress each file into its own deflate ZIP next to it.
///
/// A file whose archive already exists is skipped with an error. With
/// `delete_original` the source file is removed, but only after the new
/// archive has been verified to exist on disk.
pub async fn compress_files(
    records: &[FileRecord],
    delete_original: bool,
    tracker: &ProgressTracker,
    cancel: &CancelFlag,
) -> ArchiveOutcome {
    let mut outcome = ArchiveOutcome::default();
    tracker.set_total_files(records.len() as u64);

    for record in records {
        if cancel.is_cancelled() {
            outcome.completion = Completion::Cancelled;
            tracker.emit();
            return outcome;
        }
        tracker.set_current_file(Some(record.path.clone()));

        match compress_one(&record.path).await {
            Ok(archive_path) => {
                debug!(file = %record.name, archive = %archive_path.display(), "compressed");
                if delete_original {
                    if let Err(e) = tokio::fs::remove_file(&record.path).await {
                        outcome.errors.push(OperationError::for_file(
                            format!("archive written but original not deleted: {e}"),
                            &record.path,
                            ErrorCategory::FileSystem,
                        ));
                    }
                }
                outcome.processed.push(archive_path);
            }
            Err(e) => outcome.errors.push(e),
        }
        tracker.increment_files_processed();
    }

    info!(archives = outcome.processed.len(), "compression pass complete");
    outcome.completion = Completion::Completed;
    tracker.emit();
    outcome
}

async fn compress_one(path: &Path) -> Result<PathBuf, OperationError> {
    let archive_path = path.with_extension("zip");
    if archive_path.exists() {
        return Err(OperationError::for_file(
            format!("archive '{}' already exists", archive_path.display()),
            path,
            ErrorCategory::Archive,
        ));
    }

    let source = path.to_path_buf();
    let target = archive_path.clone();
    let result = tokio::task::spawn_blocking(move || write_archive(&source, &target))
        .await
        .expect("compression task panicked");
    result.map_err(|e| {
        OperationError::for_file(format!("compression failed: {e}"), path, ErrorCategory::Archive)
    })?;

    // The archive must be on disk before the original may be touched.
    if !archive_path.exists() {
        return Err(OperationError::for_file(
            "archive missing after compression".to_string(),
            path,
            ErrorCategory::Archive,
        ));
    }
    Ok(archive_path)
}

fn write_archive(source: &Path, target: &Path) -> std::io::Result<()> {
    let entry_name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| std::io::Error::other("source has no file name"))?;

    let mut reader = BufReader::new(File::open(source)?);
    let mut writer = zip::ZipWriter::new(File::create(target)?);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .large_file(true);
    writer.start_file(entry_name, options)?;

    let mut buffer = vec![0u8; 1024 * 1024];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buffer[..n])?;
    }
    writer.finish()?;
    Ok(())
}

/// Extract each archive into its own folder.
///
/// An archive is skipped entirely if any of its entries would overwrite an
/// existing file. With `delete_archive` the archive is removed after a
/// complete extraction.
pub async fn extract_archives(
    records: &[FileRecord],
    delete_archive: bool,
    tracker: &ProgressTracker,
    cancel: &CancelFlag,
) -> ArchiveOutcome {
    let mut outcome = ArchiveOutcome::default();
    tracker.set_total_files(records.len() as u64);

    for record in records {
        if cancel.is_cancelled() {
            outcome.completion = Completion::Cancelled;
            tracker.emit();
            return outcome;
        }
        tracker.set_current_file(Some(record.path.clone()));

        match extract_one(&record.path).await {
            Ok(()) => {
                debug!(archive = %record.name, "extracted");
                if delete_archive {
                    if let Err(e) = tokio::fs::remove_file(&record.path).await {
                        outcome.errors.push(OperationError::for_file(
                            format!("extracted but archive not deleted: {e}"),
                            &record.path,
                            ErrorCategory::FileSystem,
                        ));
                    }
                }
                outcome.processed.push(record.path.clone());
            }
            Err(e) => outcome.errors.push(e),
        }
        tracker.increment_files_processed();
    }

    info!(archives = outcome.processed.len(), "extraction pass complete");
    outcome.completion = Completion::Completed;
    tracker.emit();
    outcome
}

async fn extract_one(path: &Path) -> Result<(), OperationError> {
    let archive_path = path.to_path_buf();
    tokio::task::spawn_blocking(move || extract_archive(&archive_path))
        .await
        .expect("extraction task panicked")
}

fn extract_archive(path: &Path) -> Result<(), OperationError> {
    let folder = path.parent().unwrap_or_else(|| Path::new("."));
    let file = File::open(path).map_err(|e| {
        OperationError::for_file(format!("cannot open archive: {e}"), path, ErrorCategory::Archive)
    })?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file)).map_err(|e| {
        OperationError::for_file(format!("not a valid archive: {e}"), path, ErrorCategory::Archive)
    })?;

    // First pass: refuse the whole archive if anything would be overwritten.
    let mut destinations = Vec::new();
    for i in 0..archive.len() {
        let entry = archive.by_index_raw(i).map_err(|e| {
            OperationError::for_file(format!("unreadable entry: {e}"), path, ErrorCategory::Archive)
        })?;
        if entry.is_dir() {
            continue;
        }
        let Some(enclosed) = entry.enclosed_name() else {
            return Err(OperationError::for_file(
                format!("entry '{}' escapes the archive folder", entry.name()),
                path,
                ErrorCategory::Archive,
            ));
        };
        let destination = folder.join(enclosed);
        if destination.exists() {
            return Err(OperationError::for_file(
                format!("'{}' already exists, archive skipped", destination.display()),
                path,
                ErrorCategory::Archive,
            ));
        }
        destinations.push((i, destination));
    }

    for (i, destination) in destinations {
        let mut entry = archive.by_index(i).map_err(|e| {
            OperationError::for_file(format!("unreadable entry: {e}"), path, ErrorCategory::Archive)
        })?;
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                OperationError::for_file(
                    format!("cannot create folder: {e}"),
                    parent,
                    ErrorCategory::FileSystem,
                )
            })?;
        }
        let mut output = File::create(&destination).map_err(|e| {
            OperationError::for_file(
                format!("cannot create file: {e}"),
                &destination,
                ErrorCategory::FileSystem,
            )
        })?;
        std::io::copy(&mut entry, &mut output).map_err(|e| {
            OperationError::for_file(
                format!("extraction failed: {e}"),
                &destination,
                ErrorCategory::Archive,
            )
        })?;
    }
    Ok(())
}
