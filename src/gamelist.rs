//! EmulationStation `gamelist.xml` maintenance after rename batches
//!
//! Only the text of `<path>` elements is touched. The document is never
//! re-serialized; replacements are spliced into the original bytes using
//! the parser's source ranges, so formatting, comments, and unrelated
//! metadata survive byte for byte. A `.backup` copy is written before the
//! first change and restored when a batch is undone.

use crate::models::{ErrorCategory, OperationError, UndoLogEntry};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const GAMELIST_FILE: &str = "gamelist.xml";
const BACKUP_SUFFIX: &str = ".backup";

/// Update `gamelist.xml` files to follow a rename batch.
///
/// Renames are grouped by folder; each folder with a gamelist gets one
/// rewrite pass. Folders without a gamelist are skipped silently. Returns
/// the gamelists rewritten and any failures.
pub async fn update_gamelists(undo_log: &[UndoLogEntry]) -> (Vec<PathBuf>, Vec<OperationError>) {
    let mut renames_by_folder: HashMap<PathBuf, HashMap<String, String>> = HashMap::new();
    for entry in undo_log {
        let (Some(folder), Some(old_name), Some(new_name)) = (
            entry.old_path.parent(),
            entry.old_path.file_name().and_then(|n| n.to_str()),
            entry.new_path.file_name().and_then(|n| n.to_str()),
        ) else {
            continue;
        };
        renames_by_folder
            .entry(folder.to_path_buf())
            .or_default()
            .insert(old_name.to_string(), new_name.to_string());
    }

    let mut updated = Vec::new();
    let mut errors = Vec::new();
    for (folder, renames) in renames_by_folder {
        let gamelist = folder.join(GAMELIST_FILE);
        if !gamelist.exists() {
            continue;
        }
        match rewrite_gamelist(&gamelist, &renames).await {
            Ok(true) => updated.push(gamelist),
            Ok(false) => {}
            Err(e) => errors.push(OperationError::for_file(e, &gamelist, ErrorCategory::Sidecar)),
        }
    }
    (updated, errors)
}

/// Restore gamelist backups for every folder touched by a rename batch.
///
/// Called during undo. A missing backup is not an error; the batch may not
/// have changed that folder's gamelist.
pub async fn restore_backups(undo_log: &[UndoLogEntry]) -> (Vec<PathBuf>, Vec<OperationError>) {
    let folders: HashSet<PathBuf> = undo_log
        .iter()
        .filter_map(|e| e.old_path.parent().map(Path::to_path_buf))
        .collect();

    let mut restored = Vec::new();
    let mut errors = Vec::new();
    for folder in folders {
        let gamelist = folder.join(GAMELIST_FILE);
        let backup = backup_path(&gamelist);
        if !backup.exists() {
            continue;
        }
        let result = async {
            tokio::fs::copy(&backup, &gamelist).await?;
            tokio::fs::remove_file(&backup).await
        }
        .await;
        match result {
            Ok(()) => {
                debug!(path = %gamelist.display(), "restored gamelist from backup");
                restored.push(gamelist);
            }
            Err(e) => errors.push(OperationError::for_file(
                format!("backup restore failed: {e}"),
                &gamelist,
                ErrorCategory::Sidecar,
            )),
        }
    }
    (restored, errors)
}

fn backup_path(gamelist: &Path) -> PathBuf {
    let mut s = gamelist.as_os_str().to_os_string();
    s.push(BACKUP_SUFFIX);
    PathBuf::from(s)
}

async fn rewrite_gamelist(
    gamelist: &Path,
    renames: &HashMap<String, String>,
) -> Result<bool, String> {
    let contents = tokio::fs::read_to_string(gamelist)
        .await
        .map_err(|e| format!("cannot read gamelist: {e}"))?;

    let replacements = path_replacements(&contents, renames)?;
    if replacements.is_empty() {
        return Ok(false);
    }

    tokio::fs::copy(gamelist, backup_path(gamelist))
        .await
        .map_err(|e| format!("cannot write backup: {e}"))?;

    let mut output = contents;
    // Splice back to front so earlier ranges stay valid.
    for (range, replacement) in replacements.into_iter().rev() {
        output.replace_range(range, &replacement);
    }
    tokio::fs::write(gamelist, output)
        .await
        .map_err(|e| format!("cannot write gamelist: {e}"))?;
    info!(path = %gamelist.display(), "updated gamelist entries");
    Ok(true)
}

/// Source ranges of `<path>` text nodes that need new content, in document
/// order.
fn path_replacements(
    xml: &str,
    renames: &HashMap<String, String>,
) -> Result<Vec<(std::ops::Range<usize>, String)>, String> {
    let doc = roxmltree::Document::parse(xml).map_err(|e| format!("gamelist is not valid XML: {e}"))?;

    let mut replacements = Vec::new();
    for element in doc.descendants().filter(|n| n.has_tag_name("path")) {
        for child in element.children() {
            if !child.is_text() {
                continue;
            }
            let Some(text) = child.text() else { continue };
            let Some(new_text) = replaced_path_text(text, renames) else {
                continue;
            };
            replacements.push((child.range(), escape_xml_text(&new_text)));
        }
    }
    Ok(replacements)
}

/// New text for a `<path>` value whose file name was renamed, keeping any
/// leading directory portion.
fn replaced_path_text(text: &str, renames: &HashMap<String, String>) -> Option<String> {
    let trimmed = text.trim();
    let (prefix, base) = match trimmed.rfind('/') {
        Some(slash) => (&trimmed[..=slash], &trimmed[slash + 1..]),
        None => ("", trimmed),
    };
    let new_name = renames.get(base)?;
    Some(format!("{prefix}{new_name}"))
}

fn escape_xml_text(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
