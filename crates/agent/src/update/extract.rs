// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Archive extraction (spec §4.9 step 4): remove any prior extraction
//! directory for the target version, then extract fresh.

use std::path::Path;

use crate::error::AgentError;

/// Remove `dest_dir` if present, then extract every entry of the zip at
/// `archive_path` into it.
pub async fn extract_fresh(archive_path: &Path, dest_dir: &Path) -> Result<(), AgentError> {
    let archive_path = archive_path.to_owned();
    let dest_dir = dest_dir.to_owned();
    tokio::task::spawn_blocking(move || extract_fresh_blocking(&archive_path, &dest_dir))
        .await
        .map_err(|e| AgentError::ExtractionFailed(format!("extraction task panicked: {e}")))?
}

fn extract_fresh_blocking(archive_path: &Path, dest_dir: &Path) -> Result<(), AgentError> {
    if dest_dir.exists() {
        std::fs::remove_dir_all(dest_dir)
            .map_err(|e| AgentError::ExtractionFailed(format!("remove stale extraction dir {}: {e}", dest_dir.display())))?;
    }
    std::fs::create_dir_all(dest_dir)
        .map_err(|e| AgentError::ExtractionFailed(format!("create extraction dir {}: {e}", dest_dir.display())))?;

    let file = std::fs::File::open(archive_path)
        .map_err(|e| AgentError::ExtractionFailed(format!("open archive {}: {e}", archive_path.display())))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| AgentError::ExtractionFailed(format!("read archive: {e}")))?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| AgentError::ExtractionFailed(format!("read entry {i}: {e}")))?;
        let Some(relative_path) = entry.enclosed_name() else {
            // Rejects path-traversal entries (e.g. `../../etc/passwd`)
            // rather than extracting them.
            return Err(AgentError::ExtractionFailed(format!("entry {i} has an unsafe path")));
        };
        let out_path = dest_dir.join(relative_path);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)
                .map_err(|e| AgentError::ExtractionFailed(format!("create dir {}: {e}", out_path.display())))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AgentError::ExtractionFailed(format!("create dir {}: {e}", parent.display())))?;
        }
        let mut out_file = std::fs::File::create(&out_path)
            .map_err(|e| AgentError::ExtractionFailed(format!("create {}: {e}", out_path.display())))?;
        std::io::copy(&mut entry, &mut out_file)
            .map_err(|e| AgentError::ExtractionFailed(format!("write {}: {e}", out_path.display())))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                let _ = std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "extract_tests.rs"]
mod tests;
