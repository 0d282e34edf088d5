// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Recursive directory copy/clear (spec §4.10 steps 3-4). Walks the tree
//! with plain `std::fs::read_dir` rather than a recursive-copy crate,
//! matching the teacher's direct-`std::fs` style in `event_log.rs` and
//! `credential/persist.rs`.

use std::path::Path;

/// Recursively copy every entry under `src` into `dst`, creating `dst` (and
/// any intermediate directories) as needed.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let dst_path = dst.join(entry.file_name());
        if file_type.is_dir() {
            copy_dir_recursive(&entry.path(), &dst_path)?;
        } else if file_type.is_file() {
            std::fs::copy(entry.path(), &dst_path)?;
        }
        // Symlinks are neither a file nor a dir under `file_type()`'s
        // un-followed metadata; installed packages carry none, so they are
        // silently skipped rather than guessed at.
    }
    Ok(())
}

/// Delete every entry directly under `dir` except `preserve` (spec §4.10
/// step 4: "delete install-directory contents except the backup").
pub fn clear_dir_except(dir: &Path, preserve: &Path) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path == preserve {
            continue;
        }
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}
