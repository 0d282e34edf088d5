// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Atomic file persistence helpers shared by the identity store, offline
//! queue, and version ignore list: write to a temp file on the same
//! filesystem, fsync, then rename over the target.

use std::io::Write;
use std::path::Path;

use crate::error::AgentError;

/// Serialize `value` to `path` atomically: temp file + fsync + rename.
///
/// The temp file is created in `path`'s parent directory so the rename is
/// guaranteed to be on the same filesystem.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), AgentError> {
    let parent = path.parent().ok_or_else(|| {
        AgentError::Storage(format!("{} has no parent directory", path.display()))
    })?;
    std::fs::create_dir_all(parent)
        .map_err(|e| AgentError::Storage(format!("create_dir_all {}: {e}", parent.display())))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| AgentError::Storage(format!("create temp file: {e}")))?;
    tmp.write_all(contents).map_err(|e| AgentError::Storage(format!("write temp file: {e}")))?;
    tmp.as_file().sync_all().map_err(|e| AgentError::Storage(format!("fsync temp file: {e}")))?;
    tmp.persist(path).map_err(|e| AgentError::Storage(format!("rename into place: {e}")))?;
    Ok(())
}
