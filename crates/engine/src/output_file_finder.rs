// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Output File Finder: bounded depth-first walk of a project's compile
//! directory (spec §4.6). Shared by the Resource Writer (to reconcile the
//! working tree) and the Output Cache (to enumerate what to snapshot).

use clsi_core::error::ClsiError;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

/// The agent's Unix domain socket, excluded from every walk.
pub const AGENT_SOCKET_NAME: &str = ".agent-socket";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    File,
}

#[derive(Debug, Clone, Copy)]
pub struct FileStat {
    pub size: u64,
}

/// Relative paths (`/`-separated, rooted at the walked directory) mapped to
/// their kind, plus file stats for regular files.
#[derive(Debug, Default, Clone)]
pub struct WalkResult {
    pub entries: HashMap<String, EntryKind>,
    pub file_stats: HashMap<String, FileStat>,
}

impl WalkResult {
    pub fn kind_of(&self, path: &str) -> Option<EntryKind> {
        self.entries.get(path).copied()
    }
}

/// Depth-first walk of `base_dir`. Exceeding `max_entries` total files and
/// directories yields `ClsiError::too_many_files()` (spec §4.6, used as a
/// reset signal by the Resource Writer).
pub fn walk(base_dir: &Path, max_entries: usize) -> Result<WalkResult, ClsiError> {
    let mut result = WalkResult::default();
    let mut count = 0usize;
    let mut stack = vec![PathBuf::new()];

    while let Some(rel_dir) = stack.pop() {
        let abs_dir = base_dir.join(&rel_dir);
        let read_dir = match std::fs::read_dir(&abs_dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(ClsiError::Transport(format!("walk {}: {e}", abs_dir.display()))),
        };

        for entry in read_dir {
            let entry = entry.map_err(|e| ClsiError::Transport(format!("walk entry: {e}")))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name == AGENT_SOCKET_NAME {
                continue;
            }
            let rel_path = if rel_dir.as_os_str().is_empty() {
                name.to_string()
            } else {
                format!("{}/{}", rel_dir.display(), name)
            };

            count += 1;
            if count > max_entries {
                return Err(ClsiError::too_many_files());
            }

            let file_type =
                entry.file_type().map_err(|e| ClsiError::Transport(format!("file type {rel_path}: {e}")))?;
            if file_type.is_dir() {
                result.entries.insert(rel_path.clone(), EntryKind::Dir);
                stack.push(PathBuf::from(rel_path));
            } else {
                result.entries.insert(rel_path.clone(), EntryKind::File);
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                result.file_stats.insert(rel_path, FileStat { size });
            }
        }
    }

    Ok(result)
}

/// Remove whatever currently occupies `path` if it would conflict with
/// writing a file there — e.g. a stale directory left behind by a resource
/// that used to be a nested tree (spec §4.4 producer step).
pub fn ensure_is_writable(base_dir: &Path, walked: &WalkResult, path: &str) -> io::Result<()> {
    if walked.kind_of(path) == Some(EntryKind::Dir) {
        std::fs::remove_dir_all(base_dir.join(path))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn walks_nested_directories_with_relative_paths() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("chapters")).unwrap();
        std::fs::write(dir.path().join("main.tex"), b"x").unwrap();
        std::fs::write(dir.path().join("chapters/intro.tex"), b"y").unwrap();

        let walked = walk(dir.path(), 100).unwrap();
        assert_eq!(walked.kind_of("main.tex"), Some(EntryKind::File));
        assert_eq!(walked.kind_of("chapters"), Some(EntryKind::Dir));
        assert_eq!(walked.kind_of("chapters/intro.tex"), Some(EntryKind::File));
        assert_eq!(walked.file_stats.get("main.tex").unwrap().size, 1);
    }

    #[test]
    fn excludes_agent_socket() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(AGENT_SOCKET_NAME), b"").unwrap();
        let walked = walk(dir.path(), 100).unwrap();
        assert!(walked.entries.is_empty());
    }

    #[test]
    fn exceeding_cap_yields_too_many_files() {
        let dir = tempdir().unwrap();
        for i in 0..6 {
            std::fs::write(dir.path().join(format!("f{i}.tex")), b"x").unwrap();
        }
        let err = walk(dir.path(), 5).unwrap_err();
        assert!(matches!(err, ClsiError::InvalidState { recoverable: true, .. }));
    }

    #[test]
    fn missing_directory_walks_as_empty() {
        let dir = tempdir().unwrap();
        let walked = walk(&dir.path().join("absent"), 100).unwrap();
        assert!(walked.entries.is_empty());
    }

    #[test]
    fn ensure_is_writable_clears_conflicting_directory() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("main.tex")).unwrap();
        let walked = walk(dir.path(), 100).unwrap();
        ensure_is_writable(dir.path(), &walked, "main.tex").unwrap();
        assert!(!dir.path().join("main.tex").exists());
    }
}
