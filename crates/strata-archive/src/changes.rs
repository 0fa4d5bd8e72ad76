//! Filesystem change records.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// Kind of change recorded for a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// The path was modified.
    Modify,
    /// The path was added.
    Add,
    /// The path was deleted.
    Delete,
}

/// A single changed path, relative to the layer root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Change {
    /// Changed path; a leading `/` is accepted.
    pub path: PathBuf,
    /// What happened to the path.
    pub kind: ChangeKind,
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let marker = match self.kind {
            ChangeKind::Modify => 'C',
            ChangeKind::Add => 'A',
            ChangeKind::Delete => 'D',
        };
        write!(f, "{marker} {}", self.path.display())
    }
}

/// Sums the sizes of the regular files added or modified by `changes`,
/// measured under `root`.
///
/// Deleted paths, directories, and paths that no longer exist count as
/// zero. Each path is counted once.
#[must_use]
pub fn changes_size(root: &Path, changes: &[Change]) -> u64 {
    let mut seen: HashSet<&Path> = HashSet::new();
    changes
        .iter()
        .filter(|change| change.kind != ChangeKind::Delete)
        .filter(|change| seen.insert(change.path.as_path()))
        .filter_map(|change| {
            let relative = change.path.strip_prefix("/").unwrap_or(&change.path);
            std::fs::symlink_metadata(root.join(relative)).ok()
        })
        .filter(std::fs::Metadata::is_file)
        .map(|meta| meta.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(path: &str, kind: ChangeKind) -> Change {
        Change {
            path: PathBuf::from(path),
            kind,
        }
    }

    #[test]
    fn changes_size_counts_added_and_modified_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("etc")).expect("mkdir");
        std::fs::write(dir.path().join("etc/a"), b"12345").expect("write");
        std::fs::write(dir.path().join("etc/b"), b"123").expect("write");

        let changes = vec![
            change("/etc", ChangeKind::Modify),
            change("/etc/a", ChangeKind::Add),
            change("/etc/b", ChangeKind::Modify),
            change("/etc/a", ChangeKind::Modify),
            change("/etc/gone", ChangeKind::Delete),
        ];
        assert_eq!(changes_size(dir.path(), &changes), 8);
    }

    #[test]
    fn changes_size_ignores_missing_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        let changes = vec![change("missing", ChangeKind::Add)];
        assert_eq!(changes_size(dir.path(), &changes), 0);
    }

    #[test]
    fn change_display_uses_kind_marker() {
        assert_eq!(change("/x", ChangeKind::Add).to_string(), "A /x");
        assert_eq!(change("/y", ChangeKind::Delete).to_string(), "D /y");
    }
}
