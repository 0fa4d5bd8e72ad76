//! Uncompressed tar packing of a directory.

use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::Path;

use strata_common::error::{Result, StrataError};

/// Packs the contents of `dir` into an uncompressed tar stream.
///
/// Entries are named relative to `dir` and appended in name order. The
/// archive is spooled to an anonymous temporary file which is rewound and
/// returned; the file is reclaimed by the OS once dropped.
///
/// # Errors
///
/// Returns an error if the directory cannot be walked or the spool written.
pub fn tar_directory(dir: &Path) -> Result<File> {
    tracing::debug!(dir = %dir.display(), "packing directory");

    let spool = tempfile::tempfile().map_err(|e| StrataError::io(std::env::temp_dir(), e))?;
    let mut builder = tar::Builder::new(spool);
    builder.follow_symlinks(false);

    let mut children = std::fs::read_dir(dir)
        .map_err(|e| StrataError::io(dir, e))?
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| StrataError::io(dir, e))?;
    children.sort_by_key(std::fs::DirEntry::file_name);

    for child in children {
        let path = child.path();
        let name = child.file_name();
        let file_type = child.file_type().map_err(|e| StrataError::io(&path, e))?;
        let appended = if file_type.is_dir() {
            builder.append_dir_all(&name, &path)
        } else {
            builder.append_path_with_name(&path, &name)
        };
        appended.map_err(|e| StrataError::io(&path, e))?;
    }

    let mut spool = builder.into_inner().map_err(|e| StrataError::io(dir, e))?;
    let _ = spool
        .seek(SeekFrom::Start(0))
        .map_err(|e| StrataError::io(dir, e))?;
    Ok(spool)
}
