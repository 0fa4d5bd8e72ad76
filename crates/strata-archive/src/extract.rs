//! Layer extraction.
//!
//! Applies a layer tar stream onto a target directory. Entries named
//! `.wh.<name>` delete `<name>` from the target, and a `.wh..wh..opq`
//! entry empties its directory of content not written by the same stream.

use std::collections::HashSet;
use std::io::{BufRead, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use strata_common::error::{Result, StrataError};

/// Prefix marking a whiteout entry.
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// Entry name marking an opaque directory.
pub const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// How a layer stream is interpreted before its entries are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractMode {
    /// The stream may be gzip-compressed; compression is detected from
    /// its leading bytes.
    Layer,
    /// The stream is a plain tar archive.
    UncompressedLayer,
}

/// Applies a possibly compressed layer stream onto `dest`.
///
/// Returns the number of bytes of regular file content written.
///
/// # Errors
///
/// Returns an error if the stream cannot be read or an entry cannot be applied.
pub fn apply_layer(dest: &Path, layer: impl Read) -> Result<u64> {
    apply(dest, layer, ExtractMode::Layer)
}

/// Applies an uncompressed layer stream onto `dest`.
///
/// Returns the number of bytes of regular file content written.
///
/// # Errors
///
/// Returns an error if the stream cannot be read or an entry cannot be applied.
pub fn apply_uncompressed_layer(dest: &Path, layer: impl Read) -> Result<u64> {
    apply(dest, layer, ExtractMode::UncompressedLayer)
}

/// Applies a layer stream onto `dest` using the given mode.
///
/// # Errors
///
/// Returns an error if the stream cannot be read or an entry cannot be applied.
pub fn apply(dest: &Path, layer: impl Read, mode: ExtractMode) -> Result<u64> {
    tracing::debug!(dest = %dest.display(), ?mode, "applying layer");

    std::fs::create_dir_all(dest).map_err(|e| StrataError::io(dest, e))?;

    match mode {
        ExtractMode::UncompressedLayer => unpack_entries(dest, layer),
        ExtractMode::Layer => {
            let mut buffered = BufReader::new(layer);
            let head = buffered.fill_buf().map_err(|e| StrataError::io(dest, e))?;
            if head.starts_with(&GZIP_MAGIC) {
                tracing::debug!("layer stream is gzip-compressed");
                unpack_entries(dest, flate2::read::GzDecoder::new(buffered))
            } else {
                unpack_entries(dest, buffered)
            }
        }
    }
}

fn unpack_entries<R: Read>(dest: &Path, reader: R) -> Result<u64> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);

    let mut written = 0u64;
    let mut unpacked: HashSet<PathBuf> = HashSet::new();

    let entries = archive.entries().map_err(|e| StrataError::io(dest, e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| StrataError::io(dest, e))?;
        let raw = entry
            .path()
            .map_err(|e| StrataError::io(dest, e))?
            .into_owned();
        let Some(relative) = normalize(&raw) else {
            tracing::warn!(entry = %raw.display(), "skipping archive entry outside layer root");
            continue;
        };

        let name = relative.file_name().and_then(|n| n.to_str()).unwrap_or("");
        let parent = relative.parent().unwrap_or_else(|| Path::new(""));

        if name == OPAQUE_WHITEOUT {
            if let Some(dir) = contained_dir(dest, parent)? {
                clear_opaque_dir(&dir, &unpacked)?;
            }
            continue;
        }
        if let Some(hidden) = name.strip_prefix(WHITEOUT_PREFIX) {
            if matches!(hidden, "" | "." | "..") {
                tracing::warn!(entry = %relative.display(), "skipping malformed whiteout");
                continue;
            }
            if let Some(dir) = contained_dir(dest, parent)? {
                remove_path(&dir.join(hidden))?;
            }
            continue;
        }

        let is_file = entry.header().entry_type().is_file();
        let size = entry.size();
        if !entry.unpack_in(dest).map_err(|e| StrataError::io(dest.join(&relative), e))? {
            tracing::warn!(entry = %relative.display(), "archive entry was not unpacked");
            continue;
        }
        if is_file {
            written += size;
        }
        let _ = unpacked.insert(dest.join(&relative));
    }

    tracing::debug!(dest = %dest.display(), bytes = written, "layer applied");
    Ok(written)
}

/// Strips `.` components and rejects entries that escape the archive root.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Resolves `parent` under `dest` without following symlinks.
///
/// Returns `None` when a component is missing or is not a real directory,
/// in which case a whiteout below it has nothing to remove.
fn contained_dir(dest: &Path, parent: &Path) -> Result<Option<PathBuf>> {
    let mut dir = dest.to_path_buf();
    for component in parent.components() {
        dir.push(component);
        match std::fs::symlink_metadata(&dir) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                tracing::warn!(
                    path = %dir.display(),
                    "whiteout parent is not a directory, skipping"
                );
                return Ok(None);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StrataError::io(&dir, e)),
        }
    }
    Ok(Some(dir))
}

fn remove_path(path: &Path) -> Result<()> {
    let Ok(meta) = std::fs::symlink_metadata(path) else {
        return Ok(());
    };
    tracing::trace!(path = %path.display(), "applying whiteout");
    let removed = if meta.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    removed.map_err(|e| StrataError::io(path, e))
}

fn clear_opaque_dir(dir: &Path, keep: &HashSet<PathBuf>) -> Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(StrataError::io(dir, e)),
    };
    for entry in entries {
        let entry = entry.map_err(|e| StrataError::io(dir, e))?;
        let path = entry.path();
        if !keep.contains(&path) {
            remove_path(&path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn append_file(builder: &mut tar::Builder<impl std::io::Write>, name: &str, data: &[u8]) {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder
            .append_data(&mut header, name, data)
            .expect("failed to append data");
    }

    fn create_test_tar(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in entries {
            append_file(&mut builder, name, data);
        }
        builder.into_inner().expect("failed to finish tar")
    }

    fn create_test_tar_gz(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, data) in entries {
            append_file(&mut builder, name, data);
        }
        let encoder = builder.into_inner().expect("failed to finish encoder");
        encoder.finish().expect("failed to finish gzip")
    }

    #[test]
    fn apply_plain_tar_writes_files_and_counts_bytes() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let tar = create_test_tar(&[("hello.txt", b"hello from layer"), ("sub/a.txt", b"abc")]);

        let written = apply_uncompressed_layer(dir.path(), tar.as_slice()).expect("apply failed");
        assert_eq!(written, 19);

        let content = std::fs::read_to_string(dir.path().join("hello.txt")).expect("read failed");
        assert_eq!(content, "hello from layer");
        assert!(dir.path().join("sub/a.txt").exists());
    }

    #[test]
    fn apply_layer_detects_gzip() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let tar_gz = create_test_tar_gz(&[("gzhello.txt", b"hello from gzipped layer")]);

        let written = apply_layer(dir.path(), tar_gz.as_slice()).expect("apply failed");
        assert_eq!(written, 24);

        let content = std::fs::read_to_string(dir.path().join("gzhello.txt")).expect("read failed");
        assert_eq!(content, "hello from gzipped layer");
    }

    #[test]
    fn apply_layer_accepts_plain_tar() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let tar = create_test_tar(&[("plain.txt", b"plain")]);

        let written = apply_layer(dir.path(), tar.as_slice()).expect("apply failed");
        assert_eq!(written, 5);
        assert!(dir.path().join("plain.txt").exists());
    }

    #[test]
    fn uncompressed_mode_rejects_gzip_stream() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let tar_gz = create_test_tar_gz(&[("gzhello.txt", b"data")]);
        assert!(apply_uncompressed_layer(dir.path(), tar_gz.as_slice()).is_err());
    }

    #[test]
    fn whiteout_removes_existing_file() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        std::fs::create_dir_all(dir.path().join("etc")).expect("mkdir");
        std::fs::write(dir.path().join("etc/old.conf"), b"stale").expect("write");

        let tar = create_test_tar(&[("etc/.wh.old.conf", b"")]);
        let _ = apply_layer(dir.path(), tar.as_slice()).expect("apply failed");

        assert!(!dir.path().join("etc/old.conf").exists());
        assert!(!dir.path().join("etc/.wh.old.conf").exists());
    }

    #[test]
    fn opaque_whiteout_keeps_entries_from_same_stream() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        std::fs::create_dir_all(dir.path().join("data")).expect("mkdir");
        std::fs::write(dir.path().join("data/lower.txt"), b"lower").expect("write");

        let tar = create_test_tar(&[("data/upper.txt", b"upper"), ("data/.wh..wh..opq", b"")]);
        let _ = apply_layer(dir.path(), tar.as_slice()).expect("apply failed");

        assert!(!dir.path().join("data/lower.txt").exists());
        assert!(dir.path().join("data/upper.txt").exists());
    }

    #[test]
    fn dot_dot_whiteout_keeps_destination() {
        let root = tempfile::tempdir().expect("failed to create tempdir");
        let dest = root.path().join("layer");
        std::fs::create_dir_all(&dest).expect("mkdir");
        std::fs::write(dest.join("kept.txt"), b"kept").expect("write");
        std::fs::write(root.path().join("sibling.txt"), b"sibling").expect("write");

        let tar = create_test_tar(&[(".wh...", b""), ("sub/.wh..", b""), (".wh.", b"")]);
        let _ = apply_layer(&dest, tar.as_slice()).expect("apply failed");

        assert!(dest.join("kept.txt").exists());
        assert!(root.path().join("sibling.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn whiteout_does_not_follow_symlinked_parent() {
        let root = tempfile::tempdir().expect("failed to create tempdir");
        let dest = root.path().join("layer");
        let outside = root.path().join("outside");
        std::fs::create_dir_all(&dest).expect("mkdir");
        std::fs::create_dir_all(&outside).expect("mkdir");
        std::fs::write(outside.join("secret"), b"secret").expect("write");
        std::os::unix::fs::symlink(&outside, dest.join("link")).expect("symlink");

        let tar = create_test_tar(&[("link/.wh.secret", b"")]);
        let _ = apply_layer(&dest, tar.as_slice()).expect("apply failed");

        assert!(outside.join("secret").exists());
    }

    #[cfg(unix)]
    #[test]
    fn opaque_whiteout_does_not_follow_symlinked_dir() {
        let root = tempfile::tempdir().expect("failed to create tempdir");
        let dest = root.path().join("layer");
        let outside = root.path().join("outside");
        std::fs::create_dir_all(&dest).expect("mkdir");
        std::fs::create_dir_all(&outside).expect("mkdir");
        std::fs::write(outside.join("data.txt"), b"data").expect("write");
        std::os::unix::fs::symlink(&outside, dest.join("link")).expect("symlink");

        let tar = create_test_tar(&[("link/.wh..wh..opq", b"")]);
        let _ = apply_layer(&dest, tar.as_slice()).expect("apply failed");

        assert!(outside.join("data.txt").exists());
    }

    #[test]
    fn normalize_rejects_escaping_paths() {
        assert_eq!(normalize(Path::new("./a/b")), Some(PathBuf::from("a/b")));
        assert_eq!(normalize(Path::new("../etc/passwd")), None);
        assert_eq!(normalize(Path::new("/abs")), None);
        assert_eq!(normalize(Path::new(".")), None);
    }
}
