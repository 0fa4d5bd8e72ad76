//! On-disk layout of the driver home.
//!
//! Every layer owns `<home>/<id>`; metadata files and scratch folders are
//! placed relative to it.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Returns the directory of layer `id` under `home`.
///
/// Only the final path component of `id` is used, so an empty ID maps to
/// `home` itself.
#[must_use]
pub fn layer_dir(home: &Path, id: &str) -> PathBuf {
    Path::new(id)
        .file_name()
        .map_or_else(|| home.to_path_buf(), |name| home.join(name))
}

/// Returns a scratch folder path beside `layer_dir`, suffixed with `suffix`.
#[must_use]
pub fn scratch_dir(layer_dir: &Path, suffix: u32) -> PathBuf {
    let mut name = OsString::from(layer_dir.as_os_str());
    name.push(format!("-{suffix}"));
    PathBuf::from(name)
}
