//! Scratch staging folders and the export stream.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use strata_common::error::{Result, StrataError};

use crate::layout::scratch_dir;
use crate::primitive::LayerPrimitive;

/// A uniquely named folder beside a layer directory, used to stage content
/// moving in or out of the primitive.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
    name: String,
}

impl ScratchDir {
    /// Creates a fresh scratch folder next to `layer_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the folder cannot be created.
    pub fn create(layer_dir: &Path) -> Result<Self> {
        let path = scratch_dir(layer_dir, rand::random::<u32>());
        if let Err(e) = std::fs::create_dir_all(&path) {
            tracing::error!(path = %path.display(), error = %e, "could not create scratch folder");
            return Err(StrataError::io(path, e));
        }
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        tracing::trace!(path = %path.display(), "created scratch folder");
        Ok(Self { path, name })
    }

    /// Returns the folder path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the folder name, which doubles as its primitive layer ID.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Destroys the folder as a primitive layer and removes it from disk.
    ///
    /// Both steps are attempted; the first failure is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if either step fails.
    pub fn destroy(&self, primitive: &dyn LayerPrimitive) -> Result<()> {
        let destroyed = primitive.destroy_layer(&self.name);
        let removed = match std::fs::remove_dir_all(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StrataError::io(&self.path, e)),
        };
        if let Err(e) = &destroyed {
            tracing::warn!(path = %self.path.display(), error = %e, "couldn't clean up scratch folder");
        }
        destroyed.and(removed)
    }
}

/// Tar stream of an exported layer.
///
/// The stream owns the scratch folder the export was staged in. Closing it
/// drops the tar stream and then destroys the scratch folder; this happens
/// exactly once, on the first [`ExportStream::close`] or when the stream is
/// dropped, whichever comes first. The export holds no mount reference on
/// its layer, so closing the stream releases none.
pub struct ExportStream {
    layer: String,
    archive: Option<File>,
    scratch: Option<ScratchDir>,
    primitive: Arc<dyn LayerPrimitive>,
}

impl ExportStream {
    pub(crate) fn new(
        layer: impl Into<String>,
        archive: File,
        scratch: ScratchDir,
        primitive: Arc<dyn LayerPrimitive>,
    ) -> Self {
        Self {
            layer: layer.into(),
            archive: Some(archive),
            scratch: Some(scratch),
            primitive,
        }
    }

    /// Returns the real ID of the exported layer.
    #[must_use]
    pub fn layer(&self) -> &str {
        &self.layer
    }

    /// Returns the scratch folder path while the stream is open.
    #[must_use]
    pub fn scratch_path(&self) -> Option<&Path> {
        self.scratch.as_ref().map(ScratchDir::path)
    }

    /// Returns `true` once the stream has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.scratch.is_none()
    }

    /// Closes the stream and releases its scratch folder.
    ///
    /// Later calls are no-ops.
    ///
    /// # Errors
    ///
    /// Returns an error if the scratch folder cannot be cleaned up.
    pub fn close(&mut self) -> Result<()> {
        let Some(scratch) = self.scratch.take() else {
            return Ok(());
        };
        drop(self.archive.take());
        tracing::debug!(layer = %self.layer, "export stream closed");
        scratch.destroy(self.primitive.as_ref())
    }
}

impl Read for ExportStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.archive.as_mut() {
            Some(archive) => archive.read(buf),
            None => Err(std::io::Error::other("export stream is closed")),
        }
    }
}

impl Drop for ExportStream {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(layer = %self.layer, error = %e, "failed to release export stream");
        }
    }
}

impl std::fmt::Debug for ExportStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportStream")
            .field("layer", &self.layer)
            .field("scratch", &self.scratch)
            .finish_non_exhaustive()
    }
}
