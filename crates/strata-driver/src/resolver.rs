//! Logical-to-real layer identity resolution.
//!
//! Layers restored from host base images live in folders whose names differ
//! from the IDs callers use. The mapping is recorded per layer and consulted
//! before every call into the layering primitive.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use strata_common::constants::LAYER_ID_FILE;
use strata_common::error::{Result, StrataError};

use crate::layout::layer_dir;

/// Maps logical layer IDs to the IDs understood by the layering primitive.
pub trait IdResolver: Send + Sync {
    /// Returns the real ID for `id`, or `id` itself when no alias exists.
    ///
    /// # Errors
    ///
    /// Returns an error if an alias exists but cannot be read.
    fn resolve(&self, id: &str) -> Result<String>;

    /// Records that `id` refers to the primitive layer `real`.
    ///
    /// # Errors
    ///
    /// Returns an error if the alias cannot be persisted.
    fn set_alias(&self, id: &str, real: &str) -> Result<()>;

    /// Forgets any alias recorded for `id`. Missing aliases are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing alias cannot be removed.
    fn clear_alias(&self, id: &str) -> Result<()>;
}

/// Resolver backed by a `layerId` file in each layer directory.
#[derive(Debug, Clone)]
pub struct FileIdResolver {
    home: PathBuf,
}

impl FileIdResolver {
    /// Creates a resolver for layers stored under `home`.
    #[must_use]
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    fn alias_path(&self, id: &str) -> PathBuf {
        layer_dir(&self.home, id).join(LAYER_ID_FILE)
    }
}

impl IdResolver for FileIdResolver {
    fn resolve(&self, id: &str) -> Result<String> {
        let path = self.alias_path(id);
        match std::fs::read_to_string(&path) {
            Ok(real) => {
                tracing::trace!(id, real = %real, "resolved layer alias");
                Ok(real)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(id.to_string()),
            Err(e) => Err(StrataError::io(path, e)),
        }
    }

    fn set_alias(&self, id: &str, real: &str) -> Result<()> {
        let path = self.alias_path(id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StrataError::io(parent, e))?;
        }
        write_private(&path, real.as_bytes())?;
        tracing::debug!(id, real, "recorded layer alias");
        Ok(())
    }

    fn clear_alias(&self, id: &str) -> Result<()> {
        let path = self.alias_path(id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StrataError::io(path, e)),
        }
    }
}

/// In-memory resolver for tests and embedders without on-disk aliases.
#[derive(Debug, Default)]
pub struct MemoryIdResolver {
    aliases: Mutex<HashMap<String, String>>,
}

impl MemoryIdResolver {
    /// Creates an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn aliases(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.aliases.lock().map_err(|_| StrataError::Config {
            message: "alias table lock poisoned".into(),
        })
    }
}

impl IdResolver for MemoryIdResolver {
    fn resolve(&self, id: &str) -> Result<String> {
        Ok(self
            .aliases()?
            .get(id)
            .cloned()
            .unwrap_or_else(|| id.to_string()))
    }

    fn set_alias(&self, id: &str, real: &str) -> Result<()> {
        let _ = self.aliases()?.insert(id.to_string(), real.to_string());
        Ok(())
    }

    fn clear_alias(&self, id: &str) -> Result<()> {
        let _ = self.aliases()?.remove(id);
        Ok(())
    }
}

/// Writes `content` to `path`, readable only by the owner on Unix.
pub(crate) fn write_private(path: &Path, content: &[u8]) -> Result<()> {
    use std::io::Write;

    let mut options = std::fs::OpenOptions::new();
    let _ = options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        let _ = options.mode(0o600);
    }
    let mut file = options.open(path).map_err(|e| StrataError::io(path, e))?;
    file.write_all(content)
        .map_err(|e| StrataError::io(path, e))
}
