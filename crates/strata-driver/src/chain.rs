//! Persistence of layer chains.
//!
//! A chain lists the mount paths of a layer's ancestors, immediate parent
//! first and root-most last. It is handed verbatim to the layering primitive
//! whenever the layer is prepared, exported, or imported.

use std::io::Write;
use std::path::PathBuf;

use strata_common::constants::LAYER_CHAIN_FILE;
use strata_common::error::{Result, StrataError};

use crate::layout::layer_dir;

/// Reads and writes `layerchain.json` files under the driver home.
#[derive(Debug, Clone)]
pub struct ChainStore {
    home: PathBuf,
}

impl ChainStore {
    /// Creates a store for layers under `home`.
    #[must_use]
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// Returns the chain file path for layer `id`.
    #[must_use]
    pub fn chain_path(&self, id: &str) -> PathBuf {
        layer_dir(&self.home, id).join(LAYER_CHAIN_FILE)
    }

    /// Loads the chain of layer `id`. A missing file yields an empty chain.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or decoded.
    pub fn load(&self, id: &str) -> Result<Vec<String>> {
        let path = self.chain_path(id);
        let content = match std::fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StrataError::io(path, e)),
        };
        // Chains written for root layers may hold `null` rather than `[]`.
        serde_json::from_slice::<Option<Vec<String>>>(&content)
            .map(Option::unwrap_or_default)
            .map_err(|e| StrataError::Decode { path, source: e })
    }

    /// Replaces the chain of layer `id`.
    ///
    /// The content is written to a temporary file in the layer directory and
    /// renamed over the chain file, so readers see either the old or the new
    /// chain in full.
    ///
    /// # Errors
    ///
    /// Returns an error if the layer directory is missing or the write fails.
    pub fn save(&self, id: &str, chain: &[String]) -> Result<()> {
        let path = self.chain_path(id);
        let content = serde_json::to_vec(chain).map_err(|e| StrataError::Encode { source: e })?;
        let dir = layer_dir(&self.home, id);

        let mut staged =
            tempfile::NamedTempFile::new_in(&dir).map_err(|e| StrataError::io(&dir, e))?;
        staged
            .write_all(&content)
            .map_err(|e| StrataError::io(staged.path(), e))?;
        let _ = staged
            .persist(&path)
            .map_err(|e| StrataError::io(&path, e.error))?;

        tracing::debug!(id, depth = chain.len(), "saved layer chain");
        Ok(())
    }

    /// Deletes the chain file of layer `id`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be removed.
    pub fn remove(&self, id: &str) -> Result<()> {
        let path = self.chain_path(id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StrataError::io(path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_layer(id: &str) -> (tempfile::TempDir, ChainStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join(id)).expect("mkdir");
        let store = ChainStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn load_missing_chain_is_empty() {
        let (_dir, store) = store_with_layer("layer-a");
        assert!(store.load("layer-a").expect("load").is_empty());
        assert!(store.load("never-created").expect("load").is_empty());
    }

    #[test]
    fn save_then_load_preserves_order() {
        let (_dir, store) = store_with_layer("layer-a");
        let chain = vec!["/l/parent".to_string(), "/l/grandparent".to_string()];
        store.save("layer-a", &chain).expect("save");
        assert_eq!(store.load("layer-a").expect("load"), chain);
    }

    #[test]
    fn save_writes_json_array() {
        let (dir, store) = store_with_layer("layer-a");
        store.save("layer-a", &["/l/p".to_string()]).expect("save");
        let raw = std::fs::read_to_string(dir.path().join("layer-a").join(LAYER_CHAIN_FILE))
            .expect("read");
        assert_eq!(raw, r#"["/l/p"]"#);
    }

    #[test]
    fn save_replaces_previous_chain() {
        let (_dir, store) = store_with_layer("layer-a");
        store.save("layer-a", &["/old".to_string()]).expect("save");
        store.save("layer-a", &[]).expect("save");
        assert!(store.load("layer-a").expect("load").is_empty());
    }

    #[test]
    fn load_null_chain_is_empty() {
        let (dir, store) = store_with_layer("layer-a");
        std::fs::write(dir.path().join("layer-a").join(LAYER_CHAIN_FILE), b"null").expect("write");
        assert!(store.load("layer-a").expect("load").is_empty());
    }

    #[test]
    fn load_malformed_chain_fails_with_decode_error() {
        let (dir, store) = store_with_layer("layer-a");
        std::fs::write(dir.path().join("layer-a").join(LAYER_CHAIN_FILE), b"{oops").expect("write");
        assert!(matches!(
            store.load("layer-a"),
            Err(StrataError::Decode { .. })
        ));
    }

    #[test]
    fn save_into_missing_layer_dir_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ChainStore::new(dir.path());
        assert!(store.save("ghost", &[]).is_err());
    }

    #[test]
    fn remove_deletes_chain_file() {
        let (_dir, store) = store_with_layer("layer-a");
        store.save("layer-a", &["/p".to_string()]).expect("save");
        store.remove("layer-a").expect("remove");
        assert!(!store.chain_path("layer-a").exists());
        store.remove("layer-a").expect("remove again");
    }
}
