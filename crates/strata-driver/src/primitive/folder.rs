//! Directory-backed layering primitive.
//!
//! Emulates the platform primitive with plain folders so the driver can be
//! exercised on any host. Layer `id` stores its content in
//! `<home>/<id>/Files`; registration is the existence of that folder.
//! Activation state is kept in memory and checked strictly: activating an
//! active layer, preparing an unactivated one, or (in filter flavour)
//! exporting a prepared one all fail. Every call is counted and any
//! operation can be made to fail on demand.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use strata_common::config::Flavour;
use strata_common::error::{Result, StrataError};

use super::LayerPrimitive;
use crate::layout::layer_dir;

/// Operation names, as counted by [`FolderPrimitive::calls`].
pub mod ops {
    /// [`super::LayerPrimitive::layer_exists`].
    pub const LAYER_EXISTS: &str = "layer_exists";
    /// [`super::LayerPrimitive::create_layer`].
    pub const CREATE_LAYER: &str = "create_layer";
    /// [`super::LayerPrimitive::create_sandbox_layer`].
    pub const CREATE_SANDBOX_LAYER: &str = "create_sandbox_layer";
    /// [`super::LayerPrimitive::destroy_layer`].
    pub const DESTROY_LAYER: &str = "destroy_layer";
    /// [`super::LayerPrimitive::activate_layer`].
    pub const ACTIVATE_LAYER: &str = "activate_layer";
    /// [`super::LayerPrimitive::deactivate_layer`].
    pub const DEACTIVATE_LAYER: &str = "deactivate_layer";
    /// [`super::LayerPrimitive::prepare_layer`].
    pub const PREPARE_LAYER: &str = "prepare_layer";
    /// [`super::LayerPrimitive::unprepare_layer`].
    pub const UNPREPARE_LAYER: &str = "unprepare_layer";
    /// [`super::LayerPrimitive::get_layer_mount_path`].
    pub const GET_LAYER_MOUNT_PATH: &str = "get_layer_mount_path";
    /// [`super::LayerPrimitive::export_layer`].
    pub const EXPORT_LAYER: &str = "export_layer";
    /// [`super::LayerPrimitive::import_layer`].
    pub const IMPORT_LAYER: &str = "import_layer";
    /// [`super::LayerPrimitive::get_shared_base_images`].
    pub const GET_SHARED_BASE_IMAGES: &str = "get_shared_base_images";
}

/// Sub-directory of a layer folder holding its content.
pub const CONTENT_DIR: &str = "Files";

#[derive(Debug, Clone, Copy, Default)]
struct Activation {
    activated: bool,
    prepared: bool,
}

#[derive(Debug, Default)]
struct State {
    activations: HashMap<String, Activation>,
    calls: HashMap<&'static str, usize>,
    failures: HashSet<&'static str>,
    base_images: Option<String>,
}

/// Layering primitive storing layers as folders under a home directory.
#[derive(Debug)]
pub struct FolderPrimitive {
    home: PathBuf,
    flavour: Flavour,
    state: Mutex<State>,
}

impl FolderPrimitive {
    /// Creates a primitive storing layers under `home`.
    #[must_use]
    pub fn new(home: impl Into<PathBuf>, flavour: Flavour) -> Self {
        Self {
            home: home.into(),
            flavour,
            state: Mutex::new(State::default()),
        }
    }

    /// Sets the JSON document returned by `get_shared_base_images`.
    #[must_use]
    pub fn with_base_images(mut self, json: impl Into<String>) -> Self {
        if let Ok(state) = self.state.get_mut() {
            state.base_images = Some(json.into());
        }
        self
    }

    /// Returns the content folder of layer `id`.
    #[must_use]
    pub fn content_dir(&self, id: &str) -> PathBuf {
        layer_dir(&self.home, id).join(CONTENT_DIR)
    }

    /// Makes every later call to `operation` fail.
    ///
    /// # Errors
    ///
    /// Returns an error if the state lock is poisoned.
    pub fn fail_on(&self, operation: &'static str) -> Result<()> {
        let _ = self.lock()?.failures.insert(operation);
        Ok(())
    }

    /// Lets `operation` succeed again after [`FolderPrimitive::fail_on`].
    ///
    /// # Errors
    ///
    /// Returns an error if the state lock is poisoned.
    pub fn succeed_on(&self, operation: &'static str) -> Result<()> {
        let _ = self.lock()?.failures.remove(operation);
        Ok(())
    }

    /// Returns how many times `operation` has been called.
    ///
    /// # Errors
    ///
    /// Returns an error if the state lock is poisoned.
    pub fn calls(&self, operation: &'static str) -> Result<usize> {
        Ok(self.lock()?.calls.get(operation).copied().unwrap_or(0))
    }

    /// Returns whether layer `id` is activated and whether it is prepared.
    ///
    /// # Errors
    ///
    /// Returns an error if the state lock is poisoned.
    pub fn activation(&self, id: &str) -> Result<(bool, bool)> {
        let state = self.lock()?;
        let current = state.activations.get(id).copied().unwrap_or_default();
        Ok((current.activated, current.prepared))
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state.lock().map_err(|_| StrataError::Config {
            message: "folder primitive lock poisoned".into(),
        })
    }

    /// Counts the call and applies failure injection.
    fn enter(&self, operation: &'static str, id: &str) -> Result<MutexGuard<'_, State>> {
        let mut state = self.lock()?;
        *state.calls.entry(operation).or_insert(0) += 1;
        if state.failures.contains(operation) {
            return Err(StrataError::primitive(operation, id, "injected failure"));
        }
        tracing::trace!(operation, id, "folder primitive call");
        Ok(state)
    }

    fn require_layer(&self, operation: &'static str, id: &str) -> Result<()> {
        if self.content_dir(id).is_dir() {
            Ok(())
        } else {
            Err(StrataError::primitive(operation, id, "layer does not exist"))
        }
    }

    fn register(&self, operation: &'static str, id: &str) -> Result<()> {
        let content = self.content_dir(id);
        if content.is_dir() {
            return Err(StrataError::primitive(operation, id, "layer already exists"));
        }
        std::fs::create_dir_all(&content).map_err(|e| StrataError::io(&content, e))
    }
}

impl LayerPrimitive for FolderPrimitive {
    fn layer_exists(&self, id: &str) -> Result<bool> {
        let _state = self.enter(ops::LAYER_EXISTS, id)?;
        Ok(self.content_dir(id).is_dir())
    }

    fn create_layer(&self, id: &str, parent: &str) -> Result<()> {
        let _state = self.enter(ops::CREATE_LAYER, id)?;
        tracing::debug!(id, parent, "creating folder layer");
        self.register(ops::CREATE_LAYER, id)
    }

    fn create_sandbox_layer(&self, id: &str, base: &str, chain: &[String]) -> Result<()> {
        let _state = self.enter(ops::CREATE_SANDBOX_LAYER, id)?;
        tracing::debug!(id, base, depth = chain.len(), "creating folder sandbox");
        self.register(ops::CREATE_SANDBOX_LAYER, id)
    }

    fn destroy_layer(&self, id: &str) -> Result<()> {
        let mut state = self.enter(ops::DESTROY_LAYER, id)?;
        let _ = state.activations.remove(id);
        let dir = layer_dir(&self.home, id);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StrataError::io(dir, e)),
        }
    }

    fn activate_layer(&self, id: &str) -> Result<()> {
        let mut state = self.enter(ops::ACTIVATE_LAYER, id)?;
        self.require_layer(ops::ACTIVATE_LAYER, id)?;
        let current = state.activations.entry(id.to_string()).or_default();
        if current.activated {
            return Err(StrataError::primitive(ops::ACTIVATE_LAYER, id, "layer is already active"));
        }
        current.activated = true;
        Ok(())
    }

    fn deactivate_layer(&self, id: &str) -> Result<()> {
        let mut state = self.enter(ops::DEACTIVATE_LAYER, id)?;
        let current = state.activations.entry(id.to_string()).or_default();
        if !current.activated || current.prepared {
            return Err(StrataError::primitive(
                ops::DEACTIVATE_LAYER,
                id,
                "layer is not active or still prepared",
            ));
        }
        current.activated = false;
        Ok(())
    }

    fn prepare_layer(&self, id: &str, chain: &[String]) -> Result<()> {
        let mut state = self.enter(ops::PREPARE_LAYER, id)?;
        let current = state.activations.entry(id.to_string()).or_default();
        if !current.activated || current.prepared {
            return Err(StrataError::primitive(
                ops::PREPARE_LAYER,
                id,
                "layer is not active or already prepared",
            ));
        }
        tracing::trace!(id, depth = chain.len(), "preparing folder layer");
        current.prepared = true;
        Ok(())
    }

    fn unprepare_layer(&self, id: &str) -> Result<()> {
        let mut state = self.enter(ops::UNPREPARE_LAYER, id)?;
        let current = state.activations.entry(id.to_string()).or_default();
        if !current.prepared {
            return Err(StrataError::primitive(ops::UNPREPARE_LAYER, id, "layer is not prepared"));
        }
        current.prepared = false;
        Ok(())
    }

    fn get_layer_mount_path(&self, id: &str) -> Result<String> {
        let _state = self.enter(ops::GET_LAYER_MOUNT_PATH, id)?;
        let content = self.content_dir(id);
        if content.is_dir() {
            Ok(content.to_string_lossy().into_owned())
        } else {
            Ok(String::new())
        }
    }

    fn export_layer(&self, id: &str, dest: &Path, chain: &[String]) -> Result<()> {
        let state = self.enter(ops::EXPORT_LAYER, id)?;
        self.require_layer(ops::EXPORT_LAYER, id)?;
        if self.flavour == Flavour::Filter {
            let current = state.activations.get(id).copied().unwrap_or_default();
            if !current.activated || current.prepared {
                return Err(StrataError::primitive(
                    ops::EXPORT_LAYER,
                    id,
                    "export requires an activated, unprepared layer",
                ));
            }
        }
        drop(state);

        tracing::debug!(id, dest = %dest.display(), depth = chain.len(), "exporting folder layer");
        let _ = copy_tree(&self.content_dir(id), dest)?;
        Ok(())
    }

    fn import_layer(&self, id: &str, src: &Path, chain: &[String]) -> Result<u64> {
        let state = self.enter(ops::IMPORT_LAYER, id)?;
        drop(state);

        tracing::debug!(id, src = %src.display(), depth = chain.len(), "importing folder layer");
        let content = self.content_dir(id);
        std::fs::create_dir_all(&content).map_err(|e| StrataError::io(&content, e))?;
        copy_tree(src, &content)
    }

    fn get_shared_base_images(&self) -> Result<String> {
        let state = self.enter(ops::GET_SHARED_BASE_IMAGES, "")?;
        Ok(state
            .base_images
            .clone()
            .unwrap_or_else(|| r#"{"Images":[]}"#.to_string()))
    }
}

/// Recursively copies the contents of `src` into `dest`, returning the
/// number of regular-file bytes copied.
fn copy_tree(src: &Path, dest: &Path) -> Result<u64> {
    std::fs::create_dir_all(dest).map_err(|e| StrataError::io(dest, e))?;
    let mut copied = 0;
    for entry in std::fs::read_dir(src).map_err(|e| StrataError::io(src, e))? {
        let entry = entry.map_err(|e| StrataError::io(src, e))?;
        let from = entry.path();
        let to = dest.join(entry.file_name());
        let file_type = entry.file_type().map_err(|e| StrataError::io(&from, e))?;

        if file_type.is_dir() {
            copied += copy_tree(&from, &to)?;
        } else if file_type.is_symlink() {
            copy_symlink(&from, &to)?;
        } else {
            copied += std::fs::copy(&from, &to).map_err(|e| StrataError::io(&from, e))?;
        }
    }
    Ok(copied)
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> Result<()> {
    let target = std::fs::read_link(from).map_err(|e| StrataError::io(from, e))?;
    std::os::unix::fs::symlink(target, to).map_err(|e| StrataError::io(to, e))
}

#[cfg(not(unix))]
fn copy_symlink(from: &Path, _to: &Path) -> Result<()> {
    tracing::warn!(path = %from.display(), "skipping symlink on this platform");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn primitive(flavour: Flavour) -> (tempfile::TempDir, FolderPrimitive) {
        let dir = tempfile::tempdir().expect("tempdir");
        let primitive = FolderPrimitive::new(dir.path(), flavour);
        (dir, primitive)
    }

    #[test]
    fn create_registers_layer_once() {
        let (_dir, primitive) = primitive(Flavour::Filter);
        primitive.create_layer("base", "").expect("create");
        assert!(primitive.layer_exists("base").expect("exists"));
        assert!(primitive.create_layer("base", "").is_err());
    }

    #[test]
    fn destroy_unregisters_and_tolerates_unknown_layers() {
        let (_dir, primitive) = primitive(Flavour::Filter);
        primitive.create_layer("base", "").expect("create");
        primitive.destroy_layer("base").expect("destroy");
        assert!(!primitive.layer_exists("base").expect("exists"));
        primitive.destroy_layer("never-existed").expect("destroy unknown");
    }

    #[test]
    fn activation_state_machine_is_strict() {
        let (_dir, primitive) = primitive(Flavour::Filter);
        primitive.create_layer("base", "").expect("create");

        assert!(primitive.prepare_layer("base", &[]).is_err());
        primitive.activate_layer("base").expect("activate");
        assert!(primitive.activate_layer("base").is_err());
        primitive.prepare_layer("base", &[]).expect("prepare");
        assert!(primitive.deactivate_layer("base").is_err());
        primitive.unprepare_layer("base").expect("unprepare");
        primitive.deactivate_layer("base").expect("deactivate");
        assert_eq!(primitive.activation("base").expect("state"), (false, false));
    }

    #[test]
    fn filter_export_requires_unprepared_active_layer() {
        let (dir, primitive) = primitive(Flavour::Filter);
        primitive.create_layer("base", "").expect("create");
        std::fs::write(primitive.content_dir("base").join("f"), b"data").expect("write");
        let dest = dir.path().join("out");

        assert!(primitive.export_layer("base", &dest, &[]).is_err());
        primitive.activate_layer("base").expect("activate");
        primitive.export_layer("base", &dest, &[]).expect("export");
        assert_eq!(std::fs::read(dest.join("f")).expect("read"), b"data");
    }

    #[test]
    fn diff_flavour_exports_without_activation() {
        let (dir, primitive) = primitive(Flavour::Diff);
        primitive.create_layer("base", "").expect("create");
        primitive
            .export_layer("base", &dir.path().join("out"), &[])
            .expect("export");
    }

    #[test]
    fn import_copies_content_and_counts_bytes() {
        let (dir, primitive) = primitive(Flavour::Filter);
        let staged = dir.path().join("staged");
        std::fs::create_dir_all(staged.join("nested")).expect("mkdir");
        std::fs::write(staged.join("nested/a"), b"1234").expect("write");

        let bytes = primitive.import_layer("imported", &staged, &[]).expect("import");
        assert_eq!(bytes, 4);
        assert!(primitive.layer_exists("imported").expect("exists"));
        assert!(primitive.content_dir("imported").join("nested/a").exists());
    }

    #[test]
    fn mount_path_is_empty_for_unknown_layers() {
        let (_dir, primitive) = primitive(Flavour::Filter);
        assert_eq!(primitive.get_layer_mount_path("ghost").expect("path"), "");
        primitive.create_layer("base", "").expect("create");
        assert!(primitive
            .get_layer_mount_path("base")
            .expect("path")
            .ends_with(CONTENT_DIR));
    }

    #[test]
    fn injected_failures_are_counted_and_cleared() {
        let (_dir, primitive) = primitive(Flavour::Filter);
        primitive.fail_on(ops::CREATE_LAYER).expect("inject");
        assert!(primitive.create_layer("base", "").is_err());
        primitive.succeed_on(ops::CREATE_LAYER).expect("clear");
        primitive.create_layer("base", "").expect("create");
        assert_eq!(primitive.calls(ops::CREATE_LAYER).expect("calls"), 2);
    }

    #[test]
    fn base_images_default_to_empty_list() {
        let (_dir, primitive) = primitive(Flavour::Filter);
        assert_eq!(
            primitive.get_shared_base_images().expect("images"),
            r#"{"Images":[]}"#
        );
    }
}
