//! Platform layering primitive abstraction.
//!
//! The primitive owns the actual layer storage: it creates and destroys
//! layers, activates them, composes them with their ancestors, and moves
//! their content in and out of plain folders. The driver only ever talks to
//! it through [`LayerPrimitive`].

pub mod folder;

use std::path::Path;

use strata_common::error::Result;

/// Operations offered by the platform layering primitive.
///
/// Layer IDs passed here are always real IDs. Chains are ancestor mount
/// paths, immediate parent first.
pub trait LayerPrimitive: Send + Sync {
    /// Returns whether a layer with this ID is registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the primitive cannot be queried.
    fn layer_exists(&self, id: &str) -> Result<bool>;

    /// Creates a read-only layer on top of `parent` (empty for a base layer).
    ///
    /// # Errors
    ///
    /// Returns an error if the layer cannot be created.
    fn create_layer(&self, id: &str, parent: &str) -> Result<()>;

    /// Creates a writable sandbox layer seeded from `base` and composed with
    /// `chain`.
    ///
    /// # Errors
    ///
    /// Returns an error if the sandbox cannot be created.
    fn create_sandbox_layer(&self, id: &str, base: &str, chain: &[String]) -> Result<()>;

    /// Destroys a layer and its storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the layer cannot be destroyed.
    fn destroy_layer(&self, id: &str) -> Result<()>;

    /// Makes a layer's content available for mounting.
    ///
    /// # Errors
    ///
    /// Returns an error if the layer cannot be activated.
    fn activate_layer(&self, id: &str) -> Result<()>;

    /// Reverses [`LayerPrimitive::activate_layer`].
    ///
    /// # Errors
    ///
    /// Returns an error if the layer cannot be deactivated.
    fn deactivate_layer(&self, id: &str) -> Result<()>;

    /// Composes an activated layer with its ancestor chain.
    ///
    /// # Errors
    ///
    /// Returns an error if the layer cannot be prepared.
    fn prepare_layer(&self, id: &str, chain: &[String]) -> Result<()>;

    /// Reverses [`LayerPrimitive::prepare_layer`].
    ///
    /// # Errors
    ///
    /// Returns an error if the layer cannot be unprepared.
    fn unprepare_layer(&self, id: &str) -> Result<()>;

    /// Returns the path the layer is reachable at; may be empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the primitive cannot be queried.
    fn get_layer_mount_path(&self, id: &str) -> Result<String>;

    /// Writes the layer's content into `dest`.
    ///
    /// # Errors
    ///
    /// Returns an error if the export fails.
    fn export_layer(&self, id: &str, dest: &Path, chain: &[String]) -> Result<()>;

    /// Imports the content staged in `src` as layer `id`, returning the
    /// number of bytes imported.
    ///
    /// # Errors
    ///
    /// Returns an error if the import fails.
    fn import_layer(&self, id: &str, src: &Path, chain: &[String]) -> Result<u64>;

    /// Returns the JSON description of the host's shared base images.
    ///
    /// # Errors
    ///
    /// Returns an error if the primitive cannot be queried.
    fn get_shared_base_images(&self) -> Result<String>;
}
