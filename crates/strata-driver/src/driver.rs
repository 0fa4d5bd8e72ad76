//! The layer driver.
//!
//! [`Driver`] ties together identity resolution, chain persistence, and
//! mount reference counting on top of a [`LayerPrimitive`]. Every operation
//! that addresses the primitive first resolves the caller's logical ID to
//! the primitive's real ID. Chain loads and other file I/O happen before any
//! lock is taken; the activation tracker serialises state transitions per
//! layer.

use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use strata_archive::Change;
use strata_common::config::{DriverConfig, Flavour};
use strata_common::constants::INIT_LAYER_SUFFIX;
use strata_common::error::{Result, StrataError};

use crate::activation::ActivationTracker;
use crate::chain::ChainStore;
use crate::cleanup::CleanupList;
use crate::export::{ExportStream, ScratchDir};
use crate::layout::layer_dir;
use crate::primitive::LayerPrimitive;
use crate::resolver::{FileIdResolver, IdResolver};

/// Layered-filesystem driver over a platform layering primitive.
pub struct Driver {
    config: DriverConfig,
    primitive: Arc<dyn LayerPrimitive>,
    resolver: Box<dyn IdResolver>,
    chains: ChainStore,
    active: ActivationTracker,
}

impl Driver {
    /// Creates a driver for the configured home and flavour.
    ///
    /// Aliases are read from `layerId` files under the home directory.
    #[must_use]
    pub fn new(config: DriverConfig, primitive: Arc<dyn LayerPrimitive>) -> Self {
        tracing::debug!(
            home = %config.home.display(),
            flavour = %config.flavour,
            "initialising layer driver"
        );
        Self {
            resolver: Box::new(FileIdResolver::new(&config.home)),
            chains: ChainStore::new(&config.home),
            active: ActivationTracker::new(),
            config,
            primitive,
        }
    }

    /// Replaces the identity resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: impl IdResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    /// Returns the registered driver name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.config.flavour.name()
    }

    /// Returns the driver configuration.
    #[must_use]
    pub const fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Returns the directory of layer `id`.
    #[must_use]
    pub fn dir(&self, id: &str) -> PathBuf {
        layer_dir(&self.config.home, id)
    }

    /// Returns the real ID the primitive knows layer `id` by.
    ///
    /// # Errors
    ///
    /// Returns an error if an alias exists but cannot be read.
    pub fn resolve(&self, id: &str) -> Result<String> {
        self.resolver.resolve(id)
    }

    /// Returns the persisted ancestor chain of layer `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the alias or chain file cannot be read or decoded.
    pub fn layer_chain(&self, id: &str) -> Result<Vec<String>> {
        let real = self.resolver.resolve(id)?;
        self.chains.load(&real)
    }

    /// Returns the number of callers currently holding layer `id` mounted.
    ///
    /// # Errors
    ///
    /// Returns an error if the alias cannot be read or a lock is poisoned.
    pub fn mount_count(&self, id: &str) -> Result<usize> {
        let real = self.resolver.resolve(id)?;
        self.active.count(&real)
    }

    /// Returns human-readable status pairs.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount table lock is poisoned.
    pub fn status(&self) -> Result<Vec<(String, String)>> {
        Ok(vec![
            ("Flavour".to_string(), self.name().to_string()),
            ("Home".to_string(), self.config.home.display().to_string()),
            (
                "Active layers".to_string(),
                self.active.snapshot()?.len().to_string(),
            ),
        ])
    }

    /// Returns driver metadata for layer `id`.
    #[must_use]
    pub fn metadata(&self, id: &str) -> HashMap<String, String> {
        HashMap::from([("dir".to_string(), self.dir(id).display().to_string())])
    }

    /// Returns whether layer `id` is registered with the primitive.
    ///
    /// Resolution or primitive failures are reported as absence.
    pub fn exists(&self, id: &str) -> bool {
        self.resolver
            .resolve(id)
            .and_then(|real| self.primitive.layer_exists(&real))
            .unwrap_or_else(|e| {
                tracing::debug!(id, error = %e, "layer existence check failed");
                false
            })
    }

    /// Creates layer `id` on top of `parent` (empty for a base layer).
    ///
    /// When `parent` is an init layer the new layer is a writable sandbox
    /// seeded from the first chain entry; otherwise it is a read-only layer.
    /// If the parent directory is gone or the chain cannot be saved, the new
    /// layer is destroyed again before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns `StrataError::ReadWriteWithoutParent` for a sandbox with an
    /// empty chain, `StrataError::MissingParent` if the parent directory is
    /// missing, or any resolution, chain, or primitive error.
    pub fn create(&self, id: &str, parent: &str) -> Result<()> {
        tracing::debug!(id, parent, "creating layer");

        let parent_real = self.resolver.resolve(parent)?;
        let parent_chain = self.chains.load(&parent_real)?;
        let chain = self.compose_chain(&parent_real, parent_chain)?;

        if parent_real.ends_with(INIT_LAYER_SUFFIX) {
            let Some(base) = chain.first() else {
                return Err(StrataError::ReadWriteWithoutParent);
            };
            self.primitive.create_sandbox_layer(id, base, &chain)?;
        } else {
            self.primitive.create_layer(id, &parent_real)?;
        }

        let mut cleanup = CleanupList::new();
        cleanup.push("destroy partially created layer", || {
            self.primitive.destroy_layer(id)
        });

        let parent_dir = self.dir(parent);
        if let Err(e) = std::fs::symlink_metadata(&parent_dir) {
            return Err(StrataError::MissingParent {
                parent: parent.to_string(),
                source: e,
            });
        }
        self.chains.save(id, &chain)?;

        cleanup.dismiss();
        tracing::info!(id, parent, depth = chain.len(), "layer created");
        Ok(())
    }

    /// Destroys layer `id` in the primitive.
    ///
    /// The layer's alias and chain files are only deleted when
    /// `purge_metadata_on_remove` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if resolution, destruction, or purging fails.
    pub fn remove(&self, id: &str) -> Result<()> {
        let real = self.resolver.resolve(id)?;
        self.primitive.destroy_layer(&real)?;
        if self.config.purge_metadata_on_remove {
            self.chains.remove(id)?;
            self.resolver.clear_alias(id)?;
        }
        tracing::info!(id, real = %real, "layer removed");
        Ok(())
    }

    /// Mounts layer `id` and returns where its content is reachable.
    ///
    /// The first caller activates and prepares the layer; later callers only
    /// take another reference. The returned path is the primitive's mount
    /// path, or the layer directory if the primitive reports none.
    ///
    /// # Errors
    ///
    /// Returns an error if resolution, chain loading, or any primitive call
    /// fails. A failed first mount leaves the layer deactivated.
    pub fn get(&self, id: &str, mount_label: &str) -> Result<PathBuf> {
        tracing::debug!(id, mount_label, "get layer");

        let real = self.resolver.resolve(id)?;
        let chain = self.chains.load(&real)?;

        let mount_path = self.active.with_count(&real, |count| {
            let mut rollback = CleanupList::new();
            if *count == 0 {
                self.primitive.activate_layer(&real)?;
                rollback.push("deactivate", || self.primitive.deactivate_layer(&real));
                self.primitive.prepare_layer(&real, &chain)?;
                rollback.push("unprepare", || self.primitive.unprepare_layer(&real));
            }
            let mount_path = self.primitive.get_layer_mount_path(&real)?;
            rollback.dismiss();
            *count += 1;
            Ok(mount_path)
        })?;

        if mount_path.is_empty() {
            Ok(self.dir(id))
        } else {
            Ok(PathBuf::from(mount_path))
        }
    }

    /// Releases one mount reference on layer `id`.
    ///
    /// The last reference unprepares and deactivates the layer. Releasing a
    /// layer that is not mounted does nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if resolution fails or the final unprepare or
    /// deactivate fails; the reference is then kept.
    pub fn put(&self, id: &str) -> Result<()> {
        tracing::debug!(id, "put layer");

        let real = self.resolver.resolve(id)?;
        self.active.with_count(&real, |count| {
            match *count {
                0 => {}
                1 => {
                    self.primitive.unprepare_layer(&real)?;
                    self.primitive.deactivate_layer(&real)?;
                    *count = 0;
                }
                _ => *count -= 1,
            }
            Ok(())
        })
    }

    /// Exports the content of layer `id` as an uncompressed tar stream.
    ///
    /// In filter flavour the layer must be activated but not prepared while
    /// it is exported: an unmounted layer is activated for the export and
    /// deactivated afterwards, a mounted one is unprepared and re-prepared.
    /// The state is restored as soon as the content has been staged, before
    /// the stream is returned. The layer's slot is held until then, so a
    /// `get` or `put` of the same layer blocks until staging finishes.
    ///
    /// The export takes no mount reference. A failure to restore the state
    /// is logged and does not fail the export, since the staged content is
    /// already complete.
    ///
    /// # Errors
    ///
    /// Returns an error if resolution, chain loading, the state transition,
    /// staging, or packing fails. Staged content is cleaned up on failure.
    pub fn diff(&self, id: &str, parent: &str) -> Result<ExportStream> {
        tracing::debug!(id, parent, "exporting layer diff");

        let real = self.resolver.resolve(id)?;
        let chain = self.chains.load(&real)?;

        self.active.with_count(&real, |count| {
            let mut restore = CleanupList::new();
            if self.config.flavour == Flavour::Filter {
                if *count == 0 {
                    self.primitive.activate_layer(&real)?;
                    restore.push("deactivate after export", || {
                        self.primitive.deactivate_layer(&real)
                    });
                } else {
                    self.primitive.unprepare_layer(&real)?;
                    restore.push("re-prepare after export", || {
                        self.primitive.prepare_layer(&real, &chain)
                    });
                }
            }

            let exported = self.export_layer(&real, &chain)?;
            let failures = restore.run();
            if !failures.is_empty() {
                tracing::warn!(
                    id = %real,
                    failures = failures.len(),
                    "layer state not restored after export"
                );
            }
            Ok(exported)
        })
    }

    /// Lists the paths changed by layer `id` relative to `parent`.
    ///
    /// This driver cannot compute change lists independently of a full
    /// export, so the call always fails.
    ///
    /// # Errors
    ///
    /// Always returns `StrataError::Unsupported`.
    pub fn changes(&self, id: &str, parent: &str) -> Result<Vec<Change>> {
        tracing::debug!(id, parent, "changes requested");
        Err(StrataError::Unsupported {
            operation: "changes",
        })
    }

    /// Applies a layer archive as the content of layer `id`, returning the
    /// number of bytes extracted.
    ///
    /// In diff flavour the archive is extracted beside the layer directory
    /// and no chain is recorded. In filter flavour it is staged in a scratch
    /// folder, imported into the primitive on top of `parent`, and the new
    /// layer's chain is saved.
    ///
    /// # Errors
    ///
    /// Returns an error if resolution, extraction, import, or saving the
    /// chain fails.
    pub fn apply_diff<R: Read>(&self, id: &str, parent: &str, diff: R) -> Result<u64> {
        let parent_real = self.resolver.resolve(parent)?;

        if self.config.flavour == Flavour::Diff {
            let layer_dir = self.dir(id);
            let destination = layer_dir.parent().unwrap_or(self.config.home.as_path());
            let start = Instant::now();
            tracing::debug!(id, dest = %destination.display(), "start untar layer");
            let size = strata_archive::apply_uncompressed_layer(destination, diff)?;
            tracing::debug!(
                id,
                seconds = start.elapsed().as_secs_f64(),
                bytes = size,
                "untar finished"
            );
            return Ok(size);
        }

        let parent_chain = self.chains.load(&parent_real)?;
        let chain = self.compose_chain(&parent_real, parent_chain)?;

        let size = self.import_layer(id, diff, &chain)?;
        self.chains.save(id, &chain)?;

        tracing::info!(id, parent, bytes = size, "layer diff applied");
        Ok(size)
    }

    /// Returns the size of the changes layer `id` makes over `parent`.
    ///
    /// Depends on [`Driver::changes`], so it currently always fails.
    ///
    /// # Errors
    ///
    /// Returns an error if the change list cannot be computed or the layer
    /// cannot be mounted.
    pub fn diff_size(&self, id: &str, parent: &str) -> Result<u64> {
        let parent_real = self.resolver.resolve(parent)?;
        let changes = self.changes(id, &parent_real)?;

        let layer_fs = self.get(id, "")?;
        let size = strata_archive::changes_size(&layer_fs, &changes);
        if let Err(e) = self.put(id) {
            tracing::warn!(id, error = %e, "failed to release layer after sizing");
        }
        Ok(size)
    }

    /// Shuts the driver down.
    ///
    /// Layers still mounted are logged and left to the primitive.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount table lock is poisoned.
    pub fn cleanup(&self) -> Result<()> {
        for (id, count) in self.active.snapshot()? {
            tracing::warn!(id = %id, count, "layer still mounted at shutdown");
        }
        Ok(())
    }

    pub(crate) fn resolver(&self) -> &dyn IdResolver {
        self.resolver.as_ref()
    }

    pub(crate) fn primitive(&self) -> &dyn LayerPrimitive {
        self.primitive.as_ref()
    }

    /// Builds a child's chain: the parent's mount path, then its chain.
    fn compose_chain(&self, parent_real: &str, parent_chain: Vec<String>) -> Result<Vec<String>> {
        let mut chain = Vec::with_capacity(parent_chain.len() + 1);
        if !parent_real.is_empty() {
            let parent_path = self.primitive.get_layer_mount_path(parent_real)?;
            if !parent_path.is_empty() {
                chain.push(parent_path);
            }
        }
        chain.extend(parent_chain);
        Ok(chain)
    }

    fn export_layer(&self, real: &str, chain: &[String]) -> Result<ExportStream> {
        let scratch = ScratchDir::create(&self.dir(real))?;
        let mut cleanup = CleanupList::new();
        cleanup.push("remove export scratch folder", || {
            scratch.destroy(self.primitive.as_ref())
        });

        self.primitive.export_layer(real, scratch.path(), chain)?;
        let archive = strata_archive::tar_directory(scratch.path())?;

        cleanup.dismiss();
        Ok(ExportStream::new(
            real,
            archive,
            scratch,
            Arc::clone(&self.primitive),
        ))
    }

    fn import_layer<R: Read>(&self, id: &str, diff: R, chain: &[String]) -> Result<u64> {
        let scratch = ScratchDir::create(&self.dir(id))?;
        let mut cleanup = CleanupList::new();
        cleanup.push("remove import scratch folder", || {
            scratch.destroy(self.primitive.as_ref())
        });

        let start = Instant::now();
        tracing::debug!(id, "start untar layer");
        let size = strata_archive::apply_layer(scratch.path(), diff)?;
        tracing::debug!(id, seconds = start.elapsed().as_secs_f64(), "untar finished");

        let imported = self.primitive.import_layer(id, scratch.path(), chain)?;
        tracing::debug!(id, bytes = imported, "primitive import finished");

        let _ = cleanup.run();
        Ok(size)
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("config", &self.config)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}
