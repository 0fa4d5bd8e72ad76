//! Image and tag registry.
//!
//! The base-image restorer records what it finds through [`ImageRegistry`].
//! [`ImageCatalog`] is the bundled implementation, an index of image records
//! and `name:version` tags kept in a single JSON file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strata_common::error::{Result, StrataError};

/// Metadata recorded for a registered image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Content-derived image identifier.
    pub id: String,
    /// Creation time reported by the host.
    pub created: DateTime<Utc>,
    /// Version of the driver that registered the image.
    pub driver_version: String,
    /// CPU architecture of the host.
    pub architecture: String,
    /// Operating system of the host.
    pub os: String,
    /// Size in bytes reported by the host.
    pub size: u64,
}

/// Registry the driver records images and tags in.
pub trait ImageRegistry: Send + Sync {
    /// Returns whether an image with this ID is already registered.
    fn exists(&self, id: &str) -> bool;

    /// Registers an image.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be recorded.
    fn register(&self, image: &ImageRecord) -> Result<()>;

    /// Points `name:version` at image `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the image is unknown, or if the tag already points
    /// at another image and `overwrite` is false.
    fn tag(&self, name: &str, version: &str, id: &str, overwrite: bool) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    images: Vec<ImageRecord>,
    #[serde(default)]
    tags: BTreeMap<String, String>,
}

/// Image catalog backed by a JSON file.
#[derive(Debug)]
pub struct ImageCatalog {
    catalog_path: PathBuf,
}

impl ImageCatalog {
    /// Opens or creates an image catalog in the given directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog directory cannot be created.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| StrataError::io(data_dir, e))?;
        Ok(Self {
            catalog_path: data_dir.join("catalog.json"),
        })
    }

    /// Lists all images in the catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog file cannot be read or parsed.
    pub fn list(&self) -> Result<Vec<ImageRecord>> {
        Ok(self.read()?.images)
    }

    /// Returns the image ID a tag points at, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog file cannot be read or parsed.
    pub fn lookup(&self, name: &str, version: &str) -> Result<Option<String>> {
        Ok(self.read()?.tags.remove(&tag_key(name, version)))
    }

    /// Removes an image and every tag pointing at it.
    ///
    /// # Errors
    ///
    /// Returns `StrataError::NotFound` if no image with the given ID exists.
    pub fn remove(&self, id: &str) -> Result<()> {
        let mut catalog = self.read()?;
        let before = catalog.images.len();
        catalog.images.retain(|image| image.id != id);
        if catalog.images.len() == before {
            return Err(StrataError::NotFound {
                kind: "image",
                id: id.to_string(),
            });
        }
        catalog.tags.retain(|_, target| target != id);
        self.write(&catalog)
    }

    fn read(&self) -> Result<CatalogFile> {
        if !self.catalog_path.exists() {
            return Ok(CatalogFile::default());
        }
        let content = std::fs::read_to_string(&self.catalog_path)
            .map_err(|e| StrataError::io(&self.catalog_path, e))?;
        serde_json::from_str(&content).map_err(|e| StrataError::Decode {
            path: self.catalog_path.clone(),
            source: e,
        })
    }

    fn write(&self, catalog: &CatalogFile) -> Result<()> {
        let json =
            serde_json::to_string_pretty(catalog).map_err(|e| StrataError::Encode { source: e })?;
        std::fs::write(&self.catalog_path, json)
            .map_err(|e| StrataError::io(&self.catalog_path, e))
    }
}

impl ImageRegistry for ImageCatalog {
    fn exists(&self, id: &str) -> bool {
        self.read()
            .is_ok_and(|catalog| catalog.images.iter().any(|image| image.id == id))
    }

    fn register(&self, image: &ImageRecord) -> Result<()> {
        let mut catalog = self.read()?;
        if catalog.images.iter().any(|existing| existing.id == image.id) {
            return Err(StrataError::Registry {
                message: format!("image {} is already registered", image.id),
            });
        }
        catalog.images.push(image.clone());
        tracing::debug!(id = %image.id, "registered image");
        self.write(&catalog)
    }

    fn tag(&self, name: &str, version: &str, id: &str, overwrite: bool) -> Result<()> {
        let mut catalog = self.read()?;
        if !catalog.images.iter().any(|image| image.id == id) {
            return Err(StrataError::NotFound {
                kind: "image",
                id: id.to_string(),
            });
        }

        let key = tag_key(name, version);
        if let Some(current) = catalog.tags.get(&key) {
            if current != id && !overwrite {
                return Err(StrataError::Registry {
                    message: format!("tag {key} already points at {current}"),
                });
            }
        }
        let _ = catalog.tags.insert(key, id.to_string());
        tracing::debug!(name, version, id, "tagged image");
        self.write(&catalog)
    }
}

fn tag_key(name: &str, version: &str) -> String {
    format!("{name}:{version}")
}
