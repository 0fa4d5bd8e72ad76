//! Base-image reconciliation.
//!
//! The host ships shared base images outside the driver's home. At startup
//! they are registered with the image registry under a content-derived ID,
//! tagged, and aliased so the driver resolves the ID to the host folder.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha384};
use strata_common::constants::BASE_IMAGE_ID_BYTES;
use strata_common::error::{Result, StrataError};

use crate::driver::Driver;
use crate::registry::{ImageRecord, ImageRegistry};

/// One host-provided base image.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BaseImage {
    /// Image name, tagged in lowercase.
    pub name: String,
    /// Image version, used as the tag.
    pub version: String,
    /// Host folder holding the image.
    pub path: String,
    /// Size in bytes.
    #[serde(default)]
    pub size: u64,
    /// Creation time reported by the host.
    #[serde(default)]
    pub created_time: DateTime<Utc>,
}

impl BaseImage {
    /// Returns the last component of the image folder path.
    #[must_use]
    pub fn folder_name(&self) -> &str {
        self.path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(self.path.as_str())
    }
}

/// The host's base-image listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BaseImageList {
    /// Images in host order.
    #[serde(default)]
    pub images: Vec<BaseImage>,
}

impl BaseImageList {
    /// Parses the JSON listing returned by the layering primitive.
    ///
    /// # Errors
    ///
    /// Returns `StrataError::BaseImages` if the document is malformed.
    pub fn parse(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            tracing::error!(error = %e, "failed to decode base image listing");
            StrataError::BaseImages { source: e }
        })
    }
}

/// Derives the image ID of a base image from its folder name.
#[must_use]
pub fn base_image_id(folder_name: &str) -> String {
    let digest = Sha384::digest(folder_name.as_bytes());
    hex::encode(&digest[..BASE_IMAGE_ID_BYTES])
}

impl Driver {
    /// Registers the host's base images that `registry` does not know yet.
    ///
    /// Each new image is recorded, tagged `lowercase(name):version`
    /// (replacing any previous target), and aliased to its host folder.
    /// Returns the IDs registered by this call. The first failure aborts.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing cannot be fetched or decoded, or if
    /// registering, tagging, or aliasing an image fails.
    pub fn restore_base_images(&self, registry: &dyn ImageRegistry) -> Result<Vec<String>> {
        let listing = self.primitive().get_shared_base_images()?;
        let images = BaseImageList::parse(&listing)?.images;

        let mut restored = Vec::new();
        for image in &images {
            let folder = image.folder_name();
            let id = base_image_id(folder);
            if registry.exists(&id) {
                tracing::trace!(id = %id, folder, "base image already registered");
                continue;
            }

            registry.register(&ImageRecord {
                id: id.clone(),
                created: image.created_time,
                driver_version: env!("CARGO_PKG_VERSION").to_string(),
                architecture: std::env::consts::ARCH.to_string(),
                os: std::env::consts::OS.to_string(),
                size: image.size,
            })?;
            registry.tag(&image.name.to_lowercase(), &image.version, &id, true)?;
            self.resolver().set_alias(&id, folder)?;

            tracing::info!(id = %id, name = %image.name, version = %image.version, "restored base image");
            restored.push(id);
        }
        Ok(restored)
    }
}
