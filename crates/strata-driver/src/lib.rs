//! # strata-driver
//!
//! Layered-filesystem driver for a host with a native copy-on-write
//! filter. The platform layering primitive is consumed through the
//! [`LayerPrimitive`] trait; this crate supplies the bookkeeping on top:
//!
//! - **Identity**: logical layer IDs resolve to the primitive's real IDs
//!   through per-layer alias files.
//! - **Chains**: each layer persists the ordered mount paths of its ancestors.
//! - **Activation**: mounts are reference-counted so the primitive is
//!   activated and prepared once per layer, however many callers overlap.
//! - **Diffs**: layer content is exported and imported as tar streams
//!   through scratch folders that are always cleaned up.
//! - **Base images**: host-provided base images are reconciled into an
//!   image/tag registry at startup.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod activation;
pub mod chain;
pub mod cleanup;
pub mod driver;
pub mod export;
pub mod layout;
pub mod primitive;
pub mod registry;
pub mod resolver;
pub mod restore;

pub use driver::Driver;
pub use export::ExportStream;
pub use primitive::LayerPrimitive;
pub use primitive::folder::FolderPrimitive;
pub use registry::{ImageCatalog, ImageRecord, ImageRegistry};
pub use resolver::{FileIdResolver, IdResolver, MemoryIdResolver};
