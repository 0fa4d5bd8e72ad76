//! # strata-archive
//!
//! Archive codec for layer content moving in and out of the driver.
//!
//! Handles:
//! - **Packing**: Uncompressed tar streams produced from a directory.
//! - **Extraction**: `Layer` (compression auto-detected) and
//!   `UncompressedLayer` semantics, both honouring whiteout entries.
//! - **Changes**: Change records and their on-disk size.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod changes;
pub mod extract;
pub mod pack;

pub use changes::{Change, ChangeKind, changes_size};
pub use extract::{ExtractMode, apply_layer, apply_uncompressed_layer};
pub use pack::tar_directory;
