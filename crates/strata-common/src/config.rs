//! Configuration model for the layer driver.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_HOME, DIFF_DRIVER_NAME, FILTER_DRIVER_NAME};
use crate::error::{Result, StrataError};

/// Storage flavour a driver instance is fixed to at construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Flavour {
    /// Copy-on-write filter mode: layers are activated, prepared, and
    /// exported through the primitive.
    #[default]
    #[serde(rename = "windowsfilter")]
    Filter,
    /// Differencing-disk mode: diffs are extracted directly beside the
    /// layer directory.
    #[serde(rename = "windowsdiff")]
    Diff,
}

impl Flavour {
    /// Returns the registered driver name for this flavour.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Filter => FILTER_DRIVER_NAME,
            Self::Diff => DIFF_DRIVER_NAME,
        }
    }
}

impl fmt::Display for Flavour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Flavour {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            FILTER_DRIVER_NAME | "filter" => Ok(Self::Filter),
            DIFF_DRIVER_NAME | "diff" => Ok(Self::Diff),
            other => Err(StrataError::Config {
                message: format!("unknown driver flavour: {other}"),
            }),
        }
    }
}

/// Root configuration for a layer driver instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Directory holding one sub-directory per layer.
    pub home: PathBuf,
    /// Storage flavour.
    pub flavour: Flavour,
    /// Whether `remove` also deletes the layer's alias and chain files.
    pub purge_metadata_on_remove: bool,
}

impl DriverConfig {
    /// Creates a configuration for the given home and flavour.
    #[must_use]
    pub fn new(home: impl Into<PathBuf>, flavour: Flavour) -> Self {
        Self {
            home: home.into(),
            flavour,
            purge_metadata_on_remove: false,
        }
    }

    /// Loads a configuration from a JSON file.
    ///
    /// Missing fields fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| StrataError::io(path, e))?;
        serde_json::from_str(&content).map_err(|e| StrataError::Decode {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HOME, Flavour::Filter)
    }
}
