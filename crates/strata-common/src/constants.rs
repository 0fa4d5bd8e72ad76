//! System-wide constants and default paths.

/// Default home directory for the layer driver.
pub const DEFAULT_HOME: &str = "/var/lib/strata/layers";

/// Name of the per-layer file holding the primitive's real layer ID.
pub const LAYER_ID_FILE: &str = "layerId";

/// Name of the per-layer file holding the JSON-encoded ancestor chain.
pub const LAYER_CHAIN_FILE: &str = "layerchain.json";

/// Suffix marking the writable init layer that sandboxes are built on.
pub const INIT_LAYER_SUFFIX: &str = "-init";

/// Number of digest bytes kept when deriving a base-image ID.
pub const BASE_IMAGE_ID_BYTES: usize = 32;

/// Driver name reported by the filter flavour.
pub const FILTER_DRIVER_NAME: &str = "windowsfilter";

/// Driver name reported by the differencing-disk flavour.
pub const DIFF_DRIVER_NAME: &str = "windowsdiff";

/// Default directory of the image catalog used by base-image restoration.
pub const DEFAULT_CATALOG_DIR: &str = "/var/lib/strata/images";
