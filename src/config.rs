//! Run configuration.
//!
//! Handles loading, validating, and merging `config.toml`. Stock defaults are
//! the base layer; the user file overrides any subset of keys.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! root_path = "."                  # Catalog root; asset paths resolve under it
//! # catalog = "catalog.json"       # JSON export of the catalog image rows
//! # tags_file = "tags.txt"         # Develop-setting whitelist (built-in list if absent)
//! default_process_version = "6.7"  # Used when a row carries no process version
//! # scratch_root = "/dev/shm"      # Per-asset scratch dirs (auto: /dev/shm, else temp)
//! debug = false                    # Debug-level logging
//! dry_run = false                  # Run everything against scratch copies only
//!
//! [sources]
//! strict = false                   # Missing mandatory source fails the asset
//! mandatory = ["original"]         # Slots whose absence is worth a warning
//!
//! [curves]
//! separator = ", "                 # Between x and y of a paired curve point
//!
//! [processing]
//! max_workers = 4                  # Max parallel workers (omit for auto = CPU cores)
//!
//! [extractor]
//! backend = "native"               # "native" or "exiftool"
//! exiftool_path = "exiftool"
//!
//! [check]
//! mirror = false                   # Base sidecars are expected to be mirrored
//! min_history_end = 5              # Minimum darktable history length
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::merge::SourceSlot;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Configuration loaded from `config.toml`.
///
/// All fields have defaults; a user file needs only the values it overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconcileConfig {
    /// Root under which catalog-relative paths resolve.
    pub root_path: PathBuf,
    /// JSON export of the catalog rows.
    pub catalog: Option<PathBuf>,
    /// Whitelist file; the built-in list is used when absent.
    pub tags_file: Option<PathBuf>,
    /// Process version written when neither the settings nor the row carry one.
    pub default_process_version: String,
    /// Parent of the per-asset scratch directories.
    pub scratch_root: Option<PathBuf>,
    pub debug: bool,
    pub dry_run: bool,
    pub sources: SourcesConfig,
    pub curves: CurvesConfig,
    pub processing: ProcessingConfig,
    pub extractor: ExtractorConfig,
    pub check: CheckConfig,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            root_path: PathBuf::from("."),
            catalog: None,
            tags_file: None,
            default_process_version: "6.7".to_string(),
            scratch_root: None,
            debug: false,
            dry_run: false,
            sources: SourcesConfig::default(),
            curves: CurvesConfig::default(),
            processing: ProcessingConfig::default(),
            extractor: ExtractorConfig::default(),
            check: CheckConfig::default(),
        }
    }
}

impl ReconcileConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_process_version.trim().is_empty() {
            return Err(ConfigError::Validation(
                "default_process_version must not be empty".into(),
            ));
        }
        if self.curves.separator.is_empty() || self.curves.separator.contains('\n') {
            return Err(ConfigError::Validation(
                "curves.separator must be a non-empty single-line string".into(),
            ));
        }
        if self.processing.max_workers == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_workers must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Directory that holds per-asset scratch space: the configured root,
    /// else `/dev/shm` when present, else the system temp dir.
    pub fn effective_scratch_root(&self) -> PathBuf {
        if let Some(root) = &self.scratch_root {
            return root.clone();
        }
        let shm = Path::new("/dev/shm");
        if shm.is_dir() {
            shm.to_path_buf()
        } else {
            std::env::temp_dir()
        }
    }
}

/// Source slot handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourcesConfig {
    /// A missing mandatory slot fails the asset instead of only warning.
    pub strict: bool,
    /// Slots expected to exist for every asset.
    pub mandatory: Vec<SourceSlot>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            strict: false,
            mandatory: vec![SourceSlot::Original],
        }
    }
}

/// Curve serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CurvesConfig {
    pub separator: String,
}

impl Default for CurvesConfig {
    fn default() -> Self {
        Self {
            separator: crate::translate::DEFAULT_CURVE_SEPARATOR.to_string(),
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel asset workers.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_workers: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_workers.map(|n| n.min(cores)).unwrap_or(cores)
}

/// Which raw extractor to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorBackend {
    #[default]
    Native,
    Exiftool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExtractorConfig {
    pub backend: ExtractorBackend,
    pub exiftool_path: PathBuf,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            backend: ExtractorBackend::Native,
            exiftool_path: PathBuf::from("exiftool"),
        }
    }
}

/// Sidecar audit thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckConfig {
    /// Base sidecars should carry a mirrored orientation.
    pub mirror: bool,
    /// Minimum `darktable:history_end` for the darktable sidecar.
    pub min_history_end: u32,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            mirror: false,
            min_history_end: 5,
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(ReconcileConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<ReconcileConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: ReconcileConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `path`, merged on top of stock defaults.
pub fn load_config(path: &Path) -> Result<ReconcileConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(path)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `config.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# xmp-reconcile configuration
# ===========================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys cause an error.

# Root directory of the photo library. Catalog rows resolve their
# path_from_root under it; `check` and `update-dates` walk it.
root_path = "."

# JSON export of the catalog image rows (id_local, base_name, extension,
# path_from_root, develop_settings, process_version, xmp).
# catalog = "catalog.json"

# Develop-setting whitelist, one name per line, `#` for comments.
# Omit to use the built-in list.
# tags_file = "tags.txt"

# Process version written when neither the develop settings nor the catalog
# row carry one.
default_process_version = "6.7"

# Parent directory for per-asset scratch space.
# Omit to use /dev/shm when available, else the system temp directory.
# scratch_root = "/dev/shm"

# Debug-level logging (RUST_LOG overrides this).
debug = false

# Run every step against scratch copies; never touch real sidecars.
dry_run = false

# ---------------------------------------------------------------------------
# Source slots: original, database, primary_sidecar, secondary_sidecar
# ---------------------------------------------------------------------------
[sources]
# When true, a missing mandatory slot fails the asset.
# When false, it is only logged as a warning.
strict = false
mandatory = ["original"]

# ---------------------------------------------------------------------------
# Tone curves
# ---------------------------------------------------------------------------
[curves]
# Separator between the x and y value of each curve point ("0, 0").
separator = ", "

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel asset workers.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_workers = 4

# ---------------------------------------------------------------------------
# Metadata extraction
# ---------------------------------------------------------------------------
[extractor]
# "native" reads XMP in-process (sidecars, JPEG APP1, embedded packets).
# "exiftool" keeps one exiftool process open for the whole batch.
backend = "native"
exiftool_path = "exiftool"

# ---------------------------------------------------------------------------
# Sidecar check
# ---------------------------------------------------------------------------
[check]
# Expect mirrored orientation in base sidecars. A `no_mirror` keyword in
# dc:subject overrides this per image.
mirror = false

# Minimum darktable history length in the <name>.<ext>.xmp sidecar.
min_history_end = 5
"##
}
