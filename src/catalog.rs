//! Catalog rows and asset path resolution.
//!
//! The catalog is consumed as a JSON export, one object per image:
//!
//! ```json
//! { "id_local": 4711, "base_name": "IMG_0001", "extension": "CR2",
//!   "path_from_root": "2019/2019-05-01/",
//!   "develop_settings": "s = { CropTop = 0.1 }",
//!   "process_version": "6.7", "xmp": "<x:xmpmeta …" }
//! ```
//!
//! The asset lives at `root / path_from_root / base_name.extension`. Its two
//! sidecar conventions sit next to it:
//!
//! ```text
//! 2019/2019-05-01/IMG_0001.CR2
//! 2019/2019-05-01/IMG_0001.xmp       primary (Lightroom)
//! 2019/2019-05-01/IMG_0001.CR2.xmp   secondary (darktable)
//! ```
//!
//! Rows are checked one at a time when they are reconciled, so a bad row
//! fails only its own asset.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("IO error reading catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid catalog export: {0}")]
    Json(#[from] serde_json::Error),
    #[error("catalog row {id}: {reason}")]
    InvalidRow { id: u64, reason: String },
}

/// One catalog image row.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CatalogRecord {
    pub id_local: u64,
    pub base_name: String,
    pub extension: String,
    pub path_from_root: String,
    /// `s = { ... }` develop payload; empty when the image was never developed.
    #[serde(default)]
    pub develop_settings: String,
    #[serde(default)]
    pub process_version: Option<String>,
    /// Raw XMP stored in the catalog.
    #[serde(default)]
    pub xmp: String,
}

impl CatalogRecord {
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.base_name, self.extension)
    }

    /// Absolute asset path under `root`.
    pub fn asset_path(&self, root: &Path) -> PathBuf {
        root.join(self.path_from_root.trim_start_matches('/'))
            .join(self.file_name())
    }

    /// Reject rows whose paths would be empty or resolve outside the root.
    pub fn validate(&self) -> Result<(), CatalogError> {
        let invalid = |reason: &str| CatalogError::InvalidRow {
            id: self.id_local,
            reason: reason.to_string(),
        };
        if self.base_name.is_empty() {
            return Err(invalid("empty base_name"));
        }
        if !is_plain_name(&self.base_name) {
            return Err(invalid("base_name is not a plain file name"));
        }
        if self.extension.is_empty() {
            return Err(invalid("empty extension"));
        }
        if !is_plain_name(&self.extension) {
            return Err(invalid("extension is not a plain file name"));
        }
        if self.path_from_root.split(['/', '\\']).any(|c| c == "..") {
            return Err(invalid("path_from_root leaves the root"));
        }
        Ok(())
    }
}

fn is_plain_name(name: &str) -> bool {
    !name.contains(['/', '\\']) && name != "." && name != ".."
}

/// Load a catalog export. Individual rows are not validated here.
pub fn load_catalog(path: &Path) -> Result<Vec<CatalogRecord>, CatalogError> {
    let content = std::fs::read_to_string(path)?;
    parse_catalog(&content)
}

pub fn parse_catalog(content: &str) -> Result<Vec<CatalogRecord>, CatalogError> {
    Ok(serde_json::from_str(content)?)
}

/// Sidecar locations for an asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarPaths {
    /// `<stem>.xmp`
    pub primary: PathBuf,
    /// `<name>.<ext>.xmp`
    pub secondary: PathBuf,
}

impl SidecarPaths {
    pub fn for_asset(asset: &Path) -> Self {
        let mut secondary = asset.as_os_str().to_owned();
        secondary.push(".xmp");
        Self {
            primary: asset.with_extension("xmp"),
            secondary: PathBuf::from(secondary),
        }
    }
}
