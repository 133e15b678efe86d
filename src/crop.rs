//! Crop-field completeness rules.
//!
//! Camera Raw only honours a crop when the whole rectangle is present. A
//! sidecar carrying `CropTop` alone renders as if uncropped in some tools and
//! crashes the import in others, so any crop trigger makes the full set
//! mandatory:
//!
//! ```text
//! trigger:   HasCrop == "True"  or  any of CropTop/Right/Left/Bottom/Angle
//! required:  CropTop CropRight CropLeft CropBottom CropAngle
//!            tiff:ImageWidth tiff:ImageLength tiff:Orientation
//! ```
//!
//! Boundary fields have a safe default (the full frame, unrotated). Image
//! dimensions and orientation do not; they are reported, never invented.
//!
//! Also home to [`CropProposal`], the rectangle produced by the border
//! detector for assets that get an automated crop.

use crate::document::{XmpDocument, XmpValue};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Key of the derived crop flag.
pub const HAS_CROP_KEY: &str = "Xmp.crs.HasCrop";

/// One required field of a complete crop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CropField {
    Top,
    Right,
    Left,
    Bottom,
    Angle,
    ImageWidth,
    ImageLength,
    Orientation,
}

impl CropField {
    /// The five rectangle fields; presence of any one triggers the invariant.
    pub const BOUNDARY: [CropField; 5] = [
        CropField::Top,
        CropField::Right,
        CropField::Left,
        CropField::Bottom,
        CropField::Angle,
    ];

    /// Every field a triggered document must carry.
    pub const REQUIRED: [CropField; 8] = [
        CropField::Top,
        CropField::Right,
        CropField::Left,
        CropField::Bottom,
        CropField::Angle,
        CropField::ImageWidth,
        CropField::ImageLength,
        CropField::Orientation,
    ];

    /// Full document key.
    pub fn key(self) -> &'static str {
        match self {
            CropField::Top => "Xmp.crs.CropTop",
            CropField::Right => "Xmp.crs.CropRight",
            CropField::Left => "Xmp.crs.CropLeft",
            CropField::Bottom => "Xmp.crs.CropBottom",
            CropField::Angle => "Xmp.crs.CropAngle",
            CropField::ImageWidth => "Xmp.tiff.ImageWidth",
            CropField::ImageLength => "Xmp.tiff.ImageLength",
            CropField::Orientation => "Xmp.tiff.Orientation",
        }
    }

    /// Field name without namespace.
    pub fn name(self) -> &'static str {
        match self.key().rsplit_once('.') {
            Some((_, name)) => name,
            None => self.key(),
        }
    }

    /// Full-frame default, for boundary fields only.
    pub fn default_value(self) -> Option<f64> {
        match self {
            CropField::Top | CropField::Left | CropField::Angle => Some(0.0),
            CropField::Right | CropField::Bottom => Some(1.0),
            CropField::ImageWidth | CropField::ImageLength | CropField::Orientation => None,
        }
    }

    pub fn is_boundary(self) -> bool {
        self.default_value().is_some()
    }
}

impl std::fmt::Display for CropField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// True when the document asks for a crop.
pub fn crop_triggered(doc: &XmpDocument) -> bool {
    doc.get_text(HAS_CROP_KEY) == Some("True")
        || CropField::BOUNDARY
            .iter()
            .any(|field| doc.contains_key(field.key()))
}

/// Required fields absent from a triggered document. Empty when untriggered.
pub fn missing_crop_fields(doc: &XmpDocument) -> BTreeSet<CropField> {
    if !crop_triggered(doc) {
        return BTreeSet::new();
    }
    CropField::REQUIRED
        .into_iter()
        .filter(|field| !doc.contains_key(field.key()))
        .collect()
}

/// Default values for the boundary fields in `missing`. Dimension and
/// orientation fields are never filled.
pub fn crop_defaults(missing: &BTreeSet<CropField>) -> XmpDocument {
    let mut doc = XmpDocument::new();
    for field in missing {
        if let Some(value) = field.default_value() {
            doc.insert(field.key(), XmpValue::decimal(value));
        }
    }
    doc
}

/// Outcome of one validate-and-repair pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CropRepair {
    /// Boundary fields that received a default.
    pub filled: Vec<CropField>,
    /// Fields still missing after the repair.
    pub unresolved: BTreeSet<CropField>,
}

impl CropRepair {
    pub fn is_clean(&self) -> bool {
        self.filled.is_empty() && self.unresolved.is_empty()
    }
}

/// Validate `doc` and fill missing boundary fields in place.
pub fn repair_crop(doc: &mut XmpDocument) -> CropRepair {
    let missing = missing_crop_fields(doc);
    let defaults = crop_defaults(&missing);
    let filled: Vec<CropField> = missing.iter().copied().filter(|f| f.is_boundary()).collect();
    doc.overlay(&defaults);
    let unresolved = missing.into_iter().filter(|f| !f.is_boundary()).collect();
    CropRepair { filled, unresolved }
}

#[derive(Error, Debug)]
pub enum CropError {
    #[error("{path}: {field} = {value} is outside [0, 1]")]
    OutOfRange {
        path: PathBuf,
        field: CropField,
        value: f64,
    },
    #[error("{path}: {low} ({low_value}) must be less than {high} ({high_value})")]
    Inverted {
        path: PathBuf,
        low: CropField,
        low_value: f64,
        high: CropField,
        high_value: f64,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid proposal file: {0}")]
    Json(#[from] serde_json::Error),
}

/// A crop rectangle proposed by the border detector, in unit-square
/// fractions of the oriented image.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CropProposal {
    pub path: PathBuf,
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    #[serde(default)]
    pub angle: f64,
    pub width: u32,
    pub length: u32,
    #[serde(default = "default_orientation")]
    pub orientation: u16,
}

fn default_orientation() -> u16 {
    1
}

impl CropProposal {
    /// Reject out-of-range or inverted rectangles.
    pub fn validate(&self) -> Result<(), CropError> {
        let boundaries = [
            (CropField::Left, self.left),
            (CropField::Top, self.top),
            (CropField::Right, self.right),
            (CropField::Bottom, self.bottom),
        ];
        for (field, value) in boundaries {
            if !(0.0..=1.0).contains(&value) {
                return Err(CropError::OutOfRange {
                    path: self.path.clone(),
                    field,
                    value,
                });
            }
        }
        let pairs = [
            (CropField::Left, self.left, CropField::Right, self.right),
            (CropField::Top, self.top, CropField::Bottom, self.bottom),
        ];
        for (low, low_value, high, high_value) in pairs {
            if low_value >= high_value {
                return Err(CropError::Inverted {
                    path: self.path.clone(),
                    low,
                    low_value,
                    high,
                    high_value,
                });
            }
        }
        Ok(())
    }

    /// The update document for this proposal.
    ///
    /// DNG files also get a tiny exposure nudge: Lightroom keeps the embedded
    /// preview of an unchanged DNG and would not show the crop otherwise.
    pub fn to_document(&self) -> XmpDocument {
        let mut doc = XmpDocument::new();
        doc.insert(HAS_CROP_KEY, XmpValue::text("True"));
        doc.insert(CropField::Left.key(), XmpValue::number(self.left));
        doc.insert(CropField::Top.key(), XmpValue::number(self.top));
        doc.insert(CropField::Right.key(), XmpValue::number(self.right));
        doc.insert(CropField::Bottom.key(), XmpValue::number(self.bottom));
        doc.insert(CropField::Angle.key(), XmpValue::number(self.angle));
        doc.insert(
            CropField::ImageWidth.key(),
            XmpValue::text(self.width.to_string()),
        );
        doc.insert(
            CropField::ImageLength.key(),
            XmpValue::text(self.length.to_string()),
        );
        doc.insert(
            CropField::Orientation.key(),
            XmpValue::text(self.orientation.to_string()),
        );
        if is_dng(&self.path) {
            doc.insert("Xmp.crs.Exposure2012", XmpValue::text("-0.01"));
        }
        doc
    }
}

fn is_dng(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("dng"))
}

/// Load a JSON array of proposals.
pub fn load_proposals(path: &Path) -> Result<Vec<CropProposal>, CropError> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}
