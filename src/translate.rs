//! Translate decoded develop settings into camera-raw (`crs`) XMP fields.
//!
//! Only whitelisted parameter names cross over. The catalog carries plenty of
//! internal bookkeeping (`AutoWhiteVersion`, `UprightVersion`, ...) that
//! Camera Raw either ignores or chokes on, so the whitelist is the contract:
//! a name on the list is known to round-trip through an `.xmp` sidecar.
//!
//! Three derived rules apply after the whitelist pass:
//!
//! - **HasCrop**: any crop boundary present → `crs:HasCrop="True"`. XMP
//!   booleans are the literal strings `True`/`False`.
//! - **Curves**: catalog curves are flat `{x0, y0, x1, y1, ...}` sequences;
//!   XMP wants one `"x, y"` item per point. An odd-length curve cannot be
//!   paired and fails the asset.
//! - **ProcessVersion**: always written, from the settings when present,
//!   otherwise from the caller's fallback (the catalog row's version column).
//!
//! [`derive_has_crop`] and [`normalize_curves`] are idempotent and are
//! re-run by the [merge engine](crate::merge) on the combined document.

use crate::crop::{CropField, HAS_CROP_KEY};
use crate::develop::{DevelopSettings, LuaValue};
use crate::document::{self, ListKind, XmpDocument, XmpValue};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Namespace prefix of camera-raw settings.
pub const CRS_PREFIX: &str = "crs";

/// Name of the process-version parameter.
pub const PROCESS_VERSION: &str = "ProcessVersion";

/// Curve-valued parameters stored as flat point sequences in the catalog.
pub const CURVE_FIELDS: [&str; 5] = [
    "ToneCurvePV2012",
    "ToneCurvePV2012Red",
    "ToneCurvePV2012Green",
    "ToneCurvePV2012Blue",
    "ToneCurve",
];

/// Default separator between the two coordinates of a curve point.
pub const DEFAULT_CURVE_SEPARATOR: &str = ", ";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TranslateError {
    #[error("curve {key} has odd length {len}; points must come in (x, y) pairs")]
    InvalidCurveLength { key: String, len: usize },
}

/// Ordered list of develop-setting names allowed into the sidecar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagWhitelist {
    names: Vec<String>,
}

impl TagWhitelist {
    /// Build from names, dropping blanks and duplicates (first occurrence wins).
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out: Vec<String> = Vec::new();
        for name in names {
            let name: String = name.into().trim().to_string();
            if !name.is_empty() && !out.contains(&name) {
                out.push(name);
            }
        }
        Self { names: out }
    }

    /// Parse a tags file: one name per line, `#` starts a comment line.
    pub fn parse(content: &str) -> Self {
        Self::new(
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.starts_with('#')),
        )
    }

    /// Load a tags file from disk.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    /// The built-in list: parameters known to survive a sidecar round trip.
    pub fn builtin() -> Self {
        Self::new(BUILTIN_TAGS.iter().copied())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for TagWhitelist {
    fn default() -> Self {
        Self::builtin()
    }
}

const BUILTIN_TAGS: &[&str] = &[
    "WhiteBalance",
    "Temperature",
    "Tint",
    "Exposure",
    "Exposure2012",
    "Shadows",
    "Brightness",
    "Contrast",
    "Contrast2012",
    "Highlights2012",
    "Shadows2012",
    "Whites2012",
    "Blacks2012",
    "Clarity2012",
    "Vibrance",
    "Saturation",
    "Sharpness",
    "SharpenRadius",
    "SharpenDetail",
    "SharpenEdgeMasking",
    "LuminanceSmoothing",
    "LuminanceNoiseReductionContrast",
    "ColorNoiseReduction",
    "GrainSize",
    "DefringePurpleAmount",
    "DefringePurpleHueLo",
    "DefringePurpleHueHi",
    "DefringeGreenAmount",
    "DefringeGreenHueLo",
    "DefringeGreenHueHi",
    "AutoLateralCA",
    "LensProfileEnable",
    "LensProfileSetup",
    "LensManualDistortionAmount",
    "PerspectiveVertical",
    "PerspectiveHorizontal",
    "PerspectiveRotate",
    "PerspectiveScale",
    "PerspectiveX",
    "PerspectiveY",
    "UprightCenterMode",
    "UprightCenterNormX",
    "UprightCenterNormY",
    "UprightFocalMode",
    "UprightFocalLength35mm",
    "UprightPreview",
    "UprightTransformCount",
    "ConvertToGrayscale",
    "AutoGrayscaleMix",
    "CameraProfile",
    "CameraProfileDigest",
    "ToneCurveName",
    "ToneCurveName2012",
    "ToneCurve",
    "ToneCurvePV2012",
    "ToneCurvePV2012Red",
    "ToneCurvePV2012Green",
    "ToneCurvePV2012Blue",
    "CropTop",
    "CropLeft",
    "CropBottom",
    "CropRight",
    "CropAngle",
    "CropConstrainAspectRatio",
    "HasCrop",
];

/// Translate decoded settings into a `crs` document.
///
/// Output order: `ProcessVersion` first, then whitelisted names in whitelist
/// order, then `HasCrop` if derived.
pub fn translate(
    settings: &DevelopSettings,
    whitelist: &TagWhitelist,
    fallback_version: &str,
    curve_separator: &str,
) -> Result<XmpDocument, TranslateError> {
    let mut doc = XmpDocument::new();

    let version = settings
        .get(PROCESS_VERSION)
        .and_then(scalar_text)
        .unwrap_or_else(|| fallback_version.to_string());
    doc.insert(crs_key(PROCESS_VERSION), XmpValue::Text(version));

    for name in whitelist.names() {
        if name == PROCESS_VERSION {
            continue;
        }
        let Some(value) = settings.get(name) else {
            continue;
        };
        match to_xmp_value(value) {
            Some(v) => {
                doc.insert(crs_key(name), v);
            }
            None => debug!(field = name, "skipping develop setting with no flat XMP form"),
        }
    }

    derive_has_crop(&mut doc);
    normalize_curves(&mut doc, curve_separator)?;
    Ok(doc)
}

/// `Xmp.crs.<name>`
pub fn crs_key(name: &str) -> String {
    document::key(CRS_PREFIX, name)
}

/// Set `HasCrop = "True"` if any crop boundary is present. Returns whether
/// the flag was set.
pub fn derive_has_crop(doc: &mut XmpDocument) -> bool {
    let triggered = CropField::BOUNDARY
        .iter()
        .any(|field| doc.contains_key(field.key()));
    if triggered {
        doc.insert(HAS_CROP_KEY, XmpValue::text("True"));
    }
    triggered
}

/// Pair up flat curve sequences into `"x<sep>y"` items.
///
/// Lists whose items already contain a comma are taken as paired and left
/// alone, so repeated normalization is a no-op.
pub fn normalize_curves(doc: &mut XmpDocument, separator: &str) -> Result<(), TranslateError> {
    for name in CURVE_FIELDS {
        let key = crs_key(name);
        let Some(XmpValue::List(kind, items)) = doc.get(&key) else {
            continue;
        };
        if items.iter().all(|i| i.contains(',')) {
            continue;
        }
        if items.len() % 2 != 0 {
            return Err(TranslateError::InvalidCurveLength {
                key,
                len: items.len(),
            });
        }
        let kind: ListKind = *kind;
        let pairs: Vec<String> = items
            .chunks_exact(2)
            .map(|pair| format!("{}{}{}", pair[0].trim(), separator, pair[1].trim()))
            .collect();
        doc.insert(key, XmpValue::List(kind, pairs));
    }
    Ok(())
}

fn scalar_text(value: &LuaValue) -> Option<String> {
    match value {
        LuaValue::Bool(true) => Some("True".to_string()),
        LuaValue::Bool(false) => Some("False".to_string()),
        LuaValue::Number(n) => Some(n.clone()),
        LuaValue::Str(s) => Some(s.clone()),
        LuaValue::Table(_) => None,
    }
}

/// Convert a Lua value to its flat XMP form. Keyed or empty tables have none.
fn to_xmp_value(value: &LuaValue) -> Option<XmpValue> {
    match value {
        LuaValue::Table(table) => {
            if table.is_empty() || !table.is_sequence() {
                return None;
            }
            let items: Option<Vec<String>> = table.values().map(scalar_text).collect();
            items.map(|items| XmpValue::List(ListKind::Seq, items))
        }
        scalar => scalar_text(scalar).map(XmpValue::Text),
    }
}
