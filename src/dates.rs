//! Folder-date correction.
//!
//! Libraries filed as `…/YYYY/MM/DD/…` (month and day optional) are treated
//! as authoritative for the calendar date; the capture time of day is kept.
//! For every sidecar under the root:
//!
//! ```text
//! path component /YYYY[/MM[/DD]]   → date     (none: file skipped)
//! exif:DateTimeOriginal            → time
//!   else sibling image's embedded XMP
//!   else sibling image's mtime
//! every date field found + the four always-set fields ← YYYY-MM-DDTHH:MM:SS
//! ```
//!
//! A field whose name mentions a date but is not in [`DATE_FIELDS`] or
//! [`SKIPPED_DATE_FIELDS`] fails the file; nothing is written to it.

use crate::check;
use crate::document::{XmpDocument, XmpPatch, XmpValue};
use crate::xmp::{ExtractError, MetadataStore, RawExtractor, XmpError, packet};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Date fields rewritten when present.
pub const DATE_FIELDS: [&str; 6] = [
    "Xmp.tiff.DateTime",
    "Xmp.exif.DateTimeOriginal",
    "Xmp.xmp.MetadataDate",
    "Xmp.xmp.CreateDate",
    "Xmp.xmp.ModifyDate",
    "Xmp.photoshop.DateCreated",
];

/// Date-named fields left alone.
pub const SKIPPED_DATE_FIELDS: [&str; 1] = ["Xmp.digiKam.CaptionsDateTimeStamps"];

/// Written whether or not the sidecar had them.
const ALWAYS_SET: [&str; 4] = [
    "Xmp.exif.DateTimeOriginal",
    "Xmp.xmp.MetadataDate",
    "Xmp.xmp.CreateDate",
    "Xmp.xmp.ModifyDate",
];

const CAPTURE_TIME_KEY: &str = "Xmp.exif.DateTimeOriginal";
const OUTPUT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// `/YYYY`, optionally followed by `/MM` and `/MM/DD`, each ending a path
/// component.
static FOLDER_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/(\d{4})(?:/(\d{2})(?:/(\d{2}))?)?(?:/|$)").unwrap()
});

#[derive(Error, Debug)]
pub enum DateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Xmp(#[from] XmpError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("{path}: unexpected date field(s): {}", fields.join(", "))]
    UnexpectedFields { path: PathBuf, fields: Vec<String> },
    #[error("{path}: folder date {year}-{month:02}-{day:02} is not a calendar date")]
    InvalidFolderDate {
        path: PathBuf,
        year: i32,
        month: u32,
        day: u32,
    },
    #[error("{path}: cannot parse capture time {value:?}")]
    UnparseableTime { path: PathBuf, value: String },
    #[error("{path}: no image found next to the sidecar to take a capture time from")]
    NoSiblingImage { path: PathBuf },
}

/// What was (or in dry-run, would be) written to one sidecar.
#[derive(Debug, Clone, PartialEq)]
pub struct DateUpdate {
    pub sidecar: PathBuf,
    /// Capture time value the sidecar carried, if any.
    pub before: Option<String>,
    pub after: String,
    pub fields: Vec<String>,
}

#[derive(Debug)]
pub struct DateOutcome {
    pub sidecar: PathBuf,
    /// `Ok(None)`: the path carries no folder date.
    pub result: Result<Option<DateUpdate>, DateError>,
}

#[derive(Debug, Default)]
pub struct DateReport {
    pub outcomes: Vec<DateOutcome>,
    pub dry_run: bool,
}

impl DateReport {
    pub fn updates(&self) -> impl Iterator<Item = &DateUpdate> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().and_then(Option::as_ref))
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.result, Ok(None)))
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&Path, &DateError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.sidecar.as_path(), e)))
    }
}

/// `(year, month, day)` from the first `/YYYY[/MM[/DD]]` in the path.
/// Month and day default to 1.
pub fn date_from_path(path: &Path) -> Option<(i32, u32, u32)> {
    let text = path.to_string_lossy().replace('\\', "/");
    let caps = FOLDER_DATE_RE.captures(&text)?;
    let number = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
    let year = caps.get(1)?.as_str().parse().ok()?;
    Some((year, number(2).unwrap_or(1), number(3).unwrap_or(1)))
}

/// Parse an XMP or EXIF timestamp, keeping its wall-clock time.
///
/// Accepts `2019-05-01T10:20:30`, with optional fraction and offset,
/// `2019-05-01T10:20`, and the EXIF form `2019:05:01 10:20:30`.
pub fn parse_capture_time(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_local());
    }
    if let Ok(dt) = DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M%:z") {
        return Some(dt.naive_local());
    }
    for format in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y:%m:%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN))
}

/// Date-named keys, rejecting any outside the known lists.
fn date_fields(doc: &XmpDocument, sidecar: &Path) -> Result<Vec<String>, DateError> {
    let found: Vec<String> = doc
        .keys()
        .filter(|k| k.to_lowercase().contains("date"))
        .map(str::to_string)
        .collect();
    let unexpected: Vec<String> = found
        .iter()
        .filter(|k| !DATE_FIELDS.contains(&k.as_str()) && !SKIPPED_DATE_FIELDS.contains(&k.as_str()))
        .cloned()
        .collect();
    if !unexpected.is_empty() {
        return Err(DateError::UnexpectedFields {
            path: sidecar.to_path_buf(),
            fields: unexpected,
        });
    }
    Ok(found
        .into_iter()
        .filter(|k| DATE_FIELDS.contains(&k.as_str()))
        .collect())
}

/// Image files sharing the sidecar's leading name segment, sorted.
fn sibling_images(sidecar: &Path) -> Vec<PathBuf> {
    let Some(dir) = sidecar.parent() else {
        return Vec::new();
    };
    let name = sidecar
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let prefix = format!("{}.", name.split('.').next().unwrap_or_default());
    let mut images: Vec<PathBuf> = std::fs::read_dir(dir)
        .into_iter()
        .flatten()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && check::is_supported_image(p)
                && p.file_name()
                    .is_some_and(|n| n.to_string_lossy().starts_with(&prefix))
        })
        .collect();
    images.sort();
    images
}

fn capture_time(
    extractor: &impl RawExtractor,
    doc: &XmpDocument,
    sidecar: &Path,
) -> Result<NaiveDateTime, DateError> {
    if let Some(value) = doc.get_text(CAPTURE_TIME_KEY) {
        return parse_capture_time(value).ok_or_else(|| DateError::UnparseableTime {
            path: sidecar.to_path_buf(),
            value: value.to_string(),
        });
    }

    let images = sibling_images(sidecar);
    let Some(image) = images.first() else {
        return Err(DateError::NoSiblingImage {
            path: sidecar.to_path_buf(),
        });
    };
    if images.len() > 1 {
        warn!(sidecar = %sidecar.display(), count = images.len(), "multiple images match sidecar, using the first");
    }

    if let Some(raw) = extractor.extract_raw(image)? {
        let raw = raw.trim_matches('\0');
        if !raw.trim().is_empty() {
            let embedded = packet::parse(raw).map_err(|source| ExtractError::Unparseable {
                path: image.clone(),
                source,
            })?;
            if let Some(time) = embedded.get_text(CAPTURE_TIME_KEY).and_then(parse_capture_time) {
                return Ok(time);
            }
        }
    }

    debug!(image = %image.display(), "no embedded capture time, using modification time");
    let modified = std::fs::metadata(image)?.modified()?;
    Ok(DateTime::<Local>::from(modified).naive_local())
}

/// Rewrite the date fields of one sidecar from its folder date.
pub fn update_sidecar_date(
    extractor: &impl RawExtractor,
    store: &impl MetadataStore,
    sidecar: &Path,
    dry_run: bool,
) -> Result<Option<DateUpdate>, DateError> {
    let Some((year, month, day)) = date_from_path(sidecar) else {
        debug!(sidecar = %sidecar.display(), "no folder date, skipping");
        return Ok(None);
    };
    let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
        DateError::InvalidFolderDate {
            path: sidecar.to_path_buf(),
            year,
            month,
            day,
        }
    })?;

    let doc = store.read(sidecar)?;
    let mut fields = date_fields(&doc, sidecar)?;
    let time = capture_time(extractor, &doc, sidecar)?.time();
    let after = date.and_time(time).format(OUTPUT_FORMAT).to_string();

    for key in ALWAYS_SET {
        if !fields.iter().any(|f| f == key) {
            fields.push(key.to_string());
        }
    }
    let update = DateUpdate {
        sidecar: sidecar.to_path_buf(),
        before: doc.get_text(CAPTURE_TIME_KEY).map(str::to_string),
        after,
        fields,
    };
    info!(
        sidecar = %sidecar.display(),
        before = update.before.as_deref().unwrap_or("-"),
        after = %update.after,
        dry_run,
        "date update"
    );

    if !dry_run {
        let set = XmpDocument::from_entries(
            update
                .fields
                .iter()
                .map(|k| (k.clone(), XmpValue::text(update.after.clone()))),
        );
        store.apply(sidecar, &XmpPatch::from_document(set))?;
    }
    Ok(Some(update))
}

/// Every `.xmp` sidecar under `root`, sorted.
pub fn find_sidecars(root: &Path) -> Vec<PathBuf> {
    let mut sidecars: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .is_some_and(|e| e.eq_ignore_ascii_case("xmp"))
        })
        .collect();
    sidecars.sort();
    sidecars
}

/// Correct every sidecar under `root`. Per-file failures are collected, not
/// propagated.
pub fn update_tree(
    extractor: &impl RawExtractor,
    store: &impl MetadataStore,
    root: &Path,
    dry_run: bool,
) -> DateReport {
    let outcomes = find_sidecars(root)
        .into_iter()
        .map(|sidecar| {
            let result = update_sidecar_date(extractor, store, &sidecar, dry_run);
            if let Err(e) = &result {
                error!(sidecar = %sidecar.display(), error = %e, "date update failed");
            }
            DateOutcome { sidecar, result }
        })
        .collect();
    DateReport { outcomes, dry_run }
}
