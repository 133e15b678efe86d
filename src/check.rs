//! Sidecar audit.
//!
//! Walks the library for supported images and checks both sidecars of each:
//!
//! | Sidecar | Requirement |
//! |---------|-------------|
//! | `<stem>.xmp` | exists; `tiff:Orientation` present and non-zero; mirrored iff expected |
//! | `<name>.<ext>.xmp` | exists; `darktable:history_end` ≥ `check.min_history_end` |
//!
//! Mirroring is expected when `check.mirror` is set, unless the sidecar's
//! `dc:subject` carries the `no_mirror` keyword. Orientations 2, 4, 5 and 7
//! are the mirrored ones.
//!
//! Nothing is modified; the result is a [`CheckReport`] listing problems per
//! image.

use crate::catalog::SidecarPaths;
use crate::config::CheckConfig;
use crate::document::XmpValue;
use crate::xmp::MetadataStore;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error};
use walkdir::WalkDir;

pub const RAW_EXTENSIONS: &[&str] = &["dng", "cr2", "cr3", "nef", "arw", "orf", "raf", "rw2"];
pub const OTHER_EXTENSIONS: &[&str] = &["jpg", "jpeg", "tif", "tiff", "png"];

const MIRRORED_ORIENTATIONS: [&str; 4] = ["2", "4", "5", "7"];
const NO_MIRROR_KEYWORD: &str = "no_mirror";

/// One failed requirement on one sidecar.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Problem {
    #[error("sidecar does not exist: {0}")]
    MissingSidecar(PathBuf),
    #[error("sidecar could not be read: {path}: {message}")]
    Unreadable { path: PathBuf, message: String },
    #[error("sidecar has invalid orientation: {0}")]
    InvalidOrientation(PathBuf),
    #[error("sidecar not mirrored when it should be: {0}")]
    NotMirrored(PathBuf),
    #[error("sidecar mirrored when it should not be: {0}")]
    UnexpectedMirror(PathBuf),
    #[error("sidecar has no darktable edit history (history_end {history_end}): {path}")]
    NoEditHistory { path: PathBuf, history_end: i64 },
}

/// Audit result for one image.
#[derive(Debug, Clone, PartialEq)]
pub struct FileCheck {
    pub image: PathBuf,
    pub problems: Vec<Problem>,
}

impl FileCheck {
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckReport {
    pub files: Vec<FileCheck>,
}

impl CheckReport {
    pub fn checked(&self) -> usize {
        self.files.len()
    }

    /// Images with at least one problem.
    pub fn files_with_errors(&self) -> usize {
        self.files.iter().filter(|f| !f.is_ok()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileCheck> {
        self.files.iter().filter(|f| !f.is_ok())
    }
}

/// Case-insensitive match against the raw and other image extensions.
pub fn is_supported_image(path: &Path) -> bool {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    RAW_EXTENSIONS.contains(&ext.as_str()) || OTHER_EXTENSIONS.contains(&ext.as_str())
}

/// Every supported image under `root`, sorted.
pub fn find_images(root: &Path) -> Vec<PathBuf> {
    let mut images: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| is_supported_image(p))
        .collect();
    images.sort();
    images
}

/// Audit every image under `root`.
pub fn check_tree(store: &impl MetadataStore, root: &Path, config: &CheckConfig) -> CheckReport {
    let files: Vec<FileCheck> = find_images(root)
        .into_iter()
        .map(|image| check_image(store, &image, config))
        .collect();
    let report = CheckReport { files };
    if report.files_with_errors() > 0 {
        error!(errors = report.files_with_errors(), "check completed with errors");
    }
    report
}

pub fn check_image(store: &impl MetadataStore, image: &Path, config: &CheckConfig) -> FileCheck {
    debug!(image = %image.display(), "checking");
    let sidecars = SidecarPaths::for_asset(image);
    let mut problems = Vec::new();
    problems.extend(check_base_sidecar(store, &sidecars.primary, config.mirror));
    problems.extend(check_darktable_sidecar(
        store,
        &sidecars.secondary,
        config.min_history_end,
    ));
    for problem in &problems {
        error!("{problem}");
    }
    FileCheck {
        image: image.to_path_buf(),
        problems,
    }
}

/// Orientation and mirroring of the `<stem>.xmp` sidecar.
pub fn check_base_sidecar(
    store: &impl MetadataStore,
    sidecar: &Path,
    mirror: bool,
) -> Option<Problem> {
    if !sidecar.is_file() {
        return Some(Problem::MissingSidecar(sidecar.to_path_buf()));
    }
    let doc = match store.read(sidecar) {
        Ok(doc) => doc,
        Err(e) => return Some(unreadable(sidecar, e)),
    };

    let opted_out = match doc.get("Xmp.dc.subject") {
        Some(XmpValue::List(_, items)) => items.iter().any(|k| k == NO_MIRROR_KEYWORD),
        Some(XmpValue::Text(k)) => k == NO_MIRROR_KEYWORD,
        None => false,
    };
    let expected = mirror && !opted_out;

    let orientation = doc.get_text("Xmp.tiff.Orientation").unwrap_or("0").trim();
    let mirrored = MIRRORED_ORIENTATIONS.contains(&orientation);
    let path = sidecar.to_path_buf();
    if orientation.is_empty() || orientation == "0" {
        Some(Problem::InvalidOrientation(path))
    } else if expected && !mirrored {
        Some(Problem::NotMirrored(path))
    } else if !expected && mirrored {
        Some(Problem::UnexpectedMirror(path))
    } else {
        None
    }
}

/// Edit history depth of the `<name>.<ext>.xmp` sidecar.
pub fn check_darktable_sidecar(
    store: &impl MetadataStore,
    sidecar: &Path,
    min_history_end: u32,
) -> Option<Problem> {
    if !sidecar.is_file() {
        return Some(Problem::MissingSidecar(sidecar.to_path_buf()));
    }
    let doc = match store.read(sidecar) {
        Ok(doc) => doc,
        Err(e) => return Some(unreadable(sidecar, e)),
    };
    let history_end = doc
        .get_text("Xmp.darktable.history_end")
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(0);
    (history_end < i64::from(min_history_end)).then(|| Problem::NoEditHistory {
        path: sidecar.to_path_buf(),
        history_end,
    })
}

fn unreadable(path: &Path, err: impl std::fmt::Display) -> Problem {
    Problem::Unreadable {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
