//! Commit a merged patch to the destination sidecar and verify it.
//!
//! ```text
//!              destination exists?
//!              ├── yes → Update: read it, delete its contaminated keys,
//!              │                 apply the patch in place
//!              └── no  → Create: apply the patch to the original copy
//!                                (or the empty skeleton), rename into place
//!                         │
//!              crop repair on the projected result, then write
//!                         │
//!              re-read destination → missing crop fields?
//!              ├── boundary fields → corrective patch with defaults
//!              └── still missing   → verification mismatch (error log)
//! ```
//!
//! The Create branch writes through the original copy so the new sidecar
//! starts from the asset's own metadata (dimensions, orientation, capture
//! data) rather than from the merged fields alone.
//!
//! In dry-run mode the same steps run against scratch copies; the real
//! destination is never opened for writing.

use crate::crop::{self, CropField};
use crate::document::XmpPatch;
use crate::extract::EMPTY_XMP;
use crate::sanitize;
use crate::xmp::{MetadataStore, XmpError, replace_file};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

/// Which commit path ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteBranch {
    /// The destination existed and was updated in place.
    Update,
    /// The destination was created from the original copy.
    Create,
}

impl std::fmt::Display for WriteBranch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteBranch::Update => f.write_str("update"),
            WriteBranch::Create => f.write_str("create"),
        }
    }
}

/// Everything [`commit`] needs for one asset.
#[derive(Debug, Clone)]
pub struct CommitRequest<'a> {
    pub patch: &'a XmpPatch,
    pub destination: &'a Path,
    /// Scratch copy of the asset's embedded XMP, if it was extracted.
    pub original_copy: Option<&'a Path>,
    /// Per-asset scratch directory.
    pub scratch: &'a Path,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommitOutcome {
    pub branch: WriteBranch,
    /// The file that was actually written (the destination, or its scratch
    /// stand-in during a dry run).
    pub written: PathBuf,
    /// Contaminated keys found in the stored base and deleted.
    pub contaminated: Vec<String>,
    /// Boundary fields filled with defaults before the write.
    pub repaired: Vec<CropField>,
    /// Required fields with no safe default, missing before the write.
    pub unresolved: BTreeSet<CropField>,
    /// Boundary fields the re-read was missing and a corrective patch filled.
    pub corrected: Vec<CropField>,
    /// Fields the write/read round trip lost and correction could not restore.
    pub mismatched: BTreeSet<CropField>,
}

impl CommitOutcome {
    pub fn verified(&self) -> bool {
        self.mismatched.is_empty()
    }
}

/// Commit `request.patch` and verify the result.
pub fn commit(
    store: &impl MetadataStore,
    request: &CommitRequest<'_>,
) -> Result<CommitOutcome, XmpError> {
    let destination = request.destination;
    let branch = if destination.is_file() {
        WriteBranch::Update
    } else {
        WriteBranch::Create
    };

    let target = staging_target(branch, request)?;
    debug!(branch = %branch, target = %target.display(), "committing");

    let stored = store.read(&target)?;
    let contaminated = sanitize::find_contaminated(&stored, &[]);
    let mut patch = request.patch.clone();
    for key in &contaminated {
        debug!(key = %key, "deleting contaminated key from stored sidecar");
        patch.mark_deleted(key.clone());
    }

    let mut projected = stored;
    patch.apply_to(&mut projected);
    let repair = crop::repair_crop(&mut projected);
    if !repair.unresolved.is_empty() {
        warn!(
            destination = %destination.display(),
            missing = %field_list(&repair.unresolved),
            "crop fields missing with no safe default"
        );
    }
    store.write(&target, &projected)?;

    let written = match (branch, request.dry_run) {
        (WriteBranch::Create, false) => {
            replace_file(destination, &std::fs::read_to_string(&target)?)?;
            destination.to_path_buf()
        }
        _ => target,
    };

    let (corrected, still_missing) = verify(store, &written)?;
    let mismatched: BTreeSet<CropField> = still_missing
        .difference(&repair.unresolved)
        .copied()
        .collect();
    if !mismatched.is_empty() {
        error!(
            destination = %destination.display(),
            missing = %field_list(&mismatched),
            "written sidecar failed crop verification"
        );
    }

    Ok(CommitOutcome {
        branch,
        written,
        contaminated,
        repaired: repair.filled,
        unresolved: repair.unresolved,
        corrected,
        mismatched,
    })
}

/// The file the patch is applied to.
fn staging_target(branch: WriteBranch, request: &CommitRequest<'_>) -> Result<PathBuf, XmpError> {
    match branch {
        WriteBranch::Update if request.dry_run => {
            let copy = request.scratch.join("destination.xmp");
            std::fs::copy(request.destination, &copy)?;
            Ok(copy)
        }
        WriteBranch::Update => Ok(request.destination.to_path_buf()),
        WriteBranch::Create => match request.original_copy {
            Some(path) => Ok(path.to_path_buf()),
            None => {
                let skeleton = request.scratch.join("skeleton.xmp");
                std::fs::write(&skeleton, EMPTY_XMP)?;
                Ok(skeleton)
            }
        },
    }
}

/// Re-read `path`, patch any missing boundary fields, and report what is
/// still missing.
fn verify(
    store: &impl MetadataStore,
    path: &Path,
) -> Result<(Vec<CropField>, BTreeSet<CropField>), XmpError> {
    let missing = crop::missing_crop_fields(&store.read(path)?);
    if missing.is_empty() {
        return Ok((Vec::new(), missing));
    }

    let defaults = crop::crop_defaults(&missing);
    if defaults.is_empty() {
        return Ok((Vec::new(), missing));
    }
    let corrected: Vec<CropField> = missing.iter().copied().filter(|f| f.is_boundary()).collect();
    warn!(
        path = %path.display(),
        fields = corrected.len(),
        "re-read lost crop fields, writing corrective patch"
    );
    store.apply(path, &XmpPatch::from_document(defaults))?;
    let still_missing = crop::missing_crop_fields(&store.read(path)?);
    Ok((corrected, still_missing))
}

pub(crate) fn field_list(fields: &BTreeSet<CropField>) -> String {
    fields
        .iter()
        .map(|f| f.name())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{XmpDocument, XmpValue};
    use crate::xmp::XmpFileStore;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn patch(entries: &[(&str, &str)]) -> XmpPatch {
        XmpPatch::from_document(XmpDocument::from_entries(
            entries.iter().map(|(k, v)| (*k, XmpValue::text(*v))),
        ))
    }

    fn write_doc(path: &Path, entries: &[(&str, &str)]) {
        XmpFileStore
            .write(
                path,
                &XmpDocument::from_entries(entries.iter().map(|(k, v)| (*k, XmpValue::text(*v)))),
            )
            .unwrap();
    }

    #[test]
    fn create_branch_starts_from_original_copy() {
        let tmp = TempDir::new().unwrap();
        let original = tmp.path().join("original.xmp");
        write_doc(&original, &[("Xmp.tiff.ImageWidth", "6000"), ("Xmp.xmp.Rating", "1")]);
        let dest = tmp.path().join("IMG_1.xmp");
        let p = patch(&[("Xmp.xmp.Rating", "4")]);

        let outcome = commit(
            &XmpFileStore,
            &CommitRequest {
                patch: &p,
                destination: &dest,
                original_copy: Some(&original),
                scratch: tmp.path(),
                dry_run: false,
            },
        )
        .unwrap();

        assert_eq!(outcome.branch, WriteBranch::Create);
        assert_eq!(outcome.written, dest);
        let doc = XmpFileStore.read(&dest).unwrap();
        assert_eq!(doc.get_text("Xmp.tiff.ImageWidth"), Some("6000"));
        assert_eq!(doc.get_text("Xmp.xmp.Rating"), Some("4"));
    }

    #[test]
    fn create_without_original_uses_skeleton() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("IMG_1.xmp");
        let p = patch(&[("Xmp.xmp.Rating", "4")]);
        let outcome = commit(
            &XmpFileStore,
            &CommitRequest {
                patch: &p,
                destination: &dest,
                original_copy: None,
                scratch: tmp.path(),
                dry_run: false,
            },
        )
        .unwrap();
        assert!(outcome.verified());
        assert_eq!(XmpFileStore.read(&dest).unwrap().len(), 1);
    }

    #[test]
    fn update_branch_removes_stored_composites() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("IMG_1.xmp");
        std::fs::write(
            &dest,
            crate::test_helpers::xmp_packet_with_body(
                &[("xmp:Rating", "2")],
                r#"<crs:Look rdf:parseType="Resource"><crs:Name>Vivid</crs:Name></crs:Look>"#,
            ),
        )
        .unwrap();
        let p = patch(&[("Xmp.xmp.Rating", "5")]);

        let outcome = commit(
            &XmpFileStore,
            &CommitRequest {
                patch: &p,
                destination: &dest,
                original_copy: None,
                scratch: tmp.path(),
                dry_run: false,
            },
        )
        .unwrap();

        assert_eq!(outcome.branch, WriteBranch::Update);
        assert_eq!(outcome.contaminated, vec!["Xmp.crs.Look"]);
        let doc = XmpFileStore.read(&dest).unwrap();
        assert_eq!(doc.get_text("Xmp.xmp.Rating"), Some("5"));
        assert!(!doc.contains_key("Xmp.crs.Look"));
    }

    #[test]
    fn deletions_reach_the_file() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("IMG_1.xmp");
        write_doc(&dest, &[("Xmp.xmp.Label", "None"), ("Xmp.xmp.Rating", "2")]);
        let mut p = XmpPatch::default();
        p.mark_deleted("Xmp.xmp.Label");
        commit(
            &XmpFileStore,
            &CommitRequest {
                patch: &p,
                destination: &dest,
                original_copy: None,
                scratch: tmp.path(),
                dry_run: false,
            },
        )
        .unwrap();
        let text = std::fs::read_to_string(&dest).unwrap();
        assert!(!text.contains("Label"));
        assert!(text.contains("Rating"));
    }

    #[test]
    fn precommit_repair_fills_boundaries() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("IMG_1.xmp");
        write_doc(
            &dest,
            &[
                ("Xmp.tiff.ImageWidth", "10"),
                ("Xmp.tiff.ImageLength", "20"),
                ("Xmp.tiff.Orientation", "1"),
            ],
        );
        let p = patch(&[("Xmp.crs.CropTop", "0.1")]);
        let outcome = commit(
            &XmpFileStore,
            &CommitRequest {
                patch: &p,
                destination: &dest,
                original_copy: None,
                scratch: tmp.path(),
                dry_run: false,
            },
        )
        .unwrap();

        assert_eq!(outcome.repaired.len(), 4);
        assert!(outcome.unresolved.is_empty());
        assert!(outcome.verified());
        let doc = XmpFileStore.read(&dest).unwrap();
        assert_eq!(doc.get_text("Xmp.crs.CropRight"), Some("1.000000"));
        assert_eq!(doc.get_text("Xmp.crs.CropTop"), Some("0.1"));
    }

    #[test]
    fn missing_dimensions_are_unresolved_not_mismatched() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("IMG_1.xmp");
        let p = patch(&[("Xmp.crs.CropTop", "0.1")]);
        let outcome = commit(
            &XmpFileStore,
            &CommitRequest {
                patch: &p,
                destination: &dest,
                original_copy: None,
                scratch: tmp.path(),
                dry_run: false,
            },
        )
        .unwrap();
        assert_eq!(outcome.unresolved.len(), 3);
        assert!(outcome.verified());
    }

    #[test]
    fn dry_run_update_leaves_destination_untouched() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("IMG_1.xmp");
        write_doc(&dest, &[("Xmp.xmp.Rating", "2")]);
        let before = std::fs::read(&dest).unwrap();
        let scratch = tmp.path().join("scratch");
        std::fs::create_dir(&scratch).unwrap();

        let p = patch(&[("Xmp.xmp.Rating", "5")]);
        let outcome = commit(
            &XmpFileStore,
            &CommitRequest {
                patch: &p,
                destination: &dest,
                original_copy: None,
                scratch: &scratch,
                dry_run: true,
            },
        )
        .unwrap();

        assert_eq!(outcome.branch, WriteBranch::Update);
        assert_eq!(std::fs::read(&dest).unwrap(), before);
        assert!(outcome.written.starts_with(&scratch));
        assert_eq!(
            XmpFileStore.read(&outcome.written).unwrap().get_text("Xmp.xmp.Rating"),
            Some("5")
        );
    }

    #[test]
    fn dry_run_create_does_not_create() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("IMG_1.xmp");
        let p = patch(&[("Xmp.xmp.Rating", "5")]);
        let outcome = commit(
            &XmpFileStore,
            &CommitRequest {
                patch: &p,
                destination: &dest,
                original_copy: None,
                scratch: tmp.path(),
                dry_run: true,
            },
        )
        .unwrap();
        assert_eq!(outcome.branch, WriteBranch::Create);
        assert!(!dest.exists());
    }

    /// Store that silently drops one key on write, like a lossy backend.
    struct LossyStore {
        drop_key: &'static str,
        writes: Mutex<usize>,
    }

    impl MetadataStore for LossyStore {
        fn read(&self, path: &Path) -> Result<XmpDocument, XmpError> {
            XmpFileStore.read(path)
        }

        fn write(&self, path: &Path, doc: &XmpDocument) -> Result<(), XmpError> {
            *self.writes.lock().unwrap() += 1;
            let mut doc = doc.clone();
            doc.remove(self.drop_key);
            XmpFileStore.write(path, &doc)
        }
    }

    #[test]
    fn lost_boundary_is_corrected_then_reported() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("IMG_1.xmp");
        let store = LossyStore {
            drop_key: "Xmp.crs.CropAngle",
            writes: Mutex::new(0),
        };
        let p = patch(&[
            ("Xmp.crs.CropTop", "0.1"),
            ("Xmp.crs.CropAngle", "0"),
            ("Xmp.tiff.ImageWidth", "1"),
            ("Xmp.tiff.ImageLength", "1"),
            ("Xmp.tiff.Orientation", "1"),
        ]);
        let outcome = commit(
            &store,
            &CommitRequest {
                patch: &p,
                destination: &dest,
                original_copy: None,
                scratch: tmp.path(),
                dry_run: false,
            },
        )
        .unwrap();

        assert_eq!(outcome.corrected, vec![CropField::Angle]);
        assert_eq!(outcome.mismatched, BTreeSet::from([CropField::Angle]));
        assert!(!outcome.verified());
        // initial write + corrective patch
        assert_eq!(*store.writes.lock().unwrap(), 2);
    }
}
