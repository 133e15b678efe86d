//! End-to-end reconcile runs against a throwaway library.
//!
//! Every test builds a library under a `TempDir`, drops image files with an
//! embedded packet (the native extractor finds it by scanning), and runs the
//! public pipeline exactly as the CLI does.

use std::path::{Path, PathBuf};
use tempfile::TempDir;
use xmp_reconcile::catalog::{CatalogRecord, SidecarPaths};
use xmp_reconcile::develop::decode_develop_settings;
use xmp_reconcile::merge::SourceSlot;
use xmp_reconcile::pipeline::{Diagnostic, Reconciler, Settings};
use xmp_reconcile::translate::{DEFAULT_CURVE_SEPARATOR, TagWhitelist, translate};
use xmp_reconcile::writer::WriteBranch;
use xmp_reconcile::xmp::{MetadataStore, NativeExtractor, XmpFileStore};

// =========================================================================
// Fixtures
// =========================================================================

struct Library {
    _tmp: TempDir,
    settings: Settings,
}

impl Library {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("library");
        let scratch_root = tmp.path().join("scratch");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::create_dir_all(&scratch_root).unwrap();
        let settings = Settings {
            root,
            whitelist: TagWhitelist::builtin(),
            default_process_version: "6.7".to_string(),
            curve_separator: DEFAULT_CURVE_SEPARATOR.to_string(),
            scratch_root,
            strict: false,
            mandatory: vec![SourceSlot::Original],
            dry_run: false,
        };
        Self { _tmp: tmp, settings }
    }

    fn row(&self, base_name: &str, develop_settings: &str) -> CatalogRecord {
        CatalogRecord {
            id_local: 7,
            base_name: base_name.to_string(),
            extension: "dng".to_string(),
            path_from_root: "2021/2021-06-12/".to_string(),
            develop_settings: develop_settings.to_string(),
            process_version: None,
            xmp: String::new(),
        }
    }

    /// Write the asset file with `attrs` embedded as an XMP packet.
    fn write_asset(&self, row: &CatalogRecord, attrs: &[(&str, &str)]) -> PathBuf {
        let asset = row.asset_path(&self.settings.root);
        std::fs::create_dir_all(asset.parent().unwrap()).unwrap();
        let mut bytes = b"II*\0raw-header".to_vec();
        bytes.extend_from_slice(packet(attrs).as_bytes());
        bytes.extend_from_slice(b"\0\0image-data");
        std::fs::write(&asset, bytes).unwrap();
        asset
    }

    fn reconcile(&self, row: &CatalogRecord) -> xmp_reconcile::pipeline::AssetReport {
        Reconciler::new(&self.settings, &NativeExtractor, &XmpFileStore)
            .reconcile_asset(row)
            .unwrap()
    }
}

fn packet(attrs: &[(&str, &str)]) -> String {
    let mut xml = String::from(
        r#"<x:xmpmeta xmlns:x="adobe:ns:meta/"><rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"><rdf:Description rdf:about="" xmlns:xmp="http://ns.adobe.com/xap/1.0/" xmlns:tiff="http://ns.adobe.com/tiff/1.0/" xmlns:crs="http://ns.adobe.com/camera-raw-settings/1.0/""#,
    );
    for (name, value) in attrs {
        xml.push_str(&format!(" {name}=\"{value}\""));
    }
    xml.push_str("/></rdf:RDF></x:xmpmeta>");
    xml
}

fn read(path: &Path) -> xmp_reconcile::document::XmpDocument {
    XmpFileStore.read(path).unwrap()
}

// =========================================================================
// Scenario A: develop settings become crs fields
// =========================================================================

#[test]
fn scenario_a_translation() {
    let settings =
        decode_develop_settings(r#"s = { CropTop = 0.1, CropBottom = 0.9, ProcessVersion = "6.7" }"#)
            .unwrap();
    let whitelist = TagWhitelist::new(["CropTop", "CropBottom", "ProcessVersion"]);
    let doc = translate(&settings, &whitelist, "5.0", DEFAULT_CURVE_SEPARATOR).unwrap();

    assert_eq!(doc.get_text("Xmp.crs.CropTop"), Some("0.1"));
    assert_eq!(doc.get_text("Xmp.crs.CropBottom"), Some("0.9"));
    assert_eq!(doc.get_text("Xmp.crs.HasCrop"), Some("True"));
    assert_eq!(doc.get_text("Xmp.crs.ProcessVersion"), Some("6.7"));
}

#[test]
fn scenario_a_end_to_end() {
    let lib = Library::new();
    let row = lib.row(
        "DSC_0101",
        r#"s = { CropTop = 0.1, CropBottom = 0.9, ProcessVersion = "6.7" }"#,
    );
    lib.write_asset(
        &row,
        &[
            ("tiff:ImageWidth", "6016"),
            ("tiff:ImageLength", "4016"),
            ("tiff:Orientation", "1"),
        ],
    );

    let report = lib.reconcile(&row);
    assert_eq!(report.branch, WriteBranch::Create);
    assert!(!report.has_mismatch());

    let doc = read(&report.destination);
    assert_eq!(doc.get_text("Xmp.crs.CropTop"), Some("0.1"));
    assert_eq!(doc.get_text("Xmp.crs.CropBottom"), Some("0.9"));
    assert_eq!(doc.get_text("Xmp.crs.HasCrop"), Some("True"));
    assert_eq!(doc.get_text("Xmp.tiff.ImageWidth"), Some("6016"));
    for key in ["Xmp.crs.CropLeft", "Xmp.crs.CropAngle"] {
        assert_eq!(doc.get_text(key), Some("0.000000"), "{key}");
    }
    assert_eq!(doc.get_text("Xmp.crs.CropRight"), Some("1.000000"));
}

// =========================================================================
// Scenario B: an explicit "None" label is removed
// =========================================================================

#[test]
fn scenario_b_none_label_is_deleted() {
    let lib = Library::new();
    let row = lib.row("DSC_0102", "");
    lib.write_asset(&row, &[("xmp:Label", "None"), ("xmp:Rating", "3")]);

    let report = lib.reconcile(&row);
    let doc = read(&report.destination);
    assert_eq!(doc.get_text("Xmp.xmp.Label"), None);
    assert_eq!(doc.get_text("Xmp.xmp.Rating"), Some("3"));
    assert!(!std::fs::read_to_string(&report.destination)
        .unwrap()
        .contains("Label"));
}

#[test]
fn scenario_b_later_label_wins() {
    let lib = Library::new();
    let row = lib.row("DSC_0103", "");
    let asset = lib.write_asset(&row, &[("xmp:Label", "None")]);
    let secondary = SidecarPaths::for_asset(&asset).secondary;
    std::fs::write(&secondary, packet(&[("xmp:Label", "Green")])).unwrap();

    let report = lib.reconcile(&row);
    assert_eq!(read(&report.destination).get_text("Xmp.xmp.Label"), Some("Green"));
}

// =========================================================================
// Scenario C: create, then update, same content
// =========================================================================

#[test]
fn scenario_c_create_then_update_is_stable() {
    let lib = Library::new();
    let row = lib.row(
        "DSC_0104",
        "s = { CropLeft = 0.05, Exposure2012 = 0.35, ToneCurvePV2012 = { 0, 0, 128, 140, 255, 255 } }",
    );
    lib.write_asset(
        &row,
        &[
            ("tiff:ImageWidth", "6016"),
            ("tiff:ImageLength", "4016"),
            ("tiff:Orientation", "6"),
            ("xmp:Rating", "4"),
        ],
    );

    let first = lib.reconcile(&row);
    assert_eq!(first.branch, WriteBranch::Create);
    let after_create = std::fs::read_to_string(&first.destination).unwrap();

    let second = lib.reconcile(&row);
    assert_eq!(second.branch, WriteBranch::Update);
    assert_eq!(second.destination, first.destination);
    let after_update = std::fs::read_to_string(&second.destination).unwrap();

    assert_eq!(after_create, after_update);
    let doc = read(&second.destination);
    assert_eq!(doc.get_text("Xmp.crs.HasCrop"), Some("True"));
    assert_eq!(doc.get_text("Xmp.tiff.Orientation"), Some("6"));
    assert!(!second.has_mismatch());
}

#[test]
fn scenario_c_dry_run_leaves_library_untouched() {
    let mut lib = Library::new();
    lib.settings.dry_run = true;
    let row = lib.row("DSC_0105", "s = { CropTop = 0.2 }");
    let asset = lib.write_asset(&row, &[("tiff:Orientation", "1")]);

    let report = lib.reconcile(&row);
    assert_eq!(report.branch, WriteBranch::Create);
    assert!(!SidecarPaths::for_asset(&asset).primary.exists());
    assert!(report.diagnostics.iter().any(|d| matches!(
        d,
        Diagnostic::CropIncomplete { unresolved, .. } if unresolved.len() == 2
    )));
}

// =========================================================================
// Batch
// =========================================================================

#[test]
fn batch_isolates_failures_and_cleans_scratch() {
    let lib = Library::new();
    let good = lib.row("DSC_0106", "s = { Exposure2012 = 0.1 }");
    let bad = lib.row("DSC_0107", "not a payload");
    let odd = lib.row("DSC_0108", "s = { ToneCurvePV2012 = { 0, 0, 255 } }");
    lib.write_asset(&good, &[("tiff:Orientation", "1")]);

    let summary = Reconciler::new(&lib.settings, &NativeExtractor, &XmpFileStore)
        .reconcile_batch(&[good, bad, odd], 3);
    assert_eq!(summary.total(), 3);
    assert_eq!(summary.succeeded(), 1);
    assert_eq!(summary.created(), 1);
    assert_eq!(summary.failed(), 2);
    assert_eq!(
        std::fs::read_dir(&lib.settings.scratch_root).unwrap().count(),
        0
    );
}
