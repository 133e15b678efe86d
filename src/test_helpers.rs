//! Shared test utilities.
//!
//! Packet builders for hand-written XMP fixtures, plus a ready-to-use
//! [`Settings`] rooted in a temp directory.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! let settings = settings_for(tmp.path());
//! let row = record("IMG_0001", "cr2", "s = { CropTop = 0.1 }");
//! let packet = xmp_packet(&[("tiff:Orientation", "6")]);
//! ```

use std::path::Path;

use crate::catalog::CatalogRecord;
use crate::document::{KNOWN_NAMESPACES, XmpDocument, XmpValue};
use crate::merge::SourceSlot;
use crate::pipeline::Settings;
use crate::translate::{DEFAULT_CURVE_SEPARATOR, TagWhitelist};
use crate::xmp::{MetadataStore, XmpFileStore};

// =========================================================================
// Packets
// =========================================================================

/// Build an XMP packet with the given `prefix:Name` attributes on a single
/// `rdf:Description`. Every well-known namespace is declared.
pub fn xmp_packet(attrs: &[(&str, &str)]) -> String {
    xmp_packet_with_body(attrs, "")
}

/// Like [`xmp_packet`], with raw XML placed inside the description.
pub fn xmp_packet_with_body(attrs: &[(&str, &str)], body: &str) -> String {
    let mut xml = String::from(
        "<x:xmpmeta xmlns:x=\"adobe:ns:meta/\">\n \
         <rdf:RDF xmlns:rdf=\"http://www.w3.org/1999/02/22-rdf-syntax-ns#\">\n  \
         <rdf:Description rdf:about=\"\"",
    );
    for (prefix, uri) in KNOWN_NAMESPACES {
        xml.push_str(&format!("\n    xmlns:{prefix}=\"{uri}\""));
    }
    for (name, value) in attrs {
        xml.push_str(&format!("\n    {name}=\"{value}\""));
    }
    xml.push_str(">\n");
    xml.push_str(body);
    xml.push_str("\n  </rdf:Description>\n </rdf:RDF>\n</x:xmpmeta>\n");
    xml
}

/// Write a sidecar holding the given `Xmp.prefix.Name` text fields.
pub fn write_sidecar(path: &Path, fields: &[(&str, &str)]) {
    let doc = XmpDocument::from_entries(
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), XmpValue::text(*v))),
    );
    XmpFileStore.write(path, &doc).unwrap();
}

// =========================================================================
// Pipeline fixtures
// =========================================================================

/// A catalog row under `2020/2020-05-01/`.
pub fn record(base_name: &str, extension: &str, develop_settings: &str) -> CatalogRecord {
    CatalogRecord {
        id_local: 1,
        base_name: base_name.to_string(),
        extension: extension.to_string(),
        path_from_root: "2020/2020-05-01/".to_string(),
        develop_settings: develop_settings.to_string(),
        process_version: None,
        xmp: String::new(),
    }
}

/// Settings rooted at `<tmp>/library` with scratch space in `<tmp>/scratch`.
pub fn settings_for(tmp: &Path) -> Settings {
    let root = tmp.join("library");
    let scratch_root = tmp.join("scratch");
    std::fs::create_dir_all(&root).unwrap();
    std::fs::create_dir_all(&scratch_root).unwrap();
    Settings {
        root,
        whitelist: TagWhitelist::builtin(),
        default_process_version: "6.7".to_string(),
        curve_separator: DEFAULT_CURVE_SEPARATOR.to_string(),
        scratch_root,
        strict: false,
        mandatory: vec![SourceSlot::Original],
        dry_run: false,
    }
}
