//! Per-slot source extraction into scratch space.
//!
//! Each source (asset file, catalog XMP column, either sidecar) is pulled as
//! raw packet text, written to `<scratch>/<slot>.xmp`, and re-read through the
//! [`MetadataStore`]. The re-read is the acceptance test: extraction tools
//! occasionally return truncated or error text with a zero exit, and that
//! must fail here rather than be merged.
//!
//! ```text
//! path missing         → None (slot empty, never an error)
//! no packet / blank    → EMPTY_XMP skeleton, warn
//! packet doesn't parse → ExtractError::Unparseable (asset fails)
//! ```

use crate::document::XmpDocument;
use crate::merge::SourceSlot;
use crate::xmp::{ExtractError, MetadataStore, RawExtractor};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Minimal valid packet, used when a source yields no XMP.
pub const EMPTY_XMP: &str = r#"<x:xmpmeta xmlns:x="adobe:ns:meta/" x:xmptk="XMP Core 5.5.0">
 <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
  <rdf:Description rdf:about=""
    xmlns:photoshop="http://ns.adobe.com/photoshop/1.0/"
    xmlns:xmp="http://ns.adobe.com/xap/1.0/">
  </rdf:Description>
 </rdf:RDF>
</x:xmpmeta>"#;

/// A source that made it through extraction and the round-trip check.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedSource {
    pub slot: SourceSlot,
    /// Where the source came from.
    pub origin: PathBuf,
    /// The scratch copy that was re-read.
    pub copy: PathBuf,
    pub document: XmpDocument,
    /// True when the skeleton stood in for an empty extraction.
    pub substituted_empty: bool,
}

/// Scratch file name for a slot.
pub fn scratch_copy_path(scratch: &Path, slot: SourceSlot) -> PathBuf {
    scratch.join(format!("{}.xmp", slot.name()))
}

/// Extract one file-backed slot.
///
/// A missing `path` is not an error; it is logged at `warn` when the slot is
/// `mandatory`, otherwise at `debug`.
pub fn extract_slot(
    extractor: &impl RawExtractor,
    store: &impl MetadataStore,
    slot: SourceSlot,
    path: &Path,
    scratch: &Path,
    mandatory: bool,
) -> Result<Option<ExtractedSource>, ExtractError> {
    if !path.is_file() {
        if mandatory {
            warn!(slot = %slot, path = %path.display(), "source not found");
        } else {
            debug!(slot = %slot, path = %path.display(), "source not found");
        }
        return Ok(None);
    }

    let raw = extractor.extract_raw(path)?.unwrap_or_default();
    accept(store, slot, path, &raw, scratch).map(Some)
}

/// Feed the database slot from the catalog row's raw XMP column.
pub fn extract_database_slot(
    store: &impl MetadataStore,
    asset: &Path,
    raw_xmp: &str,
    scratch: &Path,
) -> Result<ExtractedSource, ExtractError> {
    accept(store, SourceSlot::Database, asset, raw_xmp, scratch)
}

fn accept(
    store: &impl MetadataStore,
    slot: SourceSlot,
    origin: &Path,
    raw: &str,
    scratch: &Path,
) -> Result<ExtractedSource, ExtractError> {
    let mut text = raw.trim_matches('\0');
    let substituted_empty = text.trim().is_empty();
    if substituted_empty {
        warn!(slot = %slot, path = %origin.display(), "empty XMP retrieved, using empty skeleton");
        text = EMPTY_XMP;
    }

    let copy = scratch_copy_path(scratch, slot);
    std::fs::write(&copy, text)?;
    let document = store
        .read(&copy)
        .map_err(|source| ExtractError::Unparseable {
            path: origin.to_path_buf(),
            source,
        })?;
    debug!(slot = %slot, fields = document.len(), "extracted source");

    Ok(ExtractedSource {
        slot,
        origin: origin.to_path_buf(),
        copy,
        document,
        substituted_empty,
    })
}
