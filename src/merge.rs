//! Fixed-precedence merge of per-slot documents.
//!
//! Later slots win, key by key:
//!
//! ```text
//! Original → Database → PrimarySidecar → SecondarySidecar → translated settings
//!   lowest                                                     highest
//! ```
//!
//! A hand-edited sidecar beats a bulk catalog export, and the decoded develop
//! settings beat everything. Precedence is slot identity only; file times
//! are never consulted.
//!
//! Three fixups run on the merged result, in order:
//! 1. crop derivation, since two slots may jointly trigger it
//! 2. curve pairing, since slots may disagree on curve shape
//! 3. a `Label` of literal `"None"` becomes a deletion

use crate::document::{XmpDocument, XmpPatch};
use crate::translate::{self, TranslateError};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Rating label key; a literal `"None"` here means "no label".
pub const LABEL_KEY: &str = "Xmp.xmp.Label";

/// Where a source document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceSlot {
    /// Metadata embedded in the asset file itself.
    Original,
    /// Raw XMP stored in the catalog row.
    Database,
    /// `<stem>.xmp`, the Lightroom convention.
    PrimarySidecar,
    /// `<name>.<ext>.xmp`, the darktable convention.
    SecondarySidecar,
}

impl SourceSlot {
    /// Lowest to highest precedence.
    pub const PRECEDENCE: [SourceSlot; 4] = [
        SourceSlot::Original,
        SourceSlot::Database,
        SourceSlot::PrimarySidecar,
        SourceSlot::SecondarySidecar,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SourceSlot::Original => "original",
            SourceSlot::Database => "database",
            SourceSlot::PrimarySidecar => "primary_sidecar",
            SourceSlot::SecondarySidecar => "secondary_sidecar",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for SourceSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One optional document per slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotDocuments {
    docs: [Option<XmpDocument>; 4],
}

impl SlotDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, slot: SourceSlot, doc: XmpDocument) {
        self.docs[slot.index()] = Some(doc);
    }

    pub fn get(&self, slot: SourceSlot) -> Option<&XmpDocument> {
        self.docs[slot.index()].as_ref()
    }

    /// Present documents in precedence order.
    pub fn in_precedence(&self) -> impl Iterator<Item = (SourceSlot, &XmpDocument)> {
        SourceSlot::PRECEDENCE
            .into_iter()
            .filter_map(|slot| self.get(slot).map(|doc| (slot, doc)))
    }

    pub fn present_count(&self) -> usize {
        self.docs.iter().filter(|d| d.is_some()).count()
    }
}

/// Fold slots and translated settings into one patch.
pub fn merge_slots(
    slots: &SlotDocuments,
    translated: &XmpDocument,
    curve_separator: &str,
) -> Result<XmpPatch, TranslateError> {
    let mut merged = XmpDocument::new();
    for (slot, doc) in slots.in_precedence() {
        debug!(slot = %slot, fields = doc.len(), "merging slot");
        merged.overlay(doc);
    }
    merged.overlay(translated);

    translate::derive_has_crop(&mut merged);
    translate::normalize_curves(&mut merged, curve_separator)?;

    let label_is_none = merged.get_text(LABEL_KEY) == Some("None");
    let mut patch = XmpPatch::from_document(merged);
    if label_is_none {
        patch.mark_deleted(LABEL_KEY);
    }
    Ok(patch)
}
