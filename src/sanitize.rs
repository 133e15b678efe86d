//! Strip composite entries that cannot be written back as flat values.
//!
//! Exiv2-style readers flatten a struct or struct array into a placeholder
//! (`type=Struct`, `type=Seq`, ...) plus one key per member:
//!
//! ```text
//! Xmp.crs.RetouchAreas                       = "type=Seq"     ← contaminated
//! Xmp.crs.RetouchAreas[1]                    = "type=Struct"  ← member
//! Xmp.crs.RetouchAreas[1]/crs:SpotType       = "heal"         ← member
//! Xmp.crs.RetouchAreasVersion                = "2"            ← unrelated, kept
//! ```
//!
//! Writing the placeholder back as a literal string corrupts the sidecar, so
//! the placeholder and everything below it is removed. Member matching is
//! boundary-aware: a key is removed only when it continues the contaminated
//! key with `[` or `/`, never merely because it shares leading characters.

use crate::document::{XmpDocument, is_same_or_member};

/// Keys holding a placeholder value, followed by `extra` keys present in the
/// document. No duplicates; members of an already-listed key are omitted.
///
/// Siblings that only share leading characters (`Xmp.crs.LookTable` next to
/// a contaminated `Xmp.crs.Look`) are not members and are kept.
pub fn find_contaminated(doc: &XmpDocument, extra: &[String]) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    let candidates = doc
        .iter()
        .filter(|(_, v)| v.is_placeholder())
        .map(|(k, _)| k)
        .chain(extra.iter().map(String::as_str).filter(|k| doc.contains_key(k)));
    for key in candidates {
        if !found.iter().any(|f| is_same_or_member(key, f)) {
            found.push(key.to_string());
        }
    }
    found
}

/// Remove contaminated keys and their members. Returns every removed key in
/// document order.
pub fn sanitize(doc: &mut XmpDocument, extra: &[String]) -> Vec<String> {
    let contaminated = find_contaminated(doc, extra);
    if contaminated.is_empty() {
        return Vec::new();
    }
    let mut removed = Vec::new();
    doc.retain(|key, _| {
        let hit = contaminated.iter().any(|c| is_same_or_member(key, c));
        if hit {
            removed.push(key.to_string());
        }
        !hit
    });
    removed
}
