//! Flat key/value model of an XMP document.
//!
//! Every stage of the reconcile pipeline works on the same representation:
//! an ordered map from a namespace-qualified key to a value.
//!
//! ```text
//! Xmp.crs.CropTop           = "0.054146"                     (scalar)
//! Xmp.crs.ToneCurvePV2012   = Seq["0, 0", "255, 255"]         (list)
//! Xmp.crs.RetouchAreas      = "type=Seq"                      (composite placeholder)
//! Xmp.crs.RetouchAreas[1]/crs:SpotType = "heal"               (composite member)
//! ```
//!
//! Keys follow the `Xmp.<prefix>.<field>` shape used by exiv2-based tools, so
//! key lists copied from those tools (tag whitelists, date field lists) work
//! unchanged. Composite values (structs, arrays of structs) have no flat
//! representation; the reader emits a [placeholder](STRUCT_PLACEHOLDER) for the
//! composite itself plus one path-like key per member. The
//! [sanitizer](crate::sanitize) removes both before anything is merged.
//!
//! Insertion order is preserved and re-inserting an existing key replaces its
//! value in place, so a document read from disk and written back keeps its
//! field order.

use indexmap::IndexMap;

/// Leading segment shared by every document key.
pub const KEY_ROOT: &str = "Xmp";

/// Placeholder emitted for a struct-valued property.
pub const STRUCT_PLACEHOLDER: &str = "type=Struct";

/// Placeholders for composite values, one per container shape.
pub const PLACEHOLDERS: [&str; 4] = [STRUCT_PLACEHOLDER, "type=Seq", "type=Bag", "type=Alt"];

/// Well-known XMP namespace URIs, used when a document references a prefix
/// it never declared (e.g. a translated `crs` document built from scratch).
pub const KNOWN_NAMESPACES: &[(&str, &str)] = &[
    ("aux", "http://ns.adobe.com/exif/1.0/aux/"),
    ("crs", "http://ns.adobe.com/camera-raw-settings/1.0/"),
    ("darktable", "http://darktable.sf.net/"),
    ("dc", "http://purl.org/dc/elements/1.1/"),
    ("digiKam", "http://www.digikam.org/ns/1.0/"),
    ("exif", "http://ns.adobe.com/exif/1.0/"),
    ("exifEX", "http://cipa.jp/exif/1.0/"),
    ("lr", "http://ns.adobe.com/lightroom/1.0/"),
    ("photoshop", "http://ns.adobe.com/photoshop/1.0/"),
    ("tiff", "http://ns.adobe.com/tiff/1.0/"),
    ("xmp", "http://ns.adobe.com/xap/1.0/"),
    ("xmpMM", "http://ns.adobe.com/xap/1.0/mm/"),
];

/// Look up the URI of a well-known namespace prefix.
pub fn known_namespace(prefix: &str) -> Option<&'static str> {
    KNOWN_NAMESPACES
        .iter()
        .find(|(p, _)| *p == prefix)
        .map(|(_, uri)| *uri)
}

/// Build a document key from a namespace prefix and a field name.
///
/// `key("crs", "CropTop")` → `"Xmp.crs.CropTop"`
pub fn key(prefix: &str, field: &str) -> String {
    format!("{KEY_ROOT}.{prefix}.{field}")
}

/// Split a document key into `(prefix, field)`.
///
/// The field part may itself contain dots or composite paths
/// (`RetouchAreas[1]/crs:SpotType`); only the first two separators count.
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    let rest = key.strip_prefix(KEY_ROOT)?.strip_prefix('.')?;
    let (prefix, field) = rest.split_once('.')?;
    if prefix.is_empty() || field.is_empty() {
        return None;
    }
    Some((prefix, field))
}

/// True when `key` is `parent` itself or one of its composite members
/// (`parent[1]`, `parent/ns:Field`, `parent[2]/ns:Field`).
pub fn is_same_or_member(key: &str, parent: &str) -> bool {
    match key.strip_prefix(parent) {
        Some("") => true,
        Some(rest) => rest.starts_with('[') || rest.starts_with('/'),
        None => false,
    }
}

/// XMP container kind of a list value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListKind {
    /// Ordered array (`rdf:Seq`).
    Seq,
    /// Unordered array (`rdf:Bag`).
    Bag,
    /// Alternatives, typically language variants (`rdf:Alt`).
    Alt,
}

impl ListKind {
    /// The `rdf:` element name of the container.
    pub fn element_name(self) -> &'static str {
        match self {
            ListKind::Seq => "rdf:Seq",
            ListKind::Bag => "rdf:Bag",
            ListKind::Alt => "rdf:Alt",
        }
    }

    /// Placeholder used when the container holds composite items.
    pub fn placeholder(self) -> &'static str {
        match self {
            ListKind::Seq => PLACEHOLDERS[1],
            ListKind::Bag => PLACEHOLDERS[2],
            ListKind::Alt => PLACEHOLDERS[3],
        }
    }

    /// Parse a qualified container element name.
    pub fn from_element_name(name: &str) -> Option<Self> {
        match name {
            "rdf:Seq" => Some(ListKind::Seq),
            "rdf:Bag" => Some(ListKind::Bag),
            "rdf:Alt" => Some(ListKind::Alt),
            _ => None,
        }
    }
}

/// A single metadata value: a scalar or an ordered list of scalars.
#[derive(Debug, Clone, PartialEq)]
pub enum XmpValue {
    Text(String),
    List(ListKind, Vec<String>),
}

impl XmpValue {
    /// Scalar value from anything string-like.
    pub fn text(value: impl Into<String>) -> Self {
        XmpValue::Text(value.into())
    }

    /// Ordered list (`rdf:Seq`) from string-like items.
    pub fn seq<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        XmpValue::List(ListKind::Seq, items.into_iter().map(Into::into).collect())
    }

    /// Scalar value for a number, rendered the way XMP writers do
    /// (`1.0` → `"1"`, `0.25` → `"0.25"`).
    pub fn number(value: f64) -> Self {
        XmpValue::Text(value.to_string())
    }

    /// Scalar value for a real-valued field, with the fixed six decimals
    /// Lightroom writes (`1.0` → `"1.000000"`).
    pub fn decimal(value: f64) -> Self {
        XmpValue::Text(format!("{value:.6}"))
    }

    /// The scalar text, if this is a scalar.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            XmpValue::Text(s) => Some(s),
            XmpValue::List(..) => None,
        }
    }

    /// The scalar parsed as a number, if it is one.
    pub fn as_f64(&self) -> Option<f64> {
        self.as_text().and_then(|s| s.trim().parse().ok())
    }

    /// True when the value is one of the composite [`PLACEHOLDERS`].
    pub fn is_placeholder(&self) -> bool {
        self.as_text().is_some_and(|s| PLACEHOLDERS.contains(&s))
    }
}

/// Ordered, duplicate-free map of metadata keys to values, plus the
/// namespace declarations the document was read with.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmpDocument {
    entries: IndexMap<String, XmpValue>,
    namespaces: IndexMap<String, String>,
}

impl XmpDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a document from `(key, value)` pairs.
    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, XmpValue)>,
        K: Into<String>,
    {
        let mut doc = Self::new();
        for (k, v) in entries {
            doc.insert(k, v);
        }
        doc
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&XmpValue> {
        self.entries.get(key)
    }

    /// Shortcut for the scalar text stored under `key`.
    pub fn get_text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(XmpValue::as_text)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert or replace a value. Replacing keeps the key's original position.
    pub fn insert(&mut self, key: impl Into<String>, value: XmpValue) -> Option<XmpValue> {
        self.entries.insert(key.into(), value)
    }

    /// Remove a single key, preserving the order of the remaining entries.
    pub fn remove(&mut self, key: &str) -> Option<XmpValue> {
        self.entries.shift_remove(key)
    }

    /// Remove `key` and every composite member below it. Returns the removed keys.
    pub fn remove_with_members(&mut self, key: &str) -> Vec<String> {
        let removed: Vec<String> = self
            .entries
            .keys()
            .filter(|k| is_same_or_member(k, key))
            .cloned()
            .collect();
        self.entries.retain(|k, _| !is_same_or_member(k, key));
        removed
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&str, &XmpValue) -> bool) {
        self.entries.retain(|k, v| keep(k, v));
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &XmpValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Copy every entry of `other` on top of this document (last write wins
    /// per key) and adopt namespace declarations this document lacks.
    pub fn overlay(&mut self, other: &XmpDocument) {
        for (k, v) in other.iter() {
            self.insert(k, v.clone());
        }
        self.adopt_namespaces(other);
    }

    /// Namespace declarations as `(prefix, uri)` in declaration order.
    pub fn namespaces(&self) -> impl Iterator<Item = (&str, &str)> {
        self.namespaces.iter().map(|(p, u)| (p.as_str(), u.as_str()))
    }

    /// Declare a namespace. The first declaration of a prefix wins.
    pub fn declare_namespace(&mut self, prefix: impl Into<String>, uri: impl Into<String>) {
        self.namespaces.entry(prefix.into()).or_insert_with(|| uri.into());
    }

    /// Resolve a prefix from this document's declarations, then the
    /// well-known table.
    pub fn namespace_uri(&self, prefix: &str) -> Option<&str> {
        self.namespaces
            .get(prefix)
            .map(String::as_str)
            .or_else(|| known_namespace(prefix))
    }

    /// Adopt namespace declarations from another document.
    pub fn adopt_namespaces(&mut self, other: &XmpDocument) {
        for (prefix, uri) in other.namespaces() {
            self.declare_namespace(prefix, uri);
        }
    }
}

/// A set of changes to apply to a stored document: values to write and keys
/// to delete outright.
///
/// Deletion is an explicit marker, distinct from writing an empty or `"None"`
/// string: the key (and its composite members) disappears from the file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmpPatch {
    pub set: XmpDocument,
    pub delete: Vec<String>,
}

impl XmpPatch {
    /// A patch that only writes values.
    pub fn from_document(set: XmpDocument) -> Self {
        Self {
            set,
            delete: Vec::new(),
        }
    }

    /// Mark a key for deletion, dropping any pending write to it.
    pub fn mark_deleted(&mut self, key: impl Into<String>) {
        let key = key.into();
        self.set.remove(&key);
        if !self.delete.contains(&key) {
            self.delete.push(key);
        }
    }

    /// Apply deletions, then writes, to `doc`.
    pub fn apply_to(&self, doc: &mut XmpDocument) {
        for key in &self.delete {
            doc.remove_with_members(key);
        }
        doc.overlay(&self.set);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_and_split_key_agree() {
        let k = key("crs", "CropTop");
        assert_eq!(k, "Xmp.crs.CropTop");
        assert_eq!(split_key(&k), Some(("crs", "CropTop")));
    }

    #[test]
    fn split_key_keeps_composite_path_in_field() {
        assert_eq!(
            split_key("Xmp.crs.RetouchAreas[1]/crs:SpotType"),
            Some(("crs", "RetouchAreas[1]/crs:SpotType"))
        );
    }

    #[test]
    fn split_key_rejects_foreign_shapes() {
        assert_eq!(split_key("Exif.Photo.DateTimeOriginal"), None);
        assert_eq!(split_key("Xmp.crs"), None);
        assert_eq!(split_key("Xmp..Field"), None);
    }

    #[test]
    fn member_matching_respects_boundaries() {
        let parent = "Xmp.crs.ToneCurve";
        assert!(is_same_or_member("Xmp.crs.ToneCurve", parent));
        assert!(is_same_or_member("Xmp.crs.ToneCurve[2]", parent));
        assert!(is_same_or_member("Xmp.crs.ToneCurve/crs:Name", parent));
        assert!(!is_same_or_member("Xmp.crs.ToneCurvePV2012", parent));
    }

    #[test]
    fn insert_replaces_in_place() {
        let mut doc = XmpDocument::new();
        doc.insert("Xmp.a.One", XmpValue::text("1"));
        doc.insert("Xmp.a.Two", XmpValue::text("2"));
        doc.insert("Xmp.a.One", XmpValue::text("uno"));

        let keys: Vec<&str> = doc.keys().collect();
        assert_eq!(keys, vec!["Xmp.a.One", "Xmp.a.Two"]);
        assert_eq!(doc.get_text("Xmp.a.One"), Some("uno"));
    }

    #[test]
    fn remove_preserves_order() {
        let mut doc = XmpDocument::from_entries([
            ("Xmp.a.One", XmpValue::text("1")),
            ("Xmp.a.Two", XmpValue::text("2")),
            ("Xmp.a.Three", XmpValue::text("3")),
        ]);
        doc.remove("Xmp.a.Two");
        let keys: Vec<&str> = doc.keys().collect();
        assert_eq!(keys, vec!["Xmp.a.One", "Xmp.a.Three"]);
    }

    #[test]
    fn remove_with_members_takes_children() {
        let mut doc = XmpDocument::from_entries([
            ("Xmp.crs.Look", XmpValue::text(STRUCT_PLACEHOLDER)),
            ("Xmp.crs.Look/crs:Name", XmpValue::text("Vivid")),
            ("Xmp.crs.LookAmount", XmpValue::text("1")),
        ]);
        let removed = doc.remove_with_members("Xmp.crs.Look");
        assert_eq!(removed, vec!["Xmp.crs.Look", "Xmp.crs.Look/crs:Name"]);
        assert!(doc.contains_key("Xmp.crs.LookAmount"));
    }

    #[test]
    fn number_rendering() {
        assert_eq!(XmpValue::number(1.0), XmpValue::text("1"));
        assert_eq!(XmpValue::number(0.0), XmpValue::text("0"));
        assert_eq!(XmpValue::number(0.25), XmpValue::text("0.25"));
        assert_eq!(XmpValue::decimal(1.0), XmpValue::text("1.000000"));
        assert_eq!(XmpValue::decimal(0.0), XmpValue::text("0.000000"));
        assert_eq!(XmpValue::text(" 0.5 ").as_f64(), Some(0.5));
    }

    #[test]
    fn placeholders_detected() {
        assert!(XmpValue::text("type=Struct").is_placeholder());
        assert!(XmpValue::text("type=Bag").is_placeholder());
        assert!(!XmpValue::text("type=Other").is_placeholder());
        assert!(!XmpValue::seq(["type=Seq"]).is_placeholder());
    }

    #[test]
    fn namespace_lookup_falls_back_to_known_table() {
        let mut doc = XmpDocument::new();
        doc.declare_namespace("foo", "http://example.com/foo/");
        assert_eq!(doc.namespace_uri("foo"), Some("http://example.com/foo/"));
        assert_eq!(
            doc.namespace_uri("crs"),
            Some("http://ns.adobe.com/camera-raw-settings/1.0/")
        );
        assert_eq!(doc.namespace_uri("nope"), None);
    }

    #[test]
    fn first_namespace_declaration_wins() {
        let mut doc = XmpDocument::new();
        doc.declare_namespace("a", "http://first/");
        doc.declare_namespace("a", "http://second/");
        assert_eq!(doc.namespace_uri("a"), Some("http://first/"));
    }

    #[test]
    fn patch_deletes_then_sets() {
        let mut doc = XmpDocument::from_entries([
            ("Xmp.xmp.Label", XmpValue::text("None")),
            ("Xmp.crs.Exposure2012", XmpValue::text("0")),
        ]);
        let mut patch = XmpPatch::from_document(XmpDocument::from_entries([(
            "Xmp.crs.Exposure2012",
            XmpValue::text("0.3"),
        )]));
        patch.mark_deleted("Xmp.xmp.Label");
        patch.apply_to(&mut doc);

        assert!(!doc.contains_key("Xmp.xmp.Label"));
        assert_eq!(doc.get_text("Xmp.crs.Exposure2012"), Some("0.3"));
    }

    #[test]
    fn mark_deleted_drops_pending_write() {
        let mut patch = XmpPatch::from_document(XmpDocument::from_entries([(
            "Xmp.xmp.Label",
            XmpValue::text("None"),
        )]));
        patch.mark_deleted("Xmp.xmp.Label");
        patch.mark_deleted("Xmp.xmp.Label");
        assert!(patch.set.is_empty());
        assert_eq!(patch.delete, vec!["Xmp.xmp.Label"]);
    }
}
