//! XMP packet ⇄ flat [`XmpDocument`].
//!
//! ## Reading
//!
//! The packet is parsed into a small element tree, then every
//! `rdf:Description` under `rdf:RDF` is flattened:
//!
//! | RDF shape | Document entry |
//! |---|---|
//! | `crs:CropTop="0.1"` attribute | `Xmp.crs.CropTop = "0.1"` |
//! | `<crs:Name>text</crs:Name>` | `Xmp.crs.Name = "text"` |
//! | `<dc:subject><rdf:Bag><rdf:li>a</rdf:li>…` | `Xmp.dc.subject = Bag["a", …]` |
//! | container of structs | `Key = "type=Seq"`, `Key[1] = "type=Struct"`, `Key[1]/ns:F = …` |
//! | struct (`rdf:parseType="Resource"`, nested Description) | `Key = "type=Struct"`, `Key/ns:F = …` |
//! | `rdf:resource="…"` | `Key = "…"` |
//!
//! Namespace declarations from any element are kept on the document (first
//! declaration of a prefix wins); `x`, `rdf` and `xml` are structural and
//! not recorded.
//!
//! ## Writing
//!
//! One `rdf:Description`, scalars as attributes, lists as child containers.
//! Composite placeholders and member paths are skipped, so a document that
//! went through the sanitizer and one that did not serialize identically
//! with respect to composites. Only namespaces actually used are declared.
//!
//! ## Patching
//!
//! [`patch`] edits a stored packet without flattening it: properties the
//! patch names are dropped from every top-level `rdf:Description` and the
//! new values are added to the first one. Everything else, composites
//! included, is copied through event by event.

use crate::document::{self, ListKind, XmpDocument, XmpPatch, XmpValue, STRUCT_PLACEHOLDER};
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum XmpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("XML attribute error: {0}")]
    Attr(#[from] quick_xml::events::attributes::AttrError),
    #[error("malformed XMP packet: {0}")]
    Malformed(String),
    #[error("key {0} cannot be written as an XMP property")]
    InvalidKey(String),
    #[error("no namespace URI known for prefix {0:?}")]
    UnknownNamespace(String),
}

const RDF_NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
const X_NS: &str = "adobe:ns:meta/";
const PACKET_ID: &str = "W5M0MpCehiHzreSzNTczkc9d";
const STRUCTURAL_PREFIXES: [&str; 3] = ["x", "rdf", "xml"];
const ROOT_NAMES: [&str; 3] = ["x:xmpmeta", "x:xapmeta", "rdf:RDF"];

// ---------------------------------------------------------------------------
// Element tree
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Element {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Qualified attributes that carry property values.
    fn property_attrs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs
            .iter()
            .filter(|(k, _)| is_property_name(k))
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn is_simple(&self) -> bool {
        self.children.is_empty() && self.property_attrs().next().is_none()
    }
}

/// `prefix:Name` where prefix is not structural.
fn is_property_name(name: &str) -> bool {
    match name.split_once(':') {
        Some((prefix, local)) => {
            prefix != "xmlns" && !local.is_empty() && !STRUCTURAL_PREFIXES.contains(&prefix)
        }
        None => false,
    }
}

fn qualified_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn start_element(e: &BytesStart<'_>) -> Result<Element, XmpError> {
    let name = qualified_name(e);
    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr.unescape_value()?.to_string();
        attrs.push((key, value));
    }
    Ok(Element {
        name,
        attrs,
        ..Element::default()
    })
}

fn parse_tree(xml: &str) -> Result<Element, XmpError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event()? {
            Event::Start(ref e) => stack.push(start_element(e)?),
            Event::Empty(ref e) => {
                let el = start_element(e)?;
                attach(&mut stack, &mut root, el);
            }
            Event::End(_) => {
                let el = stack
                    .pop()
                    .ok_or_else(|| XmpError::Malformed("unbalanced end tag".into()))?;
                attach(&mut stack, &mut root, el);
            }
            Event::Text(ref e) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&e.unescape()?);
                }
            }
            Event::CData(e) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(XmpError::Malformed("document ends inside an element".into()));
    }
    let root = root.ok_or_else(|| XmpError::Malformed("no root element".into()))?;
    if !ROOT_NAMES.contains(&root.name.as_str()) {
        return Err(XmpError::Malformed(format!(
            "unexpected root element <{}>",
            root.name
        )));
    }
    Ok(root)
}

/// Attach a finished element to its parent, or make it the root. Content
/// after the first root element is ignored.
fn attach(stack: &mut [Element], root: &mut Option<Element>, el: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(el),
        None => {
            if root.is_none() {
                *root = Some(el);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Flattening
// ---------------------------------------------------------------------------

/// Parse an XMP packet into a flat document.
pub fn parse(xml: &str) -> Result<XmpDocument, XmpError> {
    let root = parse_tree(xml)?;
    let mut doc = XmpDocument::new();
    collect_namespaces(&root, &mut doc);

    let mut descriptions = Vec::new();
    find_descriptions(&root, &mut descriptions);
    for desc in descriptions {
        for (name, value) in desc.property_attrs() {
            if let Some(key) = property_key(name) {
                doc.insert(key, XmpValue::text(value));
            }
        }
        for child in &desc.children {
            if let Some(key) = property_key(&child.name) {
                read_property(&key, child, &mut doc);
            }
        }
    }
    Ok(doc)
}

fn collect_namespaces(el: &Element, doc: &mut XmpDocument) {
    for (k, v) in &el.attrs {
        if let Some(prefix) = k.strip_prefix("xmlns:") {
            if !STRUCTURAL_PREFIXES.contains(&prefix) {
                doc.declare_namespace(prefix, v.as_str());
            }
        }
    }
    for child in &el.children {
        collect_namespaces(child, doc);
    }
}

/// Top-level `rdf:Description` elements (not those nested inside properties).
fn find_descriptions<'a>(el: &'a Element, out: &mut Vec<&'a Element>) {
    if el.name == "rdf:Description" {
        out.push(el);
        return;
    }
    for child in &el.children {
        find_descriptions(child, out);
    }
}

/// `crs:CropTop` → `Xmp.crs.CropTop`
fn property_key(qualified: &str) -> Option<String> {
    if !is_property_name(qualified) {
        return None;
    }
    let (prefix, local) = qualified.split_once(':')?;
    Some(document::key(prefix, local))
}

fn container(el: &Element) -> Option<(ListKind, &Element)> {
    el.children
        .iter()
        .find_map(|c| ListKind::from_element_name(&c.name).map(|kind| (kind, c)))
}

fn read_property(key: &str, el: &Element, doc: &mut XmpDocument) {
    if let Some(resource) = el.attr("rdf:resource") {
        doc.insert(key, XmpValue::text(resource));
        return;
    }

    if let Some((kind, list)) = container(el) {
        let items: Vec<&Element> = list.children.iter().filter(|c| c.name == "rdf:li").collect();
        if items.iter().all(|li| li.is_simple()) {
            let values = items.iter().map(|li| li.text.clone()).collect();
            doc.insert(key, XmpValue::List(kind, values));
        } else {
            doc.insert(key, XmpValue::text(kind.placeholder()));
            for (i, li) in items.iter().enumerate() {
                read_property(&format!("{key}[{}]", i + 1), li, doc);
            }
        }
        return;
    }

    if el.is_simple() && el.attr("rdf:parseType") != Some("Resource") {
        doc.insert(key, XmpValue::text(el.text.clone()));
        return;
    }

    doc.insert(key, XmpValue::text(STRUCT_PLACEHOLDER));
    read_struct_fields(key, el, doc);
}

fn read_struct_fields(key: &str, el: &Element, doc: &mut XmpDocument) {
    for (name, value) in el.property_attrs() {
        doc.insert(format!("{key}/{name}"), XmpValue::text(value));
    }
    for child in &el.children {
        if child.name == "rdf:Description" {
            read_struct_fields(key, child, doc);
        } else if is_property_name(&child.name) {
            read_property(&format!("{key}/{}", child.name), child, doc);
        }
    }
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

/// A flat property ready to write.
struct Property<'a> {
    qualified: String,
    prefix: &'a str,
    value: &'a XmpValue,
}

fn writable_properties(doc: &XmpDocument) -> Result<Vec<Property<'_>>, XmpError> {
    let mut props = Vec::new();
    for (key, value) in doc.iter() {
        if value.is_placeholder() {
            continue;
        }
        let (prefix, field) =
            document::split_key(key).ok_or_else(|| XmpError::InvalidKey(key.to_string()))?;
        if field.contains(['[', '/']) {
            continue;
        }
        if !is_xml_name(prefix) || !is_xml_name(field) || STRUCTURAL_PREFIXES.contains(&prefix) {
            return Err(XmpError::InvalidKey(key.to_string()));
        }
        props.push(Property {
            qualified: format!("{prefix}:{field}"),
            prefix,
            value,
        });
    }
    Ok(props)
}

fn is_xml_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Serialize a document as a complete XMP packet.
pub fn serialize(doc: &XmpDocument) -> Result<String, XmpError> {
    let props = writable_properties(doc)?;

    // Attributes first, then list elements; namespace declarations follow
    // the same order.
    let (texts, lists): (Vec<&Property<'_>>, Vec<&Property<'_>>) = props
        .iter()
        .partition(|p| matches!(p.value, XmpValue::Text(_)));

    let mut prefixes: Vec<&str> = Vec::new();
    for p in texts.iter().chain(lists.iter()) {
        if !prefixes.contains(&p.prefix) {
            prefixes.push(p.prefix);
        }
    }

    let mut out = String::new();
    out.push_str(&format!("<?xpacket begin=\"\u{feff}\" id=\"{PACKET_ID}\"?>\n"));
    out.push_str(&format!(
        "<x:xmpmeta xmlns:x=\"{X_NS}\" x:xmptk=\"{}\">\n",
        env!("CARGO_PKG_NAME")
    ));
    out.push_str(&format!(" <rdf:RDF xmlns:rdf=\"{RDF_NS}\">\n"));
    out.push_str("  <rdf:Description rdf:about=\"\"");
    for prefix in &prefixes {
        let uri = doc
            .namespace_uri(prefix)
            .ok_or_else(|| XmpError::UnknownNamespace(prefix.to_string()))?;
        out.push_str(&format!("\n    xmlns:{prefix}=\"{}\"", escape(uri)));
    }
    for p in &texts {
        if let XmpValue::Text(text) = p.value {
            out.push_str(&format!("\n    {}=\"{}\"", p.qualified, escape(text)));
        }
    }

    if lists.is_empty() {
        out.push_str("/>\n");
    } else {
        out.push_str(">\n");
        for p in lists {
            if let XmpValue::List(kind, items) = p.value {
                write_list(&mut out, &p.qualified, *kind, items);
            }
        }
        out.push_str("  </rdf:Description>\n");
    }

    out.push_str(" </rdf:RDF>\n");
    out.push_str("</x:xmpmeta>\n");
    out.push_str("<?xpacket end=\"w\"?>\n");
    Ok(out)
}

fn write_list(out: &mut String, qualified: &str, kind: ListKind, items: &[String]) {
    let container = kind.element_name();
    out.push_str(&format!("   <{qualified}>\n    <{container}>\n"));
    for (i, item) in items.iter().enumerate() {
        let lang = if kind == ListKind::Alt && i == 0 {
            " xml:lang=\"x-default\""
        } else {
            ""
        };
        out.push_str(&format!("     <rdf:li{lang}>{}</rdf:li>\n", escape(item)));
    }
    out.push_str(&format!("    </{container}>\n   </{qualified}>\n"));
}

// ---------------------------------------------------------------------------
// Patching
// ---------------------------------------------------------------------------

/// Apply `changes` to a stored packet, leaving unnamed properties untouched.
///
/// Only top-level properties can be replaced or deleted; composite member
/// keys in the patch are ignored. Fails when the packet has no
/// `rdf:Description` to receive new values.
pub fn patch(xml: &str, changes: &XmpPatch) -> Result<String, XmpError> {
    let mut namespaces = parse(xml)?;
    namespaces.adopt_namespaces(&changes.set);

    let additions = writable_properties(&changes.set)?;
    let mut dropped: Vec<String> = additions.iter().map(|p| p.qualified.clone()).collect();
    for key in &changes.delete {
        if let Some((prefix, field)) = document::split_key(key) {
            dropped.push(format!("{prefix}:{field}"));
        }
    }

    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Vec::new());
    let mut depth = 0usize;
    let mut description: Option<usize> = None;
    let mut skip: Option<usize> = None;
    let mut pending = true;

    loop {
        let event = reader.read_event()?;

        if let Some(level) = skip {
            match event {
                Event::Start(_) => depth += 1,
                Event::End(_) => {
                    depth = depth.saturating_sub(1);
                    if depth == level {
                        skip = None;
                    }
                }
                Event::Eof => {
                    return Err(XmpError::Malformed("document ends inside an element".into()));
                }
                _ => {}
            }
            continue;
        }

        let property_level = description.is_some_and(|d| depth == d + 1);

        match event {
            Event::Start(e) => {
                let name = qualified_name(&e);
                if description.is_none() && name == "rdf:Description" {
                    let adds = if pending { additions.as_slice() } else { &[] };
                    let start = patched_description(&e, &dropped, adds, &namespaces)?;
                    writer.write_event(Event::Start(start))?;
                    description = Some(depth);
                } else if property_level && dropped.contains(&name) {
                    skip = Some(depth);
                } else {
                    writer.write_event(Event::Start(e))?;
                }
                depth += 1;
            }
            Event::Empty(e) => {
                let name = qualified_name(&e);
                if description.is_none() && name == "rdf:Description" {
                    let adds = if pending { additions.as_slice() } else { &[] };
                    let start = patched_description(&e, &dropped, adds, &namespaces)?;
                    if adds.iter().any(|p| matches!(p.value, XmpValue::List(..))) {
                        writer.write_event(Event::Start(start))?;
                        write_list_additions(writer.get_mut(), adds);
                        writer.write_event(Event::End(BytesEnd::new("rdf:Description")))?;
                    } else {
                        writer.write_event(Event::Empty(start))?;
                    }
                    pending = false;
                } else if !(property_level && dropped.contains(&name)) {
                    writer.write_event(Event::Empty(e))?;
                }
            }
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                if description == Some(depth) {
                    if pending {
                        write_list_additions(writer.get_mut(), &additions);
                        pending = false;
                    }
                    description = None;
                }
                writer.write_event(Event::End(e))?;
            }
            Event::Eof => break,
            other => writer.write_event(other)?,
        }
    }

    if pending && !additions.is_empty() {
        return Err(XmpError::Malformed("no rdf:Description to patch".into()));
    }
    String::from_utf8(writer.into_inner())
        .map_err(|e| XmpError::Malformed(format!("patched packet is not UTF-8: {e}")))
}

/// Copy a description's attributes minus `dropped`, then declare and add the
/// scalar `additions`.
fn patched_description(
    e: &BytesStart<'_>,
    dropped: &[String],
    additions: &[Property<'_>],
    namespaces: &XmpDocument,
) -> Result<BytesStart<'static>, XmpError> {
    let mut start = BytesStart::new(qualified_name(e));
    let mut names = Vec::new();
    for attr in e.attributes() {
        let attr = attr?;
        let name = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        if dropped.contains(&name) {
            continue;
        }
        start.push_attribute(attr);
        names.push(name);
    }

    for p in additions {
        let declaration = format!("xmlns:{}", p.prefix);
        if names.contains(&declaration) {
            continue;
        }
        let uri = namespaces
            .namespace_uri(p.prefix)
            .ok_or_else(|| XmpError::UnknownNamespace(p.prefix.to_string()))?;
        start.push_attribute((declaration.as_str(), uri));
        names.push(declaration);
    }
    for p in additions {
        if let XmpValue::Text(text) = p.value {
            start.push_attribute((p.qualified.as_str(), text.as_str()));
        }
    }
    Ok(start)
}

fn write_list_additions(out: &mut Vec<u8>, additions: &[Property<'_>]) {
    let mut xml = String::new();
    for p in additions {
        if let XmpValue::List(kind, items) = p.value {
            write_list(&mut xml, &p.qualified, *kind, items);
        }
    }
    if !xml.is_empty() {
        out.push(b'\n');
        out.extend_from_slice(xml.as_bytes());
    }
}

fn escape(s: &str) -> std::borrow::Cow<'_, str> {
    quick_xml::escape::escape(s)
}
