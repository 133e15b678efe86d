//! Read and update metadata documents on disk.
//!
//! The [`MetadataStore`] trait is the seam between the pipeline and the file
//! format: read a flat view, write one back, and apply a [patch](XmpPatch)
//! (deletions first, then values). [`XmpFileStore`] is the production
//! implementation for standalone `.xmp` files.
//!
//! Files are replaced atomically: the new content goes to a temporary file in
//! the same directory, which is then renamed over the destination.

use super::packet::{self, XmpError};
use crate::document::{XmpDocument, XmpPatch};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Reads and writes flat metadata documents.
pub trait MetadataStore: Sync {
    /// Read the flat key/value view of a file's metadata.
    fn read(&self, path: &Path) -> Result<XmpDocument, XmpError>;

    /// Replace the file's metadata with `doc`.
    fn write(&self, path: &Path, doc: &XmpDocument) -> Result<(), XmpError>;

    /// Apply deletions and updates, persisting them to the same file.
    ///
    /// The default goes through the flat view, so composites are lost;
    /// implementations that can edit in place should override it.
    fn apply(&self, path: &Path, patch: &XmpPatch) -> Result<(), XmpError> {
        let mut doc = self.read(path)?;
        patch.apply_to(&mut doc);
        self.write(path, &doc)
    }
}

/// Standalone `.xmp` sidecar files.
#[derive(Debug, Clone, Copy, Default)]
pub struct XmpFileStore;

impl XmpFileStore {
    pub fn new() -> Self {
        Self
    }
}

impl MetadataStore for XmpFileStore {
    fn read(&self, path: &Path) -> Result<XmpDocument, XmpError> {
        let bytes = std::fs::read(path)?;
        let text = String::from_utf8_lossy(&bytes);
        packet::parse(text.trim_matches('\0'))
    }

    fn write(&self, path: &Path, doc: &XmpDocument) -> Result<(), XmpError> {
        replace_file(path, &packet::serialize(doc)?)?;
        Ok(())
    }

    /// Edits the stored packet; properties the patch does not name keep
    /// their exact XML.
    fn apply(&self, path: &Path, patch: &XmpPatch) -> Result<(), XmpError> {
        let bytes = std::fs::read(path)?;
        let text = String::from_utf8_lossy(&bytes);
        let xml = packet::patch(text.trim_matches('\0'), patch)?;
        replace_file(path, &xml)?;
        Ok(())
    }
}

/// Write `contents` next to `path`, then rename it into place. An existing
/// file's permissions carry over.
pub fn replace_file(path: &Path, contents: &str) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    if let Ok(meta) = std::fs::metadata(path) {
        tmp.as_file().set_permissions(meta.permissions())?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
