//! Pull the raw XMP packet out of an asset or sidecar file.
//!
//! The [`RawExtractor`] trait returns the packet text, or `None` when the
//! file carries no XMP at all. Two implementations ship:
//!
//! - [`NativeExtractor`]: pure Rust, no external process. Handles `.xmp`
//!   sidecars, the JPEG APP1 XMP segment, and a packet scan for everything
//!   else (TIFF-based raw formats embed the packet verbatim).
//! - [`ExifTool`](super::exiftool::ExifTool): a long-lived exiftool process,
//!   for formats where the packet is compressed or split.

use super::packet::XmpError;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("metadata tool failed: {0}")]
    Tool(String),
    #[error("{path}: extracted XMP does not parse: {source}")]
    Unparseable {
        path: PathBuf,
        #[source]
        source: XmpError,
    },
}

/// Extracts raw XMP packet text from files.
pub trait RawExtractor: Sync {
    fn extract_raw(&self, path: &Path) -> Result<Option<String>, ExtractError>;
}

/// In-process extractor.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeExtractor;

impl NativeExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl RawExtractor for NativeExtractor {
    fn extract_raw(&self, path: &Path) -> Result<Option<String>, ExtractError> {
        let bytes = std::fs::read(path)?;
        let is_sidecar = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("xmp"));

        let packet = if is_sidecar {
            Some(bytes.as_slice())
        } else if bytes.starts_with(&[0xFF, 0xD8]) {
            find_jpeg_app1_xmp(&bytes).or_else(|| scan_packet(&bytes))
        } else {
            scan_packet(&bytes)
        };
        Ok(packet.map(|p| String::from_utf8_lossy(p).into_owned()))
    }
}

// ---------------------------------------------------------------------------
// JPEG: APP1 segment with the XMP namespace header
// ---------------------------------------------------------------------------

const XMP_APP1_HEADER: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";

/// Find the XMP payload of a JPEG's APP1 segment.
///
/// Segment layout: `FF E1`, big-endian length (including itself), then the
/// namespace header and the packet.
fn find_jpeg_app1_xmp(data: &[u8]) -> Option<&[u8]> {
    let mut pos = 2;
    while pos + 4 <= data.len() {
        if data[pos] != 0xFF {
            return None;
        }
        let marker = data[pos + 1];
        // SOS: entropy-coded data follows, no more metadata segments
        if marker == 0xDA || marker == 0xD9 {
            return None;
        }
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        let seg_len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        if seg_len < 2 {
            return None;
        }
        let seg_start = pos + 4;
        let seg_end = (pos + 2 + seg_len).min(data.len());
        if marker == 0xE1 {
            if let Some(payload) = data[seg_start..seg_end].strip_prefix(XMP_APP1_HEADER) {
                return Some(payload);
            }
        }
        pos = seg_end;
    }
    None
}

// ---------------------------------------------------------------------------
// Everything else: scan for the packet wrapper
// ---------------------------------------------------------------------------

const META_OPEN: &[u8] = b"<x:xmpmeta";
const META_CLOSE: &[u8] = b"</x:xmpmeta>";

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

/// Locate `<x:xmpmeta …>…</x:xmpmeta>` anywhere in the file.
fn scan_packet(data: &[u8]) -> Option<&[u8]> {
    let start = find(data, META_OPEN, 0)?;
    let end = find(data, META_CLOSE, start)? + META_CLOSE.len();
    Some(&data[start..end])
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Extractor returning canned packets by path and recording each call.
    /// Uses Mutex so it is Sync and works under rayon.
    #[derive(Default)]
    pub struct MockExtractor {
        pub packets: HashMap<PathBuf, Option<String>>,
        pub failures: Vec<PathBuf>,
        pub calls: Mutex<Vec<PathBuf>>,
    }

    impl MockExtractor {
        pub fn with_packet(mut self, path: &Path, packet: Option<&str>) -> Self {
            self.packets
                .insert(path.to_path_buf(), packet.map(str::to_string));
            self
        }

        pub fn failing_on(mut self, path: &Path) -> Self {
            self.failures.push(path.to_path_buf());
            self
        }

        pub fn get_calls(&self) -> Vec<PathBuf> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl RawExtractor for MockExtractor {
        fn extract_raw(&self, path: &Path) -> Result<Option<String>, ExtractError> {
            self.calls.lock().unwrap().push(path.to_path_buf());
            if self.failures.iter().any(|p| p == path) {
                return Err(ExtractError::Tool(format!("mock failure for {}", path.display())));
            }
            Ok(self.packets.get(path).cloned().flatten())
        }
    }

    const PACKET: &str = "<x:xmpmeta xmlns:x=\"adobe:ns:meta/\"><rdf:RDF/></x:xmpmeta>";

    fn jpeg_with_app1(payload: &[u8]) -> Vec<u8> {
        let mut segment = XMP_APP1_HEADER.to_vec();
        segment.extend_from_slice(payload);
        let len = (segment.len() + 2) as u16;

        let mut data = vec![0xFF, 0xD8];
        // APP0 JFIF first, like real files
        data.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x07]);
        data.extend_from_slice(b"JFIF\0");
        data.extend_from_slice(&[0xFF, 0xE1]);
        data.extend_from_slice(&len.to_be_bytes());
        data.extend_from_slice(&segment);
        data.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x02, 0x12, 0x34]);
        data
    }

    #[test]
    fn jpeg_app1_found() {
        let data = jpeg_with_app1(PACKET.as_bytes());
        assert_eq!(find_jpeg_app1_xmp(&data), Some(PACKET.as_bytes()));
    }

    #[test]
    fn jpeg_without_xmp() {
        let data = [0xFF, 0xD8, 0xFF, 0xDA, 0x00, 0x02, 0xFF, 0xD9];
        assert_eq!(find_jpeg_app1_xmp(&data), None);
    }

    #[test]
    fn packet_scan_in_binary() {
        let mut data = vec![0x49, 0x49, 0x2A, 0x00, 0x00, 0xFF];
        data.extend_from_slice(b"<?xpacket begin=\"\"?>");
        data.extend_from_slice(PACKET.as_bytes());
        data.extend_from_slice(&[0x00, 0x13, 0x37]);
        assert_eq!(scan_packet(&data), Some(PACKET.as_bytes()));
        assert_eq!(scan_packet(&[0u8; 64]), None);
    }

    #[test]
    fn native_reads_sidecars_verbatim() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("IMG_0001.XMP");
        std::fs::write(&path, PACKET).unwrap();
        let got = NativeExtractor::new().extract_raw(&path).unwrap();
        assert_eq!(got.as_deref(), Some(PACKET));
    }

    #[test]
    fn native_reads_jpeg() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.jpg");
        std::fs::write(&path, jpeg_with_app1(PACKET.as_bytes())).unwrap();
        let got = NativeExtractor::new().extract_raw(&path).unwrap();
        assert_eq!(got.as_deref(), Some(PACKET));
    }

    #[test]
    fn native_returns_none_without_packet() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.cr2");
        std::fs::write(&path, [0x49, 0x49, 0x2A, 0x00]).unwrap();
        assert_eq!(NativeExtractor::new().extract_raw(&path).unwrap(), None);
    }

    #[test]
    fn mock_records_calls() {
        let path = PathBuf::from("/photos/a.dng");
        let mock = MockExtractor::default().with_packet(&path, Some(PACKET));
        assert_eq!(mock.extract_raw(&path).unwrap().as_deref(), Some(PACKET));
        assert_eq!(mock.get_calls(), vec![path]);
    }
}
