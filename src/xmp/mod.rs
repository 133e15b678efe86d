//! XMP file access.
//!
//! | Concern | Implementation |
//! |---|---|
//! | **Packet ⇄ document** | [`packet::parse`] / [`packet::serialize`] (`quick-xml`) |
//! | **Sidecar read/update** | [`MetadataStore`] trait + [`XmpFileStore`] |
//! | **Raw extraction** | [`RawExtractor`] trait + [`NativeExtractor`] / [`ExifTool`] |
//!
//! Everything above this module works on [`XmpDocument`](crate::document::XmpDocument)
//! only; nothing else touches XML.

pub mod exiftool;
pub mod extractor;
pub mod packet;
pub mod store;

pub use exiftool::ExifTool;
pub use extractor::{ExtractError, NativeExtractor, RawExtractor};
pub use packet::XmpError;
pub use store::{MetadataStore, XmpFileStore, replace_file};
