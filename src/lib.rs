//! # xmp-reconcile
//!
//! Reconciles a photo catalog's edit settings, the XMP embedded in each image
//! and the XMP sidecars next to it into one canonical `<stem>.xmp` sidecar,
//! so other tools see the catalog's edits without the catalog.
//!
//! # Architecture: One Pass Per Asset
//!
//! Every catalog row goes through the same fixed sequence, in its own scratch
//! directory:
//!
//! ```text
//! 1. Decode     s = { ... }         →  develop settings   (Lua table literal)
//! 2. Translate  develop settings    →  crs: document      (whitelist, curves, HasCrop)
//! 3. Extract    4 source slots      →  4 documents        (scratch copy + re-read)
//! 4. Sanitize   each document       →  no composite entries
//! 5. Merge      slots + translated  →  patch              (fixed precedence)
//! 6. Commit     patch               →  <stem>.xmp         (crop repair, write, verify)
//! ```
//!
//! Each stage is a plain function over [`document::XmpDocument`]s, so the
//! logic is unit-tested without touching image files; only [`extract`] and
//! [`writer`] go through the I/O traits in [`xmp`].
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`document`] | Flat `Xmp.<prefix>.<Name>` document, values, and patches |
//! | [`develop`] | Decoder for the catalog's `s = { ... }` develop-settings payload |
//! | [`translate`] | Whitelisted develop settings → `crs:` fields; curve normalization |
//! | [`crop`] | Crop completeness rules, defaults, and crop proposals |
//! | [`sanitize`] | Removal of struct/array entries that cannot round-trip |
//! | [`merge`] | Source slots and the fixed-precedence merge |
//! | [`xmp`] | Packet parse/serialize, file store, raw extractors (native, exiftool) |
//! | [`extract`] | Per-slot extraction into scratch with a parse-back check |
//! | [`writer`] | Create/update commit of the destination sidecar, with verification |
//! | [`catalog`] | Catalog export rows and sidecar path conventions |
//! | [`pipeline`] | Per-asset pass, batch loop, diagnostics and summary |
//! | [`check`] | Read-only audit of orientation and darktable history |
//! | [`dates`] | Folder-date correction of sidecar date fields |
//! | [`config`] | `config.toml` loading, merging, and validation |
//! | [`output`] | CLI output formatting for every subcommand |
//!
//! # Design Decisions
//!
//! ## Flat Documents
//!
//! Metadata is handled as an ordered map from `Xmp.<prefix>.<Name>` to a
//! text or list value, the same view exiv2-style tools expose. Composite
//! properties appear as a `type=...` placeholder plus member keys; those are
//! stripped before merging because writing them back would corrupt the
//! structure. Everything that matters for this tool (develop settings,
//! ratings, labels, keywords, dates) is flat.
//!
//! ## Fixed Precedence
//!
//! Sources are merged `original → database → primary → secondary`, with the
//! translated develop settings applied last. A field missing from a later
//! source never erases an earlier value; only an explicit `None` label is
//! turned into a deletion.
//!
//! ## Verify After Write
//!
//! The destination is re-read after every write. Crop fields lost in the
//! round trip are corrected once; anything still missing is a
//! verification mismatch and is reported, never silently accepted.

pub mod catalog;
pub mod check;
pub mod config;
pub mod crop;
pub mod dates;
pub mod develop;
pub mod document;
pub mod extract;
pub mod merge;
pub mod output;
pub mod pipeline;
pub mod sanitize;
pub mod translate;
pub mod writer;
pub mod xmp;

#[cfg(test)]
pub(crate) mod test_helpers;
