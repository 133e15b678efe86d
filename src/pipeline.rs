//! Per-asset reconcile pass and the batch loop around it.
//!
//! ## Per-asset stages
//!
//! ```text
//! catalog row ──► decode + translate develop settings
//!            └──► extract slots (original, database, primary, secondary)
//!                   │  each: scratch copy → re-read → sanitize
//!                   ▼
//!                 merge (fixed precedence, translated on top)
//!                   ▼
//!                 commit to <stem>.xmp (crop repair, write, re-read, verify)
//! ```
//!
//! The stage order is fixed; each stage consumes the previous one's output.
//! Everything an asset touches lives in its own scratch directory, a
//! [`tempfile::TempDir`] removed on every exit path, panics included.
//!
//! ## Errors
//!
//! Fatal problems for one asset are [`AssetError`]s: a malformed develop
//! payload, an odd-length curve, an unparseable extraction, I/O. Everything
//! else is a [`Diagnostic`] on the [`AssetReport`]. The batch loop is the only
//! place asset errors are caught; it logs them with the asset identity and
//! moves on, then tallies everything into a [`BatchSummary`].
//!
//! ## Parallelism
//!
//! Assets share nothing but the read-only [`Settings`], the extractor handle
//! and the log. With more than one worker the batch runs on the global rayon
//! pool (sized in `main` from `processing.max_workers`); results come back in
//! input order either way.

use crate::catalog::{CatalogError, CatalogRecord, SidecarPaths};
use crate::config::ReconcileConfig;
use crate::crop::{CropError, CropField, CropProposal};
use crate::develop::{self, DecodeError};
use crate::document::XmpPatch;
use crate::extract::{self, ExtractedSource};
use crate::merge::{self, SlotDocuments, SourceSlot};
use crate::sanitize;
use crate::translate::{self, TagWhitelist, TranslateError};
use crate::writer::{self, CommitOutcome, CommitRequest, WriteBranch};
use crate::xmp::{ExtractError, MetadataStore, RawExtractor, XmpError};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Immutable run settings, passed explicitly to every asset.
#[derive(Debug, Clone)]
pub struct Settings {
    pub root: PathBuf,
    pub whitelist: TagWhitelist,
    pub default_process_version: String,
    pub curve_separator: String,
    pub scratch_root: PathBuf,
    pub strict: bool,
    pub mandatory: Vec<SourceSlot>,
    pub dry_run: bool,
}

impl Settings {
    pub fn from_config(config: &ReconcileConfig, whitelist: TagWhitelist) -> Self {
        Self {
            root: config.root_path.clone(),
            whitelist,
            default_process_version: config.default_process_version.clone(),
            curve_separator: config.curves.separator.clone(),
            scratch_root: config.effective_scratch_root(),
            strict: config.sources.strict,
            mandatory: config.sources.mandatory.clone(),
            dry_run: config.dry_run,
        }
    }

    fn is_mandatory(&self, slot: SourceSlot) -> bool {
        self.mandatory.contains(&slot)
    }
}

#[derive(Error, Debug)]
pub enum AssetError {
    #[error("{0}")]
    Catalog(#[from] CatalogError),
    #[error("develop settings: {0}")]
    Decode(#[from] DecodeError),
    #[error("translation: {0}")]
    Translate(#[from] TranslateError),
    #[error("extraction: {0}")]
    Extract(#[from] ExtractError),
    #[error("sidecar: {0}")]
    Xmp(#[from] XmpError),
    #[error("crop proposal: {0}")]
    Crop(#[from] CropError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("mandatory {slot} source missing: {path}")]
    MissingSource { slot: SourceSlot, path: PathBuf },
}

/// Non-fatal finding for one asset.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// A source file did not exist; the slot was left empty.
    SourceMissing { slot: SourceSlot, path: PathBuf },
    /// A composite entry was removed. `slot` is `None` for keys found in the
    /// stored destination during commit.
    ContaminatedField {
        slot: Option<SourceSlot>,
        key: String,
    },
    /// Required crop fields were missing before the write. `filled` got
    /// defaults; `unresolved` have none.
    CropIncomplete {
        filled: Vec<CropField>,
        unresolved: BTreeSet<CropField>,
    },
    /// The re-read sidecar still lacks crop fields after correction.
    WriteVerificationMismatch { missing: BTreeSet<CropField> },
}

/// Result of one successful asset pass.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetReport {
    pub asset: PathBuf,
    pub destination: PathBuf,
    pub branch: WriteBranch,
    pub diagnostics: Vec<Diagnostic>,
}

impl AssetReport {
    pub fn has_mismatch(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::WriteVerificationMismatch { .. }))
    }
}

/// One asset's entry in a batch.
#[derive(Debug)]
pub struct AssetOutcome {
    pub asset: PathBuf,
    pub result: Result<AssetReport, AssetError>,
}

/// Tally of a batch run, in input order.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub outcomes: Vec<AssetOutcome>,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.reports().count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.succeeded()
    }

    pub fn created(&self) -> usize {
        self.reports().filter(|r| r.branch == WriteBranch::Create).count()
    }

    pub fn updated(&self) -> usize {
        self.reports().filter(|r| r.branch == WriteBranch::Update).count()
    }

    pub fn verification_mismatches(&self) -> usize {
        self.reports().filter(|r| r.has_mismatch()).count()
    }

    pub fn reports(&self) -> impl Iterator<Item = &AssetReport> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&Path, &AssetError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.asset.as_path(), e)))
    }
}

/// Runs asset passes against one extractor and one store.
pub struct Reconciler<'a, E, S> {
    settings: &'a Settings,
    extractor: &'a E,
    store: &'a S,
}

impl<'a, E: RawExtractor, S: MetadataStore> Reconciler<'a, E, S> {
    pub fn new(settings: &'a Settings, extractor: &'a E, store: &'a S) -> Self {
        Self {
            settings,
            extractor,
            store,
        }
    }

    fn scratch_dir(&self) -> Result<TempDir, std::io::Error> {
        std::fs::create_dir_all(&self.settings.scratch_root)?;
        tempfile::Builder::new()
            .prefix("xmp-reconcile-")
            .tempdir_in(&self.settings.scratch_root)
    }

    /// Reconcile one catalog row into its primary sidecar.
    pub fn reconcile_asset(&self, record: &CatalogRecord) -> Result<AssetReport, AssetError> {
        record.validate()?;
        let settings = self.settings;
        let asset = record.asset_path(&settings.root);
        let sidecars = SidecarPaths::for_asset(&asset);
        let scratch = self.scratch_dir()?;
        let mut diagnostics = Vec::new();

        let decoded = develop::decode_develop_settings(&record.develop_settings)?;
        let fallback = record
            .process_version
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(&settings.default_process_version);
        let translated = translate::translate(
            &decoded,
            &settings.whitelist,
            fallback,
            &settings.curve_separator,
        )?;

        let mut slots = SlotDocuments::new();
        let mut original_copy = None;
        let file_slots = [
            (SourceSlot::Original, asset.as_path()),
            (SourceSlot::PrimarySidecar, sidecars.primary.as_path()),
            (SourceSlot::SecondarySidecar, sidecars.secondary.as_path()),
        ];
        for (slot, path) in file_slots {
            let Some(source) = self.extract_file_slot(slot, path, scratch.path(), &mut diagnostics)?
            else {
                continue;
            };
            if slot == SourceSlot::Original {
                original_copy = Some(source.copy.clone());
            }
            self.sanitize_into(&mut slots, source, &mut diagnostics);
        }
        let database =
            extract::extract_database_slot(self.store, &asset, &record.xmp, scratch.path())?;
        self.sanitize_into(&mut slots, database, &mut diagnostics);

        let patch = merge::merge_slots(&slots, &translated, &settings.curve_separator)?;
        debug!(
            asset = %asset.display(),
            sources = slots.present_count(),
            fields = patch.set.len(),
            deletions = patch.delete.len(),
            "merged"
        );

        self.commit(
            &asset,
            &sidecars.primary,
            &patch,
            original_copy.as_deref(),
            scratch.path(),
            diagnostics,
        )
    }

    /// Write an automated crop proposal into the asset's primary sidecar.
    pub fn apply_crop_proposal(&self, proposal: &CropProposal) -> Result<AssetReport, AssetError> {
        proposal.validate()?;
        let asset = self.settings.root.join(&proposal.path);
        let sidecars = SidecarPaths::for_asset(&asset);
        let scratch = self.scratch_dir()?;
        let mut diagnostics = Vec::new();

        let original = self.extract_file_slot(
            SourceSlot::Original,
            &asset,
            scratch.path(),
            &mut diagnostics,
        )?;
        let original_copy = original.as_ref().map(|s| s.copy.clone());
        if let Some(source) = &original {
            for key in sanitize::find_contaminated(&source.document, &[]) {
                diagnostics.push(Diagnostic::ContaminatedField {
                    slot: Some(SourceSlot::Original),
                    key,
                });
            }
        }

        let patch = XmpPatch::from_document(proposal.to_document());
        self.commit(
            &asset,
            &sidecars.primary,
            &patch,
            original_copy.as_deref(),
            scratch.path(),
            diagnostics,
        )
    }

    fn extract_file_slot(
        &self,
        slot: SourceSlot,
        path: &Path,
        scratch: &Path,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<Option<ExtractedSource>, AssetError> {
        let mandatory = self.settings.is_mandatory(slot);
        let source =
            extract::extract_slot(self.extractor, self.store, slot, path, scratch, mandatory)?;
        if source.is_none() {
            if mandatory && self.settings.strict {
                return Err(AssetError::MissingSource {
                    slot,
                    path: path.to_path_buf(),
                });
            }
            diagnostics.push(Diagnostic::SourceMissing {
                slot,
                path: path.to_path_buf(),
            });
        }
        Ok(source)
    }

    fn sanitize_into(
        &self,
        slots: &mut SlotDocuments,
        source: ExtractedSource,
        diagnostics: &mut Vec<Diagnostic>,
    ) {
        let slot = source.slot;
        let mut document = source.document;
        for key in sanitize::sanitize(&mut document, &[]) {
            debug!(slot = %slot, key = %key, "removed contaminated field");
            diagnostics.push(Diagnostic::ContaminatedField {
                slot: Some(slot),
                key,
            });
        }
        slots.insert(slot, document);
    }

    fn commit(
        &self,
        asset: &Path,
        destination: &Path,
        patch: &XmpPatch,
        original_copy: Option<&Path>,
        scratch: &Path,
        mut diagnostics: Vec<Diagnostic>,
    ) -> Result<AssetReport, AssetError> {
        let outcome = writer::commit(
            self.store,
            &CommitRequest {
                patch,
                destination,
                original_copy,
                scratch,
                dry_run: self.settings.dry_run,
            },
        )?;
        record_commit(&outcome, &mut diagnostics);

        info!(
            asset = %asset.display(),
            branch = %outcome.branch,
            dry_run = self.settings.dry_run,
            "sidecar committed"
        );
        Ok(AssetReport {
            asset: asset.to_path_buf(),
            destination: destination.to_path_buf(),
            branch: outcome.branch,
            diagnostics,
        })
    }

    /// Reconcile every row; asset failures are logged and tallied.
    pub fn reconcile_batch(&self, records: &[CatalogRecord], workers: usize) -> BatchSummary {
        let run = |record: &CatalogRecord| {
            let asset = record.asset_path(&self.settings.root);
            let result = self.reconcile_asset(record);
            log_failure(&asset, record.id_local.to_string().as_str(), &result);
            AssetOutcome { asset, result }
        };
        let outcomes: Vec<AssetOutcome> = if workers > 1 {
            records.par_iter().map(run).collect()
        } else {
            records.iter().map(run).collect()
        };
        BatchSummary { outcomes }
    }

    /// Apply every crop proposal; failures are logged and tallied.
    pub fn apply_crop_batch(&self, proposals: &[CropProposal], workers: usize) -> BatchSummary {
        let run = |proposal: &CropProposal| {
            let asset = self.settings.root.join(&proposal.path);
            let result = self.apply_crop_proposal(proposal);
            log_failure(&asset, "crop", &result);
            AssetOutcome { asset, result }
        };
        let outcomes: Vec<AssetOutcome> = if workers > 1 {
            proposals.par_iter().map(run).collect()
        } else {
            proposals.iter().map(run).collect()
        };
        BatchSummary { outcomes }
    }
}

fn record_commit(outcome: &CommitOutcome, diagnostics: &mut Vec<Diagnostic>) {
    for key in &outcome.contaminated {
        diagnostics.push(Diagnostic::ContaminatedField {
            slot: None,
            key: key.clone(),
        });
    }
    if !outcome.repaired.is_empty() || !outcome.unresolved.is_empty() {
        diagnostics.push(Diagnostic::CropIncomplete {
            filled: outcome.repaired.clone(),
            unresolved: outcome.unresolved.clone(),
        });
    }
    if !outcome.verified() {
        diagnostics.push(Diagnostic::WriteVerificationMismatch {
            missing: outcome.mismatched.clone(),
        });
    }
}

fn log_failure(asset: &Path, id: &str, result: &Result<AssetReport, AssetError>) {
    match result {
        Ok(report) if report.has_mismatch() => {
            warn!(asset = %asset.display(), id, "sidecar written but verification failed");
        }
        Ok(_) => {}
        Err(err) => error!(asset = %asset.display(), id, error = %err, "asset failed"),
    }
}
