//! CLI output formatting for every subcommand.
//!
//! # Asset-First Display
//!
//! Each asset gets one header line naming the image and where its sidecar
//! went, followed by indented detail lines for anything worth a second look.
//! Clean assets are a single line. Paths are shown relative to the library
//! root when they sit under it.
//!
//! # Output Format
//!
//! ## Reconcile / apply-crops
//!
//! ```text
//! 2019/05/IMG_0001.CR2 → 2019/05/IMG_0001.xmp (create)
//!     Missing original: 2019/05/IMG_0001.CR2
//!     Removed crs:Look (secondary_sidecar)
//!     Crop defaults: CropLeft, CropRight
//!     Crop unresolved: ImageWidth
//! 2019/05/IMG_0002.CR2 FAILED
//!     develop settings: malformed payload: …
//!
//! Reconciled 2 assets: 1 created, 0 updated, 1 failed
//! ```
//!
//! ## Check
//!
//! ```text
//! 2019/05/IMG_0001.CR2
//!     sidecar mirrored when it should not be: …
//!
//! Checked 40 images, 1 with errors
//! ```
//!
//! ## Update-dates
//!
//! ```text
//! 2019/05/17/a.xmp: 2021-12-24T18:30:05 → 2019-05-17T18:30:05
//!
//! Updated 1 sidecar, 0 skipped, 0 failed
//! ```
//!
//! # Architecture
//!
//! Each subcommand has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout.

use crate::check::CheckReport;
use crate::dates::DateReport;
use crate::document::split_key;
use crate::pipeline::{AssetReport, BatchSummary, Diagnostic};
use std::path::Path;

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Path relative to `root` when possible.
fn display_path(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

/// `Xmp.crs.Look` → `crs:Look`
fn qualified(key: &str) -> String {
    match split_key(key) {
        Some((prefix, field)) => format!("{prefix}:{field}"),
        None => key.to_string(),
    }
}

fn join_names<T: std::fmt::Display>(items: impl IntoIterator<Item = T>) -> String {
    items
        .into_iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn diagnostic_lines(diagnostic: &Diagnostic, root: &Path) -> Vec<String> {
    let pad = indent(1);
    match diagnostic {
        Diagnostic::SourceMissing { slot, path } => {
            vec![format!("{pad}Missing {slot}: {}", display_path(path, root))]
        }
        Diagnostic::ContaminatedField { slot, key } => match slot {
            Some(slot) => vec![format!("{pad}Removed {} ({slot})", qualified(key))],
            None => vec![format!("{pad}Removed {} (stored sidecar)", qualified(key))],
        },
        Diagnostic::CropIncomplete { filled, unresolved } => {
            let mut lines = Vec::new();
            if !filled.is_empty() {
                lines.push(format!("{pad}Crop defaults: {}", join_names(filled)));
            }
            if !unresolved.is_empty() {
                lines.push(format!("{pad}Crop unresolved: {}", join_names(unresolved)));
            }
            lines
        }
        Diagnostic::WriteVerificationMismatch { missing } => {
            vec![format!("{pad}VERIFY FAILED, still missing: {}", join_names(missing))]
        }
    }
}

/// Header plus detail lines for one successful asset.
pub fn format_asset_report(report: &AssetReport, root: &Path) -> Vec<String> {
    let mut lines = vec![format!(
        "{} → {} ({})",
        display_path(&report.asset, root),
        display_path(&report.destination, root),
        report.branch
    )];
    for diagnostic in &report.diagnostics {
        lines.extend(diagnostic_lines(diagnostic, root));
    }
    lines
}

/// Format a reconcile or apply-crops batch.
pub fn format_batch_summary(summary: &BatchSummary, root: &Path, dry_run: bool) -> Vec<String> {
    let mut lines = Vec::new();
    for outcome in &summary.outcomes {
        match &outcome.result {
            Ok(report) => lines.extend(format_asset_report(report, root)),
            Err(err) => {
                lines.push(format!("{} FAILED", display_path(&outcome.asset, root)));
                lines.push(format!("{}{err}", indent(1)));
            }
        }
    }
    if !lines.is_empty() {
        lines.push(String::new());
    }

    let mut totals = format!(
        "Reconciled {}: {} created, {} updated, {} failed",
        plural(summary.total(), "asset"),
        summary.created(),
        summary.updated(),
        summary.failed()
    );
    let mismatches = summary.verification_mismatches();
    if mismatches > 0 {
        totals.push_str(&format!(", {} with verification mismatches", mismatches));
    }
    if dry_run {
        totals.push_str(" (dry run, nothing written)");
    }
    lines.push(totals);
    lines
}

pub fn print_batch_summary(summary: &BatchSummary, root: &Path, dry_run: bool) {
    for line in format_batch_summary(summary, root, dry_run) {
        println!("{}", line);
    }
}

/// Format a sidecar audit. Only images with problems are listed.
pub fn format_check_report(report: &CheckReport, root: &Path) -> Vec<String> {
    let mut lines = Vec::new();
    for file in report.failures() {
        lines.push(display_path(&file.image, root));
        for problem in &file.problems {
            lines.push(format!("{}{problem}", indent(1)));
        }
    }
    if !lines.is_empty() {
        lines.push(String::new());
    }
    lines.push(format!(
        "Checked {}, {} with errors",
        plural(report.checked(), "image"),
        report.files_with_errors()
    ));
    lines
}

pub fn print_check_report(report: &CheckReport, root: &Path) {
    for line in format_check_report(report, root) {
        println!("{}", line);
    }
}

/// Format a folder-date run.
pub fn format_date_report(report: &DateReport, root: &Path) -> Vec<String> {
    let mut lines = Vec::new();
    for update in report.updates() {
        lines.push(format!(
            "{}: {} → {}",
            display_path(&update.sidecar, root),
            update.before.as_deref().unwrap_or("(no capture time)"),
            update.after
        ));
    }
    for (sidecar, err) in report.failures() {
        lines.push(format!("{} FAILED", display_path(sidecar, root)));
        lines.push(format!("{}{err}", indent(1)));
    }
    if !lines.is_empty() {
        lines.push(String::new());
    }

    let verb = if report.dry_run { "Would update" } else { "Updated" };
    lines.push(format!(
        "{verb} {}, {} skipped, {} failed",
        plural(report.updates().count(), "sidecar"),
        report.skipped(),
        report.failures().count()
    ));
    lines
}

pub fn print_date_report(report: &DateReport, root: &Path) {
    for line in format_date_report(report, root) {
        println!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::{FileCheck, Problem};
    use crate::crop::CropField;
    use crate::dates::{DateError, DateOutcome, DateUpdate};
    use crate::develop::DecodeError;
    use crate::merge::SourceSlot;
    use crate::pipeline::{AssetError, AssetOutcome};
    use crate::writer::WriteBranch;
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    fn root() -> PathBuf {
        PathBuf::from("/lib")
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    #[test]
    fn paths_shown_relative_to_root() {
        assert_eq!(display_path(Path::new("/lib/2019/a.cr2"), &root()), "2019/a.cr2");
        assert_eq!(display_path(Path::new("/elsewhere/a.cr2"), &root()), "/elsewhere/a.cr2");
    }

    #[test]
    fn keys_shown_qualified() {
        assert_eq!(qualified("Xmp.crs.Look"), "crs:Look");
        assert_eq!(qualified("odd"), "odd");
    }

    // =========================================================================
    // Batch
    // =========================================================================

    fn report_with(diagnostics: Vec<Diagnostic>) -> AssetReport {
        AssetReport {
            asset: PathBuf::from("/lib/2019/IMG_1.CR2"),
            destination: PathBuf::from("/lib/2019/IMG_1.xmp"),
            branch: WriteBranch::Create,
            diagnostics,
        }
    }

    #[test]
    fn clean_asset_is_one_line() {
        let lines = format_asset_report(&report_with(vec![]), &root());
        assert_eq!(lines, vec!["2019/IMG_1.CR2 → 2019/IMG_1.xmp (create)"]);
    }

    #[test]
    fn diagnostics_are_indented() {
        let lines = format_asset_report(
            &report_with(vec![
                Diagnostic::SourceMissing {
                    slot: SourceSlot::Original,
                    path: PathBuf::from("/lib/2019/IMG_1.CR2"),
                },
                Diagnostic::ContaminatedField {
                    slot: Some(SourceSlot::SecondarySidecar),
                    key: "Xmp.crs.Look".into(),
                },
                Diagnostic::CropIncomplete {
                    filled: vec![CropField::Left, CropField::Right],
                    unresolved: BTreeSet::from([CropField::ImageWidth]),
                },
            ]),
            &root(),
        );
        assert_eq!(
            lines[1..],
            [
                "    Missing original: 2019/IMG_1.CR2",
                "    Removed crs:Look (secondary_sidecar)",
                "    Crop defaults: CropLeft, CropRight",
                "    Crop unresolved: ImageWidth",
            ]
        );
    }

    #[test]
    fn batch_totals_and_failures() {
        let summary = BatchSummary {
            outcomes: vec![
                AssetOutcome {
                    asset: PathBuf::from("/lib/2019/IMG_1.CR2"),
                    result: Ok(report_with(vec![Diagnostic::WriteVerificationMismatch {
                        missing: BTreeSet::from([CropField::Top]),
                    }])),
                },
                AssetOutcome {
                    asset: PathBuf::from("/lib/2019/IMG_2.CR2"),
                    result: Err(AssetError::Decode(DecodeError::MalformedPayload {
                        expected: "s = {".into(),
                        found: "t = {".into(),
                    })),
                },
            ],
        };
        let lines = format_batch_summary(&summary, &root(), true);
        assert!(lines.contains(&"    VERIFY FAILED, still missing: CropTop".to_string()));
        assert!(lines.contains(&"2019/IMG_2.CR2 FAILED".to_string()));
        assert_eq!(
            lines.last().unwrap(),
            "Reconciled 2 assets: 1 created, 0 updated, 1 failed, 1 with verification mismatches (dry run, nothing written)"
        );
    }

    #[test]
    fn empty_batch_is_totals_only() {
        let lines = format_batch_summary(&BatchSummary::default(), &root(), false);
        assert_eq!(lines, vec!["Reconciled 0 assets: 0 created, 0 updated, 0 failed"]);
    }

    // =========================================================================
    // Check and dates
    // =========================================================================

    #[test]
    fn check_lists_only_failures() {
        let report = CheckReport {
            files: vec![
                FileCheck {
                    image: PathBuf::from("/lib/a.cr2"),
                    problems: vec![],
                },
                FileCheck {
                    image: PathBuf::from("/lib/b.cr2"),
                    problems: vec![Problem::InvalidOrientation(PathBuf::from("/lib/b.xmp"))],
                },
            ],
        };
        let lines = format_check_report(&report, &root());
        assert_eq!(
            lines,
            vec![
                "b.cr2".to_string(),
                "    sidecar has invalid orientation: /lib/b.xmp".to_string(),
                String::new(),
                "Checked 2 images, 1 with errors".to_string(),
            ]
        );
    }

    #[test]
    fn date_report_lines() {
        let report = DateReport {
            outcomes: vec![
                DateOutcome {
                    sidecar: PathBuf::from("/lib/2019/05/17/a.xmp"),
                    result: Ok(Some(DateUpdate {
                        sidecar: PathBuf::from("/lib/2019/05/17/a.xmp"),
                        before: None,
                        after: "2019-05-17T07:08:09".into(),
                        fields: vec![],
                    })),
                },
                DateOutcome {
                    sidecar: PathBuf::from("/lib/x.xmp"),
                    result: Ok(None),
                },
                DateOutcome {
                    sidecar: PathBuf::from("/lib/2019/o.xmp"),
                    result: Err(DateError::NoSiblingImage {
                        path: PathBuf::from("/lib/2019/o.xmp"),
                    }),
                },
            ],
            dry_run: true,
        };
        let lines = format_date_report(&report, &root());
        assert_eq!(lines[0], "2019/05/17/a.xmp: (no capture time) → 2019-05-17T07:08:09");
        assert_eq!(lines[1], "2019/o.xmp FAILED");
        assert_eq!(lines.last().unwrap(), "Would update 1 sidecar, 1 skipped, 1 failed");
    }
}
