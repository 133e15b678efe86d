use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use xmp_reconcile::config::{self, ExtractorBackend, ReconcileConfig};
use xmp_reconcile::pipeline::{Reconciler, Settings};
use xmp_reconcile::translate::TagWhitelist;
use xmp_reconcile::xmp::{ExifTool, NativeExtractor, RawExtractor, XmpFileStore};
use xmp_reconcile::{catalog, check, crop, dates, output};

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once; called a single time at startup
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "xmp-reconcile")]
#[command(about = "Reconcile catalog edits, embedded XMP and sidecars into one XMP sidecar")]
#[command(long_about = "\
Reconcile catalog edits, embedded XMP and sidecars into one XMP sidecar

For every catalog image, four metadata sources are merged in fixed order,
later sources winning per field:

  original           XMP embedded in the image file
  database           the catalog row's stored XMP
  primary_sidecar    <stem>.xmp        (also the destination)
  secondary_sidecar  <name>.<ext>.xmp

The catalog's develop settings are translated to crs: fields and applied on
top. Crops are completed with full-frame defaults, composite entries are
dropped, and the written sidecar is re-read and verified.

Library layout:

  root_path/
  └── 2019/2019-05-01/
      ├── IMG_0001.CR2
      ├── IMG_0001.xmp          # written by `reconcile`
      └── IMG_0001.CR2.xmp      # darktable sidecar

Run 'xmp-reconcile gen-config' to generate a documented config.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = "config.toml", global = true)]
    config: PathBuf,

    /// Work on scratch copies only; never modify sidecars
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile every catalog row into its primary sidecar
    Reconcile {
        /// Catalog export (overrides `catalog` in the config)
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
    /// Write crop proposals (JSON list) into primary sidecars
    ApplyCrops {
        /// Crop proposals file
        proposals: PathBuf,
    },
    /// Audit sidecars under the library root
    Check,
    /// Move sidecar dates to the date of their folder
    UpdateDates,
    /// Print a stock config.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let mut config = config::load_config(&cli.config)?;
    config.dry_run |= cli.dry_run;
    init_logging(&config);
    tracing::debug!(config = %cli.config.display(), "configuration loaded");

    match config.extractor.backend {
        ExtractorBackend::Native => run(&cli.command, &config, &NativeExtractor),
        ExtractorBackend::Exiftool => {
            let exiftool = ExifTool::start(&config.extractor.exiftool_path)?;
            run(&cli.command, &config, &exiftool)
        }
    }
}

fn run(
    command: &Command,
    config: &ReconcileConfig,
    extractor: &impl RawExtractor,
) -> Result<(), Box<dyn std::error::Error>> {
    let root = config.root_path.as_path();
    match command {
        Command::Reconcile { catalog: catalog_arg } => {
            let catalog_path = catalog_arg
                .as_ref()
                .or(config.catalog.as_ref())
                .ok_or("no catalog export given (use --catalog or set `catalog` in the config)")?;
            let records = catalog::load_catalog(catalog_path)?;
            let settings = Settings::from_config(config, load_whitelist(config.tags_file.as_deref())?);
            let workers = init_thread_pool(&config.processing);
            tracing::info!(assets = records.len(), workers, dry_run = config.dry_run, "reconciling");

            let summary = Reconciler::new(&settings, extractor, &XmpFileStore)
                .reconcile_batch(&records, workers);
            output::print_batch_summary(&summary, root, config.dry_run);
            fail_on(summary.failed(), "asset(s) failed")?;
        }
        Command::ApplyCrops { proposals } => {
            let proposals = crop::load_proposals(proposals)?;
            let settings = Settings::from_config(config, load_whitelist(config.tags_file.as_deref())?);
            let workers = init_thread_pool(&config.processing);
            tracing::info!(proposals = proposals.len(), workers, "applying crops");

            let summary = Reconciler::new(&settings, extractor, &XmpFileStore)
                .apply_crop_batch(&proposals, workers);
            output::print_batch_summary(&summary, root, config.dry_run);
            fail_on(summary.failed(), "proposal(s) failed")?;
        }
        Command::Check => {
            let report = check::check_tree(&XmpFileStore, root, &config.check);
            output::print_check_report(&report, root);
            fail_on(report.files_with_errors(), "image(s) with sidecar errors")?;
        }
        Command::UpdateDates => {
            let report = dates::update_tree(extractor, &XmpFileStore, root, config.dry_run);
            output::print_date_report(&report, root);
            fail_on(report.failures().count(), "sidecar(s) failed")?;
        }
        Command::GenConfig => print!("{}", config::stock_config_toml()),
    }
    Ok(())
}

fn load_whitelist(tags_file: Option<&Path>) -> std::io::Result<TagWhitelist> {
    match tags_file {
        Some(path) => TagWhitelist::load(path),
        None => Ok(TagWhitelist::builtin()),
    }
}

fn fail_on(count: usize, what: &str) -> Result<(), Box<dyn std::error::Error>> {
    if count > 0 {
        return Err(format!("{count} {what}").into());
    }
    Ok(())
}

/// `RUST_LOG` wins; otherwise info, or debug when the config asks for it.
fn init_logging(config: &ReconcileConfig) {
    let default = if config.debug {
        "xmp_reconcile=debug"
    } else {
        "xmp_reconcile=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores. Returns the worker count.
fn init_thread_pool(processing: &config::ProcessingConfig) -> usize {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
    threads
}
