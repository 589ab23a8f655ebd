//! import-boot-images
//!
//! Runs one boot image import against a storage root and exits with a
//! code describing the result.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bootres_importer::bootloader::{BootLoader, DirectoryBootLoader};
use bootres_importer::catalog::{HttpCatalogConfig, HttpCatalogFetcher};
use bootres_importer::config::{load_sources, ImporterConfig};
use bootres_importer::download::{HttpDownloader, HttpDownloaderConfig};
use bootres_importer::error::exit_codes;
use bootres_importer::mapping::LayoutMapper;
use bootres_importer::notify::{EventSink, JsonLinesSink, TracingSink};
use bootres_importer::retry::RetryPolicy;
use bootres_importer::storage::{ImportLock, StorageRoot};
use bootres_importer::targets::{TgtAdmin, TgtAdminConfig};
use bootres_importer::{ImportError, ImportPipeline};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Import boot images from the configured sources.
#[derive(Debug, Parser)]
#[command(name = "import-boot-images", version)]
struct Args {
    /// YAML file listing the boot sources.
    #[arg(long)]
    sources_file: PathBuf,

    /// Storage root holding snapshots and the cache.
    #[arg(long, env = "BOOTRES_STORAGE_ROOT", default_value = "/var/lib/bootres/boot-resources")]
    storage_root: PathBuf,

    /// Path to tgt-admin.
    #[arg(long, env = "BOOTRES_TGT_ADMIN", default_value = "/usr/sbin/tgt-admin")]
    tgt_admin: PathBuf,

    /// Systemd unit of the tgt daemon.
    #[arg(long, env = "BOOTRES_TGT_SERVICE", default_value = "tgt")]
    tgt_service: String,

    /// Run tgt-admin and systemctl through `sudo -n`.
    #[arg(long, env = "BOOTRES_USE_SUDO")]
    use_sudo: bool,

    /// Directory with one subdirectory per boot loader.
    #[arg(long, env = "BOOTRES_BOOTLOADER_DIR")]
    bootloader_dir: Option<PathBuf>,

    /// Seconds to wait for the tgt daemon to become active.
    #[arg(long, env = "BOOTRES_DAEMON_READY_TIMEOUT", default_value_t = 30)]
    daemon_ready_timeout: u64,

    /// Attempts at fetching the catalog.
    #[arg(long, env = "BOOTRES_CATALOG_RETRIES", default_value_t = 3)]
    catalog_retries: u32,

    /// Attempts at downloading each file.
    #[arg(long, env = "BOOTRES_DOWNLOAD_RETRIES", default_value_t = 3)]
    download_retries: u32,

    /// Files downloaded concurrently.
    #[arg(long, default_value_t = 4)]
    max_concurrent_downloads: usize,

    /// Append import events as JSON lines to this file.
    #[arg(long, env = "BOOTRES_EVENTS_FILE")]
    events_file: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

impl Args {
    fn importer_config(&self) -> ImporterConfig {
        let defaults = ImporterConfig::default();
        ImporterConfig {
            storage_root: self.storage_root.clone(),
            targets: TgtAdminConfig {
                tgt_admin_path: self.tgt_admin.clone(),
                use_sudo: self.use_sudo,
                service_name: self.tgt_service.clone(),
                ready_timeout: Duration::from_secs(self.daemon_ready_timeout),
                ..TgtAdminConfig::default()
            },
            bootloader_dir: self.bootloader_dir.clone(),
            events_file: self.events_file.clone(),
            catalog_retry: RetryPolicy {
                max_attempts: self.catalog_retries.max(1),
                ..RetryPolicy::default()
            },
            download_retry: RetryPolicy {
                max_attempts: self.download_retries.max(1),
                ..RetryPolicy::default()
            },
            max_concurrent_downloads: self.max_concurrent_downloads.max(1),
            ..defaults
        }
    }
}

fn init_tracing(args: &Args) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    match args.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

fn build_pipeline(config: &ImporterConfig) -> anyhow::Result<ImportPipeline> {
    let fetcher = HttpCatalogFetcher::new(HttpCatalogConfig::default())
        .context("failed to build catalog client")?;
    let downloader = HttpDownloader::new(HttpDownloaderConfig {
        request_timeout: config.http_timeout,
        max_concurrent: config.max_concurrent_downloads,
        retry: config.download_retry.clone(),
    })
    .context("failed to build download client")?;

    let bootloaders: Vec<Box<dyn BootLoader>> = match &config.bootloader_dir {
        Some(dir) => DirectoryBootLoader::discover(dir)
            .with_context(|| format!("failed to read boot loaders from {}", dir.display()))?
            .into_iter()
            .map(|loader| Box::new(loader) as Box<dyn BootLoader>)
            .collect(),
        None => Vec::new(),
    };

    let mut pipeline = ImportPipeline::new(
        Arc::new(fetcher),
        Arc::new(LayoutMapper),
        Arc::new(downloader),
        Arc::new(TgtAdmin::new(config.targets.clone())),
    )
    .with_bootloaders(bootloaders)
    .with_sink(Arc::new(TracingSink))
    .with_retry_policy(config.catalog_retry.clone());

    if let Some(path) = &config.events_file {
        let sink: Arc<dyn EventSink> = Arc::new(
            JsonLinesSink::open(path)
                .with_context(|| format!("failed to open events file {}", path.display()))?,
        );
        pipeline = pipeline.with_sink(sink);
    }
    Ok(pipeline)
}

async fn run(args: &Args) -> anyhow::Result<()> {
    let sources = load_sources(&args.sources_file).map_err(ImportError::from)?;
    let config = args.importer_config();

    let storage = StorageRoot::open(&config.storage_root).map_err(ImportError::from)?;
    let _lock = ImportLock::acquire(&storage).map_err(ImportError::from)?;
    info!(
        storage_root = %storage.path().display(),
        sources = sources.len(),
        "Starting boot image import"
    );

    let pipeline = build_pipeline(&config)?;
    let outcome = pipeline.run(&storage, &sources).await?;
    info!(outcome = %outcome.summary(), "Boot image import finished");
    Ok(())
}

fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    if let Some(import_err) = err.downcast_ref::<ImportError>() {
        let hint = match import_err {
            ImportError::NoConfig(_) => Some("Create the sources file or pass --sources-file."),
            ImportError::Locked(_) => Some("Another import is running; try again when it finishes."),
            ImportError::Catalog(_) => Some("Check that the boot sources are reachable."),
            _ => None,
        };
        if let Some(hint) = hint {
            eprintln!("\n{}", format!("Hint: {}", hint).yellow());
        }
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<ImportError>()
        .map(ImportError::exit_code)
        .unwrap_or(exit_codes::UNEXPECTED)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(&args);

    match run(&args).await {
        Ok(()) => ExitCode::from(exit_codes::SUCCESS),
        Err(e) => {
            let kind = e.downcast_ref::<ImportError>().map_or("unexpected", ImportError::kind);
            error!(error = %e, kind, "Boot image import failed");
            print_error(&e);
            ExitCode::from(exit_code(&e))
        }
    }
}
