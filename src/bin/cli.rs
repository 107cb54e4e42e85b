//! sitesync CLI
//!
//! Local execution entry point for syncing websites into document sets.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use sitesync::{
    error::Result,
    models::{Config, SiteInput},
    pipeline::{RunOptions, run_site},
    services::FirecrawlClient,
    storage::{LocalStore, SyncStore},
};

/// sitesync - incremental website-to-document-set synchronizer
#[derive(Parser, Debug)]
#[command(
    name = "sitesync",
    version,
    about = "Synchronizes a website into a locally persisted, searchable document set"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "sitesync.toml")]
    config: PathBuf,

    /// Output root directory (default: from config)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one sync for a site: discover, fetch what changed, reconcile
    Sync {
        /// Website URL or domain (e.g. https://example.com or example.com)
        url: String,

        /// Re-fetch every discovered page, ignoring stored fingerprints
        #[arg(long)]
        force: bool,

        /// Cap on resources fetched this run
        #[arg(long)]
        limit: Option<usize>,

        /// One-line site description for the index document
        #[arg(long)]
        description: Option<String>,
    },

    /// Show the persisted sync state for a site
    Status {
        /// Website URL or domain
        url: String,
    },

    /// Validate the configuration file
    Validate,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = Config::load_or_default(&cli.config);
    if let Some(output) = &cli.output {
        config.output.root_dir = output.display().to_string();
    }

    let store = LocalStore::new(&config.output.root_dir);

    match cli.command {
        Command::Sync {
            url,
            force,
            limit,
            description,
        } => {
            config.validate()?;

            let mut site = SiteInput::parse(&url)?;
            if let Some(description) = description {
                site = site.with_description(description);
            }

            let client = FirecrawlClient::new(&config.api)?;

            // Ctrl-C cancels the poll loop cleanly, leaving any
            // submitted job resumable.
            let cancel = CancellationToken::new();
            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::warn!("Interrupt received, finishing up...");
                    ctrl_c.cancel();
                }
            });

            let options = RunOptions {
                force_refresh: force,
                max_resources: limit,
                cancel,
            };

            log::info!("Syncing {} into {}", site.domain, config.output.root_dir);
            let report = run_site(&store, &client, &client, &config, &site, &options).await?;

            log::info!("Status:    {:?}", report.status);
            log::info!("Created:   {}", report.created);
            log::info!("Updated:   {}", report.updated);
            log::info!("Deleted:   {}", report.deleted);
            log::info!("Unchanged: {}", report.skipped_unchanged);
            log::info!("Failed:    {}", report.failed);
            log::info!("Documents: {}", report.docs_dir.display());
            if let Some(job_id) = &report.resumable_job {
                log::info!("Resumable job left in flight: {}", job_id);
            }
        }

        Command::Status { url } => {
            let site = SiteInput::parse(&url)?;
            match store.load_state(&site.domain).await? {
                Some(state) => {
                    log::info!("Site:      {}", site.domain);
                    log::info!("Resources: {} ({} active)", state.resources.len(), state.active_count());
                    match &state.last_run_at {
                        Some(at) => log::info!("Last run:  {}", at),
                        None => log::info!("Last run:  never completed"),
                    }
                    match &state.in_flight {
                        Some(job) => log::info!(
                            "In flight: job {} ({} identifiers, submitted {})",
                            job.job_id,
                            job.identifiers.len(),
                            job.submitted_at
                        ),
                        None => log::info!("In flight: none"),
                    }
                }
                None => {
                    log::info!("No sync state for {} yet. Run 'sitesync sync' first.", site.domain);
                }
            }
        }

        Command::Validate => {
            log::info!("Validating configuration...");
            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!("✓ Config OK");
        }
    }

    Ok(())
}
