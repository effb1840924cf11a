use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use podsync::config::Config;
use podsync::download::{download_pending, DownloadOptions};
use podsync::import::import_subscriptions;
use podsync::poller::{poll_all, PollOptions};
use podsync::storage::{Database, DatabaseError, OwnerId};

/// Connect timeout for feed and media requests; whole-request bounds come from config
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Get the default config file path (~/.config/podsync/config.toml)
fn default_config_path() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home)
        .join(".config")
        .join("podsync")
        .join("config.toml"))
}

#[derive(Parser, Debug)]
#[command(
    name = "podsync",
    about = "Import podcast subscriptions, poll their feeds and download new episodes"
)]
struct Args {
    /// Config file (default: ~/.config/podsync/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Import subscriptions from an OPML file
    #[arg(long, value_name = "FILE")]
    import: Option<PathBuf>,

    /// Poll every subscription for new episodes
    #[arg(long)]
    update: bool,

    /// Download episodes not yet on disk
    #[arg(long)]
    download: bool,
}

fn init_tracing(config: &Config) {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_filter()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.log_time {
        builder.init();
    } else {
        builder.without_time().init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.import.is_none() && !args.update && !args.download {
        eprintln!("Error: nothing to do");
        eprintln!();
        eprintln!("Pass at least one of --import <FILE>, --update or --download.");
        eprintln!("Run `podsync --help` for details.");
        std::process::exit(1);
    }

    let config_path = match args.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    init_tracing(&config);
    for key in Config::unknown_keys(&config_path) {
        tracing::warn!(key = %key, path = %config_path.display(), "Unknown config key ignored");
    }

    let db_path = config
        .database_file
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: Another instance of podsync appears to be running. Please wait for it to finish.");
            std::process::exit(1);
        }
        Err(DatabaseError::CannotOpen(reason)) => {
            return Err(anyhow::anyhow!(
                "Cannot open database at {}: {}",
                config.database_file.display(),
                reason
            ));
        }
        Err(e) => {
            return Err(anyhow::anyhow!("Failed to open database: {}", e));
        }
    };

    // Close the pool on every path out of the run
    let result = run(
        args.import.as_deref(),
        args.update,
        args.download,
        &config,
        &db,
        OwnerId::DEFAULT,
    )
    .await;
    db.close().await;
    result
}

async fn run(
    import: Option<&Path>,
    update: bool,
    download: bool,
    config: &Config,
    db: &Database,
    owner: OwnerId,
) -> Result<()> {
    db.ensure_owner(owner, "default")
        .await
        .context("Failed to create default owner")?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received, finishing in-flight work");
                cancel.cancel();
            }
        });
    }

    if let Some(path) = import {
        let summary = import_subscriptions(db, owner, path)
            .await
            .with_context(|| format!("Failed to import {}", path.display()))?;
        println!(
            "Imported {} new and {} existing subscriptions from {}",
            summary.inserted,
            summary.updated,
            path.display()
        );
    }

    if !update && !download {
        return Ok(());
    }

    let client = reqwest::Client::builder()
        .user_agent(concat!("podsync/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")?;

    if update && !cancel.is_cancelled() {
        let options = PollOptions {
            concurrency: config.fetch_concurrency,
            fetch_timeout: config.fetch_timeout(),
        };
        let summary = poll_all(db, &client, owner, &options, &cancel)
            .await
            .context("Failed to poll subscriptions")?;
        println!(
            "Polled {} subscriptions: {} new episodes, {} failed",
            summary.succeeded + summary.failed,
            summary.new_episodes,
            summary.failed
        );
    }

    if download && !cancel.is_cancelled() {
        let options = DownloadOptions {
            root: config.download_dir.clone(),
            max_downloads: config.max_downloads,
            timeout: config.download_timeout(),
        };
        let summary = download_pending(db, &client, owner, &options, &cancel)
            .await
            .context("Failed to download episodes")?;
        println!(
            "Downloaded {} episodes, {} failed",
            summary.succeeded, summary.failed
        );
        if summary.cancelled > 0 {
            println!("{} downloads cancelled", summary.cancelled);
        }
    }

    Ok(())
}
