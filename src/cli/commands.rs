//! CLI command definitions and handlers.
//!
//! Each subcommand is implemented as a function that takes the parsed
//! arguments and returns an `anyhow::Result<()>`.

use std::io::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use sqlx::SqlitePool;

use crate::config::{self, Config};
use crate::db;
use crate::ingest::{IngestSummary, Ingestor, export};
use crate::spotify::SpotifyClient;

/// Playlog CLI
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Spotify OAuth client id (overrides config)
    #[arg(long, env = "SPOTIFY_CLIENT_ID", global = true, hide_env_values = true)]
    pub client_id: Option<String>,

    /// Spotify OAuth client secret (overrides config)
    #[arg(long, env = "SPOTIFY_CLIENT_SECRET", global = true, hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Spotify OAuth refresh token (overrides config)
    #[arg(long, env = "SPOTIFY_REFRESH_TOKEN", global = true, hide_env_values = true)]
    pub refresh_token: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Poll the provider for recently played tracks and record new listens
    Poll {
        /// Database path (default: from config, then playlog.db)
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Import one or more streaming-history export files as a single batch
    Import {
        /// Export JSON files; multiple files are merged before import
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Database path (default: from config, then playlog.db)
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Fetch images for artists that have none yet
    BackfillImages {
        /// Database path (default: from config, then playlog.db)
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Show catalog row counts
    Status {
        /// Database path (default: from config, then playlog.db)
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Write a config file template to the standard location
    InitConfig,
}

/// Run the specified CLI command.
pub async fn run_command(cli: &Cli) -> anyhow::Result<()> {
    let mut config = config::load();

    // Flags and env vars take precedence over the config file
    if cli.client_id.is_some() {
        config.credentials.client_id = cli.client_id.clone();
    }
    if cli.client_secret.is_some() {
        config.credentials.client_secret = cli.client_secret.clone();
    }
    if cli.refresh_token.is_some() {
        config.credentials.refresh_token = cli.refresh_token.clone();
    }

    match &cli.command {
        Commands::Poll { db } => cmd_poll(&config, db.as_ref()).await,
        Commands::Import { files, db } => cmd_import(&config, files, db.as_ref()).await,
        Commands::BackfillImages { db } => cmd_backfill_images(&config, db.as_ref()).await,
        Commands::Status { db } => cmd_status(&config, db.as_ref()).await,
        Commands::InitConfig => cmd_init_config(&config),
    }
}

// ============================================================================
// Individual command implementations
// ============================================================================

async fn cmd_poll(config: &Config, db: Option<&PathBuf>) -> anyhow::Result<()> {
    let pool = open_pool(config, db).await?;
    let client = build_client(config)?;
    let ingestor = Ingestor::new(pool, client, config.ingest.clone());

    println!("Polling recently played...");
    let summary = ingestor.ingest_live_poll().await?;
    print_summary(&summary);
    Ok(())
}

async fn cmd_import(
    config: &Config,
    files: &[PathBuf],
    db: Option<&PathBuf>,
) -> anyhow::Result<()> {
    // All files merge into one batch: the eviction cutoff has to see the
    // newest record across every file, not per file.
    let mut records = Vec::new();
    for file in files {
        let payload = std::fs::read_to_string(file)?;
        let parsed = export::parse_export_json(&payload)?;
        println!("{}: {} records", file.display(), parsed.len());
        records.extend(parsed);
    }

    let pool = open_pool(config, db).await?;
    let client = build_client(config)?;
    let ingestor = Ingestor::new(pool, client, config.ingest.clone());

    println!("Importing {} records...", records.len());
    let summary = ingestor
        .ingest_bulk_import(&records, |stage, pct| {
            print!("\r{stage}: {pct:.0}%   ");
            let _ = std::io::stdout().flush();
        })
        .await?;
    println!();
    print_summary(&summary);
    Ok(())
}

async fn cmd_backfill_images(config: &Config, db: Option<&PathBuf>) -> anyhow::Result<()> {
    let pool = open_pool(config, db).await?;
    let client = build_client(config)?;
    let ingestor = Ingestor::new(pool, client, config.ingest.clone());

    println!("Backfilling artist images...");
    ingestor.backfill_artist_images().await?;
    println!("Done.");
    Ok(())
}

async fn cmd_status(config: &Config, db: Option<&PathBuf>) -> anyhow::Result<()> {
    let pool = open_pool(config, db).await?;
    let counts = db::catalog_counts(&pool).await?;

    println!("Catalog");
    println!("=======");
    println!("  Tracks:  {}", counts.tracks);
    println!("  Artists: {}", counts.artists);
    println!("  Albums:  {}", counts.albums);
    println!("  Listens: {}", counts.listens);
    Ok(())
}

fn cmd_init_config(config: &Config) -> anyhow::Result<()> {
    config::save(config)?;
    match config::config_path() {
        Some(path) => {
            println!("Config written to {}", path.display());
            println!("Fill in [credentials] client_id, client_secret and refresh_token.");
        }
        None => println!("Config saved."),
    }
    Ok(())
}

// ============================================================================
// Helper functions
// ============================================================================

async fn open_pool(config: &Config, db: Option<&PathBuf>) -> anyhow::Result<SqlitePool> {
    let path = db.or(config.database.path.as_ref());
    let url = db::db_url(path.map(|p| p.as_path()));
    Ok(db::init_db(&url).await?)
}

fn build_client(config: &Config) -> anyhow::Result<SpotifyClient> {
    let creds = &config.credentials;
    let (Some(id), Some(secret), Some(refresh)) = (
        creds.client_id.as_deref(),
        creds.client_secret.as_deref(),
        creds.refresh_token.as_deref(),
    ) else {
        eprintln!("Error: Spotify credentials are not configured.");
        eprintln!("Run 'playlog init-config' and fill in [credentials], or edit:");
        if let Some(path) = config::config_path() {
            eprintln!("  {}", path.display());
        }
        std::process::exit(1);
    };

    Ok(SpotifyClient::new(id, secret, refresh)
        .rate_limit_backoff(Duration::from_secs(config.ingest.rate_limit_backoff_secs)))
}

fn print_summary(summary: &IngestSummary) {
    println!(
        "Done: {} processed, {} skipped, {} errors",
        summary.processed,
        summary.skipped,
        summary.errors.len()
    );
    for error in &summary.errors {
        eprintln!("  error: {error}");
    }
}
