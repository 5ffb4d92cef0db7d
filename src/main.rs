//! Playlog - a personal listening history recorder.
//!
//! Polls Spotify for recently played tracks, imports bulk streaming-history
//! exports, and keeps a normalized local catalog of tracks, artists, albums
//! and listens in SQLite.

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod model;
pub mod spotify;
#[cfg(test)]
pub mod test_utils;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(EnvFilter::from_default_env().add_directive("playlog=info".parse()?))
        .init();

    cli::run_command(&args).await
}
