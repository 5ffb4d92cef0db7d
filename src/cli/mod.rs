//! Command-line interface for playlog.
//!
//! This module provides CLI commands for polling recent plays, importing
//! streaming-history exports, backfilling artist images, and inspecting the
//! catalog.

mod commands;

pub use commands::{Cli, Commands, run_command};
