use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Parser)]
#[command(
    name = "cachewarden",
    about = "Maintenance daemon for a shared on-disk HTTP cache"
)]
pub struct Cli {
    /// Path to the runtime configuration file (defaults to ./cachewarden.toml if present).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Delete every cache entry, then exit.
    #[arg(long, conflicts_with = "file_info")]
    pub clear_all: bool,

    /// Decode and print one cache entry's metadata, then exit. Never mutates the entry.
    #[arg(long, value_name = "NAME")]
    pub file_info: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}
