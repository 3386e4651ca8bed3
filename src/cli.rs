use std::path::PathBuf;

use clap::Parser;
use tracing::Level;

/// Download a single-file torrent.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Cli {
    /// path to the .torrent file
    pub source: PathBuf,

    /// where to write the content, defaults to the name in the torrent
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// port reported to the tracker
    #[arg(short, long, default_value_t = 6881)]
    pub port: u16,

    /// seconds allowed for downloading a single piece from a peer
    #[arg(long, default_value_t = 30)]
    pub piece_timeout: u64,

    #[arg(long, default_value_t = Level::INFO)]
    pub log_level: Level,
}
