mod cli;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use cli::Cli;
use tracing::info;
use tracing_subscriber::{filter::LevelFilter, fmt, layer::SubscriberExt, registry::Registry, Layer};

use swarm_fetch::metainfo::Metainfo;
use swarm_fetch::tracker::{HttpTracker, TrackerRequest};
use swarm_fetch::{download, DownloadConfig, PeerId};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    let fmt_layer = fmt::Layer::default()
        .with_target(false)
        .with_filter(LevelFilter::from_level(cli.log_level));
    let subscriber = Registry::default().with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)
        .context("could not set global tracing subscriber")?;

    tokio::select! {
        Ok(_) = tokio::signal::ctrl_c() => {
            info!("interrupted, exiting");
            Ok(())
        }
        result = run_app(cli) => result
    }
}

async fn run_app(cli: Cli) -> anyhow::Result<()> {
    let metainfo = Metainfo::from_bencode_file(&cli.source).await?;
    let torrent = metainfo.torrent();

    let peer_id = PeerId::random();
    let request = TrackerRequest {
        info_hash: metainfo.info_hash,
        peer_id,
        port: cli.port,
        left: metainfo.length,
    };
    let client = reqwest::Client::new();
    let response = HttpTracker::new(&client, &metainfo.announce)
        .announce(&request)
        .await?;

    let config = DownloadConfig {
        piece_timeout: Duration::from_secs(cli.piece_timeout),
        ..DownloadConfig::default()
    };

    info!(name = %torrent.name, "downloading");
    let buf = download(&torrent, &response.peer_addresses, peer_id, config).await?;

    let output = cli.output.unwrap_or_else(|| PathBuf::from(&torrent.name));
    tokio::fs::write(&output, &buf)
        .await
        .with_context(|| format!("could not write {}", output.display()))?;
    info!(path = %output.display(), bytes = buf.len(), "download written");

    Ok(())
}
