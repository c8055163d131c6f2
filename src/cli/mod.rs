use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use leechwire::client::{ClientConfig, TorrentClient};
use leechwire::piece::PickStrategy;
use leechwire::torrent::{load_torrent_file, FileLayout};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "leechwire")]
#[command(about = "A download-only BitTorrent client", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a torrent file
    Download {
        /// Path to the .torrent file
        #[arg(short, long)]
        torrent: PathBuf,

        /// Download directory
        #[arg(short, long, default_value = "./downloads")]
        output: PathBuf,

        /// Port reported to the tracker
        #[arg(short, long, default_value = "6881")]
        port: u16,

        /// Maximum number of peers to connect to
        #[arg(short, long, default_value = "50")]
        max_peers: usize,

        /// Piece selection strategy
        #[arg(short, long, value_enum, default_value_t = Strategy::RarestFirst)]
        strategy: Strategy,

        /// Seconds to wait for a connection and handshake
        #[arg(long, default_value = "10")]
        connect_timeout: u64,

        /// Seconds without a block before a peer is dropped
        #[arg(long, default_value = "60")]
        stall_timeout: u64,

        /// Seconds between keep-alive messages
        #[arg(long, default_value = "90")]
        keep_alive: u64,

        /// Corrupt pieces tolerated from one peer before disconnecting
        #[arg(long, default_value = "3")]
        max_hash_failures: u32,
    },

    /// Show information about a torrent file
    Info {
        /// Path to the .torrent file
        torrent: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Strategy {
    RarestFirst,
    Random,
}

impl From<Strategy> for PickStrategy {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::RarestFirst => PickStrategy::RarestFirst,
            Strategy::Random => PickStrategy::Random,
        }
    }
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub async fn run(&self) -> Result<()> {
        match &self.command {
            Commands::Download {
                torrent,
                output,
                port,
                max_peers,
                strategy,
                connect_timeout,
                stall_timeout,
                keep_alive,
                max_hash_failures,
            } => {
                let config = ClientConfig {
                    download_dir: output.clone(),
                    listen_port: *port,
                    max_peers: *max_peers,
                    strategy: (*strategy).into(),
                    connect_timeout: Duration::from_secs(*connect_timeout),
                    stall_timeout: Duration::from_secs(*stall_timeout),
                    keep_alive_interval: Duration::from_secs(*keep_alive),
                    max_hash_failures: *max_hash_failures,
                };

                let client = TorrentClient::new(config);
                let summary = client
                    .download(torrent)
                    .await
                    .with_context(|| format!("download of {} failed", torrent.display()))?;

                println!(
                    "Downloaded {} pieces ({} bytes) in {:.1?}",
                    summary.pieces, summary.bytes, summary.elapsed
                );
            }

            Commands::Info { torrent } => {
                show_torrent_info(torrent).await?;
            }
        }

        Ok(())
    }
}

async fn show_torrent_info(torrent_path: &Path) -> Result<()> {
    let metainfo = load_torrent_file(torrent_path)
        .await
        .with_context(|| format!("cannot load {}", torrent_path.display()))?;

    println!("Torrent Information");
    println!("==================");
    println!("Name: {}", metainfo.name);
    println!("Tracker: {}", metainfo.announce);
    println!("Total Size: {} bytes", metainfo.total_length());
    println!("Piece Length: {} bytes", metainfo.piece_length);
    println!("Number of Pieces: {}", metainfo.pieces.len());
    println!("Info Hash: {}", metainfo.info_hash_hex());

    let mode = match metainfo.layout {
        FileLayout::Single { .. } => "single file",
        FileLayout::Multi { .. } => "multi file",
    };
    println!("\nFiles ({}):", mode);
    for (i, (path, length)) in metainfo.layout.entries().iter().enumerate() {
        println!("  {}: {} ({} bytes)", i + 1, path.display(), length);
    }

    if !metainfo.announce_list.is_empty() {
        println!("\nAdditional Trackers:");
        for (tier, trackers) in metainfo.announce_list.iter().enumerate() {
            println!("  Tier {}:", tier + 1);
            for tracker in trackers {
                println!("    - {}", tracker);
            }
        }
    }

    Ok(())
}
