mod download;

pub use download::{Download, DownloadHandle, Summary};

use crate::error::{LeechError, Result};
use crate::peer::SessionTiming;
use crate::piece::PickStrategy;
use crate::torrent::{load_torrent_file, Metainfo};
use crate::tracker::{self, generate_peer_id, AnnounceRequest, Peer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Configuration for the BitTorrent client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub download_dir: PathBuf,
    /// Port reported to trackers
    pub listen_port: u16,
    pub max_peers: usize,
    pub strategy: PickStrategy,
    pub connect_timeout: Duration,
    /// Without a block for this long, a claimed piece is given back and
    /// the session closed
    pub stall_timeout: Duration,
    pub keep_alive_interval: Duration,
    /// Failed piece verifications tolerated per session
    pub max_hash_failures: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("./downloads"),
            listen_port: 6881,
            max_peers: 50,
            strategy: PickStrategy::RarestFirst,
            connect_timeout: Duration::from_secs(10),
            stall_timeout: Duration::from_secs(60),
            keep_alive_interval: Duration::from_secs(90),
            max_hash_failures: 3,
        }
    }
}

impl ClientConfig {
    pub fn timing(&self) -> SessionTiming {
        SessionTiming {
            connect_timeout: self.connect_timeout,
            stall_timeout: self.stall_timeout,
            keep_alive_interval: self.keep_alive_interval,
        }
    }
}

/// Main BitTorrent client
pub struct TorrentClient {
    config: ClientConfig,
    peer_id: [u8; 20],
}

impl TorrentClient {
    pub fn new(config: ClientConfig) -> Self {
        let peer_id = generate_peer_id();
        info!("Client initialized with peer_id: {}", hex::encode(peer_id));

        Self { config, peer_id }
    }

    pub fn peer_id(&self) -> &[u8; 20] {
        &self.peer_id
    }

    /// Download a torrent
    pub async fn download(&self, torrent_path: &Path) -> Result<Summary> {
        info!("Starting download for: {}", torrent_path.display());

        // Load torrent file
        let metainfo = load_torrent_file(torrent_path).await?;

        info!("Torrent: {}", metainfo.name);
        info!("Total size: {} bytes", metainfo.total_length());
        info!("Pieces: {}", metainfo.pieces.len());
        info!("Info hash: {}", metainfo.info_hash_hex());

        let peers = self.find_peers(&metainfo).await?;

        Download::start(&metainfo, peers, &self.config, self.peer_id)
            .await?
            .wait()
            .await
    }

    /// Ask each tracker in turn until one returns peers.
    async fn find_peers(&self, metainfo: &Metainfo) -> Result<Vec<Peer>> {
        let request = AnnounceRequest::new(
            metainfo.info_hash,
            self.peer_id,
            self.config.listen_port,
            metainfo.total_length(),
        );

        for url in metainfo.trackers() {
            match tracker::announce(&url, &request).await {
                Ok(response) if !response.peers.is_empty() => {
                    let mut peers: Vec<Peer> = Vec::with_capacity(response.peers.len());
                    for peer in response.peers {
                        if !peers.iter().any(|p| p.addr == peer.addr) {
                            peers.push(peer);
                        }
                    }

                    info!("Received {} peers from {}", peers.len(), url);
                    return Ok(peers);
                }
                Ok(_) => warn!("Tracker {} returned no peers", url),
                Err(e) => warn!("Tracker {} failed: {}", url, e),
            }
        }

        Err(LeechError::Tracker(
            "no tracker returned any peers".to_string(),
        ))
    }
}

impl Default for TorrentClient {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::{encode, Value};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn torrent_bytes(announce: &str) -> Vec<u8> {
        let mut info = BTreeMap::new();
        info.insert(b"name".to_vec(), Value::Bytes(b"tiny.bin".to_vec()));
        info.insert(b"length".to_vec(), Value::Int(5));
        info.insert(b"piece length".to_vec(), Value::Int(16_384));
        info.insert(b"pieces".to_vec(), Value::Bytes(vec![0u8; 20]));

        let mut root = BTreeMap::new();
        root.insert(b"announce".to_vec(), Value::Bytes(announce.as_bytes().to_vec()));
        root.insert(b"info".to_vec(), Value::Dict(info));
        encode(&Value::Dict(root))
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.listen_port, 6881);
        assert_eq!(config.max_peers, 50);
        assert_eq!(config.strategy, PickStrategy::RarestFirst);
        assert_eq!(config.timing().stall_timeout, Duration::from_secs(60));
        assert_eq!(config.max_hash_failures, 3);
    }

    #[tokio::test]
    async fn test_download_without_usable_tracker() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tiny.torrent");
        std::fs::write(&path, torrent_bytes("wss://tracker.example/announce")).unwrap();

        let client = TorrentClient::new(ClientConfig {
            download_dir: dir.path().join("out"),
            ..ClientConfig::default()
        });

        let err = client.download(&path).await.unwrap_err();
        assert!(matches!(err, LeechError::Tracker(_)));
    }

    #[tokio::test]
    async fn test_download_missing_torrent_file() {
        let dir = TempDir::new().unwrap();
        let client = TorrentClient::default();

        let err = client
            .download(&dir.path().join("absent.torrent"))
            .await
            .unwrap_err();
        assert!(matches!(err, LeechError::Transport(_)));
    }
}
