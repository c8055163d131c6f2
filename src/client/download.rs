use super::ClientConfig;
use crate::error::{LeechError, Result};
use crate::peer::{PeerConnection, PeerSession, SessionEnd, SessionId, SharedTracker};
use crate::piece::{CompletedPiece, PieceTracker, Progress};
use crate::storage::FileAssembler;
use crate::torrent::Metainfo;
use crate::tracker::Peer;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, info_span, warn, Instrument};

/// Completed pieces buffered between the sessions and the file writer.
const WRITE_QUEUE: usize = 32;

/// What a finished download produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub pieces: usize,
    pub bytes: u64,
    pub elapsed: Duration,
}

/// Entry point for running one torrent against a fixed set of peers.
pub struct Download;

impl Download {
    /// Pre-allocate the files, then spawn one session per peer (at most
    /// `max_peers`) and the task that writes completed pieces.
    pub async fn start(
        metainfo: &Metainfo,
        peers: Vec<Peer>,
        config: &ClientConfig,
        peer_id: [u8; 20],
    ) -> Result<DownloadHandle> {
        let assembler = FileAssembler::new(&config.download_dir, metainfo).await?;

        let total = metainfo.pieces.len();
        let tracker: SharedTracker = Arc::new(Mutex::new(PieceTracker::new(
            metainfo.pieces.clone(),
            config.strategy,
        )));

        let (piece_tx, piece_rx) = mpsc::channel(WRITE_QUEUE);
        let (progress_tx, progress_rx) = watch::channel(Progress {
            completed: 0,
            total,
        });

        let writer = tokio::spawn(write_pieces(assembler, piece_rx, progress_tx));

        let timing = config.timing();
        let mut sessions = JoinSet::new();

        for (n, peer) in peers.into_iter().take(config.max_peers).enumerate() {
            let id = SessionId(n as u64);
            let mut session = PeerSession::new(
                id,
                metainfo.info_hash,
                peer_id,
                total,
                config.max_hash_failures,
            );
            if let Some(known) = peer.peer_id {
                session = session.with_known_peer_id(known);
            }

            let tracker = tracker.clone();
            let piece_tx = piece_tx.clone();
            let span = info_span!("peer", session = %id, addr = %peer.addr);

            sessions.spawn(
                async move {
                    PeerConnection::connect(peer.addr, session, tracker, piece_tx, timing)
                        .await?
                        .run()
                        .await
                }
                .instrument(span),
            );
        }

        info!("Started {} peer sessions for {} pieces", sessions.len(), total);

        Ok(DownloadHandle {
            sessions,
            writer,
            progress: progress_rx,
            total_length: metainfo.total_length(),
            started: Instant::now(),
        })
    }
}

/// A running download. Dropping it aborts every session.
pub struct DownloadHandle {
    sessions: JoinSet<Result<SessionEnd>>,
    writer: JoinHandle<Result<()>>,
    progress: watch::Receiver<Progress>,
    total_length: u64,
    started: Instant,
}

impl DownloadHandle {
    /// Pieces written to disk so far.
    pub fn progress(&self) -> watch::Receiver<Progress> {
        self.progress.clone()
    }

    /// Resolve once every piece is on disk, the writer fails, or every
    /// session has ended with pieces still missing.
    pub async fn wait(mut self) -> Result<Summary> {
        let written = loop {
            tokio::select! {
                written = &mut self.writer => break written,
                Some(joined) = self.sessions.join_next(), if !self.sessions.is_empty() => {
                    match joined {
                        Ok(Ok(end)) => debug!("Session ended: {:?}", end),
                        Ok(Err(e)) => debug!("Session failed: {}", e),
                        Err(e) => warn!("Session task failed: {}", e),
                    }
                    if self.sessions.is_empty() {
                        info!("All peer sessions have ended");
                    }
                }
            }
        };

        self.sessions.abort_all();
        written??;

        let progress = *self.progress.borrow();
        if !progress.is_done() {
            return Err(LeechError::Stalled {
                missing: progress.total - progress.completed,
            });
        }

        let summary = Summary {
            pieces: progress.total,
            bytes: self.total_length,
            elapsed: self.started.elapsed(),
        };
        info!(
            "Download complete: {} pieces, {} bytes in {:.1?}",
            summary.pieces, summary.bytes, summary.elapsed
        );
        Ok(summary)
    }
}

/// Owns the assembler. Ends when every piece is written, on the first write
/// failure, or when all senders are gone.
async fn write_pieces(
    mut assembler: FileAssembler,
    mut pieces: mpsc::Receiver<CompletedPiece>,
    progress: watch::Sender<Progress>,
) -> Result<()> {
    let total = progress.borrow().total;
    let mut completed = 0;

    while completed < total {
        let Some(piece) = pieces.recv().await else {
            break;
        };

        assembler.write(piece.index, &piece.data).await?;
        completed += 1;

        let current = Progress { completed, total };
        info!(
            "Progress: {}/{} pieces ({:.1}%)",
            completed,
            total,
            current.percent()
        );
        progress.send_replace(current);
    }

    assembler.finish().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::test_seeder::seed;
    use crate::piece::PieceDescriptor;
    use crate::torrent::{FileEntry, FileLayout};
    use sha1::{Digest, Sha1};
    use std::net::SocketAddr;
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    const INFO_HASH: [u8; 20] = [6u8; 20];
    const OURS: [u8; 20] = [1u8; 20];
    const PIECE_LENGTH: u32 = 32 * 1024;

    fn content() -> Vec<u8> {
        (0..80_000u32).map(|i| (i % 251) as u8).collect()
    }

    fn metainfo(content: &[u8]) -> Metainfo {
        let pieces = content
            .chunks(PIECE_LENGTH as usize)
            .enumerate()
            .map(|(i, chunk)| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(&Sha1::digest(chunk));
                PieceDescriptor::new(i as u32, hash, chunk.len() as u32).unwrap()
            })
            .collect();

        Metainfo {
            announce: "http://tracker.example/announce".to_string(),
            announce_list: Vec::new(),
            info_hash: INFO_HASH,
            name: "bundle".to_string(),
            piece_length: PIECE_LENGTH,
            layout: FileLayout::Multi {
                name: "bundle".to_string(),
                files: vec![
                    FileEntry {
                        path: vec!["a.bin".to_string()],
                        length: 50_000,
                    },
                    FileEntry {
                        path: vec!["b.bin".to_string()],
                        length: 30_000,
                    },
                ],
            },
            pieces,
        }
    }

    async fn spawn_seeder(content: &[u8], peer_id: [u8; 20]) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let pieces: Vec<Vec<u8>> = content
            .chunks(PIECE_LENGTH as usize)
            .map(|c| c.to_vec())
            .collect();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            seed(stream, INFO_HASH, peer_id, pieces, true).await;
        });

        addr
    }

    fn config(dir: &TempDir) -> ClientConfig {
        ClientConfig {
            download_dir: dir.path().to_path_buf(),
            connect_timeout: Duration::from_secs(2),
            ..ClientConfig::default()
        }
    }

    #[tokio::test]
    async fn test_download_from_two_seeders() {
        let dir = TempDir::new().unwrap();
        let content = content();
        let metainfo = metainfo(&content);

        let first = spawn_seeder(&content, [2u8; 20]).await;
        let second = spawn_seeder(&content, [3u8; 20]).await;
        let peers = vec![
            Peer::new(first.ip(), first.port()),
            Peer::new(second.ip(), second.port()),
        ];

        let handle = Download::start(&metainfo, peers, &config(&dir), OURS)
            .await
            .unwrap();
        let progress = handle.progress();

        let summary = handle.wait().await.unwrap();
        assert_eq!(summary.pieces, 3);
        assert_eq!(summary.bytes, 80_000);
        assert!(progress.borrow().is_done());

        let a = std::fs::read(dir.path().join("bundle/a.bin")).unwrap();
        let b = std::fs::read(dir.path().join("bundle/b.bin")).unwrap();
        assert_eq!(a, &content[..50_000]);
        assert_eq!(b, &content[50_000..]);
    }

    #[tokio::test]
    async fn test_no_peers_is_stalled() {
        let dir = TempDir::new().unwrap();
        let metainfo = metainfo(&content());

        let handle = Download::start(&metainfo, Vec::new(), &config(&dir), OURS)
            .await
            .unwrap();

        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, LeechError::Stalled { missing: 3 }));
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_stalled() {
        let dir = TempDir::new().unwrap();
        let metainfo = metainfo(&content());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let peers = vec![Peer::new(addr.ip(), addr.port())];
        let handle = Download::start(&metainfo, peers, &config(&dir), OURS)
            .await
            .unwrap();

        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, LeechError::Stalled { missing: 3 }));
    }
}
