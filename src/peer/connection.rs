use super::{max_frame_len, Message, MessageFramer, PeerSession};
use crate::error::Result;
use crate::piece::{CompletedPiece, PieceTracker};
use bytes::BytesMut;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

/// The piece tracker as shared between sessions. Every lock is held for one
/// synchronous session step only.
pub type SharedTracker = Arc<Mutex<PieceTracker>>;

const READ_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct SessionTiming {
    /// TCP connect, and again for the remote handshake to arrive
    pub connect_timeout: Duration,
    /// How long a claimed piece may go without a block arriving
    pub stall_timeout: Duration,
    pub keep_alive_interval: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            stall_timeout: Duration::from_secs(60),
            keep_alive_interval: Duration::from_secs(90),
        }
    }
}

/// Why a session stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Every piece of the torrent is complete
    SwarmComplete,
    /// The file writer is gone, so there is nowhere to put blocks
    WriterClosed,
}

/// Drives one `PeerSession` over a byte stream.
pub struct PeerConnection<S> {
    addr: SocketAddr,
    stream: S,
    framer: MessageFramer,
    session: PeerSession,
    tracker: SharedTracker,
    writer: mpsc::Sender<CompletedPiece>,
    timing: SessionTiming,
}

impl PeerConnection<TcpStream> {
    /// Open a TCP connection to a peer.
    pub async fn connect(
        addr: SocketAddr,
        session: PeerSession,
        tracker: SharedTracker,
        writer: mpsc::Sender<CompletedPiece>,
        timing: SessionTiming,
    ) -> Result<Self> {
        info!("Connecting to peer: {}", addr);

        let stream = time::timeout(timing.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                io::Error::new(io::ErrorKind::TimedOut, format!("connect to {} timed out", addr))
            })??;

        Ok(Self::new(addr, stream, session, tracker, writer, timing))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> PeerConnection<S> {
    pub fn new(
        addr: SocketAddr,
        stream: S,
        session: PeerSession,
        tracker: SharedTracker,
        writer: mpsc::Sender<CompletedPiece>,
        timing: SessionTiming,
    ) -> Self {
        let framer = MessageFramer::new(max_frame_len(session.peer_bitfield().len()));

        Self {
            addr,
            stream,
            framer,
            session,
            tracker,
            writer,
            timing,
        }
    }

    /// Run the session until the torrent completes or the connection fails.
    /// Whatever happens, a piece still claimed by this session goes back to
    /// the tracker.
    pub async fn run(mut self) -> Result<SessionEnd> {
        let result = self.drive().await;

        {
            let mut tracker = self.tracker.lock().await;
            self.session.close(&mut tracker);
        }

        match &result {
            Ok(end) => info!("Session with {} finished: {:?}", self.addr, end),
            Err(e) => warn!("Session with {} closed: {}", self.addr, e),
        }

        result
    }

    async fn drive(&mut self) -> Result<SessionEnd> {
        let handshake = self.session.start();
        self.stream.write_all(&handshake).await?;
        debug!("Sent handshake to {}", self.addr);

        let started = Instant::now();
        let mut last_progress = started;
        let mut keep_alive = time::interval_at(
            started + self.timing.keep_alive_interval,
            self.timing.keep_alive_interval,
        );
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut releases = self.tracker.lock().await.subscribe_releases();

        loop {
            let watchdog = if !self.session.handshake_done() {
                Some(started + self.timing.connect_timeout)
            } else if self.session.claimed_piece().is_some() {
                Some(last_progress + self.timing.stall_timeout)
            } else {
                None
            };

            tokio::select! {
                read = self.stream.read(&mut buf) => {
                    let n = read?;
                    if n == 0 {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "peer closed the connection",
                        )
                        .into());
                    }

                    self.framer.feed(&buf[..n]);
                    if let Some(end) = self.process_frames(&mut last_progress).await? {
                        return Ok(end);
                    }
                }
                _ = keep_alive.tick() => {
                    self.stream.write_all(&Message::KeepAlive.to_bytes()).await?;
                }
                Ok(()) = releases.changed() => {
                    let outcome = {
                        let mut tracker = self.tracker.lock().await;
                        self.session.reevaluate(&mut tracker)
                    };
                    self.flush().await?;
                    if outcome.requests_sent {
                        last_progress = Instant::now();
                    }
                }
                _ = time::sleep_until(watchdog.unwrap_or(started)), if watchdog.is_some() => {
                    let reason = if self.session.handshake_done() {
                        "no block received before the stall timeout"
                    } else {
                        "no handshake received in time"
                    };
                    return Err(io::Error::new(io::ErrorKind::TimedOut, reason).into());
                }
            }
        }
    }

    /// Handle every complete frame buffered so far.
    async fn process_frames(&mut self, last_progress: &mut Instant) -> Result<Option<SessionEnd>> {
        while let Some(frame) = self.framer.next_frame()? {
            let (outcome, completed) = {
                let mut tracker = self.tracker.lock().await;
                let outcome = self.session.handle_frame(frame, &mut tracker)?;
                let completed: Vec<CompletedPiece> =
                    std::iter::from_fn(|| tracker.take_completed()).collect();
                (outcome, completed)
            };

            for piece in completed {
                if self.writer.send(piece).await.is_err() {
                    return Ok(Some(SessionEnd::WriterClosed));
                }
            }

            self.flush().await?;

            if outcome.block_received || outcome.requests_sent {
                *last_progress = Instant::now();
            }

            if outcome.swarm_complete {
                return Ok(Some(SessionEnd::SwarmComplete));
            }
        }

        Ok(None)
    }

    async fn flush(&mut self) -> Result<()> {
        let outgoing = self.session.take_outgoing();
        if outgoing.is_empty() {
            return Ok(());
        }

        let mut buf = BytesMut::new();
        for message in &outgoing {
            message.encode(&mut buf);
        }
        self.stream.write_all(&buf).await?;
        self.stream.flush().await?;

        debug!("Sent {} messages to {}", outgoing.len(), self.addr);
        Ok(())
    }
}
