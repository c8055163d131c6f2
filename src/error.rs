use std::path::PathBuf;
use thiserror::Error;

/// Reasons a remote handshake is refused.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("protocol string is not \"BitTorrent protocol\"")]
    ProtocolMismatch,

    #[error("peer advertised our own peer id")]
    SelfConnection,

    #[error("peer is serving a different info hash")]
    InfoHashMismatch,

    #[error("peer id differs from the one previously recorded")]
    PeerIdChanged,
}

#[derive(Error, Debug)]
pub enum LeechError {
    #[error("Bencode parsing error: {0}")]
    Bencode(String),

    #[error("Invalid torrent file: {0}")]
    InvalidTorrent(String),

    #[error("Tracker error: {0}")]
    Tracker(String),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Peer mismatch: {0}")]
    PeerMismatch(HandshakeError),

    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Failed to write {}: {source}", path.display())]
    Assembly {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Download stalled with {missing} pieces missing and no live peers")]
    Stalled { missing: usize },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(String),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl LeechError {
    /// Only on-disk assembly failures abort the whole run; anything else
    /// ends a single peer session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LeechError::Assembly { .. })
    }

    pub(crate) fn assembly(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LeechError::Assembly {
            path: path.into(),
            source,
        }
    }
}

impl From<HandshakeError> for LeechError {
    fn from(err: HandshakeError) -> Self {
        match err {
            HandshakeError::ProtocolMismatch => LeechError::ProtocolViolation(err.to_string()),
            other => LeechError::PeerMismatch(other),
        }
    }
}

impl From<url::ParseError> for LeechError {
    fn from(err: url::ParseError) -> Self {
        LeechError::UrlParse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LeechError>;
