mod connection;
mod framer;
mod message;
mod protocol;
mod session;
#[cfg(test)]
pub(crate) mod test_seeder;

pub use connection::{PeerConnection, SessionEnd, SessionTiming, SharedTracker};
pub use framer::{max_frame_len, Frame, Frames, MessageFramer};
pub use message::{BlockInfo, Message};
pub use protocol::{Handshake, HANDSHAKE_LEN, PROTOCOL_STRING};
pub use session::{Outcome, PeerSession, SessionId, SessionState};

/// Choke and interest flags of one connection.
///
/// `am_choked` is the peer choking us; `peer_choked` is us choking the peer,
/// which never changes since nothing is uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerState {
    /// Whether we want blocks from the peer
    pub am_interested: bool,
    /// Whether the peer refuses our requests
    pub am_choked: bool,
    /// Whether the peer wants blocks from us
    pub peer_interested: bool,
    /// Whether we refuse the peer's requests
    pub peer_choked: bool,
}

impl Default for PeerState {
    fn default() -> Self {
        Self {
            am_interested: false,
            am_choked: true,
            peer_interested: false,
            peer_choked: true,
        }
    }
}
