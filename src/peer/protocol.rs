use crate::error::HandshakeError;

pub const PROTOCOL_STRING: &[u8] = b"BitTorrent protocol";

/// Total: 1 + 19 + 8 + 20 + 20 = 68 bytes
pub const HANDSHAKE_LEN: usize = 68;

/// Handshake message for peer wire protocol
/// Format: <pstrlen><pstr><reserved><info_hash><peer_id>
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self { info_hash, peer_id }
    }

    /// Serialize with all reserved bits cleared; no extensions are offered.
    pub fn to_bytes(&self) -> [u8; HANDSHAKE_LEN] {
        let mut buf = [0u8; HANDSHAKE_LEN];
        buf[0] = PROTOCOL_STRING.len() as u8;
        buf[1..20].copy_from_slice(PROTOCOL_STRING);
        buf[28..48].copy_from_slice(&self.info_hash);
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    /// Parse a handshake without judging who sent it.
    pub fn parse(data: &[u8]) -> Result<Self, HandshakeError> {
        if data.len() < HANDSHAKE_LEN
            || data[0] as usize != PROTOCOL_STRING.len()
            || &data[1..20] != PROTOCOL_STRING
        {
            return Err(HandshakeError::ProtocolMismatch);
        }

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&data[28..48]);

        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&data[48..68]);

        Ok(Self { info_hash, peer_id })
    }

    /// Parse and validate a remote handshake. Checks run in a fixed order:
    /// protocol string, self connection, info hash, then consistency with a
    /// peer id recorded earlier for this connection.
    pub fn decode(
        data: &[u8],
        expected_info_hash: &[u8; 20],
        own_peer_id: &[u8; 20],
        previously_seen: Option<&[u8; 20]>,
    ) -> Result<Self, HandshakeError> {
        let handshake = Self::parse(data)?;

        if &handshake.peer_id == own_peer_id {
            return Err(HandshakeError::SelfConnection);
        }

        if &handshake.info_hash != expected_info_hash {
            return Err(HandshakeError::InfoHashMismatch);
        }

        if previously_seen.is_some_and(|seen| seen != &handshake.peer_id) {
            return Err(HandshakeError::PeerIdChanged);
        }

        Ok(handshake)
    }
}
