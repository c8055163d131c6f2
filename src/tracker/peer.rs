use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Represents a peer in the swarm
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Peer {
    pub addr: SocketAddr,
    pub peer_id: Option<[u8; 20]>,
}

impl Peer {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self {
            addr: SocketAddr::new(ip, port),
            peer_id: None,
        }
    }

    /// Parse a peer from compact IPv4 format (4 IP + 2 port)
    pub fn from_compact_v4(data: &[u8]) -> Option<Self> {
        let octets: [u8; 4] = data.get(..4)?.try_into().ok()?;
        let port = u16::from_be_bytes(data.get(4..6)?.try_into().ok()?);
        Some(Self::new(IpAddr::V4(Ipv4Addr::from(octets)), port))
    }

    /// Parse a peer from compact IPv6 format (16 IP + 2 port)
    pub fn from_compact_v6(data: &[u8]) -> Option<Self> {
        let octets: [u8; 16] = data.get(..16)?.try_into().ok()?;
        let port = u16::from_be_bytes(data.get(16..18)?.try_into().ok()?);
        Some(Self::new(IpAddr::V6(Ipv6Addr::from(octets)), port))
    }

    /// Parse multiple peers from compact IPv4 format. A trailing partial
    /// entry is ignored.
    pub fn from_compact_v4_list(data: &[u8]) -> Vec<Self> {
        data.chunks_exact(6)
            .filter_map(Self::from_compact_v4)
            .collect()
    }

    pub fn from_compact_v6_list(data: &[u8]) -> Vec<Self> {
        data.chunks_exact(18)
            .filter_map(Self::from_compact_v6)
            .collect()
    }
}
