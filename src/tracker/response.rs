use super::Peer;
use crate::bencode::Value;
use crate::error::{LeechError, Result};
use std::net::IpAddr;

/// Response from a tracker
#[derive(Debug, Clone, Default)]
pub struct AnnounceResponse {
    /// Interval in seconds to wait before next request
    pub interval: u64,
    /// Minimum announce interval (optional)
    pub min_interval: Option<u64>,
    /// Tracker ID (optional)
    pub tracker_id: Option<String>,
    /// Number of seeders (optional)
    pub complete: Option<u64>,
    /// Number of leechers (optional)
    pub incomplete: Option<u64>,
    /// List of peers
    pub peers: Vec<Peer>,
}

impl AnnounceResponse {
    pub fn from_bencode(value: &Value) -> Result<Self> {
        if value.as_dict().is_none() {
            return Err(tracker_err("response must be a dict"));
        }

        // Check for failure reason
        if let Some(failure) = value.get("failure reason") {
            let reason = failure.as_str().unwrap_or("unknown failure").to_string();
            return Err(LeechError::Tracker(reason));
        }

        // Parse interval (required)
        let interval = value
            .get_int("interval")
            .and_then(|i| u64::try_from(i).ok())
            .ok_or_else(|| tracker_err("missing 'interval' field"))?;

        // Parse optional fields
        let count = |key: &str| value.get_int(key).and_then(|i| u64::try_from(i).ok());

        let mut peers = match value.get("peers") {
            Some(Value::Bytes(compact)) => Peer::from_compact_v4_list(compact),
            Some(Value::List(list)) => parse_peer_list(list)?,
            Some(_) => return Err(tracker_err("invalid 'peers' format")),
            None => Vec::new(),
        };

        if let Some(compact) = value.get_bytes("peers6") {
            peers.extend(Peer::from_compact_v6_list(compact));
        } else if value.get("peers").is_none() {
            return Err(tracker_err("missing 'peers' field"));
        }

        Ok(AnnounceResponse {
            interval,
            min_interval: count("min interval"),
            tracker_id: value.get_str("tracker id").map(String::from),
            complete: count("complete"),
            incomplete: count("incomplete"),
            peers,
        })
    }
}

fn tracker_err(msg: &str) -> LeechError {
    LeechError::Tracker(msg.to_string())
}

fn parse_peer_list(list: &[Value]) -> Result<Vec<Peer>> {
    let mut peers = Vec::new();

    for peer_value in list {
        // Parse IP
        let ip: IpAddr = peer_value
            .get_str("ip")
            .ok_or_else(|| tracker_err("missing peer 'ip'"))?
            .parse()
            .map_err(|_| tracker_err("invalid peer IP address"))?;

        // Parse port
        let port = peer_value
            .get_int("port")
            .and_then(|p| u16::try_from(p).ok())
            .ok_or_else(|| tracker_err("missing or invalid peer 'port'"))?;

        let mut peer = Peer::new(ip, port);
        peer.peer_id = peer_value
            .get_bytes("peer id")
            .and_then(|id| <[u8; 20]>::try_from(id).ok());

        peers.push(peer);
    }

    Ok(peers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::decode;

    #[test]
    fn test_compact_response() {
        let body = b"d8:completei4e10:incompletei2e8:intervali1800e5:peers12:\xc0\xa8\x01\x01\x1a\xe1\x0a\x00\x00\x01\x1a\xe1e";
        let response = AnnounceResponse::from_bencode(&decode(body).unwrap()).unwrap();

        assert_eq!(response.interval, 1800);
        assert_eq!(response.complete, Some(4));
        assert_eq!(response.incomplete, Some(2));
        assert_eq!(response.peers.len(), 2);
        assert_eq!(response.peers[0].addr, "192.168.1.1:6881".parse().unwrap());
    }

    #[test]
    fn test_dictionary_peers() {
        let body = b"d8:intervali60e5:peersld2:ip9:127.0.0.17:peer id20:aaaaaaaaaaaaaaaaaaaa4:porti6881eeee";
        let response = AnnounceResponse::from_bencode(&decode(body).unwrap()).unwrap();

        assert_eq!(response.peers.len(), 1);
        assert_eq!(response.peers[0].addr, "127.0.0.1:6881".parse().unwrap());
        assert_eq!(response.peers[0].peer_id, Some([b'a'; 20]));
    }

    #[test]
    fn test_peers6_only() {
        let mut body = b"d8:intervali60e6:peers618:".to_vec();
        body.extend_from_slice(&std::net::Ipv6Addr::LOCALHOST.octets());
        body.extend_from_slice(&[0x1a, 0xe1, b'e']);

        let response = AnnounceResponse::from_bencode(&decode(&body).unwrap()).unwrap();
        assert_eq!(response.peers[0].addr, "[::1]:6881".parse().unwrap());
    }

    #[test]
    fn test_failure_reason() {
        let body = b"d14:failure reason12:unregisterede";
        let err = AnnounceResponse::from_bencode(&decode(body).unwrap()).unwrap_err();
        assert!(matches!(err, LeechError::Tracker(ref reason) if reason == "unregistered"));
    }

    #[test]
    fn test_missing_peers() {
        let err = AnnounceResponse::from_bencode(&decode(b"d8:intervali60ee").unwrap()).unwrap_err();
        assert!(matches!(err, LeechError::Tracker(_)));
    }
}
