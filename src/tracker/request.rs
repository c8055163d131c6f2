use percent_encoding::{percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Everything except the RFC 3986 unreserved characters gets `%XX`.
const QUERY_BYTES: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Events sent to the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerEvent {
    Started,
    Stopped,
    Completed,
}

impl TrackerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerEvent::Started => "started",
            TrackerEvent::Stopped => "stopped",
            TrackerEvent::Completed => "completed",
        }
    }

    /// Event code in a UDP announce; 0 means no event.
    pub fn udp_id(event: Option<Self>) -> u32 {
        match event {
            None => 0,
            Some(TrackerEvent::Completed) => 1,
            Some(TrackerEvent::Started) => 2,
            Some(TrackerEvent::Stopped) => 3,
        }
    }
}

/// Parameters of one announce, shared by the HTTP and UDP transports
#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    /// SHA1 hash of the info dictionary
    pub info_hash: [u8; 20],
    /// Unique peer ID
    pub peer_id: [u8; 20],
    /// Port reported to the tracker
    pub port: u16,
    /// Total amount uploaded
    pub uploaded: u64,
    /// Total amount downloaded
    pub downloaded: u64,
    /// Number of bytes left to download
    pub left: u64,
    pub event: Option<TrackerEvent>,
    /// Request compact peer list format
    pub compact: bool,
}

impl AnnounceRequest {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20], port: u16, left: u64) -> Self {
        Self {
            info_hash,
            peer_id,
            port,
            uploaded: 0,
            downloaded: 0,
            left,
            event: Some(TrackerEvent::Started),
            compact: true,
        }
    }

    /// HTTP query string with the binary fields percent-encoded.
    pub fn to_query(&self) -> String {
        let mut query = format!(
            "info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact={}",
            encode_bytes(&self.info_hash),
            encode_bytes(&self.peer_id),
            self.port,
            self.uploaded,
            self.downloaded,
            self.left,
            if self.compact { 1 } else { 0 },
        );

        if let Some(event) = self.event {
            query.push_str("&event=");
            query.push_str(event.as_str());
        }

        query
    }
}

fn encode_bytes(bytes: &[u8]) -> String {
    percent_encode(bytes, QUERY_BYTES).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_encodes_binary_hash() {
        let mut info_hash = [0u8; 20];
        info_hash[1] = 0xff;
        info_hash[2] = b'a';
        let request = AnnounceRequest::new(info_hash, *b"-LW0001-abcdefghijkl", 6881, 1000);

        let query = request.to_query();
        assert!(query.starts_with("info_hash=%00%FFa%00"));
        assert!(query.contains("&peer_id=-LW0001-abcdefghijkl&"));
        assert!(query.contains("&port=6881&"));
        assert!(query.contains("&left=1000&compact=1&event=started"));
    }

    #[test]
    fn test_query_escapes_space_and_plus() {
        let mut info_hash = [b'x'; 20];
        info_hash[0] = b' ';
        info_hash[1] = b'+';
        info_hash[2] = b'~';
        let request = AnnounceRequest::new(info_hash, [b'.'; 20], 6881, 0);

        let query = request.to_query();
        assert!(query.starts_with("info_hash=%20%2B~xxx"));
        assert!(query.contains(&format!("&peer_id={}&", ".".repeat(20))));
        assert!(!query.contains('+'));
    }

    #[test]
    fn test_udp_event_ids() {
        assert_eq!(TrackerEvent::udp_id(None), 0);
        assert_eq!(TrackerEvent::udp_id(Some(TrackerEvent::Completed)), 1);
        assert_eq!(TrackerEvent::udp_id(Some(TrackerEvent::Started)), 2);
        assert_eq!(TrackerEvent::udp_id(Some(TrackerEvent::Stopped)), 3);
    }
}
