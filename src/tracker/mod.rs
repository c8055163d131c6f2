mod http;
mod peer;
mod request;
mod response;
mod udp;

pub use http::HttpTracker;
pub use peer::Peer;
pub use request::{AnnounceRequest, TrackerEvent};
pub use response::AnnounceResponse;
pub use udp::UdpTracker;

use crate::error::{LeechError, Result};
use rand::distributions::Alphanumeric;
use rand::Rng;
use url::Url;

pub const PEER_ID_PREFIX: &[u8; 8] = b"-LW0001-";

/// Generate a random peer ID
/// Format: -LW0001-<12 random alphanumerics>
pub fn generate_peer_id() -> [u8; 20] {
    let mut peer_id = [0u8; 20];
    peer_id[0..8].copy_from_slice(PEER_ID_PREFIX);

    let mut rng = rand::thread_rng();
    for byte in &mut peer_id[8..] {
        *byte = rng.sample(Alphanumeric);
    }

    peer_id
}

/// Announce to one tracker, picking the transport from the URL scheme.
pub async fn announce(tracker_url: &str, request: &AnnounceRequest) -> Result<AnnounceResponse> {
    let url = Url::parse(tracker_url)?;

    match url.scheme() {
        "http" | "https" => HttpTracker::new().announce(&url, request).await,
        "udp" => UdpTracker::connect(&url).await?.announce(request).await,
        other => Err(LeechError::Tracker(format!(
            "unsupported tracker scheme {:?}",
            other
        ))),
    }
}
