use super::{AnnounceRequest, AnnounceResponse};
use crate::bencode::decode;
use crate::error::{LeechError, Result};
use reqwest::Client;
use tracing::{debug, info};
use url::Url;

/// Client for HTTP(S) trackers
pub struct HttpTracker {
    client: Client,
}

impl HttpTracker {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Send an announce and get the peer list
    pub async fn announce(&self, tracker_url: &Url, request: &AnnounceRequest) -> Result<AnnounceResponse> {
        info!("Announcing to tracker: {}", tracker_url);

        let url = announce_url(tracker_url, request);
        debug!("Tracker request URL: {}", url);

        let response = self.client.get(url).send().await?;

        let status = response.status();
        let body = response.bytes().await?;

        debug!("Tracker response status: {}, body length: {}", status, body.len());

        if !status.is_success() {
            return Err(LeechError::Tracker(format!("HTTP error: {}", status)));
        }

        // Decode bencoded response
        let response = AnnounceResponse::from_bencode(&decode(&body)?)?;

        info!(
            "Received {} peers from tracker (interval: {}s)",
            response.peers.len(),
            response.interval
        );

        Ok(response)
    }
}

impl Default for HttpTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// The tracker URL with the announce parameters appended to any query it
/// already carries.
fn announce_url(tracker_url: &Url, request: &AnnounceRequest) -> Url {
    let mut url = tracker_url.clone();
    let query = match tracker_url.query() {
        Some(existing) if !existing.is_empty() => format!("{}&{}", existing, request.to_query()),
        _ => request.to_query(),
    };
    url.set_query(Some(&query));
    url
}
