//! UDP tracker protocol (BEP 15).

use super::{AnnounceRequest, AnnounceResponse, Peer, TrackerEvent};
use crate::error::{LeechError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::Rng;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::{self, Instant};
use tracing::{debug, info};
use url::Url;

const PROTOCOL_ID: u64 = 0x41727101980;
const ACTION_CONNECT: u32 = 0;
const ACTION_ANNOUNCE: u32 = 1;
const ACTION_ERROR: u32 = 3;

/// Each attempt waits twice as long as the one before.
const MAX_ATTEMPTS: u32 = 4;
const BASE_TIMEOUT: Duration = Duration::from_secs(15);

pub struct UdpTracker {
    socket: UdpSocket,
    addr: SocketAddr,
    base_timeout: Duration,
}

impl UdpTracker {
    /// Resolve a `udp://host:port` URL and open a socket to it.
    pub async fn connect(tracker_url: &Url) -> Result<Self> {
        let host = tracker_url
            .host_str()
            .ok_or_else(|| LeechError::Tracker(format!("{} has no host", tracker_url)))?;
        let port = tracker_url
            .port()
            .ok_or_else(|| LeechError::Tracker(format!("{} has no port", tracker_url)))?;

        let addr = lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| LeechError::Tracker(format!("{} did not resolve", host)))?;

        Self::with_addr(addr, BASE_TIMEOUT).await
    }

    pub async fn with_addr(addr: SocketAddr, base_timeout: Duration) -> Result<Self> {
        let local = match addr {
            SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        };

        let socket = UdpSocket::bind(local).await?;
        socket.connect(addr).await?;

        Ok(Self {
            socket,
            addr,
            base_timeout,
        })
    }

    pub async fn announce(&self, request: &AnnounceRequest) -> Result<AnnounceResponse> {
        info!("Announcing to UDP tracker: {}", self.addr);

        let connection_id = self.connection_id().await?;
        let transaction_id: u32 = rand::thread_rng().gen();
        let key: u32 = rand::thread_rng().gen();

        let mut packet = BytesMut::with_capacity(98);
        packet.put_u64(connection_id);
        packet.put_u32(ACTION_ANNOUNCE);
        packet.put_u32(transaction_id);
        packet.put_slice(&request.info_hash);
        packet.put_slice(&request.peer_id);
        packet.put_u64(request.downloaded);
        packet.put_u64(request.left);
        packet.put_u64(request.uploaded);
        packet.put_u32(TrackerEvent::udp_id(request.event));
        packet.put_u32(0); // IP address, 0 = sender's
        packet.put_u32(key);
        packet.put_i32(-1); // num_want, -1 = tracker default
        packet.put_u16(request.port);

        let mut body = self
            .round_trip(&packet, ACTION_ANNOUNCE, transaction_id, 12)
            .await?;

        let interval = body.get_u32();
        let leechers = body.get_u32();
        let seeders = body.get_u32();

        let peers = if self.addr.is_ipv4() {
            Peer::from_compact_v4_list(&body)
        } else {
            Peer::from_compact_v6_list(&body)
        };

        info!(
            "Received {} peers from tracker (interval: {}s)",
            peers.len(),
            interval
        );

        Ok(AnnounceResponse {
            interval: interval as u64,
            complete: Some(seeders as u64),
            incomplete: Some(leechers as u64),
            peers,
            ..AnnounceResponse::default()
        })
    }

    async fn connection_id(&self) -> Result<u64> {
        let transaction_id: u32 = rand::thread_rng().gen();

        let mut packet = BytesMut::with_capacity(16);
        packet.put_u64(PROTOCOL_ID);
        packet.put_u32(ACTION_CONNECT);
        packet.put_u32(transaction_id);

        let mut body = self
            .round_trip(&packet, ACTION_CONNECT, transaction_id, 8)
            .await?;
        Ok(body.get_u64())
    }

    /// Send `packet` until a reply carrying `transaction_id` arrives and
    /// return what follows its action and transaction id. Replies to other
    /// transactions are dropped.
    async fn round_trip(
        &self,
        packet: &[u8],
        action: u32,
        transaction_id: u32,
        min_body: usize,
    ) -> Result<Bytes> {
        let mut buf = vec![0u8; 2048];

        for attempt in 0..MAX_ATTEMPTS {
            self.socket.send(packet).await?;
            let deadline = Instant::now() + self.base_timeout * (1 << attempt);

            loop {
                let n = match time::timeout_at(deadline, self.socket.recv(&mut buf)).await {
                    Ok(received) => received?,
                    Err(_) => {
                        debug!("UDP tracker {} timed out (attempt {})", self.addr, attempt + 1);
                        break;
                    }
                };

                let mut reply = &buf[..n];
                if reply.len() < 8 {
                    debug!("Ignoring {}-byte datagram from {}", n, self.addr);
                    continue;
                }

                let reply_action = reply.get_u32();
                if reply.get_u32() != transaction_id {
                    debug!("Ignoring reply to another transaction from {}", self.addr);
                    continue;
                }

                if reply_action == ACTION_ERROR {
                    return Err(LeechError::Tracker(
                        String::from_utf8_lossy(reply).into_owned(),
                    ));
                }
                if reply_action != action {
                    return Err(LeechError::Tracker(format!(
                        "expected action {}, got {}",
                        action, reply_action
                    )));
                }
                if reply.len() < min_body {
                    return Err(LeechError::Tracker(format!(
                        "{}-byte reply is too short",
                        n
                    )));
                }

                return Ok(Bytes::copy_from_slice(reply));
            }
        }

        Err(LeechError::Tracker(format!(
            "no response from {} after {} attempts",
            self.addr, MAX_ATTEMPTS
        )))
    }
}
