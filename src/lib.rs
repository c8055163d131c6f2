//! A download-only BitTorrent client.
//!
//! [`peer`] holds the wire protocol and the per-connection session engine,
//! [`piece`] the swarm-wide piece bookkeeping shared by all sessions, and
//! [`storage`] the placement of verified pieces into files. [`client`] ties
//! them together with the [`tracker`] and [`torrent`] collaborators.

pub mod bencode;
pub mod client;
pub mod error;
pub mod peer;
pub mod piece;
pub mod storage;
pub mod torrent;
pub mod tracker;

pub use client::{ClientConfig, Download, DownloadHandle, Summary, TorrentClient};
pub use error::{HandshakeError, LeechError, Result};
