//! Per-connection protocol state machine.
//!
//! `PeerSession` does no I/O. The connection driver feeds it frames and a
//! borrowed [`PieceTracker`], then writes out whatever messages it queued.
//! Keeping the tracker borrow inside one synchronous call means a tracker
//! mutation is never split across an await point.

use super::framer::Frame;
use super::message::Message;
use super::protocol::Handshake;
use super::PeerState;
use crate::error::{LeechError, Result};
use crate::piece::{Bitfield, PieceDescriptor, PieceTracker};
use bytes::{Bytes, BytesMut};
use std::fmt;
use tracing::{debug, info, warn};

/// Identifies the session that owns an in-flight piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing sent yet
    AwaitingHandshake,
    /// Our handshake is out, waiting for theirs
    Handshaking,
    /// Handshake done, no piece claimed
    Ready,
    /// A piece is claimed and some of its blocks still have to be requested
    Requesting,
    /// Every block of the claimed piece has been requested
    AwaitingBlocks,
    Closed,
}

/// What a handled frame changed, for the driver's timers and shutdown logic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Outcome {
    pub block_received: bool,
    pub requests_sent: bool,
    pub piece_completed: bool,
    pub swarm_complete: bool,
}

/// The piece this session is downloading.
struct ActivePiece {
    descriptor: PieceDescriptor,
    /// First block not yet requested
    next_block_index: u16,
    data: BytesMut,
    received: Vec<bool>,
    received_count: u16,
}

impl ActivePiece {
    fn new(descriptor: PieceDescriptor) -> Self {
        let length = descriptor.length as usize;
        let blocks = descriptor.num_blocks as usize;

        Self {
            descriptor,
            next_block_index: 0,
            data: BytesMut::zeroed(length),
            received: vec![false; blocks],
            received_count: 0,
        }
    }

    fn is_downloaded(&self) -> bool {
        self.received_count == self.descriptor.num_blocks
    }
}

pub struct PeerSession {
    id: SessionId,
    info_hash: [u8; 20],
    own_peer_id: [u8; 20],
    remote_peer_id: Option<[u8; 20]>,
    state: SessionState,
    flags: PeerState,
    peer_bitfield: Bitfield,
    active: Option<ActivePiece>,
    hash_failures: u32,
    max_hash_failures: u32,
    outbox: Vec<Message>,
}

impl PeerSession {
    pub fn new(
        id: SessionId,
        info_hash: [u8; 20],
        own_peer_id: [u8; 20],
        num_pieces: usize,
        max_hash_failures: u32,
    ) -> Self {
        Self {
            id,
            info_hash,
            own_peer_id,
            remote_peer_id: None,
            state: SessionState::AwaitingHandshake,
            flags: PeerState::default(),
            peer_bitfield: Bitfield::new(num_pieces),
            active: None,
            hash_failures: 0,
            max_hash_failures,
            outbox: Vec::new(),
        }
    }

    /// Expect the remote to present this peer id (known from the tracker).
    pub fn with_known_peer_id(mut self, peer_id: [u8; 20]) -> Self {
        self.remote_peer_id = Some(peer_id);
        self
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn flags(&self) -> &PeerState {
        &self.flags
    }

    pub fn peer_bitfield(&self) -> &Bitfield {
        &self.peer_bitfield
    }

    pub fn remote_peer_id(&self) -> Option<&[u8; 20]> {
        self.remote_peer_id.as_ref()
    }

    pub fn handshake_done(&self) -> bool {
        !matches!(
            self.state,
            SessionState::AwaitingHandshake | SessionState::Handshaking
        )
    }

    /// Index of the piece this session currently holds a claim on.
    pub fn claimed_piece(&self) -> Option<u32> {
        self.active.as_ref().map(|a| a.descriptor.index)
    }

    /// Produce our handshake. Must be called once, before any frame.
    pub fn start(&mut self) -> [u8; 68] {
        self.state = SessionState::Handshaking;
        Handshake::new(self.info_hash, self.own_peer_id).to_bytes()
    }

    /// Messages queued for the peer since the last call.
    pub fn take_outgoing(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.outbox)
    }

    pub fn handle_frame(&mut self, frame: Frame, tracker: &mut PieceTracker) -> Result<Outcome> {
        let mut outcome = Outcome::default();

        match (self.state, frame) {
            (SessionState::Closed, _) => return Ok(outcome),
            (SessionState::Handshaking, Frame::Handshake(raw)) => self.on_handshake(&raw)?,
            (_, Frame::Handshake(_)) => {
                return Err(LeechError::ProtocolViolation(
                    "unexpected handshake".to_string(),
                ))
            }
            (SessionState::AwaitingHandshake | SessionState::Handshaking, Frame::Message(_)) => {
                return Err(LeechError::ProtocolViolation(
                    "message before handshake".to_string(),
                ))
            }
            (_, Frame::Message(body)) => {
                let message = Message::decode(body)?;
                self.on_message(message, tracker, &mut outcome)?;
            }
        }

        self.try_request(tracker, &mut outcome);
        self.refresh_state();
        Ok(outcome)
    }

    /// Look for work again after another session gave a piece back. An idle
    /// session whose peer owns a now unclaimed piece becomes interested and
    /// claims it if unchoked.
    pub fn reevaluate(&mut self, tracker: &mut PieceTracker) -> Outcome {
        let mut outcome = Outcome::default();

        if !self.handshake_done()
            || self.state == SessionState::Closed
            || self.active.is_some()
            || !tracker.has_claimable(&self.peer_bitfield)
        {
            return outcome;
        }

        if !self.flags.am_interested {
            self.send_interested();
        }
        self.try_request(tracker, &mut outcome);
        self.refresh_state();
        outcome
    }

    /// Give up the claimed piece, if any, and stop processing frames.
    pub fn close(&mut self, tracker: &mut PieceTracker) {
        if let Some(active) = self.active.take() {
            let index = active.descriptor.index;
            if tracker.release_piece(index) {
                info!(
                    "Session {} released piece {} ({}/{} blocks received)",
                    self.id, index, active.received_count, active.descriptor.num_blocks
                );
            }
        }
        self.state = SessionState::Closed;
    }

    fn on_handshake(&mut self, raw: &[u8]) -> Result<()> {
        let handshake = Handshake::decode(
            raw,
            &self.info_hash,
            &self.own_peer_id,
            self.remote_peer_id.as_ref(),
        )?;

        debug!(
            "Session {} handshake accepted, peer id {}",
            self.id,
            hex::encode(handshake.peer_id)
        );

        self.remote_peer_id = Some(handshake.peer_id);
        self.state = SessionState::Ready;
        self.send_interested();
        Ok(())
    }

    fn on_message(
        &mut self,
        message: Message,
        tracker: &mut PieceTracker,
        outcome: &mut Outcome,
    ) -> Result<()> {
        match message {
            Message::KeepAlive => {}
            Message::Choke => {
                debug!("Session {} choked", self.id);
                self.flags.am_choked = true;
                // the peer drops our outstanding requests when it chokes us
                if let Some(active) = self.active.as_mut() {
                    active.next_block_index = 0;
                }
            }
            Message::Unchoke => {
                debug!("Session {} unchoked", self.id);
                self.flags.am_choked = false;
            }
            Message::Interested => self.flags.peer_interested = true,
            Message::NotInterested => self.flags.peer_interested = false,
            Message::Have { piece_index } => {
                let index = piece_index as usize;
                if index >= self.peer_bitfield.len() {
                    return Err(LeechError::ProtocolViolation(format!(
                        "have for piece {} of {}",
                        piece_index,
                        self.peer_bitfield.len()
                    )));
                }
                if self.peer_bitfield.set(index) {
                    tracker.record_peer_has(index);
                }
                if !self.flags.am_interested {
                    self.send_interested();
                }
            }
            Message::Bitfield { bitfield } => {
                let newly_set = self.peer_bitfield.overlay(&bitfield);
                debug!(
                    "Session {} bitfield: {} pieces advertised",
                    self.id,
                    self.peer_bitfield.count_ones()
                );
                for index in newly_set {
                    tracker.record_peer_has(index);
                }
                if !self.flags.am_interested {
                    self.send_interested();
                }
            }
            Message::Request { block } | Message::Cancel { block } => {
                debug!("Session {} ignoring upload request {:?}", self.id, block);
            }
            Message::Port { .. } => {}
            Message::Piece {
                piece_index,
                offset,
                data,
            } => self.on_block(piece_index, offset, data, tracker, outcome)?,
        }

        Ok(())
    }

    fn on_block(
        &mut self,
        piece_index: u32,
        offset: u32,
        data: Bytes,
        tracker: &mut PieceTracker,
        outcome: &mut Outcome,
    ) -> Result<()> {
        let Some(active) = self.active.as_mut() else {
            debug!("Session {} got unsolicited block of piece {}", self.id, piece_index);
            return Ok(());
        };

        if active.descriptor.index != piece_index {
            debug!(
                "Session {} got block of piece {} while downloading {}",
                self.id, piece_index, active.descriptor.index
            );
            return Ok(());
        }

        if tracker.is_complete(piece_index) {
            debug!(
                "Session {} dropping piece {}, already complete",
                self.id, piece_index
            );
            self.active = None;
            return Ok(());
        }

        let expected = active
            .descriptor
            .block_index_at(offset)
            .and_then(|i| active.descriptor.block(i).map(|block| (i, block)));

        let Some((block_index, block)) = expected else {
            debug!("Session {} got misaligned block at offset {}", self.id, offset);
            return Ok(());
        };

        if data.len() != block.length as usize || active.received[block_index as usize] {
            debug!(
                "Session {} ignoring block {} of piece {} ({} bytes)",
                self.id,
                block_index,
                piece_index,
                data.len()
            );
            return Ok(());
        }

        let start = offset as usize;
        active.data[start..start + data.len()].copy_from_slice(&data);
        active.received[block_index as usize] = true;
        active.received_count += 1;
        outcome.block_received = true;

        if active.is_downloaded() {
            self.finish_piece(tracker, outcome)?;
        }

        Ok(())
    }

    fn finish_piece(&mut self, tracker: &mut PieceTracker, outcome: &mut Outcome) -> Result<()> {
        let Some(active) = self.active.take() else {
            return Ok(());
        };

        let descriptor = active.descriptor;
        let data = active.data.freeze();

        if !descriptor.verify(&data) {
            self.hash_failures += 1;
            warn!(
                "Session {} piece {} failed hash check ({} failures)",
                self.id, descriptor.index, self.hash_failures
            );
            tracker.release_piece(descriptor.index);

            if self.hash_failures >= self.max_hash_failures {
                return Err(LeechError::ProtocolViolation(format!(
                    "{} pieces failed verification",
                    self.hash_failures
                )));
            }
            return Ok(());
        }

        if tracker.complete_piece(descriptor.index, data) {
            outcome.piece_completed = true;
        }
        outcome.swarm_complete = tracker.all_complete();
        Ok(())
    }

    /// Claim a piece if we may download one, then pipeline requests for
    /// every block not yet asked for.
    fn try_request(&mut self, tracker: &mut PieceTracker, outcome: &mut Outcome) {
        if !self.handshake_done() || self.state == SessionState::Closed {
            return;
        }

        if !self.flags.am_interested || self.flags.am_choked || !self.peer_bitfield.any() {
            return;
        }

        if self.active.is_none() {
            match tracker.claim_piece(self.id, &self.peer_bitfield) {
                Some(descriptor) => {
                    debug!(
                        "Session {} downloading piece {} ({} blocks)",
                        self.id, descriptor.index, descriptor.num_blocks
                    );
                    self.active = Some(ActivePiece::new(descriptor));
                }
                None => {
                    debug!("Session {} peer has nothing we need", self.id);
                    self.flags.am_interested = false;
                    self.outbox.push(Message::NotInterested);
                    return;
                }
            }
        }

        let Some(active) = self.active.as_mut() else {
            return;
        };

        for block_index in active.next_block_index..active.descriptor.num_blocks {
            if active.received[block_index as usize] {
                continue;
            }
            if let Some(block) = active.descriptor.block(block_index) {
                self.outbox.push(Message::Request { block });
                outcome.requests_sent = true;
            }
        }
        active.next_block_index = active.descriptor.num_blocks;
    }

    fn send_interested(&mut self) {
        self.flags.am_interested = true;
        self.outbox.push(Message::Interested);
    }

    fn refresh_state(&mut self) {
        if !self.handshake_done() || self.state == SessionState::Closed {
            return;
        }

        self.state = match &self.active {
            None => SessionState::Ready,
            Some(active) if active.next_block_index < active.descriptor.num_blocks => {
                SessionState::Requesting
            }
            Some(_) => SessionState::AwaitingBlocks,
        };
    }
}
