//! Reassembly of peer-wire frames from an arbitrarily chunked byte stream.
//!
//! Bytes go in through [`MessageFramer::feed`] in whatever sizes the socket
//! hands them over; complete frames come out of [`MessageFramer::next_frame`]
//! (or the [`Frames`] iterator) in arrival order. A read may end in the
//! middle of a length prefix, in the middle of a body, or contain dozens of
//! messages at once.

use super::protocol::HANDSHAKE_LEN;
use crate::error::{LeechError, Result};
use crate::piece::BLOCK_SIZE;
use bytes::{Buf, Bytes, BytesMut};

/// `<id><index><begin>` in front of a block.
const PIECE_HEADER_LEN: u32 = 9;

/// A complete unit read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// The raw 68-byte handshake
    Handshake(Bytes),
    /// `<message id><payload>` of a length-prefixed message
    Message(Bytes),
}

/// Largest frame body a well-behaved peer sends us: a full block with its
/// header, or a bitfield covering every piece, whichever is bigger.
pub fn max_frame_len(num_pieces: usize) -> u32 {
    let bitfield = 1 + num_pieces.div_ceil(8) as u32;
    (BLOCK_SIZE + PIECE_HEADER_LEN).max(bitfield)
}

pub struct MessageFramer {
    pending: BytesMut,
    /// Body length of the message whose prefix was already consumed
    needed: Option<usize>,
    awaiting_handshake: bool,
    max_len: u32,
    failed: bool,
}

impl MessageFramer {
    /// A framer for a fresh connection: the first frame is the handshake.
    pub fn new(max_len: u32) -> Self {
        Self {
            pending: BytesMut::new(),
            needed: None,
            awaiting_handshake: true,
            max_len,
            failed: false,
        }
    }

    /// A framer that expects length-prefixed messages from the start.
    pub fn without_handshake(max_len: u32) -> Self {
        Self {
            awaiting_handshake: false,
            ..Self::new(max_len)
        }
    }

    pub fn feed(&mut self, data: &[u8]) {
        if !self.failed {
            self.pending.extend_from_slice(data);
        }
    }

    /// Bytes buffered but not yet emitted as a frame.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// The next complete frame, or `None` until more bytes are fed.
    ///
    /// Keep-alives are swallowed. An oversized length prefix is reported
    /// once as a protocol violation; the framer then discards everything.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.failed {
            return Ok(None);
        }

        if self.awaiting_handshake {
            if self.pending.len() < HANDSHAKE_LEN {
                return Ok(None);
            }
            self.awaiting_handshake = false;
            let handshake = self.pending.split_to(HANDSHAKE_LEN).freeze();
            return Ok(Some(Frame::Handshake(handshake)));
        }

        loop {
            let needed = match self.needed {
                Some(needed) => needed,
                None => {
                    if self.pending.len() < 4 {
                        return Ok(None);
                    }

                    let len = self.pending.get_u32();
                    if len == 0 {
                        continue;
                    }

                    if len > self.max_len {
                        self.failed = true;
                        self.pending.clear();
                        return Err(LeechError::ProtocolViolation(format!(
                            "message length {} exceeds limit {}",
                            len, self.max_len
                        )));
                    }

                    let len = len as usize;
                    self.needed = Some(len);
                    len
                }
            };

            if self.pending.len() < needed {
                self.pending.reserve(needed - self.pending.len());
                return Ok(None);
            }

            self.needed = None;
            return Ok(Some(Frame::Message(self.pending.split_to(needed).freeze())));
        }
    }

    /// Drain every frame currently available.
    pub fn frames(&mut self) -> Frames<'_> {
        Frames { framer: self }
    }
}

/// Iterator over the frames buffered so far. Stops when more input is
/// needed; feeding more bytes and iterating again resumes where it left off.
pub struct Frames<'a> {
    framer: &'a mut MessageFramer,
}

impl Iterator for Frames<'_> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.framer.next_frame().transpose()
    }
}
