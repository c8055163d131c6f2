use crate::error::{LeechError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Information about a block within a piece
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Piece index
    pub piece_index: u32,
    /// Byte offset within the piece
    pub offset: u32,
    /// Length of the block
    pub length: u32,
}

impl BlockInfo {
    pub fn new(piece_index: u32, offset: u32, length: u32) -> Self {
        Self {
            piece_index,
            offset,
            length,
        }
    }

    fn read(payload: &mut Bytes) -> Self {
        Self::new(payload.get_u32(), payload.get_u32(), payload.get_u32())
    }

    fn write(&self, buf: &mut BytesMut) {
        buf.put_u32(self.piece_index);
        buf.put_u32(self.offset);
        buf.put_u32(self.length);
    }
}

/// Messages exchanged after the handshake, one variant per message id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Zero-length frame; only ever sent, the framer drops incoming ones
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece_index: u32 },
    /// Raw bits, MSB-first
    Bitfield { bitfield: Bytes },
    Request { block: BlockInfo },
    Piece {
        piece_index: u32,
        offset: u32,
        data: Bytes,
    },
    Cancel { block: BlockInfo },
    /// DHT port, unused
    Port { port: u16 },
}

impl Message {
    const CHOKE: u8 = 0;
    const UNCHOKE: u8 = 1;
    const INTERESTED: u8 = 2;
    const NOT_INTERESTED: u8 = 3;
    const HAVE: u8 = 4;
    const BITFIELD: u8 = 5;
    const REQUEST: u8 = 6;
    const PIECE: u8 = 7;
    const CANCEL: u8 = 8;
    const PORT: u8 = 9;

    /// Append `<length prefix><message id><payload>` to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Message::KeepAlive => buf.put_u32(0),
            Message::Choke => put_header(buf, Self::CHOKE, 0),
            Message::Unchoke => put_header(buf, Self::UNCHOKE, 0),
            Message::Interested => put_header(buf, Self::INTERESTED, 0),
            Message::NotInterested => put_header(buf, Self::NOT_INTERESTED, 0),
            Message::Have { piece_index } => {
                put_header(buf, Self::HAVE, 4);
                buf.put_u32(*piece_index);
            }
            Message::Bitfield { bitfield } => {
                put_header(buf, Self::BITFIELD, bitfield.len());
                buf.put_slice(bitfield);
            }
            Message::Request { block } => {
                put_header(buf, Self::REQUEST, 12);
                block.write(buf);
            }
            Message::Piece {
                piece_index,
                offset,
                data,
            } => {
                put_header(buf, Self::PIECE, 8 + data.len());
                buf.put_u32(*piece_index);
                buf.put_u32(*offset);
                buf.put_slice(data);
            }
            Message::Cancel { block } => {
                put_header(buf, Self::CANCEL, 12);
                block.write(buf);
            }
            Message::Port { port } => {
                put_header(buf, Self::PORT, 2);
                buf.put_u16(*port);
            }
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Decode a frame body (`<message id><payload>`, length prefix already
    /// stripped by the framer).
    pub fn decode(mut frame: Bytes) -> Result<Self> {
        if frame.is_empty() {
            return Err(violation("empty message body"));
        }

        let id = frame.get_u8();
        let payload_len = frame.len();

        let expect = |len: usize| {
            if payload_len == len {
                Ok(())
            } else {
                Err(violation(format!(
                    "message id {} carries {} payload bytes, expected {}",
                    id, payload_len, len
                )))
            }
        };

        let message = match id {
            Self::CHOKE => expect(0).map(|_| Message::Choke)?,
            Self::UNCHOKE => expect(0).map(|_| Message::Unchoke)?,
            Self::INTERESTED => expect(0).map(|_| Message::Interested)?,
            Self::NOT_INTERESTED => expect(0).map(|_| Message::NotInterested)?,
            Self::HAVE => {
                expect(4)?;
                Message::Have {
                    piece_index: frame.get_u32(),
                }
            }
            Self::BITFIELD => Message::Bitfield { bitfield: frame },
            Self::REQUEST => {
                expect(12)?;
                Message::Request {
                    block: BlockInfo::read(&mut frame),
                }
            }
            Self::PIECE => {
                if payload_len < 8 {
                    return Err(violation("piece message shorter than its header"));
                }
                let piece_index = frame.get_u32();
                let offset = frame.get_u32();
                Message::Piece {
                    piece_index,
                    offset,
                    data: frame,
                }
            }
            Self::CANCEL => {
                expect(12)?;
                Message::Cancel {
                    block: BlockInfo::read(&mut frame),
                }
            }
            Self::PORT => {
                expect(2)?;
                Message::Port {
                    port: frame.get_u16(),
                }
            }
            other => return Err(violation(format!("unknown message id {}", other))),
        };

        Ok(message)
    }
}

fn put_header(buf: &mut BytesMut, id: u8, payload_len: usize) {
    buf.reserve(5 + payload_len);
    buf.put_u32(1 + payload_len as u32);
    buf.put_u8(id);
}

fn violation(msg: impl Into<String>) -> LeechError {
    LeechError::ProtocolViolation(msg.into())
}
