//! A remote peer that owns every piece, for driving sessions in tests.

use super::{Frame, Handshake, Message, MessageFramer, HANDSHAKE_LEN};
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Handshake, announce every piece, unchoke, then answer requests from
/// `pieces` if `serve` is set. Returns when the other side hangs up.
pub(crate) async fn seed<S>(
    mut stream: S,
    info_hash: [u8; 20],
    peer_id: [u8; 20],
    pieces: Vec<Vec<u8>>,
    serve: bool,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut theirs = [0u8; HANDSHAKE_LEN];
    if stream.read_exact(&mut theirs).await.is_err() {
        return;
    }

    let mut out = BytesMut::new();
    out.extend_from_slice(&Handshake::new(info_hash, peer_id).to_bytes());
    Message::Bitfield {
        bitfield: Bytes::from(vec![0xff; pieces.len().div_ceil(8)]),
    }
    .encode(&mut out);
    Message::Unchoke.encode(&mut out);
    if stream.write_all(&out).await.is_err() {
        return;
    }

    let mut framer = MessageFramer::without_handshake(1 << 16);
    let mut buf = vec![0u8; 4096];
    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        framer.feed(&buf[..n]);

        while let Ok(Some(Frame::Message(body))) = framer.next_frame() {
            let Ok(Message::Request { block }) = Message::decode(body) else {
                continue;
            };
            if !serve {
                continue;
            }

            let start = block.offset as usize;
            let end = start + block.length as usize;
            let reply = Message::Piece {
                piece_index: block.piece_index,
                offset: block.offset,
                data: Bytes::copy_from_slice(&pieces[block.piece_index as usize][start..end]),
            };
            if stream.write_all(&reply.to_bytes()).await.is_err() {
                return;
            }
        }
    }
}
