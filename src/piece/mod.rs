mod bitfield;
mod picker;
mod tracker;

pub use bitfield::Bitfield;
pub use picker::PickStrategy;
pub use tracker::{CompletedPiece, PieceTracker};

use crate::peer::{BlockInfo, SessionId};
use sha1::{Digest, Sha1};

/// Standard block size (16 KB)
pub const BLOCK_SIZE: u32 = 16 * 1024;

/// Lifecycle of one piece as seen by the whole swarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceStatus {
    /// Nobody is downloading it yet
    Missing,
    /// Claimed by one session, blocks on the way
    InFlight(SessionId),
    /// Downloaded, verified and handed to the assembler
    Complete,
}

/// Immutable per-piece metadata.
///
/// `length == block_size * (num_blocks - 1) + final_block_size` and
/// `final_block_size` is in `1..=block_size`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceDescriptor {
    pub index: u32,
    pub hash: [u8; 20],
    pub length: u32,
    pub block_size: u32,
    pub num_blocks: u16,
    pub final_block_size: u32,
}

impl PieceDescriptor {
    /// `None` when `length` is zero or needs more than `u16::MAX` blocks.
    pub fn new(index: u32, hash: [u8; 20], length: u32) -> Option<Self> {
        Self::with_block_size(index, hash, length, BLOCK_SIZE)
    }

    pub fn with_block_size(
        index: u32,
        hash: [u8; 20],
        length: u32,
        block_size: u32,
    ) -> Option<Self> {
        if length == 0 || block_size == 0 {
            return None;
        }

        let num_blocks = length.div_ceil(block_size);
        let final_block_size = length - (num_blocks - 1) * block_size;

        Some(Self {
            index,
            hash,
            length,
            block_size,
            num_blocks: u16::try_from(num_blocks).ok()?,
            final_block_size,
        })
    }

    /// Offset and length of block `block_index`, if it exists.
    pub fn block(&self, block_index: u16) -> Option<BlockInfo> {
        if block_index >= self.num_blocks {
            return None;
        }

        let length = if block_index == self.num_blocks - 1 {
            self.final_block_size
        } else {
            self.block_size
        };

        Some(BlockInfo::new(
            self.index,
            block_index as u32 * self.block_size,
            length,
        ))
    }

    /// Every block of the piece, in order.
    pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        (0..self.num_blocks).filter_map(move |i| self.block(i))
    }

    /// Which block starts at `begin`, if `begin` is on a block boundary.
    pub fn block_index_at(&self, begin: u32) -> Option<u16> {
        if begin % self.block_size != 0 {
            return None;
        }
        let index = begin / self.block_size;
        (index < self.num_blocks as u32).then_some(index as u16)
    }

    /// Check downloaded bytes against the expected SHA-1 digest.
    pub fn verify(&self, data: &[u8]) -> bool {
        let digest = Sha1::digest(data);
        data.len() == self.length as usize && digest.as_slice() == self.hash
    }
}

/// Pieces completed out of the total, for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.completed as f64 / self.total as f64 * 100.0
    }

    pub fn is_done(&self) -> bool {
        self.completed == self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_layout() {
        let piece = PieceDescriptor::new(3, [0u8; 20], BLOCK_SIZE * 2 + 100).unwrap();
        assert_eq!(piece.num_blocks, 3);
        assert_eq!(piece.final_block_size, 100);

        let blocks: Vec<_> = piece.blocks().collect();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[1], BlockInfo::new(3, BLOCK_SIZE, BLOCK_SIZE));
        assert_eq!(blocks[2], BlockInfo::new(3, BLOCK_SIZE * 2, 100));
        assert!(piece.block(3).is_none());
    }

    #[test]
    fn test_exact_multiple_has_full_final_block() {
        let piece = PieceDescriptor::new(0, [0u8; 20], BLOCK_SIZE * 4).unwrap();
        assert_eq!(piece.num_blocks, 4);
        assert_eq!(piece.final_block_size, BLOCK_SIZE);
    }

    #[test]
    fn test_largest_piece_keeps_block_invariant() {
        let length = BLOCK_SIZE * u16::MAX as u32;
        let piece = PieceDescriptor::new(0, [0u8; 20], length).unwrap();
        assert_eq!(piece.num_blocks, u16::MAX);
        assert_eq!(
            piece.block_size * (piece.num_blocks as u32 - 1) + piece.final_block_size,
            length
        );
        assert!(piece.block(u16::MAX - 1).is_some());
    }

    #[test]
    fn test_unrepresentable_pieces_rejected() {
        assert!(PieceDescriptor::new(0, [0u8; 20], 1 << 30).is_none());
        assert!(PieceDescriptor::new(0, [0u8; 20], 0).is_none());
    }

    #[test]
    fn test_block_index_at() {
        let piece = PieceDescriptor::with_block_size(0, [0u8; 20], 10, 4).unwrap();
        assert_eq!(piece.block_index_at(8), Some(2));
        assert_eq!(piece.block_index_at(5), None);
        assert_eq!(piece.block_index_at(12), None);
    }

    #[test]
    fn test_verify() {
        let data = b"hello world";
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&Sha1::digest(data));
        let piece = PieceDescriptor::new(0, hash, data.len() as u32).unwrap();

        assert!(piece.verify(data));
        assert!(!piece.verify(b"hello worle"));
    }

    #[test]
    fn test_progress() {
        let progress = Progress {
            completed: 1,
            total: 4,
        };
        assert_eq!(progress.percent(), 25.0);
        assert!(!progress.is_done());
    }
}
