use super::{Bitfield, PickStrategy, PieceDescriptor, PieceStatus, Progress};
use crate::peer::SessionId;
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::VecDeque;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// A verified piece waiting to be written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPiece {
    pub index: u32,
    pub data: Bytes,
}

/// Swarm-wide piece bookkeeping shared by every peer session.
///
/// Sessions only go through `claim_piece`, `release_piece` and
/// `complete_piece`; the bit-vectors themselves are never handed out
/// mutably.
pub struct PieceTracker {
    pieces: Vec<PieceDescriptor>,
    status: Vec<PieceStatus>,
    /// Pieces in the `Missing` state
    missing: Bitfield,
    /// How many peers have announced each piece
    availability: Vec<u32>,
    completed: usize,
    strategy: PickStrategy,
    rng: StdRng,
    /// Completed pieces not yet taken by the file writer
    finished: VecDeque<CompletedPiece>,
    /// Bumped on every release so idle sessions look for work again
    releases: watch::Sender<u64>,
}

impl PieceTracker {
    pub fn new(pieces: Vec<PieceDescriptor>, strategy: PickStrategy) -> Self {
        Self::with_rng(pieces, strategy, StdRng::from_entropy())
    }

    pub fn with_rng(pieces: Vec<PieceDescriptor>, strategy: PickStrategy, rng: StdRng) -> Self {
        let count = pieces.len();

        Self {
            pieces,
            status: vec![PieceStatus::Missing; count],
            missing: Bitfield::full(count),
            availability: vec![0; count],
            completed: 0,
            strategy,
            rng,
            finished: VecDeque::new(),
            releases: watch::Sender::new(0),
        }
    }

    /// Pick a piece the peer owns that nobody is downloading and hand it to
    /// `owner`. The piece is `InFlight` before this returns.
    pub fn claim_piece(&mut self, owner: SessionId, peer: &Bitfield) -> Option<PieceDescriptor> {
        let missing = &self.missing;
        let candidates = peer.iter_ones().filter(|&i| missing.has(i));
        let index = self.strategy.pick(candidates, &self.availability, &mut self.rng)?;

        self.missing.clear(index);
        self.status[index] = PieceStatus::InFlight(owner);

        debug!(
            "Piece {} claimed by session {} (owned by {} peers)",
            index, owner, self.availability[index]
        );

        Some(self.pieces[index].clone())
    }

    /// Put an in-flight piece back up for grabs. Returns false if the piece
    /// was not in flight.
    pub fn release_piece(&mut self, index: u32) -> bool {
        let i = index as usize;
        match self.status.get(i) {
            Some(PieceStatus::InFlight(owner)) => {
                debug!("Piece {} released by session {}", index, owner);
                self.status[i] = PieceStatus::Missing;
                self.missing.set(i);
                self.releases.send_modify(|generation| *generation += 1);
                true
            }
            _ => false,
        }
    }

    /// Changes whenever a piece goes back to `Missing`.
    pub fn subscribe_releases(&self) -> watch::Receiver<u64> {
        self.releases.subscribe()
    }

    /// Whether the peer owns a piece that nobody is downloading.
    pub fn has_claimable(&self, peer: &Bitfield) -> bool {
        peer.iter_ones().any(|i| self.missing.has(i))
    }

    /// Mark an in-flight piece complete and queue its bytes for the writer.
    ///
    /// A second completion of the same piece, or completion of a piece that
    /// was never claimed, is ignored and returns false.
    pub fn complete_piece(&mut self, index: u32, data: Bytes) -> bool {
        let i = index as usize;

        if !matches!(self.status.get(i), Some(PieceStatus::InFlight(_))) {
            debug!("Ignoring completion of piece {} that is not in flight", index);
            return false;
        }

        if data.len() != self.pieces[i].length as usize {
            warn!(
                "Ignoring completion of piece {}: got {} bytes, expected {}",
                index,
                data.len(),
                self.pieces[i].length
            );
            return false;
        }

        self.status[i] = PieceStatus::Complete;
        self.completed += 1;
        self.finished.push_back(CompletedPiece { index, data });

        info!(
            "Piece {} complete ({}/{})",
            index,
            self.completed,
            self.pieces.len()
        );

        true
    }

    /// Next completed piece for the file writer, oldest first.
    pub fn take_completed(&mut self) -> Option<CompletedPiece> {
        self.finished.pop_front()
    }

    /// A peer announced piece `index`.
    pub fn record_peer_has(&mut self, index: usize) {
        if let Some(count) = self.availability.get_mut(index) {
            *count += 1;
        }
    }

    pub fn piece_count_owned_by_peers(&self, index: usize) -> usize {
        self.availability.get(index).copied().unwrap_or(0) as usize
    }

    pub fn all_complete(&self) -> bool {
        self.completed == self.pieces.len()
    }

    pub fn is_complete(&self, index: u32) -> bool {
        matches!(self.status(index), Some(PieceStatus::Complete))
    }

    pub fn status(&self, index: u32) -> Option<PieceStatus> {
        self.status.get(index as usize).copied()
    }

    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    pub fn missing_count(&self) -> usize {
        self.pieces.len() - self.completed
    }

    pub fn progress(&self) -> Progress {
        Progress {
            completed: self.completed,
            total: self.pieces.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(count: u32, strategy: PickStrategy) -> PieceTracker {
        let pieces = (0..count)
            .map(|i| PieceDescriptor::new(i, [0u8; 20], 4).unwrap())
            .collect();
        PieceTracker::with_rng(pieces, strategy, StdRng::seed_from_u64(42))
    }

    fn bitfield(len: usize, ones: &[usize]) -> Bitfield {
        let mut bf = Bitfield::new(len);
        for &i in ones {
            bf.set(i);
        }
        bf
    }

    #[test]
    fn test_claim_exclusivity() {
        let mut tracker = tracker(1, PickStrategy::Random);
        let peer = bitfield(1, &[0]);

        let first = tracker.claim_piece(SessionId(1), &peer);
        let second = tracker.claim_piece(SessionId(2), &peer);

        assert_eq!(first.map(|p| p.index), Some(0));
        assert!(second.is_none());
        assert_eq!(tracker.status(0), Some(PieceStatus::InFlight(SessionId(1))));
    }

    #[test]
    fn test_claims_never_overlap() {
        let mut tracker = tracker(16, PickStrategy::Random);
        let peer = Bitfield::full(16);
        let mut seen = Vec::new();

        while let Some(piece) = tracker.claim_piece(SessionId(seen.len() as u64), &peer) {
            assert!(!seen.contains(&piece.index));
            seen.push(piece.index);
        }
        assert_eq!(seen.len(), 16);
    }

    #[test]
    fn test_claim_only_from_peer_bitfield() {
        let mut tracker = tracker(8, PickStrategy::Random);
        let peer = bitfield(8, &[5]);

        assert_eq!(tracker.claim_piece(SessionId(1), &peer).map(|p| p.index), Some(5));
        assert!(tracker.claim_piece(SessionId(1), &peer).is_none());
        assert!(tracker.claim_piece(SessionId(1), &Bitfield::new(8)).is_none());
    }

    #[test]
    fn test_release_makes_piece_claimable_again() {
        let mut tracker = tracker(1, PickStrategy::RarestFirst);
        let peer = bitfield(1, &[0]);

        tracker.claim_piece(SessionId(1), &peer).unwrap();
        assert!(tracker.release_piece(0));
        assert_eq!(tracker.status(0), Some(PieceStatus::Missing));

        let again = tracker.claim_piece(SessionId(2), &peer);
        assert_eq!(again.map(|p| p.index), Some(0));
    }

    #[test]
    fn test_release_wakes_subscribers() {
        let mut tracker = tracker(2, PickStrategy::RarestFirst);
        let peer = bitfield(2, &[0]);
        let releases = tracker.subscribe_releases();

        tracker.claim_piece(SessionId(1), &peer).unwrap();
        assert!(!tracker.has_claimable(&peer));
        assert!(!releases.has_changed().unwrap());

        assert!(!tracker.release_piece(1));
        assert!(!releases.has_changed().unwrap());

        assert!(tracker.release_piece(0));
        assert!(releases.has_changed().unwrap());
        assert!(tracker.has_claimable(&peer));
    }

    #[test]
    fn test_release_ignores_non_inflight() {
        let mut tracker = tracker(2, PickStrategy::Random);
        assert!(!tracker.release_piece(0));
        assert!(!tracker.release_piece(9));
    }

    #[test]
    fn test_rarest_first_claims_least_available() {
        let mut tracker = tracker(3, PickStrategy::RarestFirst);
        for _ in 0..3 {
            tracker.record_peer_has(0);
            tracker.record_peer_has(2);
        }
        tracker.record_peer_has(1);

        let piece = tracker.claim_piece(SessionId(1), &Bitfield::full(3)).unwrap();
        assert_eq!(piece.index, 1);
        assert_eq!(tracker.piece_count_owned_by_peers(0), 3);
    }

    #[test]
    fn test_completion_gate() {
        let mut tracker = tracker(3, PickStrategy::Random);
        let peer = Bitfield::full(3);

        for n in 0..3 {
            assert!(!tracker.all_complete());
            let piece = tracker.claim_piece(SessionId(n), &peer).unwrap();
            assert!(tracker.complete_piece(piece.index, Bytes::from_static(b"abcd")));
        }

        assert!(tracker.all_complete());
        assert_eq!(tracker.progress().completed, 3);
    }

    #[test]
    fn test_duplicate_completion_is_noop() {
        let mut tracker = tracker(2, PickStrategy::Random);
        let peer = bitfield(2, &[1]);

        tracker.claim_piece(SessionId(1), &peer).unwrap();
        assert!(tracker.complete_piece(1, Bytes::from_static(b"abcd")));
        assert!(!tracker.complete_piece(1, Bytes::from_static(b"abcd")));
        assert_eq!(tracker.progress().completed, 1);

        // never claimed
        assert!(!tracker.complete_piece(0, Bytes::from_static(b"abcd")));

        assert_eq!(tracker.take_completed().map(|c| c.index), Some(1));
        assert!(tracker.take_completed().is_none());
    }

    #[test]
    fn test_completion_with_wrong_length_is_rejected() {
        let mut tracker = tracker(1, PickStrategy::Random);
        tracker.claim_piece(SessionId(1), &Bitfield::full(1)).unwrap();

        assert!(!tracker.complete_piece(0, Bytes::from_static(b"abc")));
        assert_eq!(tracker.status(0), Some(PieceStatus::InFlight(SessionId(1))));
    }
}
