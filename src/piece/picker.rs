use rand::seq::{IteratorRandom, SliceRandom};
use rand::Rng;

/// How a piece is chosen among those a peer can give us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PickStrategy {
    /// Uniformly at random among the candidates
    Random,
    /// Fewest owning peers first, random among equally rare pieces
    #[default]
    RarestFirst,
}

impl PickStrategy {
    /// Choose one of `candidates`. `availability[i]` is the number of peers
    /// known to own piece `i`.
    pub fn pick<R: Rng + ?Sized>(
        self,
        candidates: impl Iterator<Item = usize>,
        availability: &[u32],
        rng: &mut R,
    ) -> Option<usize> {
        match self {
            PickStrategy::Random => candidates.choose(rng),
            PickStrategy::RarestFirst => {
                let mut rarest = Vec::new();
                let mut lowest = u32::MAX;

                for index in candidates {
                    let count = availability[index];
                    if count < lowest {
                        lowest = count;
                        rarest.clear();
                    }
                    if count == lowest {
                        rarest.push(index);
                    }
                }

                rarest.choose(rng).copied()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_rarest_first_prefers_least_available() {
        let mut rng = StdRng::seed_from_u64(7);
        let availability = [5, 1, 3, 1];

        for _ in 0..20 {
            let picked = PickStrategy::RarestFirst
                .pick([0, 1, 2, 3].into_iter(), &availability, &mut rng)
                .unwrap();
            assert!(picked == 1 || picked == 3);
        }
    }

    #[test]
    fn test_rarest_first_ignores_non_candidates() {
        let mut rng = StdRng::seed_from_u64(7);
        let availability = [0, 9, 4];
        let picked = PickStrategy::RarestFirst.pick([1, 2].into_iter(), &availability, &mut rng);
        assert_eq!(picked, Some(2));
    }

    #[test]
    fn test_random_stays_within_candidates() {
        let mut rng = StdRng::seed_from_u64(1);
        let availability = [0; 8];

        for _ in 0..20 {
            let picked = PickStrategy::Random
                .pick([2, 5].into_iter(), &availability, &mut rng)
                .unwrap();
            assert!(picked == 2 || picked == 5);
        }
    }

    #[test]
    fn test_no_candidates() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            PickStrategy::Random.pick(std::iter::empty(), &[], &mut rng),
            None
        );
        assert_eq!(
            PickStrategy::RarestFirst.pick(std::iter::empty(), &[], &mut rng),
            None
        );
    }
}
