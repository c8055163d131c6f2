/// One bit per piece, most significant bit of byte 0 first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitfield {
    bits: Vec<u8>,
    len: usize,
}

impl Bitfield {
    /// All bits cleared.
    pub fn new(len: usize) -> Self {
        Self {
            bits: vec![0; len.div_ceil(8)],
            len,
        }
    }

    /// All bits set.
    pub fn full(len: usize) -> Self {
        let mut bitfield = Self {
            bits: vec![0xff; len.div_ceil(8)],
            len,
        };
        bitfield.clear_spare_bits();
        bitfield
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn has(&self, index: usize) -> bool {
        index < self.len && self.bits[index / 8] & mask(index) != 0
    }

    /// Set bit `index`. Returns true if it was previously clear.
    pub fn set(&mut self, index: usize) -> bool {
        if index >= self.len || self.has(index) {
            return false;
        }
        self.bits[index / 8] |= mask(index);
        true
    }

    pub fn clear(&mut self, index: usize) {
        if index < self.len {
            self.bits[index / 8] &= !mask(index);
        }
    }

    pub fn count_ones(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn any(&self) -> bool {
        self.bits.iter().any(|&b| b != 0)
    }

    /// Replace the bits covered by `raw` with its contents. Bits past the
    /// end of `raw` keep their current value and bits of `raw` past our
    /// length are dropped. Returns the indices that went from 0 to 1.
    pub fn overlay(&mut self, raw: &[u8]) -> Vec<usize> {
        let overlap = self.len.min(raw.len() * 8);
        let mut newly_set = Vec::new();

        for index in 0..overlap {
            if raw[index / 8] & mask(index) != 0 {
                if self.set(index) {
                    newly_set.push(index);
                }
            } else {
                self.clear(index);
            }
        }

        newly_set
    }

    /// Indices of set bits, ascending.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(move |&i| self.has(i))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    fn clear_spare_bits(&mut self) {
        let spare = self.bits.len() * 8 - self.len;
        if spare > 0 {
            if let Some(last) = self.bits.last_mut() {
                *last &= 0xffu8 << spare;
            }
        }
    }
}

fn mask(index: usize) -> u8 {
    0x80 >> (index % 8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_clear() {
        let mut bf = Bitfield::new(10);
        assert!(!bf.any());
        assert!(bf.set(9));
        assert!(!bf.set(9));
        assert!(bf.has(9));
        assert!(!bf.set(10));

        bf.clear(9);
        assert!(!bf.has(9));
    }

    #[test]
    fn test_msb_first() {
        let mut bf = Bitfield::new(16);
        bf.set(0);
        bf.set(9);
        assert_eq!(bf.as_bytes(), &[0x80, 0x40]);
    }

    #[test]
    fn test_full_clears_spare_bits() {
        let bf = Bitfield::full(10);
        assert_eq!(bf.as_bytes(), &[0xff, 0xc0]);
        assert_eq!(bf.count_ones(), 10);
    }

    #[test]
    fn test_overlay_shorter_keeps_tail() {
        let mut bf = Bitfield::new(12);
        bf.set(11);
        bf.set(1);

        // covers bits 0..8 only
        let newly = bf.overlay(&[0b1000_0000]);

        assert_eq!(newly, vec![0]);
        assert!(bf.has(0));
        assert!(!bf.has(1));
        assert!(bf.has(11));
    }

    #[test]
    fn test_overlay_longer_is_truncated() {
        let mut bf = Bitfield::new(4);
        let newly = bf.overlay(&[0xff, 0xff]);
        assert_eq!(newly, vec![0, 1, 2, 3]);
        assert_eq!(bf.count_ones(), 4);
    }

    #[test]
    fn test_iter_ones() {
        let mut bf = Bitfield::new(20);
        bf.set(3);
        bf.set(17);
        assert_eq!(bf.iter_ones().collect::<Vec<_>>(), vec![3, 17]);
    }
}
