use rand::Rng;

/// A bit flip: XOR `mask` into the byte at `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flip {
    pub offset: usize,
    pub mask: u8,
}

/// Damage applied to every packet leaving a port.
///
/// Offsets beyond the end of a packet are ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Impairment {
    /// Bits to flip.
    pub flips: Vec<Flip>,
    /// Cut the packet down to this many bytes.
    pub truncate: Option<usize>,
    /// Packet loss rate in percent.
    pub loss: f64,
}

impl Impairment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flips the bits of `mask` in the byte at `offset`.
    pub fn flip(mut self, offset: usize, mask: u8) -> Self {
        self.flips.push(Flip { offset, mask });
        self
    }

    /// Flips the single bit `bit` (0 is the most significant bit of the packet).
    pub fn flip_bit(self, bit: usize) -> Self {
        self.flip(bit / 8, 0x80 >> (bit % 8))
    }

    pub fn truncate(mut self, len: usize) -> Self {
        self.truncate = Some(len);
        self
    }

    /// Sets the packet loss rate in percent.
    pub fn loss(mut self, percent: f64) -> Self {
        self.loss = percent.clamp(0.0, 100.0);
        self
    }

    /// Applies the impairment to `pkt`. Returns `false` if the packet is lost.
    pub fn apply(&self, pkt: &mut Vec<u8>) -> bool {
        if self.loss > 0.0 && rand::thread_rng().gen::<f64>() * 100.0 < self.loss {
            return false;
        }

        for flip in &self.flips {
            if let Some(byte) = pkt.get_mut(flip.offset) {
                *byte ^= flip.mask;
            }
        }

        if let Some(len) = self.truncate {
            pkt.truncate(len);
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flips_and_truncation() {
        let imp = Impairment::new().flip(1, 0x0f).flip_bit(0).truncate(3);
        let mut pkt = vec![0u8, 0xff, 0x00, 0x55];

        assert!(imp.apply(&mut pkt));
        assert_eq!(pkt, vec![0x80, 0xf0, 0x00]);
    }

    #[test]
    fn out_of_range_flip_is_ignored() {
        let mut pkt = vec![1u8, 2];
        assert!(Impairment::new().flip(10, 0xff).apply(&mut pkt));
        assert_eq!(pkt, vec![1, 2]);
    }

    #[test]
    fn full_loss_drops() {
        let mut pkt = vec![0u8; 4];
        assert!(!Impairment::new().loss(100.0).apply(&mut pkt));
        assert!(Impairment::new().loss(0.0).apply(&mut pkt));
    }
}
