//! Bit-error injection for the relay

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Flips one random bit in a byte with probability `rate`
#[derive(Debug)]
pub struct Noise {
    rng: StdRng,
    rate: f64,
}

impl Noise {
    pub fn new(rate: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Noise {
            rng,
            rate: if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) },
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Corrupt `bytes` in place, returning how many bits were flipped
    pub fn corrupt(&mut self, bytes: &mut [u8]) -> u64 {
        if self.rate <= 0.0 {
            return 0;
        }
        let mut flips = 0;
        for byte in bytes.iter_mut() {
            if self.rng.gen_bool(self.rate) {
                *byte ^= 1u8 << self.rng.gen_range(0..8u32);
                flips += 1;
            }
        }
        flips
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_rate_is_clean() {
        let mut noise = Noise::new(0.0, Some(1));
        let mut data = vec![0x55u8; 256];
        assert_eq!(noise.corrupt(&mut data), 0);
        assert!(data.iter().all(|&b| b == 0x55));
    }

    #[test]
    fn test_full_rate_flips_every_byte() {
        let mut noise = Noise::new(2.0, Some(7));
        assert_eq!(noise.rate(), 1.0);
        let mut data = vec![0u8; 64];
        assert_eq!(noise.corrupt(&mut data), 64);
        assert!(data.iter().all(|b| b.count_ones() == 1));
    }

    #[test]
    fn test_seeded_is_repeatable() {
        let mut a = Noise::new(0.1, Some(42));
        let mut b = Noise::new(0.1, Some(42));
        let mut x = vec![0u8; 1000];
        let mut y = vec![0u8; 1000];
        assert_eq!(a.corrupt(&mut x), b.corrupt(&mut y));
        assert_eq!(x, y);
    }
}
