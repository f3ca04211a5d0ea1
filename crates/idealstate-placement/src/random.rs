//! Reproducible pseudo-random sequence used to score placement candidates.
//!
//! Every node in a cluster must compute the same scores for the same bucket,
//! whatever build it runs. The generator is therefore pinned to one published
//! algorithm: the 48-bit linear congruential generator of `java.util.Random`
//! (multiplier `0x5DEECE66D`, addend `0xB`), with the same seed scrambling and
//! the same 53-bit double construction.

const MULTIPLIER: u64 = 0x5_DEEC_E66D;
const ADDEND: u64 = 0xB;
const MASK: u64 = (1 << 48) - 1;
const DOUBLE_UNIT: f64 = 1.0 / (1u64 << 53) as f64;

/// A seeded sequence of doubles in `[0, 1)`.
///
/// Seeding always discards the first value, so `RandomSequence::new(seed)`
/// and `reseed(seed)` on an existing sequence yield identical output.
#[derive(Debug, Clone)]
pub struct RandomSequence {
    state: u64,
}

impl RandomSequence {
    /// Creates a sequence from a 32-bit seed.
    #[must_use]
    pub fn new(seed: u32) -> Self {
        let mut sequence = Self { state: 0 };
        sequence.reseed(seed);
        sequence
    }

    /// Resets the sequence to `seed` and drops its first value.
    ///
    /// The seed is sign-extended to 64 bits before scrambling.
    pub fn reseed(&mut self, seed: u32) {
        let extended = i64::from(seed as i32) as u64;
        self.state = (extended ^ MULTIPLIER) & MASK;
        self.next_f64();
    }

    /// Returns the next value in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        let high = self.next_bits(26);
        let low = self.next_bits(27);
        ((high << 27) + low) as f64 * DOUBLE_UNIT
    }

    /// Draws and drops `count` values.
    pub fn skip(&mut self, count: u32) {
        for _ in 0..count {
            self.next_f64();
        }
    }

    fn next_bits(&mut self, bits: u32) -> u64 {
        self.state = self.state.wrapping_mul(MULTIPLIER).wrapping_add(ADDEND) & MASK;
        self.state >> (48 - bits)
    }
}
