//! Seeded PRNG (linear-congruential, injected)
//!
//! Every random decision in an explanation flows through one [`Lcg64`]
//! instance injected by the caller; there is **no ambient/global random
//! source** anywhere in the crate. Equal seeds therefore reproduce the exact
//! coalition plan, bitwise.
//!
//! The generator is a 64-bit LCG with Knuth's MMIX multiplier. It is not
//! cryptographic and does not need to be; it only has to be fast, portable,
//! and deterministic. Draws that feed sampling decisions use the **high 53
//! bits** (the low bits of an LCG are weak) or Lemire's multiply-shift bounded
//! reduction, which avoids both modulo bias and floating-point rounding.
//!
//! `Lcg64` also implements [`rand::RngCore`] so it can drive any
//! distribution from the `rand` ecosystem when a collaborator wants that;
//! the core itself only uses the methods below.

#![forbid(unsafe_code)]

use rand::RngCore;

const MMIX_MUL: u64 = 6364136223846793005;
const MMIX_INC: u64 = 1442695040888963407;

/// Deterministic 64-bit linear-congruential generator.
#[derive(Clone, Debug)]
pub struct Lcg64 {
    state: u64,
}

impl Lcg64 {
    /// Create a generator from a 64-bit seed. Any seed is valid, including 0.
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Advance the state and return the next raw 64-bit value.
    #[inline]
    pub fn next_raw(&mut self) -> u64 {
        self.state = self.state.wrapping_mul(MMIX_MUL).wrapping_add(MMIX_INC);
        self.state
    }

    /// Uniform draw in `[0, 1)` using the high 53 bits.
    #[inline]
    pub fn next_f64(&mut self) -> f64 {
        (self.next_raw() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Uniform index in `[0, n)` via Lemire's multiply-shift reduction.
    ///
    /// The slight non-uniformity of the plain multiply-shift (without the
    /// rejection loop) is far below anything a Monte-Carlo SHAP estimate can
    /// resolve, and keeping it rejection-free makes the draw count per mask
    /// fixed, which is what seed-reproducibility relies on.
    #[inline]
    pub fn next_index(&mut self, n: usize) -> usize {
        debug_assert!(n > 0, "next_index needs a non-empty range");
        (((self.next_raw() as u128) * (n as u128)) >> 64) as usize
    }

    /// Move a uniform sample of `k` distinct elements into `pool[..k]`
    /// (partial Fisher–Yates). The remainder of `pool` is left in an
    /// unspecified order.
    pub fn partial_shuffle<T>(&mut self, pool: &mut [T], k: usize) {
        debug_assert!(k <= pool.len(), "cannot draw more elements than the pool holds");
        for i in 0..k {
            let j = i + self.next_index(pool.len() - i);
            pool.swap(i, j);
        }
    }

    /// Draw an index with probability proportional to `weights[i]`.
    ///
    /// Weights must be non-negative with positive total mass. A draw that
    /// lands past the cumulative total through rounding picks the last
    /// positive-weight entry.
    pub fn weighted_index(&mut self, weights: &[f64]) -> usize {
        debug_assert!(!weights.is_empty());
        let total: f64 = weights.iter().sum();
        debug_assert!(total > 0.0, "weighted_index needs positive total mass");
        let mut u = self.next_f64() * total;
        let mut last_positive = 0;
        for (i, &w) in weights.iter().enumerate() {
            if w > 0.0 {
                last_positive = i;
                if u < w {
                    return i;
                }
                u -= w;
            }
        }
        last_positive
    }
}

impl RngCore for Lcg64 {
    #[inline]
    fn next_u32(&mut self) -> u32 {
        (self.next_raw() >> 32) as u32
    }

    #[inline]
    fn next_u64(&mut self) -> u64 {
        self.next_raw()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(8) {
            let bytes = self.next_raw().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
