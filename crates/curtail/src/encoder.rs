use crate::{Base62Error, encode_base62, decode_base62};

/// Length of every code produced by [`CodeEncoder::encode`].
pub const CODE_LENGTH: usize = 7;

/// Smallest integer whose base62 rendering is exactly 7 digits (62^6).
const RANGE_MIN: u64 = 56_800_235_584;
/// Largest integer whose base62 rendering is exactly 7 digits (62^7 - 1).
const RANGE_MAX: u64 = 3_521_614_606_207;
const RANGE_SIZE: u64 = RANGE_MAX - RANGE_MIN + 1;

// Large prime-like constant; the golden-ratio increment used by
// SplitMix64.
const DEFAULT_SALT: u64 = 0x9E37_79B9_7F4A_7C15;
// Large odd multiplier (the LCG multiplier from java.util.Random).
const DEFAULT_MULTIPLIER: u64 = 0x5_DEEC_E66D;
const DEFAULT_ROTATION: u32 = 21;

/// Deterministic, stateless transform from a counter value to a
/// fixed-length opaque short code.
///
/// The encoder scrambles the input through a pipeline of wrapping 64-bit
/// bit mixing (salt XOR, odd multiply, rotate, cross-half XOR, low-word
/// bit reversal) and reduces the result into `[62^6, 62^7 - 1]`, the range
/// of integers whose base62 rendering is exactly [`CODE_LENGTH`] digits.
/// The same input yields the same code in every call and every process.
///
/// The constants tune obfuscation strength only, not correctness: any
/// salt works, and any large odd multiplier diffuses across the full
/// 64-bit range.
///
/// # Collisions
///
/// The final modulo reduction is not a bijection: the output space holds
/// 62^7 - 62^6 values, so distinct counters can map to the same code once
/// enough values have been issued. This reproduces the behavior of the
/// system this crate was extracted from; callers that cannot tolerate the
/// residual risk must check generated codes against their record store
/// and retry with a fresh counter value.
///
/// # Example
///
/// ```
/// use curtail::{CodeEncoder, CODE_LENGTH};
///
/// let encoder = CodeEncoder::default();
/// let code = encoder.encode(42);
/// assert_eq!(code.len(), CODE_LENGTH);
/// assert_eq!(code, encoder.encode(42));
/// ```
#[derive(Clone, Copy, Debug)]
pub struct CodeEncoder {
    salt: u64,
    multiplier: u64,
    rotation: u32,
}

impl Default for CodeEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_SALT, DEFAULT_MULTIPLIER, DEFAULT_ROTATION)
    }
}

impl CodeEncoder {
    /// Creates an encoder with explicit scrambling constants.
    ///
    /// `multiplier` must be odd for the multiply step to be invertible
    /// modulo 2^64; an even multiplier silently discards low bits.
    pub const fn new(salt: u64, multiplier: u64, rotation: u32) -> Self {
        Self {
            salt,
            multiplier,
            rotation,
        }
    }

    /// Encodes `counter` into a 7-character base62 short code.
    pub fn encode(&self, counter: u64) -> String {
        let reduced = self.scramble(counter) % RANGE_SIZE + RANGE_MIN;
        encode_base62(reduced)
    }

    /// Decodes a short code back to its range-reduced integer.
    ///
    /// This inverts the base62 rendering only. The scramble-and-reduce
    /// step is deliberately not invertible (the reduction discards
    /// information), so the returned value is the reduced integer in
    /// `[62^6, 62^7 - 1]`, not the original counter.
    pub fn decode(&self, code: &str) -> core::result::Result<u64, Base62Error> {
        decode_base62(code)
    }

    /// Applies the bit-scrambling pipeline. Wraparound on overflow is
    /// expected and intentional.
    fn scramble(&self, value: u64) -> u64 {
        let mut x = value ^ self.salt;
        x = x.wrapping_mul(self.multiplier);
        x = x.rotate_left(self.rotation);
        x ^= x.rotate_left(32);

        // Reverse the bit order of the low 32 bits in place; the high 32
        // bits pass through untouched.
        let lower = (x as u32).reverse_bits();
        let upper = (x >> 32) as u32;
        (u64::from(upper) << 32) | u64::from(lower)
    }
}
