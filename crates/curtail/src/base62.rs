use crate::Base62Error;

/// The base62 alphabet, in ordinal order: digits, then lowercase, then
/// uppercase. Case-sensitive.
pub const ALPHABET: &[u8; 62] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const NO_VALUE: u8 = 255;
const BASE: u64 = 62;

// u64::MAX is 11 base62 digits.
const MAX_DIGITS: usize = 11;

/// Lookup table for base62 decoding.
const LOOKUP: [u8; 256] = {
    let mut lut = [NO_VALUE; 256];
    let mut i = 0_u8;
    while i < 62 {
        lut[ALPHABET[i as usize] as usize] = i;
        i += 1;
    }
    lut
};

/// Encodes `value` into base62, most-significant digit first.
///
/// Zero encodes as `"0"`; no padding is applied. This is the generic,
/// unbounded-magnitude primitive — the fixed-length short-code rendering
/// lives in [`CodeEncoder`], which guarantees 7 digits by construction.
///
/// [`CodeEncoder`]: crate::CodeEncoder
pub fn encode_base62(value: u64) -> String {
    let mut buf = [0_u8; MAX_DIGITS];
    let mut pos = MAX_DIGITS;
    let mut rem = value;

    loop {
        pos -= 1;
        buf[pos] = ALPHABET[(rem % BASE) as usize];
        rem /= BASE;
        if rem == 0 {
            break;
        }
    }

    // SAFETY: every byte written comes from `ALPHABET`, which is pure ASCII.
    unsafe { core::str::from_utf8_unchecked(&buf[pos..]) }.to_owned()
}

/// Decodes a base62 string into a `u64`.
///
/// Returns an error if the input is empty, contains a byte outside the
/// alphabet, or encodes a value larger than `u64::MAX`. Exact inverse of
/// [`encode_base62`] over the full `u64` domain.
pub fn decode_base62(encoded: &str) -> core::result::Result<u64, Base62Error> {
    if encoded.is_empty() {
        return Err(Base62Error::DecodeInvalidLen { len: 0 });
    }

    let mut acc: u64 = 0;
    for (index, byte) in encoded.bytes().enumerate() {
        // `byte as usize` is in 0..=255, and `LOOKUP` has 256 entries.
        let val = LOOKUP[byte as usize];
        if val == NO_VALUE {
            return Err(Base62Error::DecodeInvalidAscii { byte, index });
        }
        acc = acc
            .checked_mul(BASE)
            .and_then(|acc| acc.checked_add(u64::from(val)))
            .ok_or(Base62Error::DecodeOverflow)?;
    }

    Ok(acc)
}
