//! Base32 identifiers for public keys
//!
//! Public keys are shown to people as short "app IDs". The encoding uses
//! Douglas Crockford's base32 alphabet in lower case, except that `u` stays in
//! the alphabet and `b` is instead read as a misspelling of `8`. Decoding
//! accepts either case and folds the ambiguous letters `o`, `i`, `l` and `b`
//! onto the digits they resemble.
//!
//! ```
//! use spk_rs::appid;
//!
//! assert_eq!(appid::encode(&[0xFF]), "zw");
//! assert_eq!(appid::decode("ZW").unwrap(), vec![0xFF]);
//! ```

use crate::error::{Result, SpkError};
use std::fmt;

/// Output alphabet, one symbol per 5-bit group
pub const ALPHABET: &[u8; 32] = b"0123456789acdefghjkmnpqrstuvwxyz";

const INVALID: u8 = 0xFF;

/// Character to 5-bit value, built at compile time
const DECODE_TABLE: [u8; 256] = build_decode_table();

const fn build_decode_table() -> [u8; 256] {
    let mut table = [INVALID; 256];

    let mut i = 0;
    while i < ALPHABET.len() {
        let c = ALPHABET[i];
        table[c as usize] = i as u8;
        table[c.to_ascii_uppercase() as usize] = i as u8;
        i += 1;
    }

    table[b'o' as usize] = 0;
    table[b'O' as usize] = 0;
    table[b'i' as usize] = 1;
    table[b'I' as usize] = 1;
    table[b'l' as usize] = 1;
    table[b'L' as usize] = 1;
    table[b'b' as usize] = 8;
    table[b'B' as usize] = 8;

    table
}

/// Every ASCII letter and digit must have a decoding.
const fn table_is_complete(table: &[u8; 256]) -> bool {
    let mut c = 0usize;
    while c < 128 {
        if (c as u8).is_ascii_alphanumeric() && table[c] == INVALID {
            return false;
        }
        c += 1;
    }
    true
}

const _: () = assert!(table_is_complete(&DECODE_TABLE), "base32 decode table is incomplete");

/// Encode bytes as base32, most significant bits first.
///
/// The final partial group is padded with zero bits, so the output is always
/// `ceil(len * 8 / 5)` characters long.
pub fn encode(data: &[u8]) -> String {
    let mut result = String::with_capacity((data.len() * 8).div_ceil(5));

    let mut buffer: u32 = 0;
    let mut bits_left: u32 = 0;

    for &byte in data {
        buffer = (buffer << 8) | u32::from(byte);
        bits_left += 8;

        while bits_left >= 5 {
            bits_left -= 5;
            let index = (buffer >> bits_left) & 0x1F;
            result.push(ALPHABET[index as usize] as char);
        }
        buffer &= (1 << bits_left) - 1;
    }

    if bits_left > 0 {
        // No more input; pad with zeros.
        let index = (buffer << (5 - bits_left)) & 0x1F;
        result.push(ALPHABET[index as usize] as char);
    }

    result
}

/// Decode a base32 string produced by [`encode`].
///
/// The output is rounded down to whole bytes. Whatever bits are left over
/// must be the zero padding `encode` adds, otherwise decoding fails with
/// [`SpkError::TrailingBits`].
pub fn decode(encoded: &str) -> Result<Vec<u8>> {
    let mut result = Vec::with_capacity(encoded.len() * 5 / 8);

    let mut buffer: u32 = 0;
    let mut bits_left: u32 = 0;

    for c in encoded.chars() {
        let value = if c.is_ascii() {
            DECODE_TABLE[c as usize]
        } else {
            INVALID
        };
        if value == INVALID {
            return Err(SpkError::InvalidEncoding(c));
        }

        buffer = (buffer << 5) | u32::from(value);
        bits_left += 5;

        if bits_left >= 8 {
            bits_left -= 8;
            result.push((buffer >> bits_left) as u8);
            buffer &= (1 << bits_left) - 1;
        }
    }

    if buffer != 0 {
        return Err(SpkError::TrailingBits);
    }

    Ok(result)
}

/// Human-facing identifier of a signing key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AppId([u8; 32]);

impl AppId {
    pub fn from_public_key(public_key: [u8; 32]) -> Self {
        Self(public_key)
    }

    pub fn public_key(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode(&self.0))
    }
}
