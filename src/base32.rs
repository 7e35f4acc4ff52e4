//! RFC 4648 Base32 codec for shared secrets.
//!
//! Authenticator apps exchange TOTP secrets in this alphabet (`A–Z2–7`).
//! Decoding is case-insensitive and tolerates trailing `=` padding; encoding
//! emits uppercase with no padding, which is what provisioning URIs expect.

use crate::error::{GatekeyError, Result};

const ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// Encode bytes into the Base32 alphabet (uppercase, unpadded).
pub fn encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(5) * 8);
    let mut buffer = 0u32;
    let mut bits = 0u8;

    for &byte in data {
        buffer = (buffer << 8) | u32::from(byte);
        bits += 8;

        while bits >= 5 {
            bits -= 5;
            out.push(ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
    }

    if bits > 0 {
        out.push(ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }

    out
}

/// Decode Base32 text into bytes.
///
/// Accepts upper- or lowercase input and strips `=` padding. Any other
/// character outside the alphabet is rejected. A trailing group of fewer
/// than 8 bits is discarded, mirroring the encoder's unpadded output.
pub fn decode(text: &str) -> Result<Vec<u8>> {
    let trimmed = text.trim_end_matches('=');
    let mut out = Vec::with_capacity(trimmed.len() * 5 / 8);
    let mut buffer = 0u32;
    let mut bits = 0u8;

    for c in trimmed.chars() {
        let value = match c.to_ascii_uppercase() {
            c @ 'A'..='Z' => c as u32 - 'A' as u32,
            c @ '2'..='7' => c as u32 - '2' as u32 + 26,
            _ => return Err(GatekeyError::InvalidAlphabet(c)),
        };

        buffer = (buffer << 5) | value;
        bits += 5;

        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
            buffer &= (1 << bits) - 1;
        }
    }

    Ok(out)
}
