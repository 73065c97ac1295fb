//! Bit packing and the single-line text encoding used for every binary payload.
//!
//! LCD matrix and icon arrays travel as packed bytes, eight pixels per byte,
//! the first pixel of each group in the most significant bit. Packed bytes (and
//! snapshots, ROM images) are carried inside JSON strings as standard padded
//! base64 with no line breaks.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::{BridgeError, Result};

/// Pack a bit array into bytes, MSB first.
pub fn pack_bits(bits: &[bool]) -> Result<Vec<u8>> {
    if bits.len() % 8 != 0 {
        return Err(BridgeError::InvalidLength { len: bits.len() });
    }
    Ok(bits
        .chunks_exact(8)
        .map(|group| {
            group
                .iter()
                .fold(0u8, |byte, &bit| (byte << 1) | bit as u8)
        })
        .collect())
}

/// Expand packed bytes back into bits, MSB first.
pub fn unpack_bits(bytes: &[u8]) -> Vec<bool> {
    let mut bits = Vec::with_capacity(bytes.len() * 8);
    for &byte in bytes {
        for j in (0..8).rev() {
            bits.push((byte >> j) & 1 != 0);
        }
    }
    bits
}

/// Binary → single-line text.
pub fn encode_transport(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Text → binary. Rejects anything that is not canonical padded base64.
pub fn decode_transport(text: &str) -> Result<Vec<u8>> {
    Ok(STANDARD.decode(text)?)
}

/// Length of the text produced by [`encode_transport`] for `n` input bytes.
pub const fn encoded_len(n: usize) -> usize {
    (n + 2) / 3 * 4
}

/// Pack then encode in one go.
pub fn encode_bits(bits: &[bool]) -> Result<String> {
    pack_bits(bits).map(|bytes| encode_transport(&bytes))
}
