//! ROM image loading.
//!
//! A ROM image stores each 12-bit instruction word as two bytes, high byte
//! first; the upper nibble of the high byte is unused. Images reach us either
//! as a raw file on disk or base64-encoded in a `rom` message.

use std::path::Path;
use std::time::Duration;

use log::info;

use crate::context::BridgeContext;
use crate::error::{BridgeError, Result};
use crate::frame::decode_transport;
use crate::ROM_SIZE;

/// Repack byte pairs into 12-bit words. A trailing odd byte is ignored.
pub fn words_from_bytes(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|pair| (((pair[0] & 0xF) as u16) << 8) | pair[1] as u16)
        .collect()
}

/// Decode a full base64 ROM image into program words.
pub fn decode_rom(rom_b64: &str) -> Result<Vec<u16>> {
    let bytes = decode_transport(rom_b64)?;
    if bytes.len() != ROM_SIZE {
        return Err(BridgeError::RomLength { expected: ROM_SIZE, actual: bytes.len() });
    }
    Ok(words_from_bytes(&bytes))
}

/// Read a raw ROM image from disk.
pub fn load_file(path: &Path) -> Result<Vec<u16>> {
    let bytes = std::fs::read(path)?;
    let program = words_from_bytes(&bytes);
    info!("loaded ROM {} ({} words)", path.display(), program.len());
    Ok(program)
}

/// Block until a client sends a valid `rom` message.
///
/// Payloads are decoded when the message is dispatched, so a malformed one is
/// dropped there and never ends the wait. Fails with `MissingRom` when
/// `timeout` elapses first.
pub fn wait_for_wire_rom(ctx: &BridgeContext, timeout: Option<Duration>) -> Result<Vec<u16>> {
    info!("waiting for a ROM from a client");
    let program = ctx.wait_for_rom(timeout)?;
    info!("received ROM over the wire ({} words)", program.len());
    Ok(program)
}
