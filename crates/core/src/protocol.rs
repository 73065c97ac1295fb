//! Wire envelopes and protocol constants.
//!
//! Every message is one text frame holding `{"t": <type>, "e": <payload>}`.
//! Outbound messages are built from [`OutboundMessage`]; inbound parsing lives
//! in [`crate::inbound`].

use serde::Serialize;

use crate::engine::LogLevel;
use crate::frame::encoded_len;
use crate::snapshot::SNAPSHOT_SIZE;
use crate::ROM_SIZE;

/// Encoded length of a `rom` payload.
pub const ROM_B64_LEN: usize = encoded_len(ROM_SIZE);
/// Encoded length of a `sav`/`lod` payload.
pub const SNAPSHOT_B64_LEN: usize = encoded_len(SNAPSHOT_SIZE);

/// Messages sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "t", content = "e")]
pub enum OutboundMessage {
    #[serde(rename = "scr")]
    Screen { m: String, i: String },
    #[serde(rename = "frq")]
    Frequency { f: u32, p: u32, e: u8 },
    /// `l` is the level bit rendered as a decimal string.
    #[serde(rename = "log")]
    Log { l: String, m: String },
    #[serde(rename = "sav")]
    Save { s: String },
    #[serde(rename = "end")]
    End {},
}

impl OutboundMessage {
    pub fn log(level: LogLevel, message: &str) -> Self {
        OutboundMessage::Log { l: level.bit().to_string(), m: message.to_owned() }
    }

    /// Serialize to the single-line JSON text frame.
    pub fn to_text(&self) -> String {
        // Only strings and integers inside; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}
