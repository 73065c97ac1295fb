//! Wire → engine dispatcher.
//!
//! Parses one client text frame, validates it against the schema of its event
//! type and applies the effect to the shared [`BridgeContext`]. Nothing here
//! touches the engine directly: buttons are pulled and pending actions taken by
//! the per-tick handler on the engine thread.
//!
//! A bad message is logged and dropped; it never closes the connection.

use std::sync::Arc;

use log::{error, warn};
use serde_json::Value;

use crate::context::BridgeContext;
use crate::engine::{Button, ExecMode, Speed};
use crate::error::{BridgeError, Result};
use crate::protocol::{ROM_B64_LEN, SNAPSHOT_B64_LEN};
use crate::rom::decode_rom;

/// A validated client event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Rom(Vec<u16>),
    Button { button: Button, pressed: bool },
    Mode(ExecMode),
    Speed(Speed),
    End,
    Save,
    Load(String),
}

impl InboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::Rom(_) => "rom",
            InboundEvent::Button { .. } => "btn",
            InboundEvent::Mode(_) => "mod",
            InboundEvent::Speed(_) => "spd",
            InboundEvent::End => "end",
            InboundEvent::Save => "sav",
            InboundEvent::Load(_) => "lod",
        }
    }
}

/// Button state codes.
const BTN_STATE_RELEASED: i64 = 0;
const BTN_STATE_PRESSED: i64 = 1;

// ─── Field accessors ───────────────────────────────────────────────────────

/// Render a JSON value for error messages, truncating long strings.
fn show(value: &Value) -> String {
    match value {
        Value::String(s) if s.len() > 32 => format!("string of length {}", s.len()),
        other => other.to_string(),
    }
}

fn item<'a>(event: &'static str, e: &'a Value, field: &'static str) -> Result<&'a Value> {
    e.get(field)
        .ok_or_else(|| BridgeError::field(event, field, "missing"))
}

/// Integer field. Floats and numeric strings are rejected.
fn int_field(event: &'static str, e: &Value, field: &'static str) -> Result<i64> {
    let v = item(event, e, field)?;
    v.as_i64()
        .ok_or_else(|| BridgeError::field(event, field, format!("expected integer, got {}", show(v))))
}

/// String field of an exact length.
fn sized_str_field(event: &'static str, e: &Value, field: &'static str, len: usize) -> Result<String> {
    let v = item(event, e, field)?;
    let s = v
        .as_str()
        .ok_or_else(|| BridgeError::field(event, field, format!("expected string, got {}", show(v))))?;
    if s.len() != len {
        return Err(BridgeError::field(
            event,
            field,
            format!("expected length {}, got {}", len, s.len()),
        ));
    }
    Ok(s.to_owned())
}

fn enum_field<T>(
    event: &'static str,
    e: &Value,
    field: &'static str,
    from_code: impl Fn(i64) -> Option<T>,
) -> Result<T> {
    let code = int_field(event, e, field)?;
    from_code(code).ok_or_else(|| BridgeError::field(event, field, format!("invalid code {}", code)))
}

/// The `r` field of a `rom` message, decoded into program words.
fn rom_field(e: &Value) -> Result<Vec<u16>> {
    let text = sized_str_field("rom", e, "r", ROM_B64_LEN)?;
    decode_rom(&text).map_err(|err| BridgeError::field("rom", "r", err.to_string()))
}

// ─── Parsing ───────────────────────────────────────────────────────────────

/// Parse and validate one text frame.
pub fn parse_message(text: &str) -> Result<InboundEvent> {
    let json: Value = serde_json::from_str(text)
        .map_err(|e| BridgeError::MalformedEnvelope(format!("JSON error: {}", e)))?;

    let t = match json.get("t") {
        None => return Err(BridgeError::MalformedEnvelope("no item \"t\"".into())),
        Some(Value::String(t)) => t.as_str(),
        Some(_) => return Err(BridgeError::MalformedEnvelope("item \"t\" has invalid type".into())),
    };
    let e = json
        .get("e")
        .ok_or_else(|| BridgeError::MalformedEnvelope("no item \"e\"".into()))?;

    match t {
        "rom" => rom_field(e).map(InboundEvent::Rom),
        "btn" => {
            let button = enum_field("btn", e, "b", Button::from_code)?;
            let pressed = enum_field("btn", e, "s", |code| match code {
                BTN_STATE_RELEASED => Some(false),
                BTN_STATE_PRESSED => Some(true),
                _ => None,
            })?;
            Ok(InboundEvent::Button { button, pressed })
        }
        "mod" => enum_field("mod", e, "m", ExecMode::from_code).map(InboundEvent::Mode),
        "spd" => enum_field("spd", e, "s", Speed::from_code).map(InboundEvent::Speed),
        "end" => Ok(InboundEvent::End),
        "sav" => Ok(InboundEvent::Save),
        "lod" => sized_str_field("lod", e, "s", SNAPSHOT_B64_LEN).map(InboundEvent::Load),
        other => Err(BridgeError::UnknownEvent(other.to_owned())),
    }
}

// ─── Dispatch ──────────────────────────────────────────────────────────────

/// The transport-facing side of the bridge.
#[derive(Clone)]
pub struct Dispatcher {
    ctx: Arc<BridgeContext>,
}

impl Dispatcher {
    pub fn new(ctx: Arc<BridgeContext>) -> Self {
        Dispatcher { ctx }
    }

    /// Apply a validated event to the shared context.
    pub fn apply(&self, event: InboundEvent) {
        match event {
            InboundEvent::Rom(rom) => self.ctx.stage_rom(rom),
            InboundEvent::Button { button, pressed } => self.ctx.set_button(button, pressed),
            InboundEvent::Mode(mode) => self.ctx.request_exec_mode(mode),
            InboundEvent::Speed(speed) => self.ctx.request_speed(speed),
            InboundEvent::End => self.ctx.request_halt(),
            InboundEvent::Save => self.ctx.request_save(),
            InboundEvent::Load(payload) => self.ctx.request_load(payload),
        }
    }

    /// Parse, validate and apply one message.
    pub fn handle_message(&self, text: &str) -> Result<&'static str> {
        let event = parse_message(text)?;
        let kind = event.kind();
        self.apply(event);
        Ok(kind)
    }

    /// Entry point for the transport: errors are logged, never propagated.
    pub fn on_message(&self, text: &str) {
        match self.handle_message(text) {
            Ok(_) => {}
            Err(e @ BridgeError::UnknownEvent(_)) => warn!("WS message: {}", e),
            Err(e) => error!("WS message: {}", e),
        }
    }
}
