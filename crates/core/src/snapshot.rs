//! Binary state snapshots exchanged with clients (`sav` / `lod` messages).
//!
//! ## Layout
//!
//! ```text
//! +------------------+
//! | Magic "TLST"     |  4 bytes
//! +------------------+
//! | Format version   |  u8 (currently 3)
//! +------------------+
//! | Register fields  |  REGISTER_LAYOUT, little-endian, masked
//! +------------------+
//! | Interrupt slots  |  INT_SLOT_NUM × (factor, mask, triggered)
//! +------------------+
//! | RAM              |  MEM_RAM_SIZE nibbles, one per byte
//! +------------------+
//! | I/O registers    |  MEM_IO_SIZE nibbles, one per byte
//! +------------------+
//! ```
//!
//! Every field is masked to its architectural width both when written and
//! when read back. Loading validates the whole blob before touching the
//! engine, then swaps the decoded state in one assignment.

use log::{debug, info};

use crate::engine::{CpuState, Engine};
use crate::error::{BridgeError, Result};
use crate::{INT_SLOT_NUM, MEM_IO_SIZE, MEM_RAM_SIZE};

/// Magic bytes identifying a state save.
pub const MAGIC: &[u8; 4] = b"TLST";
/// Current state save format version.
pub const FORMAT_VERSION: u8 = 3;

const HEADER_SIZE: usize = MAGIC.len() + 1;
const NIBBLE: u32 = 0xF;

// ─── Declarative layout ────────────────────────────────────────────────────

/// Register-level fields of [`CpuState`], in save order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Pc,
    X,
    Y,
    A,
    B,
    Np,
    Sp,
    Flags,
    TickCounter,
    ClkTimer(usize),
    ProgTimerTimestamp,
    ProgTimerEnabled,
    ProgTimerData,
    ProgTimerRld,
    CallDepth,
}

/// One entry of the layout table.
#[derive(Debug, Clone, Copy)]
struct FieldSpec {
    name: &'static str,
    /// Encoded width in bytes (1, 2 or 4)
    width: usize,
    mask: u32,
    field: Field,
}

const fn spec(name: &'static str, width: usize, mask: u32, field: Field) -> FieldSpec {
    FieldSpec { name, width, mask, field }
}

const REGISTER_LAYOUT: &[FieldSpec] = &[
    spec("pc", 2, 0x1FFF, Field::Pc),
    spec("x", 2, 0xFFF, Field::X),
    spec("y", 2, 0xFFF, Field::Y),
    spec("a", 1, NIBBLE, Field::A),
    spec("b", 1, NIBBLE, Field::B),
    spec("np", 1, 0x1F, Field::Np),
    spec("sp", 1, 0xFF, Field::Sp),
    spec("flags", 1, NIBBLE, Field::Flags),
    spec("tick_counter", 4, u32::MAX, Field::TickCounter),
    spec("clk_timer_2hz_timestamp", 4, u32::MAX, Field::ClkTimer(0)),
    spec("clk_timer_4hz_timestamp", 4, u32::MAX, Field::ClkTimer(1)),
    spec("clk_timer_8hz_timestamp", 4, u32::MAX, Field::ClkTimer(2)),
    spec("clk_timer_16hz_timestamp", 4, u32::MAX, Field::ClkTimer(3)),
    spec("clk_timer_32hz_timestamp", 4, u32::MAX, Field::ClkTimer(4)),
    spec("clk_timer_64hz_timestamp", 4, u32::MAX, Field::ClkTimer(5)),
    spec("clk_timer_128hz_timestamp", 4, u32::MAX, Field::ClkTimer(6)),
    spec("clk_timer_256hz_timestamp", 4, u32::MAX, Field::ClkTimer(7)),
    spec("prog_timer_timestamp", 4, u32::MAX, Field::ProgTimerTimestamp),
    spec("prog_timer_enabled", 1, 0x1, Field::ProgTimerEnabled),
    spec("prog_timer_data", 1, 0xFF, Field::ProgTimerData),
    spec("prog_timer_rld", 1, 0xFF, Field::ProgTimerRld),
    spec("call_depth", 4, u32::MAX, Field::CallDepth),
];

/// Per-slot interrupt fields: factor flag register, mask register, triggered.
const SLOT_MASKS: [u32; 3] = [NIBBLE, NIBBLE, 0x1];

const fn register_bytes() -> usize {
    let mut total = 0;
    let mut i = 0;
    while i < REGISTER_LAYOUT.len() {
        total += REGISTER_LAYOUT[i].width;
        i += 1;
    }
    total
}

/// Total size of a state save in bytes.
pub const SNAPSHOT_SIZE: usize =
    HEADER_SIZE + register_bytes() + INT_SLOT_NUM * SLOT_MASKS.len() + MEM_RAM_SIZE + MEM_IO_SIZE;

impl CpuState {
    fn field(&self, field: Field) -> u32 {
        match field {
            Field::Pc => self.pc as u32,
            Field::X => self.x as u32,
            Field::Y => self.y as u32,
            Field::A => self.a as u32,
            Field::B => self.b as u32,
            Field::Np => self.np as u32,
            Field::Sp => self.sp as u32,
            Field::Flags => self.flags as u32,
            Field::TickCounter => self.tick_counter,
            Field::ClkTimer(i) => self.clk_timer_timestamps[i],
            Field::ProgTimerTimestamp => self.prog_timer_timestamp,
            Field::ProgTimerEnabled => self.prog_timer_enabled as u32,
            Field::ProgTimerData => self.prog_timer_data as u32,
            Field::ProgTimerRld => self.prog_timer_rld as u32,
            Field::CallDepth => self.call_depth,
        }
    }

    /// `value` is already masked to the field's width.
    fn set_field(&mut self, field: Field, value: u32) {
        match field {
            Field::Pc => self.pc = value as u16,
            Field::X => self.x = value as u16,
            Field::Y => self.y = value as u16,
            Field::A => self.a = value as u8,
            Field::B => self.b = value as u8,
            Field::Np => self.np = value as u8,
            Field::Sp => self.sp = value as u8,
            Field::Flags => self.flags = value as u8,
            Field::TickCounter => self.tick_counter = value,
            Field::ClkTimer(i) => self.clk_timer_timestamps[i] = value,
            Field::ProgTimerTimestamp => self.prog_timer_timestamp = value,
            Field::ProgTimerEnabled => self.prog_timer_enabled = value != 0,
            Field::ProgTimerData => self.prog_timer_data = value as u8,
            Field::ProgTimerRld => self.prog_timer_rld = value as u8,
            Field::CallDepth => self.call_depth = value,
        }
    }
}

// ─── Encoding ──────────────────────────────────────────────────────────────

fn put(out: &mut Vec<u8>, value: u32, width: usize, mask: u32) {
    out.extend_from_slice(&(value & mask).to_le_bytes()[..width]);
}

/// Sequential reader over a blob whose length was already validated.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, width: usize, mask: u32) -> u32 {
        let mut le = [0u8; 4];
        le[..width].copy_from_slice(&self.data[self.pos..self.pos + width]);
        self.pos += width;
        u32::from_le_bytes(le) & mask
    }
}

/// Serialize the engine state into a state save.
pub fn save(state: &CpuState) -> Vec<u8> {
    let mut out = Vec::with_capacity(SNAPSHOT_SIZE);
    out.extend_from_slice(MAGIC);
    out.push(FORMAT_VERSION);

    for spec in REGISTER_LAYOUT {
        put(&mut out, state.field(spec.field), spec.width, spec.mask);
    }
    for slot in &state.interrupts {
        let values = [slot.factor_flag_reg as u32, slot.mask_reg as u32, slot.triggered as u32];
        for (value, mask) in values.into_iter().zip(SLOT_MASKS) {
            put(&mut out, value, 1, mask);
        }
    }
    for &nibble in state.ram.iter().chain(state.io.iter()) {
        put(&mut out, nibble as u32, 1, NIBBLE);
    }

    debug_assert_eq!(out.len(), SNAPSHOT_SIZE);
    out
}

/// Validate a state save and decode it into a fresh [`CpuState`].
pub fn decode(data: &[u8]) -> Result<CpuState> {
    if data.len() != SNAPSHOT_SIZE {
        return Err(BridgeError::SnapshotLength { expected: SNAPSHOT_SIZE, actual: data.len() });
    }
    if &data[..4] != MAGIC {
        let mut found = [0u8; 4];
        found.copy_from_slice(&data[..4]);
        return Err(BridgeError::SnapshotMagicMismatch { found });
    }
    if data[4] != FORMAT_VERSION {
        return Err(BridgeError::SnapshotVersionMismatch { found: data[4], expected: FORMAT_VERSION });
    }

    let mut state = CpuState::default();
    let mut r = Reader { data, pos: HEADER_SIZE };
    for spec in REGISTER_LAYOUT {
        let value = r.take(spec.width, spec.mask);
        state.set_field(spec.field, value);
    }
    for slot in state.interrupts.iter_mut() {
        slot.factor_flag_reg = r.take(1, SLOT_MASKS[0]) as u8;
        slot.mask_reg = r.take(1, SLOT_MASKS[1]) as u8;
        slot.triggered = r.take(1, SLOT_MASKS[2]) != 0;
    }
    for nibble in state.ram.iter_mut().chain(state.io.iter_mut()) {
        *nibble = r.take(1, NIBBLE) as u8;
    }

    debug_assert_eq!(r.pos, SNAPSHOT_SIZE);
    Ok(state)
}

/// Replace the engine state with a state save and refresh derived hardware.
///
/// On error the engine is untouched and no refresh happens.
pub fn load(engine: &mut dyn Engine, data: &[u8]) -> Result<()> {
    let state = decode(data)?;
    debug!("state save decoded: {}", register_summary(&state));
    *engine.state_mut() = state;
    engine.refresh_hw();
    info!("state save loaded");
    Ok(())
}

/// One-line `name=value` dump of the register-level fields, in save order.
fn register_summary(state: &CpuState) -> String {
    REGISTER_LAYOUT
        .iter()
        .map(|spec| format!("{}={:#x}", spec.name, state.field(spec.field)))
        .collect::<Vec<_>>()
        .join(" ")
}
