//! # tama-ws-core
//!
//! Real-time bridge between a Tamagotchi P1 emulation engine (E0C6S46 4-bit
//! microcontroller: CPU, clock/programmable timers, 32×16 LCD with 8 icons,
//! buzzer, 4 buttons) and browser clients speaking a small JSON protocol.
//!
//! ## Architecture
//!
//! - [`engine`]: [`Engine`] and [`HardwareSink`] traits, architectural [`CpuState`]
//! - [`context`]: [`BridgeContext`], the state shared by engine and transport threads
//! - [`outbound`]: [`Outbound`], the hardware sink that broadcasts `scr`/`frq`/`log`/`sav`/`end`
//! - [`inbound`]: [`Dispatcher`], validation and dispatch of `rom`/`btn`/`mod`/`spd`/`end`/`sav`/`lod`
//! - [`frame`]: bit packing and base64 transport encoding
//! - [`snapshot`]: fixed-layout, versioned state save codec
//! - [`rom`]: ROM image decoding and loading
//! - [`protocol`]: outbound envelopes and payload length constants
//! - [`idle`]: [`IdleCore`], an engine that holds state and paces ticks
//!
//! ## Threads
//!
//! The engine runs on its own thread and calls [`HardwareSink::handler`] once
//! per tick; transport threads feed [`Dispatcher::on_message`]. The two only
//! meet inside [`BridgeContext`].

pub mod context;
pub mod engine;
pub mod error;
pub mod frame;
pub mod idle;
pub mod inbound;
pub mod outbound;
pub mod protocol;
pub mod rom;
pub mod snapshot;

pub use context::BridgeContext;
pub use engine::{Button, CpuState, Engine, ExecMode, HardwareSink, LogLevel, Speed};
pub use error::{BridgeError, Result};
pub use idle::IdleCore;
pub use inbound::Dispatcher;
pub use outbound::{Broadcast, Outbound};

/// LCD width in pixels
pub const LCD_WIDTH: usize = 32;
/// LCD height in pixels
pub const LCD_HEIGHT: usize = 16;
/// Number of status icons around the LCD
pub const ICON_NUM: usize = 8;

/// Interrupt controller slots
pub const INT_SLOT_NUM: usize = 6;
/// RAM size in nibbles (0x000–0x27F)
pub const MEM_RAM_SIZE: usize = 0x280;
/// I/O register space in nibbles (0xF00–0xF7F)
pub const MEM_IO_SIZE: usize = 0x080;

/// ROM image size in bytes: 6144 words of 12 bits, two bytes each
pub const ROM_SIZE: usize = 6144 * 2;

/// Options of one bridge instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Least severe engine log category still forwarded to clients
    pub log_level: LogLevel,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig { log_level: LogLevel::Info }
    }
}
