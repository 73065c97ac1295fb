//! Boundary between the bridge and the emulation engine.
//!
//! The engine (CPU, timers, interrupt controller) lives outside this crate.
//! It talks to the bridge through two traits:
//!
//! - [`Engine`]: what the bridge may do to the engine: read and replace its
//!   architectural state, feed button inputs, change execution mode and speed.
//! - [`HardwareSink`]: the callback table the engine drives: LCD, buzzer,
//!   logging, time keeping and the per-tick handler.

use crate::{INT_SLOT_NUM, MEM_IO_SIZE, MEM_RAM_SIZE};

/// One interrupt controller slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterruptSlot {
    pub factor_flag_reg: u8,
    pub mask_reg: u8,
    pub triggered: bool,
}

/// Complete architectural state of the E0C6S46 core.
///
/// RAM and I/O hold one nibble per byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuState {
    pub pc: u16,
    pub x: u16,
    pub y: u16,
    pub a: u8,
    pub b: u8,
    pub np: u8,
    pub sp: u8,
    pub flags: u8,
    pub tick_counter: u32,
    /// 2, 4, 8, 16, 32, 64, 128 and 256 Hz clock timer timestamps
    pub clk_timer_timestamps: [u32; 8],
    pub prog_timer_timestamp: u32,
    pub prog_timer_enabled: bool,
    pub prog_timer_data: u8,
    pub prog_timer_rld: u8,
    pub call_depth: u32,
    pub interrupts: [InterruptSlot; INT_SLOT_NUM],
    pub ram: [u8; MEM_RAM_SIZE],
    pub io: [u8; MEM_IO_SIZE],
}

impl Default for CpuState {
    fn default() -> Self {
        CpuState {
            pc: 0x100,
            x: 0,
            y: 0,
            a: 0,
            b: 0,
            np: 0x01,
            sp: 0,
            flags: 0,
            tick_counter: 0,
            clk_timer_timestamps: [0; 8],
            prog_timer_timestamp: 0,
            prog_timer_enabled: false,
            prog_timer_data: 0,
            prog_timer_rld: 0,
            call_depth: 0,
            interrupts: [InterruptSlot::default(); INT_SLOT_NUM],
            ram: [0; MEM_RAM_SIZE],
            io: [0; MEM_IO_SIZE],
        }
    }
}

/// Handheld buttons, numbered as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    Left = 0,
    Middle = 1,
    Right = 2,
    Tap = 3,
}

impl Button {
    pub const ALL: [Button; 4] = [Button::Left, Button::Middle, Button::Right, Button::Tap];

    pub fn from_code(code: i64) -> Option<Button> {
        match code {
            0 => Some(Button::Left),
            1 => Some(Button::Middle),
            2 => Some(Button::Right),
            3 => Some(Button::Tap),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Engine execution modes, numbered as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    Pause = 0,
    Step = 1,
    Next = 2,
    ToCall = 3,
    ToReturn = 4,
    Run = 5,
}

impl ExecMode {
    pub fn from_code(code: i64) -> Option<ExecMode> {
        match code {
            0 => Some(ExecMode::Pause),
            1 => Some(ExecMode::Step),
            2 => Some(ExecMode::Next),
            3 => Some(ExecMode::ToCall),
            4 => Some(ExecMode::ToReturn),
            5 => Some(ExecMode::Run),
            _ => None,
        }
    }
}

/// Emulation speed. The wire code is the speed ratio (0 = unlimited).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speed {
    Unlimited = 0,
    X1 = 1,
    X10 = 10,
}

impl Speed {
    pub fn from_code(code: i64) -> Option<Speed> {
        match code {
            0 => Some(Speed::Unlimited),
            1 => Some(Speed::X1),
            10 => Some(Speed::X10),
            _ => None,
        }
    }

    pub fn ratio(self) -> u32 {
        self as u32
    }
}

/// Engine log categories, ordered from most to least severe.
///
/// The numeric value is the category bit the engine uses and is what goes out
/// on the wire in `log` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Error = 0x01,
    Info = 0x02,
    Memory = 0x04,
    Cpu = 0x08,
    Int = 0x10,
}

impl LogLevel {
    pub fn bit(self) -> u8 {
        self as u8
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "info" => Ok(LogLevel::Info),
            "memory" | "mem" => Ok(LogLevel::Memory),
            "cpu" => Ok(LogLevel::Cpu),
            "int" | "interrupt" => Ok(LogLevel::Int),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

/// What the bridge may ask of the engine.
pub trait Engine {
    fn state(&self) -> &CpuState;
    fn state_mut(&mut self) -> &mut CpuState;
    fn set_button(&mut self, button: Button, pressed: bool);
    fn set_exec_mode(&mut self, mode: ExecMode);
    fn set_speed(&mut self, speed: Speed);
    /// Re-derive cached hardware views (LCD, buzzer, ports) after the
    /// architectural state was replaced.
    fn refresh_hw(&mut self);
}

/// Hardware callbacks driven by the engine.
pub trait HardwareSink {
    fn set_lcd_pixel(&mut self, x: u8, y: u8, on: bool);
    fn set_lcd_icon(&mut self, icon: u8, on: bool);
    /// Buzzer frequency in dHz.
    fn set_frequency(&mut self, freq: u32);
    fn play_frequency(&mut self, enabled: bool);
    fn is_log_enabled(&self, level: LogLevel) -> bool;
    fn log(&mut self, level: LogLevel, message: &str);
    /// Monotonic time in microseconds, wrapping at 32 bits.
    fn timestamp(&self) -> u32;
    fn sleep_until(&self, ts: u32);
    fn update_screen(&mut self);
    fn halt(&mut self);
    /// Called once per engine tick. Returns `true` when the engine must stop.
    fn handler(&mut self, engine: &mut dyn Engine) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_codes() {
        assert_eq!(Button::from_code(2), Some(Button::Right));
        assert_eq!(Button::from_code(4), None);
        assert_eq!(Button::from_code(-1), None);
        assert_eq!(ExecMode::from_code(5), Some(ExecMode::Run));
        assert_eq!(ExecMode::from_code(6), None);
        assert_eq!(Speed::from_code(10), Some(Speed::X10));
        assert_eq!(Speed::from_code(2), None);
    }

    #[test]
    fn test_log_level_order() {
        assert!(LogLevel::Error < LogLevel::Info);
        assert!(LogLevel::Cpu > LogLevel::Memory);
        assert_eq!("INFO".parse::<LogLevel>(), Ok(LogLevel::Info));
        assert!("loud".parse::<LogLevel>().is_err());
    }
}
