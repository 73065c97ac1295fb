//! An engine that keeps architectural state and paces ticks without executing
//! instructions.
//!
//! It gives the bridge a complete engine to talk to: the per-tick handler runs
//! at the configured speed, buttons, execution mode and speed changes land
//! here, and state saves round-trip through its [`CpuState`]. A real CPU core
//! plugs in through the same [`Engine`] trait.

use log::debug;

use crate::engine::{Button, CpuState, Engine, ExecMode, HardwareSink, LogLevel, Speed};

/// Screen refresh rate of the handheld at 1x speed.
pub const FRAMERATE: u32 = 30;

pub struct IdleCore {
    state: CpuState,
    program: Vec<u16>,
    buttons: [bool; 4],
    exec_mode: ExecMode,
    speed: Speed,
    ticks: u64,
    refreshes: u64,
}

impl IdleCore {
    pub fn new(program: Vec<u16>) -> Self {
        IdleCore {
            state: CpuState::default(),
            program,
            buttons: [false; 4],
            exec_mode: ExecMode::Run,
            speed: Speed::X1,
            ticks: 0,
            refreshes: 0,
        }
    }

    pub fn program(&self) -> &[u16] { &self.program }
    pub fn button(&self, button: Button) -> bool { self.buttons[button.index()] }
    pub fn exec_mode(&self) -> ExecMode { self.exec_mode }
    pub fn speed(&self) -> Speed { self.speed }
    pub fn ticks(&self) -> u64 { self.ticks }
    pub fn refreshes(&self) -> u64 { self.refreshes }

    /// Microseconds between handler calls; 0 when unthrottled.
    pub fn tick_period_us(&self) -> u32 {
        match self.speed {
            Speed::Unlimited => 0,
            speed => 1_000_000 / FRAMERATE / speed.ratio(),
        }
    }

    /// Run until the sink's handler asks to stop.
    pub fn run(&mut self, sink: &mut dyn HardwareSink) {
        sink.log(LogLevel::Info, "Starting emulation");
        let mut next = sink.timestamp();
        loop {
            if sink.handler(self) {
                break;
            }
            self.ticks += 1;
            // Single-shot modes fall back to pause after one tick
            if !matches!(self.exec_mode, ExecMode::Run | ExecMode::Pause) {
                self.exec_mode = ExecMode::Pause;
            }

            let period = self.tick_period_us();
            if period == 0 {
                std::thread::yield_now();
                continue;
            }
            let now = sink.timestamp();
            next = next.wrapping_add(period);
            if (next.wrapping_sub(now) as i32) < 0 {
                // fell behind, don't try to catch up
                next = now;
            }
            sink.sleep_until(next);
        }
        sink.log(LogLevel::Info, "Emulation stopped");
    }
}

impl Engine for IdleCore {
    fn state(&self) -> &CpuState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut CpuState {
        &mut self.state
    }

    fn set_button(&mut self, button: Button, pressed: bool) {
        self.buttons[button.index()] = pressed;
    }

    fn set_exec_mode(&mut self, mode: ExecMode) {
        self.exec_mode = mode;
    }

    fn set_speed(&mut self, speed: Speed) {
        self.speed = speed;
    }

    fn refresh_hw(&mut self) {
        self.refreshes += 1;
        debug!("hardware refresh #{} (pc=0x{:03X})", self.refreshes, self.state.pc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sink that stops after a fixed number of ticks and records calls.
    struct CountingSink {
        stop_after: u32,
        handled: u32,
        logs: Vec<String>,
        clock: u32,
    }

    impl HardwareSink for CountingSink {
        fn set_lcd_pixel(&mut self, _: u8, _: u8, _: bool) {}
        fn set_lcd_icon(&mut self, _: u8, _: bool) {}
        fn set_frequency(&mut self, _: u32) {}
        fn play_frequency(&mut self, _: bool) {}
        fn is_log_enabled(&self, _: LogLevel) -> bool { true }
        fn log(&mut self, _: LogLevel, message: &str) { self.logs.push(message.to_owned()); }
        fn timestamp(&self) -> u32 { self.clock }
        fn sleep_until(&self, _: u32) {}
        fn update_screen(&mut self) {}
        fn halt(&mut self) {}
        fn handler(&mut self, engine: &mut dyn Engine) -> bool {
            self.clock = self.clock.wrapping_add(1000);
            if self.handled == 1 {
                engine.set_exec_mode(ExecMode::Step);
            }
            self.handled += 1;
            self.handled > self.stop_after
        }
    }

    #[test]
    fn test_run_until_handler_stops() {
        let mut core = IdleCore::new(vec![0x123; 4]);
        let mut sink = CountingSink { stop_after: 3, handled: 0, logs: Vec::new(), clock: 0 };
        core.run(&mut sink);
        assert_eq!(core.ticks(), 3);
        assert_eq!(sink.handled, 4);
        assert_eq!(sink.logs, vec!["Starting emulation", "Emulation stopped"]);
        // the step request reverted to pause after its tick
        assert_eq!(core.exec_mode(), ExecMode::Pause);
    }

    #[test]
    fn test_tick_period() {
        let mut core = IdleCore::new(Vec::new());
        assert_eq!(core.tick_period_us(), 33_333);
        core.set_speed(Speed::X10);
        assert_eq!(core.tick_period_us(), 3_333);
        core.set_speed(Speed::Unlimited);
        assert_eq!(core.tick_period_us(), 0);
    }

    #[test]
    fn test_refresh_counts() {
        let mut core = IdleCore::new(vec![1, 2, 3]);
        assert_eq!(core.program(), &[1, 2, 3]);
        core.refresh_hw();
        assert_eq!(core.refreshes(), 1);
    }
}
