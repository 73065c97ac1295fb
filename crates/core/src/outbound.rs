//! Engine → wire adapter.
//!
//! [`Outbound`] is the [`HardwareSink`] handed to the engine. LCD and buzzer
//! callbacks only touch the shared [`BridgeContext`]; network traffic happens
//! on screen updates, buzzer on/off transitions, forwarded log lines, state
//! saves and halt.
//!
//! Screen frames are change-suppressed: a frame identical to the previous one
//! is not sent again. A client joining mid-session gets the current frame
//! through [`Outbound::refresh_screen`], which bypasses the suppression.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::context::BridgeContext;
use crate::engine::{Button, Engine, HardwareSink, LogLevel};
use crate::error::Result;
use crate::frame::{decode_transport, encode_bits, encode_transport};
use crate::protocol::OutboundMessage;
use crate::snapshot;
use crate::{BridgeConfig, ICON_NUM, LCD_HEIGHT, LCD_WIDTH};

/// Fan-out of text frames to every connected client.
///
/// Implementations must not block the caller on a slow client.
pub trait Broadcast: Send + Sync {
    fn broadcast(&self, text: &str);
}

/// The engine-facing side of the bridge.
#[derive(Clone)]
pub struct Outbound {
    ctx: Arc<BridgeContext>,
    hub: Arc<dyn Broadcast>,
    config: BridgeConfig,
    epoch: Instant,
}

impl Outbound {
    pub fn new(ctx: Arc<BridgeContext>, hub: Arc<dyn Broadcast>, config: BridgeConfig) -> Self {
        Outbound { ctx, hub, config, epoch: Instant::now() }
    }

    pub fn context(&self) -> &Arc<BridgeContext> {
        &self.ctx
    }

    fn send(&self, msg: &OutboundMessage) {
        self.hub.broadcast(&msg.to_text());
    }

    /// Serialize the current display into a `scr` frame.
    pub fn screen_frame(&self) -> Result<String> {
        let display = self.ctx.display();
        let msg = OutboundMessage::Screen {
            m: encode_bits(&display.matrix_bits())?,
            i: encode_bits(&display.icons)?,
        };
        Ok(msg.to_text())
    }

    fn broadcast_screen(&self, force: bool) {
        // held across encode and send so frames leave in display order
        let mut last = self.ctx.last_frame();
        let frame = match self.screen_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!("cannot encode screen: {}", e);
                return;
            }
        };
        if !force && last.as_deref() == Some(frame.as_str()) {
            return;
        }
        self.hub.broadcast(&frame);
        *last = Some(frame);
    }

    /// Broadcast the current screen unconditionally (new client joined).
    pub fn refresh_screen(&self) {
        self.broadcast_screen(true);
    }

    /// Snapshot the engine and broadcast it as a `sav` message.
    pub fn send_save(&self, engine: &dyn Engine) {
        let blob = snapshot::save(engine.state());
        info!("sending state save ({} bytes)", blob.len());
        self.send(&OutboundMessage::Save { s: encode_transport(&blob) });
    }

    /// Decode and apply a staged `lod` payload.
    pub fn apply_load(&self, engine: &mut dyn Engine, payload: &str) -> Result<()> {
        let blob = decode_transport(payload)?;
        snapshot::load(engine, &blob)
    }
}

impl HardwareSink for Outbound {
    fn set_lcd_pixel(&mut self, x: u8, y: u8, on: bool) {
        let (x, y) = (x as usize, y as usize);
        if x >= LCD_WIDTH || y >= LCD_HEIGHT {
            debug!("pixel ({}, {}) out of range", x, y);
            return;
        }
        self.ctx.display().matrix[y][x] = on;
    }

    fn set_lcd_icon(&mut self, icon: u8, on: bool) {
        match self.ctx.display().icons.get_mut(icon as usize) {
            Some(slot) => *slot = on,
            None => debug!("icon {} out of range (max {})", icon, ICON_NUM - 1),
        }
    }

    fn set_frequency(&mut self, freq: u32) {
        let mut audio = self.ctx.audio();
        if audio.freq != freq {
            audio.freq = freq;
            audio.phase = 0;
        }
    }

    fn play_frequency(&mut self, enabled: bool) {
        let msg = {
            let mut audio = self.ctx.audio();
            if audio.enabled == enabled {
                return;
            }
            audio.enabled = enabled;
            OutboundMessage::Frequency { f: audio.freq, p: audio.phase, e: enabled as u8 }
        };
        self.send(&msg);
    }

    fn is_log_enabled(&self, level: LogLevel) -> bool {
        level <= self.config.log_level
    }

    fn log(&mut self, level: LogLevel, message: &str) {
        if !self.is_log_enabled(level) {
            return;
        }
        match level {
            LogLevel::Error => error!("engine: {}", message),
            LogLevel::Info => info!("engine: {}", message),
            _ => debug!("engine {:?}: {}", level, message),
        }
        self.send(&OutboundMessage::log(level, message));
    }

    fn timestamp(&self) -> u32 {
        self.epoch.elapsed().as_micros() as u32
    }

    fn sleep_until(&self, ts: u32) {
        let remaining = ts.wrapping_sub(self.timestamp()) as i32;
        if remaining > 0 {
            std::thread::sleep(Duration::from_micros(remaining as u64));
        }
    }

    fn update_screen(&mut self) {
        self.broadcast_screen(false);
    }

    fn halt(&mut self) {
        if self.ctx.claim_end() {
            info!("halting");
            self.send(&OutboundMessage::End {});
        }
        self.ctx.mark_halted();
    }

    fn handler(&mut self, engine: &mut dyn Engine) -> bool {
        for button in Button::ALL {
            engine.set_button(button, self.ctx.button(button));
        }

        let pending = self.ctx.take_pending();
        if let Some(mode) = pending.exec_mode {
            info!("exec mode -> {:?}", mode);
            engine.set_exec_mode(mode);
        }
        if let Some(speed) = pending.speed {
            info!("speed -> {:?}", speed);
            engine.set_speed(speed);
        }
        if pending.save {
            self.send_save(engine);
        }
        if let Some(payload) = pending.load {
            if let Err(e) = self.apply_load(engine, &payload) {
                warn!("state load rejected: {}", e);
            }
        }

        self.update_screen();
        self.ctx.is_halted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{CpuState, ExecMode, Speed};
    use crate::frame::unpack_bits;
    use crate::idle::IdleCore;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }
    }

    impl Broadcast for Recorder {
        fn broadcast(&self, text: &str) {
            self.sent.lock().unwrap().push(text.to_owned());
        }
    }

    fn setup(level: LogLevel) -> (Outbound, Arc<Recorder>) {
        let rec = Arc::new(Recorder::default());
        let out = Outbound::new(
            Arc::new(BridgeContext::new()),
            rec.clone(),
            BridgeConfig { log_level: level },
        );
        (out, rec)
    }

    fn json(text: &str) -> serde_json::Value {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn test_screen_change_suppression() {
        let (mut out, rec) = setup(LogLevel::Info);
        out.update_screen();
        assert_eq!(rec.take().len(), 1);

        // identical display: nothing
        out.update_screen();
        assert!(rec.take().is_empty());

        out.set_lcd_pixel(3, 0, true);
        out.update_screen();
        let sent = rec.take();
        assert_eq!(sent.len(), 1);
        let v = json(&sent[0]);
        assert_eq!(v["t"], "scr");
        let bits = unpack_bits(&decode_transport(v["e"]["m"].as_str().unwrap()).unwrap());
        assert!(bits[3]);
        assert_eq!(bits.iter().filter(|&&b| b).count(), 1);

        out.update_screen();
        assert!(rec.take().is_empty());
    }

    #[test]
    fn test_refresh_screen_unconditional() {
        let (mut out, rec) = setup(LogLevel::Info);
        out.set_lcd_icon(7, true);
        out.update_screen();
        rec.take();

        out.refresh_screen();
        let sent = rec.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(json(&sent[0])["e"]["i"], "AQ==");

        // cache still matches, so the next tick stays quiet
        out.update_screen();
        assert!(rec.take().is_empty());
    }

    #[test]
    fn test_concurrent_refresh_ends_on_current_frame() {
        let (mut out, rec) = setup(LogLevel::Info);
        let refresher = {
            let out = out.clone();
            std::thread::spawn(move || {
                for _ in 0..200 {
                    out.refresh_screen();
                }
            })
        };
        for i in 0..200u32 {
            out.set_lcd_pixel((i % 32) as u8, (i / 32 % 16) as u8, i % 3 != 0);
            out.update_screen();
        }
        refresher.join().unwrap();

        let current = out.screen_frame().unwrap();
        assert_eq!(rec.take().last(), Some(&current));
        assert_eq!(out.context().last_frame().as_deref(), Some(current.as_str()));
    }

    #[test]
    fn test_out_of_range_pixels_ignored() {
        let (mut out, _rec) = setup(LogLevel::Info);
        out.set_lcd_pixel(LCD_WIDTH as u8, 0, true);
        out.set_lcd_pixel(0, LCD_HEIGHT as u8, true);
        out.set_lcd_icon(ICON_NUM as u8, true);
        let display = out.context().display().clone();
        assert_eq!(display, crate::context::DisplayState::new());
    }

    #[test]
    fn test_frequency_transitions() {
        let (mut out, rec) = setup(LogLevel::Info);
        out.set_frequency(2200);
        assert!(rec.take().is_empty());

        out.play_frequency(true);
        assert_eq!(rec.take(), vec![r#"{"t":"frq","e":{"f":2200,"p":0,"e":1}}"#.to_string()]);

        // frequency change while enabled: no broadcast
        out.set_frequency(1800);
        out.play_frequency(true);
        assert!(rec.take().is_empty());

        out.play_frequency(false);
        assert_eq!(rec.take(), vec![r#"{"t":"frq","e":{"f":1800,"p":0,"e":0}}"#.to_string()]);
    }

    #[test]
    fn test_frequency_resets_phase() {
        let (mut out, _rec) = setup(LogLevel::Info);
        out.context().audio().phase = 42;
        out.set_frequency(2200);
        assert_eq!(out.context().audio().phase, 0);
        out.context().audio().phase = 7;
        out.set_frequency(2200);
        assert_eq!(out.context().audio().phase, 7);
    }

    #[test]
    fn test_log_filtering() {
        let (mut out, rec) = setup(LogLevel::Error);
        out.log(LogLevel::Info, "hidden");
        assert!(rec.take().is_empty());
        out.log(LogLevel::Error, "shown");
        assert_eq!(rec.take(), vec![r#"{"t":"log","e":{"l":"1","m":"shown"}}"#.to_string()]);

        let (out, _) = setup(LogLevel::Memory);
        assert!(out.is_log_enabled(LogLevel::Info));
        assert!(out.is_log_enabled(LogLevel::Memory));
        assert!(!out.is_log_enabled(LogLevel::Cpu));
    }

    #[test]
    fn test_halt_sends_end() {
        let (mut out, rec) = setup(LogLevel::Info);
        out.halt();
        assert_eq!(rec.take(), vec![r#"{"t":"end","e":{}}"#.to_string()]);
        assert!(out.context().is_halted());

        // a second halt, from a clone on another path, stays silent
        out.clone().halt();
        assert!(rec.take().is_empty());
    }

    #[test]
    fn test_handler_pushes_buttons_and_modes() {
        let (mut out, _rec) = setup(LogLevel::Info);
        let mut core = IdleCore::new(vec![0; 16]);
        out.context().set_button(Button::Middle, true);
        out.context().request_exec_mode(ExecMode::Pause);
        out.context().request_speed(Speed::X10);

        assert!(!out.handler(&mut core));
        assert!(core.button(Button::Middle));
        assert!(!core.button(Button::Left));
        assert_eq!(core.exec_mode(), ExecMode::Pause);
        assert_eq!(core.speed(), Speed::X10);

        out.context().set_button(Button::Middle, false);
        out.handler(&mut core);
        assert!(!core.button(Button::Middle));
    }

    #[test]
    fn test_handler_save_and_load() {
        let (mut out, rec) = setup(LogLevel::Info);
        let mut core = IdleCore::new(vec![0; 16]);
        core.state_mut().pc = 0x234;
        core.state_mut().ram[5] = 0xC;

        out.context().request_save();
        out.handler(&mut core);
        let sent = rec.take();
        let save = sent.iter().map(|s| json(s)).find(|v| v["t"] == "sav").unwrap();
        let payload = save["e"]["s"].as_str().unwrap().to_string();
        assert_eq!(payload.len(), crate::protocol::SNAPSHOT_B64_LEN);

        *core.state_mut() = CpuState::default();
        out.context().request_load(payload);
        out.handler(&mut core);
        assert_eq!(core.state().pc, 0x234);
        assert_eq!(core.state().ram[5], 0xC);
        assert_eq!(core.refreshes(), 1);
    }

    #[test]
    fn test_handler_rejects_bad_load() {
        let (mut out, _rec) = setup(LogLevel::Info);
        let mut core = IdleCore::new(vec![0; 16]);
        core.state_mut().a = 0x7;
        let mut blob = snapshot::save(&CpuState::default());
        blob[4] = 9;
        out.context().request_load(encode_transport(&blob));
        assert!(!out.handler(&mut core));
        assert_eq!(core.state().a, 0x7);
        assert_eq!(core.refreshes(), 0);
    }

    #[test]
    fn test_handler_reports_halt() {
        let (mut out, _rec) = setup(LogLevel::Info);
        let mut core = IdleCore::new(vec![0; 16]);
        assert!(!out.handler(&mut core));
        out.context().request_halt();
        assert!(out.handler(&mut core));
        assert!(out.handler(&mut core));
    }

    #[test]
    fn test_sleep_until_past_returns() {
        let (out, _rec) = setup(LogLevel::Info);
        let now = out.timestamp();
        let start = Instant::now();
        out.sleep_until(now.wrapping_sub(1000));
        assert!(start.elapsed() < Duration::from_millis(100));
        out.sleep_until(out.timestamp().wrapping_add(2000));
        assert!(start.elapsed() >= Duration::from_micros(1500));
    }
}
