//! Resources shared between the engine thread and the transport threads.
//!
//! Every resource has its own lock so that a client pressing a button never
//! waits on a screen frame being serialized, and the engine never waits on
//! more than one short critical section per tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::engine::{Button, ExecMode, Speed};
use crate::error::{BridgeError, Result};
use crate::{ICON_NUM, LCD_HEIGHT, LCD_WIDTH};

/// Current LCD contents as set by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayState {
    pub matrix: [[bool; LCD_WIDTH]; LCD_HEIGHT],
    pub icons: [bool; ICON_NUM],
}

impl DisplayState {
    pub fn new() -> Self {
        DisplayState {
            matrix: [[false; LCD_WIDTH]; LCD_HEIGHT],
            icons: [false; ICON_NUM],
        }
    }

    /// Matrix in row-major order.
    pub fn matrix_bits(&self) -> Vec<bool> {
        self.matrix.iter().flat_map(|row| row.iter().copied()).collect()
    }
}

impl Default for DisplayState {
    fn default() -> Self {
        Self::new()
    }
}

/// Buzzer state. `freq` is in dHz.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioState {
    pub freq: u32,
    pub phase: u32,
    pub enabled: bool,
}

/// One-shot requests from clients, consumed together once per tick.
///
/// Every slot is last-write-wins: a second `lod` replaces the staged payload,
/// repeated `sav` or `end` requests coalesce.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingActions {
    pub halt: bool,
    pub save: bool,
    pub load: Option<String>,
    pub exec_mode: Option<ExecMode>,
    pub speed: Option<Speed>,
}

impl PendingActions {
    pub fn is_empty(&self) -> bool {
        *self == PendingActions::default()
    }
}

/// Shared state of one bridge instance.
pub struct BridgeContext {
    display: Mutex<DisplayState>,
    audio: Mutex<AudioState>,
    buttons: [AtomicBool; 4],
    pending: Mutex<PendingActions>,
    last_frame: Mutex<Option<String>>,
    rom: Mutex<Option<Vec<u16>>>,
    rom_ready: Condvar,
    halted: AtomicBool,
    end_sent: AtomicBool,
}

/// Lock ignoring poisoning; guarded data is plain flags and buffers.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl BridgeContext {
    pub fn new() -> Self {
        BridgeContext {
            display: Mutex::new(DisplayState::new()),
            audio: Mutex::new(AudioState::default()),
            buttons: Default::default(),
            pending: Mutex::new(PendingActions::default()),
            last_frame: Mutex::new(None),
            rom: Mutex::new(None),
            rom_ready: Condvar::new(),
            halted: AtomicBool::new(false),
            end_sent: AtomicBool::new(false),
        }
    }

    // ─── Display / audio ───────────────────────────────────────────────────

    pub fn display(&self) -> MutexGuard<'_, DisplayState> {
        lock(&self.display)
    }

    pub fn audio(&self) -> MutexGuard<'_, AudioState> {
        lock(&self.audio)
    }

    pub(crate) fn last_frame(&self) -> MutexGuard<'_, Option<String>> {
        lock(&self.last_frame)
    }

    // ─── Buttons ───────────────────────────────────────────────────────────

    pub fn set_button(&self, button: Button, pressed: bool) {
        self.buttons[button.index()].store(pressed, Ordering::Relaxed);
    }

    pub fn button(&self, button: Button) -> bool {
        self.buttons[button.index()].load(Ordering::Relaxed)
    }

    // ─── Pending actions ───────────────────────────────────────────────────

    pub fn request_halt(&self) {
        lock(&self.pending).halt = true;
    }

    pub fn request_save(&self) {
        lock(&self.pending).save = true;
    }

    pub fn request_load(&self, payload: String) {
        let mut pending = lock(&self.pending);
        if pending.load.is_some() {
            info!("replacing unconsumed state load request");
        }
        pending.load = Some(payload);
    }

    pub fn request_exec_mode(&self, mode: ExecMode) {
        lock(&self.pending).exec_mode = Some(mode);
    }

    pub fn request_speed(&self, speed: Speed) {
        lock(&self.pending).speed = Some(speed);
    }

    /// Take every pending request, leaving the slot empty.
    ///
    /// A halt request stays sticky in [`BridgeContext::is_halted`] once taken.
    pub fn take_pending(&self) -> PendingActions {
        let taken = std::mem::take(&mut *lock(&self.pending));
        if taken.halt {
            self.halted.store(true, Ordering::Release);
        }
        taken
    }

    pub fn mark_halted(&self) {
        self.halted.store(true, Ordering::Release);
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// True exactly once: for the caller that gets to announce `end`.
    pub fn claim_end(&self) -> bool {
        !self.end_sent.swap(true, Ordering::AcqRel)
    }

    // ─── ROM staging ───────────────────────────────────────────────────────

    /// Stage a decoded ROM program and wake the loader.
    pub fn stage_rom(&self, program: Vec<u16>) {
        let mut slot = lock(&self.rom);
        if slot.is_some() {
            warn!("ROM already staged, replacing it");
        }
        *slot = Some(program);
        self.rom_ready.notify_all();
    }

    /// Block until a ROM is staged and take it. `None` waits forever.
    pub fn wait_for_rom(&self, timeout: Option<Duration>) -> Result<Vec<u16>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut slot = lock(&self.rom);
        loop {
            if let Some(rom) = slot.take() {
                return Ok(rom);
            }
            slot = match deadline {
                None => self.rom_ready.wait(slot).unwrap_or_else(|p| p.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(BridgeError::MissingRom);
                    }
                    self.rom_ready
                        .wait_timeout(slot, deadline - now)
                        .unwrap_or_else(|p| p.into_inner())
                        .0
                }
            };
        }
    }
}

impl Default for BridgeContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_take_pending_clears() {
        let ctx = BridgeContext::new();
        ctx.request_save();
        ctx.request_exec_mode(ExecMode::Step);
        let taken = ctx.take_pending();
        assert!(taken.save);
        assert_eq!(taken.exec_mode, Some(ExecMode::Step));
        assert!(ctx.take_pending().is_empty());
    }

    #[test]
    fn test_load_last_write_wins() {
        let ctx = BridgeContext::new();
        ctx.request_load("first".into());
        ctx.request_load("second".into());
        assert_eq!(ctx.take_pending().load.as_deref(), Some("second"));
    }

    #[test]
    fn test_halt_is_sticky() {
        let ctx = BridgeContext::new();
        assert!(!ctx.is_halted());
        ctx.request_halt();
        assert!(!ctx.is_halted());
        assert!(ctx.take_pending().halt);
        assert!(ctx.is_halted());
    }

    #[test]
    fn test_claim_end_once() {
        let ctx = BridgeContext::new();
        assert!(ctx.claim_end());
        assert!(!ctx.claim_end());
    }

    #[test]
    fn test_buttons() {
        let ctx = BridgeContext::new();
        ctx.set_button(Button::Right, true);
        assert!(ctx.button(Button::Right));
        assert!(!ctx.button(Button::Left));
        ctx.set_button(Button::Right, false);
        assert!(!ctx.button(Button::Right));
    }

    #[test]
    fn test_wait_for_rom_times_out() {
        let ctx = BridgeContext::new();
        let res = ctx.wait_for_rom(Some(Duration::from_millis(20)));
        assert!(matches!(res, Err(BridgeError::MissingRom)));
    }

    #[test]
    fn test_wait_for_rom_wakes_up() {
        let ctx = Arc::new(BridgeContext::new());
        let stager = {
            let ctx = ctx.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                ctx.stage_rom(vec![0xABC, 0x123]);
            })
        };
        let rom = ctx.wait_for_rom(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(rom, vec![0xABC, 0x123]);
        stager.join().unwrap();
        // taken, not copied
        assert!(ctx.wait_for_rom(Some(Duration::ZERO)).is_err());
    }

    #[test]
    fn test_matrix_bits_row_major() {
        let mut d = DisplayState::new();
        d.matrix[1][0] = true;
        let bits = d.matrix_bits();
        assert_eq!(bits.len(), LCD_WIDTH * LCD_HEIGHT);
        assert!(bits[LCD_WIDTH]);
        assert_eq!(bits.iter().filter(|&&b| b).count(), 1);
    }
}
