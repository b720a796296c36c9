// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Operating-mode control.
//!
//! Two mode words are held: `current` (what the system should be doing)
//! and `previous` (what the queues are actually set up for). Anyone may
//! write `current` -- the application through a [`ModeRequest`] cell, the
//! fault engine when a critical fault demands FAULT mode -- but the
//! change only takes effect when the scheduler observes the mismatch at a
//! queue boundary and swaps queues.
//!
//! The boot progression is automatic and one-shot: each of BOOT,
//! FIRMWARE_INIT, and STARTUP_SEQUENCE runs exactly one full queue pass
//! and then hands over to the next phase, ending in IDLE.

use abi::OpMode;
use core::sync::atomic::{AtomicU8, Ordering};

/// The current/previous mode pair.
#[derive(Copy, Clone, Debug)]
pub struct ModeControl {
    current: OpMode,
    previous: OpMode,
}

impl ModeControl {
    pub fn new() -> Self {
        Self {
            current: OpMode::Unknown,
            previous: OpMode::Unknown,
        }
    }

    pub fn current(&self) -> OpMode {
        self.current
    }

    pub fn previous(&self) -> OpMode {
        self.previous
    }

    /// Posts a mode change; it takes effect at the next transition
    /// check.
    pub fn request(&mut self, mode: OpMode) {
        self.current = mode;
    }

    /// True while a requested mode has not been switched to yet.
    pub fn mismatch(&self) -> bool {
        self.current != self.previous
    }

    /// Marks the switch-over as done.
    pub fn sync(&mut self) {
        self.previous = self.current;
    }

    /// Applies the automatic one-shot boot progressions. Returns true at
    /// the moment the startup sequence hands over to IDLE, so the caller
    /// can raise the completion flag.
    pub fn advance_automatic(&mut self) -> bool {
        match (self.previous, self.current) {
            // A cleared mode word restarts the whole progression.
            (_, OpMode::Unknown) => {
                self.current = OpMode::Boot;
                false
            }
            // Each startup queue runs one full pass, then moves on.
            (OpMode::Boot, OpMode::Boot) => {
                self.current = OpMode::FirmwareInit;
                false
            }
            (OpMode::FirmwareInit, OpMode::FirmwareInit) => {
                self.current = OpMode::StartupSequence;
                false
            }
            (OpMode::StartupSequence, OpMode::StartupSequence) => {
                self.current = OpMode::Idle;
                true
            }
            _ => false,
        }
    }
}

impl Default for ModeControl {
    fn default() -> Self {
        Self::new()
    }
}

/// A statically allocated cell through which tasks and application code
/// request mode changes. The scheduler drains it once per cycle, at the
/// queue-advance step.
pub struct ModeRequest(AtomicU8);

impl ModeRequest {
    pub const fn new() -> Self {
        // 0 doubles as "no request": UNKNOWN is not a requestable mode.
        Self(AtomicU8::new(0))
    }

    pub fn post(&self, mode: OpMode) {
        if mode != OpMode::Unknown {
            self.0.store(mode as u8, Ordering::Relaxed);
        }
    }

    pub fn take(&self) -> Option<OpMode> {
        match self.0.swap(0, Ordering::Relaxed) {
            0 => None,
            v => OpMode::from_u8(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot_progression_is_one_shot() {
        let mut m = ModeControl::new();

        assert!(!m.advance_automatic());
        assert_eq!(m.current(), OpMode::Boot);
        assert!(m.mismatch());
        m.sync();

        assert!(!m.advance_automatic());
        assert_eq!(m.current(), OpMode::FirmwareInit);
        m.sync();

        assert!(!m.advance_automatic());
        assert_eq!(m.current(), OpMode::StartupSequence);
        m.sync();

        assert!(m.advance_automatic(), "startup completion is signalled");
        assert_eq!(m.current(), OpMode::Idle);
        m.sync();

        // Steady state: nothing advances on its own anymore.
        assert!(!m.advance_automatic());
        assert_eq!(m.current(), OpMode::Idle);
    }

    #[test]
    fn requests_are_deferred_until_sync() {
        let mut m = ModeControl::new();
        m.request(OpMode::Run);
        assert!(m.mismatch());
        assert_eq!(m.previous(), OpMode::Unknown);
        m.sync();
        assert!(!m.mismatch());
        assert_eq!(m.previous(), OpMode::Run);
    }

    #[test]
    fn cleared_mode_word_restarts_the_progression() {
        let mut m = ModeControl::new();
        m.request(OpMode::Run);
        m.sync();
        m.request(OpMode::Unknown);
        assert!(!m.advance_automatic());
        assert_eq!(m.current(), OpMode::Boot);
    }

    #[test]
    fn request_cell_is_take_once() {
        let cell = ModeRequest::new();
        assert_eq!(cell.take(), None);

        cell.post(OpMode::Standby);
        assert_eq!(cell.take(), Some(OpMode::Standby));
        assert_eq!(cell.take(), None);

        // UNKNOWN is not a requestable mode.
        cell.post(OpMode::Unknown);
        assert_eq!(cell.take(), None);
    }
}
