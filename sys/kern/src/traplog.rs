// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The trap log: a persistent record of why the CPU last went down.
//!
//! The log lives in statically allocated cells that survive warm restarts
//! of the scheduler within one power cycle. Interrupt and trap handlers
//! OR their cause bits in as they fire; the scheduler adds `SW_RESET` and
//! bumps the attempt counter during wind-down; the next boot classifies
//! the accumulated causes to decide how suspicious to be.
//!
//! For storage that survives power loss, the log round-trips through the
//! compact `TrapLogImage` boundary format via [`TrapLog::save`] and
//! [`TrapLog::load`].

use crate::err::KernError;
use crate::obs::ObsCell;
use abi::{
    ResetClass, TrapLogImage, TrapStatus, RESET_CLASS_CRITICAL,
    RESET_CLASS_WARNING,
};

pub struct TrapLog {
    /// Accumulated `TrapStatus` cause bits.
    pub status: ObsCell,
    /// Software warm-reset attempts since the log was cleared.
    pub reset_count: ObsCell,
}

impl TrapLog {
    pub const fn new() -> Self {
        Self {
            status: ObsCell::new(0),
            reset_count: ObsCell::new(0),
        }
    }

    /// ORs `causes` into the log. Safe to call from interrupt context;
    /// the cell is atomic.
    pub fn note(&self, causes: TrapStatus) {
        self.status.or(causes.bits());
    }

    pub fn status(&self) -> TrapStatus {
        TrapStatus::from_bits_retain(self.status.read())
    }

    pub fn reset_count(&self) -> u16 {
        self.reset_count.read()
    }

    /// Increments the attempt counter, returning the new count.
    pub fn bump_reset_count(&self) -> u16 {
        let n = self.reset_count.read().saturating_add(1);
        self.reset_count.write(n);
        n
    }

    /// Wipes the log, as a cold-boot path would after reporting the
    /// previous causes.
    pub fn clear(&self) {
        self.status.write(0);
        self.reset_count.write(0);
    }

    /// Classifies the recorded causes using the per-target class masks.
    pub fn classify(&self) -> ResetClass {
        let bits = self.status.read();
        if bits & RESET_CLASS_CRITICAL != 0 {
            ResetClass::Critical
        } else if bits & RESET_CLASS_WARNING != 0 {
            ResetClass::Warning
        } else {
            ResetClass::Normal
        }
    }

    pub fn image(&self) -> TrapLogImage {
        TrapLogImage {
            status: self.status.read(),
            reset_count: self.reset_count.read(),
        }
    }

    pub fn restore(&self, image: TrapLogImage) {
        self.status.write(image.status);
        self.reset_count.write(image.reset_count);
    }

    /// Encodes the log into `buf` for the persistence seam, returning
    /// the number of bytes written.
    pub fn save(&self, buf: &mut [u8]) -> Result<usize, KernError> {
        ssmarshal::serialize(buf, &self.image()).map_err(|_| KernError::Persist)
    }

    /// Restores the log from a buffer produced by `save`.
    pub fn load(&self, buf: &[u8]) -> Result<(), KernError> {
        let (image, _) = ssmarshal::deserialize::<TrapLogImage>(buf)
            .map_err(|_| KernError::Persist)?;
        self.restore(image);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_follows_the_masks() {
        let log = TrapLog::new();
        assert_eq!(log.classify(), ResetClass::Normal);

        log.note(TrapStatus::POWER_ON);
        assert_eq!(log.classify(), ResetClass::Normal);

        log.note(TrapStatus::SW_RESET);
        assert_eq!(log.classify(), ResetClass::Warning);

        // Any critical cause outranks the accumulated warnings.
        log.note(TrapStatus::ILLEGAL_ADDRESS);
        assert_eq!(log.classify(), ResetClass::Critical);
    }

    #[test]
    fn notes_accumulate() {
        let log = TrapLog::new();
        log.note(TrapStatus::BROWN_OUT);
        log.note(TrapStatus::WATCHDOG);
        assert_eq!(
            log.status(),
            TrapStatus::BROWN_OUT | TrapStatus::WATCHDOG
        );
        assert_eq!(log.bump_reset_count(), 1);
        assert_eq!(log.bump_reset_count(), 2);

        log.clear();
        assert_eq!(log.status(), TrapStatus::empty());
        assert_eq!(log.reset_count(), 0);
    }

    #[test]
    fn image_roundtrips_through_the_persistence_seam() {
        let log = TrapLog::new();
        log.note(TrapStatus::TRAP_CONFLICT | TrapStatus::SW_RESET);
        log.bump_reset_count();

        let mut buf = [0u8; 8];
        let n = log.save(&mut buf).unwrap();
        assert!(n > 0);

        let other = TrapLog::new();
        other.load(&buf).unwrap();
        assert_eq!(other.status(), log.status());
        assert_eq!(other.reset_count(), 1);
    }

    #[test]
    fn short_buffer_reports_persist_failure() {
        let log = TrapLog::new();
        let mut buf = [0u8; 1];
        assert_eq!(log.save(&mut buf), Err(KernError::Persist));
    }
}
