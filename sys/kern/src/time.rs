// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The timebase seam: the one periodic timer the scheduler is built
//! around.
//!
//! The hardware contract is small: a free-running counter that wraps at a
//! programmable period, a pending flag raised at each wrap (the "tick"),
//! and a one-shot rescue window armed around each task call. The
//! scheduler performs one cycle per tick; the idle spin on the pending
//! flag doubles as the CPU-load meter.
//!
//! On hosted builds a deterministic [`SimTimebase`] is provided: the
//! counter advances a fixed step per read, so a test (or the simulator
//! application) gets exact control over where within a period every
//! observation lands.

/// Operations the scheduler needs from the platform timer.
///
/// `now` returns the current counter value, which is always less than the
/// programmed period; elapsed-time math across a wrap is the task
/// manager's job, detected through `tick_pending`.
pub trait Timebase {
    /// Reads the periodic counter.
    fn now(&mut self) -> u32;

    /// Programs the counter's wrap period, in ticks.
    fn set_period(&mut self, ticks: u16);

    /// Arms the one-shot rescue window: the platform must deliver the
    /// rescue event if `ticks` elapse before `disarm_rescue`.
    fn arm_rescue(&mut self, ticks: u16);

    /// Disarms the rescue window; the normal return path of every task
    /// call.
    fn disarm_rescue(&mut self);

    /// True once the counter has wrapped since the last `clear_tick`.
    fn tick_pending(&self) -> bool;

    /// Acknowledges the tick.
    fn clear_tick(&mut self);
}

cfg_if::cfg_if! {
    if #[cfg(not(target_os = "none"))] {
        use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

        /// Backing state of a simulated timebase.
        ///
        /// Lives in a static (`SimState::new` is const) so simulated tasks
        /// can advance time from inside their entry functions while the
        /// scheduler holds the [`SimTimebase`] handle.
        #[derive(Debug)]
        pub struct SimState {
            counter: AtomicU32,
            period: AtomicU32,
            step: AtomicU32,
            pending: AtomicBool,
            rescue_armed: AtomicBool,
            rescue_period: AtomicU32,
        }

        impl SimState {
            /// Creates a simulated timer advancing `step` counts per read,
            /// wrapping at `period`. `step` must be nonzero or the
            /// scheduler's idle wait would never see a tick.
            pub const fn new(step: u32, period: u16) -> Self {
                Self {
                    counter: AtomicU32::new(0),
                    period: AtomicU32::new(period as u32),
                    step: AtomicU32::new(step),
                    pending: AtomicBool::new(false),
                    rescue_armed: AtomicBool::new(false),
                    rescue_period: AtomicU32::new(0),
                }
            }

            /// Moves simulated time forward by `n` counts, wrapping at the
            /// period and raising the pending flag on each wrap. Tasks use
            /// this to model their own execution time.
            pub fn advance(&self, n: u32) {
                let period = self.period.load(Ordering::Relaxed).max(1);
                let mut c = self.counter.load(Ordering::Relaxed) + n;
                while c >= period {
                    c -= period;
                    self.pending.store(true, Ordering::Relaxed);
                }
                self.counter.store(c, Ordering::Relaxed);
            }

            /// Pins the counter to a known position, for tests that need
            /// to start a measurement from an exact phase.
            pub fn set_counter(&self, c: u32) {
                self.counter.store(c, Ordering::Relaxed);
            }

            pub fn counter(&self) -> u32 {
                self.counter.load(Ordering::Relaxed)
            }

            /// True while a rescue window is armed. The simulator never
            /// delivers the rescue event itself (that is the rescue host's
            /// job); this just lets tests assert the arm/disarm protocol.
            pub fn rescue_armed(&self) -> bool {
                self.rescue_armed.load(Ordering::Relaxed)
            }

            /// Most recently armed rescue window, in ticks.
            pub fn rescue_period(&self) -> u32 {
                self.rescue_period.load(Ordering::Relaxed)
            }
        }

        /// A copyable `Timebase` handle over a static [`SimState`].
        #[derive(Copy, Clone, Debug)]
        pub struct SimTimebase(&'static SimState);

        impl SimTimebase {
            pub fn new(state: &'static SimState) -> Self {
                assert!(state.step.load(Ordering::Relaxed) != 0);
                Self(state)
            }

            pub fn state(&self) -> &'static SimState {
                self.0
            }
        }

        impl Timebase for SimTimebase {
            fn now(&mut self) -> u32 {
                let step = self.0.step.load(Ordering::Relaxed);
                self.0.advance(step);
                self.0.counter()
            }

            fn set_period(&mut self, ticks: u16) {
                self.0.period.store(u32::from(ticks).max(1), Ordering::Relaxed);
            }

            fn arm_rescue(&mut self, ticks: u16) {
                self.0.rescue_period.store(u32::from(ticks), Ordering::Relaxed);
                self.0.rescue_armed.store(true, Ordering::Relaxed);
            }

            fn disarm_rescue(&mut self) {
                self.0.rescue_armed.store(false, Ordering::Relaxed);
            }

            fn tick_pending(&self) -> bool {
                self.0.pending.load(Ordering::Relaxed)
            }

            fn clear_tick(&mut self) {
                self.0.pending.store(false, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_advances_per_read() {
        static SIM: SimState = SimState::new(3, 100);
        let mut tb = SimTimebase::new(&SIM);
        assert_eq!(tb.now(), 3);
        assert_eq!(tb.now(), 6);
        assert!(!tb.tick_pending());
    }

    #[test]
    fn wrap_raises_tick() {
        static SIM: SimState = SimState::new(1, 10);
        let mut tb = SimTimebase::new(&SIM);
        SIM.set_counter(8);
        assert_eq!(tb.now(), 9);
        assert!(!tb.tick_pending());
        assert_eq!(tb.now(), 0);
        assert!(tb.tick_pending());
        tb.clear_tick();
        assert!(!tb.tick_pending());
    }

    #[test]
    fn task_side_advance_wraps_too() {
        static SIM: SimState = SimState::new(1, 100);
        let mut tb = SimTimebase::new(&SIM);
        SIM.set_counter(90);
        SIM.advance(25);
        assert_eq!(SIM.counter(), 15);
        assert!(tb.tick_pending());
        tb.clear_tick();
    }

    #[test]
    fn rescue_arm_protocol_is_visible() {
        static SIM: SimState = SimState::new(1, 100);
        let mut tb = SimTimebase::new(&SIM);
        assert!(!SIM.rescue_armed());
        tb.arm_rescue(40);
        assert!(SIM.rescue_armed());
        assert_eq!(SIM.rescue_period(), 40);
        tb.disarm_rescue();
        assert!(!SIM.rescue_armed());
    }
}
