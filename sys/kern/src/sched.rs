// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The scheduler loop: the grid-locked outer cycle that ties everything
//! together.
//!
//! One cycle per timer tick, in a fixed order: kick the watchdog, spin on
//! the tick flag while metering idle time, compute the CPU load, dispatch
//! exactly one task under the rescue window, run the application
//! status-capture hook, scan the fault objects, then advance the queue --
//! or, at a queue boundary or on a pending mode change, run the
//! mode-transition check instead.
//!
//! The [`Scheduler`] is the single owner of all mutable kernel state. The
//! tables it works on are borrowed from statically allocated storage;
//! shared 16-bit cells (telemetry, trap log, mode requests) are the only
//! state other contexts may touch while it runs.
//!
//! When the run flag drops -- a catastrophic fault or an external stop --
//! the loop falls into the wind-down sequence: capture pending
//! interrupt/trap status, file `SW_RESET` in the trap log, bump the
//! persistent attempt counter, and tell the embedder whether to warm-reset
//! or, once the attempt limit is reached, halt for a human to notice.

use crate::app::{App, Hooks, QueueSet, SchedulerConfig};
use crate::fault::{self, FaultAction, FaultObject};
use crate::mode::{ModeControl, ModeRequest};
use crate::task::{self, ActiveQueue, Task};
use crate::telemetry::Telemetry;
use crate::time::Timebase;
use crate::traplog::TrapLog;
use crate::rescue::Rescue;
use abi::{
    FaultClasses, OpMode, OpStatus, ProcessCode, ResetClass, TaskId,
    TrapStatus,
};

ringbuf::ringbuf!(TRACE, Trace, 32);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Trace {
    ResetClass(ResetClass),
    QueueSwitch(OpMode),
    Rescue(TaskId),
    WarmReset(u16),
    Halted(u16),
}

/// How the wind-down sequence wants the embedder to proceed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[must_use]
pub enum Shutdown {
    /// Re-enter `run` after application-level cleanup: a warm reset. The
    /// trap log is preserved.
    WarmReset,
    /// The attempt counter reached its limit; park the system somewhere
    /// a human or an external watchdog will notice.
    Halt,
}

/// External watchdog interface. The scheduler kicks it at the top of
/// every cycle while its window is open and captures its free-running
/// counter for diagnosis.
pub trait Watchdog {
    fn window_open(&self) -> bool;
    fn kick(&mut self);
    fn counter(&self) -> u32;
}

/// For systems (and tests) without one.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoWatchdog;

impl Watchdog for NoWatchdog {
    fn window_open(&self) -> bool {
        false
    }
    fn kick(&mut self) {}
    fn counter(&self) -> u32 {
        0
    }
}

/// The idle-spin CPU-load meter.
///
/// The wait for the next tick is a deliberate busy loop: counting its
/// iterations *is* the measurement. `loop_nomblk` calibrates ticks per
/// iteration; `load_factor` is the Q16 scale turning idle ticks into
/// per-mille of one period. The published maximum accumulates with
/// bitwise OR -- non-linear but cheap, and good enough to answer "did we
/// ever get close to the ceiling".
#[derive(Copy, Clone, Debug)]
pub struct CpuLoadMeter {
    loop_nomblk: u16,
    load_factor: u16,
    ticks: u32,
    load: u16,
}

impl CpuLoadMeter {
    pub fn new(loop_nomblk: u16, load_factor: u16) -> Self {
        Self {
            loop_nomblk,
            load_factor,
            ticks: 0,
            load: 0,
        }
    }

    fn begin(&mut self) {
        self.ticks = 0;
    }

    fn tick(&mut self) {
        self.ticks = self.ticks.saturating_add(1);
    }

    fn compute(&mut self) -> u16 {
        let cycles = self.ticks.saturating_mul(u32::from(self.loop_nomblk));
        let idle = cycles.saturating_mul(u32::from(self.load_factor)) >> 16;
        self.load = 1000u32.saturating_sub(idle) as u16;
        self.load
    }

    /// Idle iterations counted during the most recent wait.
    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    /// Load of the most recent cycle, in per-mille of one period.
    pub fn load(&self) -> u16 {
        self.load
    }
}

/// The scheduler: owner of the task table, the queues, the fault lists,
/// and the cycle state machine.
pub struct Scheduler<'s, T, R, W> {
    config: SchedulerConfig,
    tasks: &'s mut [Task],
    queues: &'static QueueSet,
    os_faults: &'s mut [FaultObject],
    user_faults: &'s mut [FaultObject],
    telemetry: &'static Telemetry,
    traplog: &'static TrapLog,
    mode_request: &'static ModeRequest,
    hooks: Hooks,
    timebase: T,
    rescue: R,
    watchdog: W,
    modes: ModeControl,
    active: ActiveQueue,
    meter: CpuLoadMeter,
    status: OpStatus,
    run: bool,
    active_task_time: u16,
    last_deadman: u32,
    reset_class: ResetClass,
}

impl<'s, T: Timebase, R: Rescue, W: Watchdog> Scheduler<'s, T, R, W> {
    pub fn new(app: App<'s>, timebase: T, rescue: R, watchdog: W) -> Self {
        let meter = CpuLoadMeter::new(app.config.loop_nomblk, app.config.load_factor);
        Self {
            config: app.config,
            tasks: app.tasks,
            queues: app.queues,
            os_faults: app.os_faults,
            user_faults: app.user_faults,
            telemetry: app.telemetry,
            traplog: app.traplog,
            mode_request: app.mode_request,
            hooks: app.hooks,
            timebase,
            rescue,
            watchdog,
            modes: ModeControl::new(),
            active: ActiveQueue::new(app.queues.boot.tasks),
            meter,
            status: OpStatus::empty(),
            run: false,
            active_task_time: 0,
            last_deadman: 0,
            reset_class: ResetClass::Normal,
        }
    }

    /// Boot-time sequence: classify the previous reset's root cause,
    /// program the grid period, and run the initial mode transition
    /// (UNKNOWN normalizes to BOOT and swaps in the boot queue).
    pub fn start(&mut self) {
        self.run = true;
        self.reset_class = self.traplog.classify();
        ringbuf::ringbuf_entry!(TRACE, Trace::ResetClass(self.reset_class));
        // Classification consumes the cause bits, the way firmware clears
        // the hardware reset-cause register after reading it. The attempt
        // counter survives so the restart bound holds across warm resets;
        // causes filed from here on belong to this incarnation.
        self.traplog.status.write(0);
        self.timebase.set_period(self.config.master_period);
        let _ = self.check_mode_transition();
        self.telemetry.status.write(self.status.bits());
    }

    /// Runs the scheduler until the run flag drops, then performs the
    /// wind-down sequence. The embedder decides what a warm reset means
    /// on its platform; re-entering `run` is the hosted rendition.
    pub fn run(&mut self) -> Shutdown {
        self.start();
        while self.run {
            self.cycle();
        }
        self.shutdown()
    }

    /// One full scheduler cycle. Public so an embedder (or a test) can
    /// drive the grid step by step.
    pub fn cycle(&mut self) {
        let mut ok = true;

        // Watchdog service, while its window is open.
        if self.watchdog.window_open() {
            self.watchdog.kick();
        }

        // Idle-metering wait for the tick. Counting these iterations is
        // the CPU-load measurement.
        self.meter.begin();
        let mut prev = self.timebase.now();
        while !self.timebase.tick_pending() {
            let c = self.timebase.now();
            self.meter.tick();
            if c < prev {
                // Counter wrapped: a new period began even if the flag
                // hasn't been observed yet.
                break;
            }
            prev = c;
        }
        self.last_deadman = self.watchdog.counter();

        let load = self.meter.compute();
        self.telemetry.cpu_load.write(load);
        self.telemetry.cpu_load_max.or(load);
        self.timebase.clear_tick();

        // Dispatch exactly one task, rescue armed.
        let id = self.active.active_task_id();
        self.telemetry
            .proc_code
            .write(ProcessCode::new(self.modes.current(), id).0);
        let dispatch = task::dispatch_one(
            self.tasks,
            &self.active,
            &mut self.timebase,
            &mut self.rescue,
            self.config.master_period,
            self.config.rescue_period,
        );
        ok &= dispatch.measurement_ok;
        self.status
            .set(OpStatus::PERIOD_OVERRUN, dispatch.period_overrun);
        if dispatch.abandoned {
            self.status.insert(OpStatus::RESCUE_TIMER_OVERRUN);
            ringbuf::ringbuf_entry!(TRACE, Trace::Rescue(dispatch.task_id));
        }
        self.active_task_time = dispatch.elapsed;
        self.telemetry.active_retval.write(dispatch.return_value);
        if dispatch.elapsed > self.telemetry.task_period_max.read() {
            self.telemetry.task_period_max.write(dispatch.elapsed);
        }

        // Application status capture.
        if let Some(hook) = self.hooks.capture_status {
            ok &= hook() != 0;
        }

        // Everything up to here is the component check the fault engine
        // gets to see this cycle.
        self.status.set(OpStatus::OS_COMPONENT_CHECK, ok);
        self.telemetry.status.write(self.status.bits());

        // Full fault scan, kernel list first.
        let scan = fault::scan_all(self.os_faults, self.user_faults);
        if !scan.ok {
            // Surfaces through the component-check descriptor next scan.
            self.status.remove(OpStatus::OS_COMPONENT_CHECK);
        }
        self.status.set(
            OpStatus::GLOBAL_FAULT,
            scan.latched.intersects(
                FaultClasses::FLAG
                    | FaultClasses::WARNING
                    | FaultClasses::CRITICAL
                    | FaultClasses::CATASTROPHIC,
            ),
        );
        self.status.set(
            OpStatus::GLOBAL_WARNING,
            scan.latched.intersects(
                FaultClasses::WARNING
                    | FaultClasses::CRITICAL
                    | FaultClasses::CATASTROPHIC,
            ),
        );
        match scan.action() {
            FaultAction::Shutdown => self.run = false,
            FaultAction::EnterFault => self.modes.request(OpMode::Fault),
            _ => (),
        }
        // The scan consumed the sticky load maximum.
        self.telemetry.cpu_load_max.write(0);

        // Advance, or switch queues at the boundary.
        if let Some(mode) = self.mode_request.take() {
            self.modes.request(mode);
        }
        if self.active.at_rollover() || self.modes.mismatch() {
            if !self.check_mode_transition() {
                self.status.remove(OpStatus::OS_COMPONENT_CHECK);
            }
            self.active.rewind();
        } else {
            self.active.advance();
        }
        self.telemetry.status.write(self.status.bits());
    }

    /// The queue boundary check: apply the automatic boot progressions,
    /// then swap queues if the mode word changed.
    fn check_mode_transition(&mut self) -> bool {
        if self.modes.advance_automatic() {
            self.status.insert(OpStatus::STARTUP_SEQUENCE_COMPLETE);
        }
        if !self.modes.mismatch() {
            self.status.remove(OpStatus::QUEUE_SWITCH);
            return true;
        }

        let target = self.modes.current();
        let queue = self.queues.for_mode(target);
        self.active = ActiveQueue::new(queue.tasks);

        // A fresh queue starts with a clean timing record.
        for id in queue.tasks {
            self.tasks[id.index()].reset_stats();
        }
        self.telemetry.task_period_max.write(0);

        if target == OpMode::Fault {
            self.status.insert(OpStatus::FAULT_OVERRIDE);
        }

        let mut ok = true;
        if let Some(init) = queue.init {
            ok = init() != 0;
        }

        self.modes.sync();
        self.status.insert(OpStatus::QUEUE_SWITCH);
        ringbuf::ringbuf_entry!(TRACE, Trace::QueueSwitch(target));
        ok
    }

    /// The wind-down sequence, run after the loop stops: capture pending
    /// interrupt/trap status, file the software-reset cause, and count
    /// the attempt against the limit.
    pub fn shutdown(&mut self) -> Shutdown {
        if let Some(capture) = self.hooks.capture_irq_status {
            self.traplog.note(TrapStatus::from_bits_retain(capture()));
        }
        self.traplog.note(TrapStatus::SW_RESET);
        let attempts = self.traplog.bump_reset_count();
        if attempts < self.config.reset_limit {
            ringbuf::ringbuf_entry!(TRACE, Trace::WarmReset(attempts));
            Shutdown::WarmReset
        } else {
            ringbuf::ringbuf_entry!(TRACE, Trace::Halted(attempts));
            Shutdown::Halt
        }
    }

    /// Requests an orderly stop; the current cycle finishes and the loop
    /// falls into wind-down.
    pub fn stop(&mut self) {
        self.run = false;
    }

    pub fn is_running(&self) -> bool {
        self.run
    }

    pub fn mode(&self) -> OpMode {
        self.modes.current()
    }

    pub fn status(&self) -> OpStatus {
        self.status
    }

    pub fn active_index(&self) -> usize {
        self.active.index()
    }

    pub fn active_ubound(&self) -> usize {
        self.active.ubound()
    }

    pub fn active_task_id(&self) -> TaskId {
        self.active.active_task_id()
    }

    /// Execution time of the most recently dispatched task.
    pub fn active_task_time(&self) -> u16 {
        self.active_task_time
    }

    pub fn meter(&self) -> &CpuLoadMeter {
        &self.meter
    }

    pub fn last_deadman(&self) -> u32 {
        self.last_deadman
    }

    /// Root-cause classification of the reset that preceded `start`.
    pub fn reset_class(&self) -> ResetClass {
        self.reset_class
    }

    pub fn task(&self, id: TaskId) -> &Task {
        &self.tasks[id.index()]
    }

    /// Mutable task access for embedder code driving the grid manually,
    /// e.g. to re-enable a quarantined task between cycles.
    pub fn task_mut(&mut self, id: TaskId) -> &mut Task {
        &mut self.tasks[id.index()]
    }

    pub fn os_fault(&self, index: usize) -> &FaultObject {
        &self.os_faults[index]
    }

    pub fn user_fault(&self, index: usize) -> &FaultObject {
        &self.user_faults[index]
    }
}
