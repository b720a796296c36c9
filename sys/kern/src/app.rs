// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Application description.
//!
//! An "application" here is the entire collection of tasks, queues, hooks,
//! and timing constants that customize the generic operating core. All of
//! it is declared statically -- the kernel never allocates and never
//! invents work at runtime -- and handed to the scheduler at construction.

// Re-export ABI types.
pub use abi::*;

/// A task entry point: runs to completion and reports a 16-bit status.
/// Nonzero is success. The failure status is routed into the standard
/// task-execution fault object.
pub type TaskEntry = fn() -> u16;

/// A status-returning hook (mode switch-over, application status capture,
/// user fault trip/reset response). Must be total: there is no unwinding
/// to catch a misbehaving hook.
pub type Hook = fn() -> u16;

/// Record describing a single task.
#[derive(Copy, Clone, Debug)]
pub struct TaskDesc {
    /// This task's id, which must equal its index in the task table.
    pub id: TaskId,
    /// The entry point. `None` makes the slot a placeholder that is
    /// skipped at dispatch, the same way a quarantined task is.
    pub entry: Option<TaskEntry>,
    /// Maximum tolerated execution time in timer ticks. Exceeding it only
    /// flags the task; the hard stop is the rescue window.
    pub time_quota: u16,
    /// Collection of boolean flags controlling task behavior.
    pub flags: TaskFlags,
}

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug)]
    #[repr(transparent)]
    pub struct TaskFlags: u8 {
        /// Task starts out runnable. Clear it to ship a task disarmed and
        /// enable it from a mode switch-over hook.
        const ENABLED = 1 << 0;
        const RESERVED = !1;
    }
}

/// The reserved do-nothing entry for the idle task slot.
pub fn task_idle() -> u16 {
    TASK_OK
}

/// One per-mode task queue: an immutable id sequence scanned one element
/// per tick, plus an optional switch-over hook run once on entry into the
/// mode, before any task of the queue.
#[derive(Copy, Clone, Debug)]
pub struct QueueDesc {
    pub tasks: &'static [TaskId],
    pub init: Option<Hook>,
}

/// The seven per-mode queues of an application.
///
/// The original controller firmware only wires switch-over hooks for the
/// idle/run/fault/standby modes; the three boot-progression queues run
/// exactly once and usually need none, but nothing stops an application
/// from setting them.
#[derive(Copy, Clone, Debug)]
pub struct QueueSet {
    pub boot: QueueDesc,
    pub firmware_init: QueueDesc,
    pub startup_sequence: QueueDesc,
    pub idle: QueueDesc,
    pub run: QueueDesc,
    pub fault: QueueDesc,
    pub standby: QueueDesc,
}

impl QueueSet {
    /// Selects the queue for `mode`. `Unknown` has no queue of its own
    /// and falls back to idle; the mode controller normalizes the mode
    /// word before this matters.
    pub fn for_mode(&self, mode: OpMode) -> &QueueDesc {
        match mode {
            OpMode::Boot => &self.boot,
            OpMode::FirmwareInit => &self.firmware_init,
            OpMode::StartupSequence => &self.startup_sequence,
            OpMode::Idle | OpMode::Unknown => &self.idle,
            OpMode::Run => &self.run,
            OpMode::Fault => &self.fault,
            OpMode::Standby => &self.standby,
        }
    }
}

/// External hooks the scheduler calls on the application's behalf.
#[derive(Copy, Clone, Debug, Default)]
pub struct Hooks {
    /// Invoked once per cycle after dispatch, so application code can
    /// fold system-level state changes into its own status words.
    pub capture_status: Option<Hook>,
    /// Invoked during wind-down to collect pending interrupt/trap status
    /// into the trap log; returns raw `TrapStatus` bits.
    pub capture_irq_status: Option<fn() -> u16>,
}

impl Hooks {
    pub const NONE: Self = Self {
        capture_status: None,
        capture_irq_status: None,
    };
}

/// The fully assembled application, as handed to the scheduler: the
/// statically allocated tables by mutable borrow, the shared cells by
/// static reference.
pub struct App<'s> {
    pub config: SchedulerConfig,
    pub tasks: &'s mut [crate::task::Task],
    pub queues: &'static QueueSet,
    pub os_faults: &'s mut [crate::fault::FaultObject],
    pub user_faults: &'s mut [crate::fault::FaultObject],
    pub telemetry: &'static crate::telemetry::Telemetry,
    pub traplog: &'static crate::traplog::TrapLog,
    pub mode_request: &'static crate::mode::ModeRequest,
    pub hooks: Hooks,
}

/// Compile-time configuration constants of the scheduler.
#[derive(Copy, Clone, Debug)]
pub struct SchedulerConfig {
    /// Timer period of the scheduling grid, in ticks. One task runs per
    /// period.
    pub master_period: u16,
    /// Rescue window armed around every task call, in ticks.
    pub rescue_period: u16,
    /// Calibration: timer ticks consumed by one iteration of the idle
    /// wait loop.
    pub loop_nomblk: u16,
    /// Q16 scale factor turning accumulated idle ticks into per-mille of
    /// one period.
    pub load_factor: u16,
    /// Warm-reset attempts tolerated before the wind-down sequence halts
    /// instead of resetting again.
    pub reset_limit: u16,
    /// CPU load (per-mille) at which the standard load fault object
    /// trips.
    pub cpu_load_warning: u16,
    /// CPU load (per-mille) below which the load fault object resets.
    pub cpu_load_normal: u16,
}

impl SchedulerConfig {
    pub const DEFAULT: Self = Self {
        master_period: 10_000,
        rescue_period: 9_000,
        loop_nomblk: 6,
        load_factor: 655,
        reset_limit: 10,
        cpu_load_warning: 950,
        cpu_load_normal: 900,
    };
}
