// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Core ABI definitions, shared between the kernel and applications.
//!
//! Everything in this crate is part of the vocabulary an application uses to
//! describe itself to the kernel (task ids, operating modes, fault classes)
//! or that external tooling uses to interpret kernel state (the scheduler
//! status word, the trap log). Bit positions are stable only where a type is
//! explicitly a boundary format (`TrapLogImage`, `TrapStatus`,
//! `ProcessCode`); everything else is free to be rearranged.

#![no_std]

use serde::{Deserialize, Serialize};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Status value a task entry (or hook) returns to report success. Any
/// nonzero value counts as success; zero is failure.
pub const TASK_OK: u16 = 1;

/// Names a task by its index in the application's task table.
///
/// Task ids are small and dense: the id *is* the table index. Queues refer
/// to tasks by id, and the same id may appear in any number of queues.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TaskId(pub u16);

impl TaskId {
    /// The reserved do-nothing task. Index 0 of every task table holds a
    /// task that does no work and returns success, so that a queue can
    /// always schedule at least one harmless tick.
    pub const IDLE: Self = Self(0);

    /// Extracts the table index for this id.
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

/// Operating modes of the scheduler.
///
/// Each mode owns one task queue. The first four modes form a one-shot
/// boot progression (each queue runs exactly one full pass before the
/// scheduler moves on); the rest are steady states entered on request or in
/// response to faults.
///
/// The discriminants are stable because the mode is exported in the
/// diagnostic process code and can be requested through a `ModeRequest`
/// cell as a raw byte.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[repr(u8)]
pub enum OpMode {
    /// No mode has been established. Only observed before the first cycle
    /// or if something has scribbled on the mode word; the controller
    /// restarts the progression from here.
    Unknown = 0,
    Boot = 1,
    FirmwareInit = 2,
    StartupSequence = 3,
    Idle = 4,
    Run = 5,
    Fault = 6,
    Standby = 7,
}

impl OpMode {
    /// Recovers a mode from its raw discriminant, for values that came
    /// through a shared cell.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Unknown),
            1 => Some(Self::Boot),
            2 => Some(Self::FirmwareInit),
            3 => Some(Self::StartupSequence),
            4 => Some(Self::Idle),
            5 => Some(Self::Run),
            6 => Some(Self::Fault),
            7 => Some(Self::Standby),
            _ => None,
        }
    }
}

bitflags::bitflags! {
    /// The scheduler status word.
    ///
    /// This is the 16-bit summary of the most recent cycle, mirrored into
    /// the kernel telemetry block where fault descriptors (and external
    /// telemetry) can watch it.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
    #[repr(transparent)]
    pub struct OpStatus: u16 {
        /// Set for exactly one queue pass after a queue switch.
        const QUEUE_SWITCH = 1 << 0;
        /// The boot progression has finished; set when STARTUP_SEQUENCE
        /// hands over to IDLE and never cleared while the system stays up.
        const STARTUP_SEQUENCE_COMPLETE = 1 << 1;
        /// A critical fault has forced the scheduler into FAULT mode.
        const FAULT_OVERRIDE = 1 << 2;
        /// The master period elapsed while the most recent task was still
        /// running; its measured time includes the overrun correction.
        const PERIOD_OVERRUN = 1 << 3;
        /// The rescue window expired and the most recent task was
        /// abandoned and quarantined.
        const RESCUE_TIMER_OVERRUN = 1 << 4;
        /// Every step of the most recent cycle reported success. Cleared
        /// when any internal component returns a failure status.
        const OS_COMPONENT_CHECK = 1 << 5;
        /// At least one fault object of any class is currently latched.
        const GLOBAL_FAULT = 1 << 6;
        /// At least one warning-or-worse fault object is currently latched.
        const GLOBAL_WARNING = 1 << 7;
    }
}

bitflags::bitflags! {
    /// Fault class bits of a fault object, determining the system-level
    /// response when the object trips.
    ///
    /// The `USER` bit composes with the others: it requests the object's
    /// trip/reset callbacks in addition to (not instead of) whatever
    /// response the remaining bits select. Its position matches the
    /// original controller firmware's class word.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
    #[repr(transparent)]
    pub struct FaultClasses: u16 {
        /// Notification only: sets the global fault flag.
        const FLAG = 1 << 0;
        /// Sets the global warning flag in addition to the fault flag.
        const WARNING = 1 << 1;
        /// Forces a transition into FAULT mode.
        const CRITICAL = 1 << 2;
        /// Stops the scheduler and requests a warm CPU reset.
        const CATASTROPHIC = 1 << 3;
        /// Invoke the object's user trip/reset callbacks on edges.
        const USER = 1 << 8;
    }
}

bitflags::bitflags! {
    /// System level on which a fault condition lives. Purely descriptive;
    /// carried through to telemetry so a fault code can be attributed to
    /// board, firmware, silicon, or system-parameter causes.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
    #[repr(transparent)]
    pub struct FaultLevels: u16 {
        const HW = 1 << 0;
        const SW = 1 << 1;
        const SI = 1 << 2;
        const SYS = 1 << 3;
    }
}

/// Comparison a fault object applies between its (masked) source reading
/// and its trip/reset references.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum CompareKind {
    /// No comparison. An enabled descriptor with this kind is malformed.
    None,
    GreaterThan,
    LessThan,
    Equal,
    NotEqual,
    /// Trips while `reset_level <= s <= trip_level`.
    InRange,
    /// Trips while `s < reset_level || s > trip_level`.
    OutOfRange,
    /// Trips while the masked source is nonzero.
    Boolean,
}

bitflags::bitflags! {
    /// Reset-cause bits of the trap log status word.
    ///
    /// The layout mirrors the target's reset-configuration register so the
    /// persisted image can be compared against captured hardware state.
    /// The classification masks below group the causes; review them per
    /// target.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
    #[repr(transparent)]
    pub struct TrapStatus: u16 {
        const POWER_ON = 1 << 0;
        const BROWN_OUT = 1 << 1;
        const WAKE_FROM_IDLE = 1 << 2;
        const WAKE_FROM_SLEEP = 1 << 3;
        const WATCHDOG = 1 << 4;
        /// Reset initiated by the scheduler wind-down sequence.
        const SW_RESET = 1 << 6;
        const EXTERNAL = 1 << 7;
        const CONFIG_MISMATCH = 1 << 9;
        const ILLEGAL_ADDRESS = 1 << 14;
        const TRAP_CONFLICT = 1 << 15;
    }
}

/// Reset causes classified as a normal start (power-on and wake paths).
pub const RESET_CLASS_NORMAL: u16 = 0x000F;
/// Reset causes classified as involuntary but survivable (external reset,
/// software-commanded restart).
pub const RESET_CLASS_WARNING: u16 = 0x00C0;
/// Reset causes classified as critical (traps, watchdog, configuration
/// corruption).
pub const RESET_CLASS_CRITICAL: u16 = 0xC210;

/// Trap-log bits that the standard CPU-failure fault object watches; any
/// of these latching means the previous incarnation went down hard.
pub const CPU_RESET_TRIGGER: u16 = RESET_CLASS_CRITICAL;

/// Classification of the previous reset's root cause, derived from
/// `TrapStatus` using the class masks.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ResetClass {
    Normal,
    Warning,
    Critical,
}

/// Diagnostic process code: the operating mode in the high byte and the
/// task id about to run in the low byte. Captured before each dispatch so
/// that a hang or trap can be attributed to a specific (mode, task) pair.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ProcessCode(pub u16);

impl ProcessCode {
    pub fn new(mode: OpMode, task: TaskId) -> Self {
        Self((mode as u16) << 8 | (task.0 & 0xFF))
    }

    pub fn op_mode(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn task_id(self) -> u8 {
        self.0 as u8
    }
}

/// The persisted form of the trap log: the reset-cause status word and the
/// running count of software reset attempts.
///
/// This struct is a boundary format. It round-trips through `ssmarshal`
/// for storage and derives the zerocopy traits so tooling can overlay a
/// captured memory image directly.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    Eq,
    PartialEq,
    Serialize,
    Deserialize,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
)]
#[repr(C)]
pub struct TrapLogImage {
    /// Raw `TrapStatus` bits.
    pub status: u16,
    /// Number of software-initiated warm resets since the log was last
    /// cleared.
    pub reset_count: u16,
}

static_assertions::const_assert_eq!(core::mem::size_of::<TrapLogImage>(), 4);

/// Project-wide error codes carried by the standard fault objects. User
/// fault objects should allocate codes outside the `0x9000` block.
pub mod errcode {
    /// The trap log recorded a critical reset cause.
    pub const CPU_FAILURE: u32 = 0x9001;
    /// The CPU-load meter breached the warning threshold.
    pub const CPU_LOAD_OVERRUN: u32 = 0x9002;
    /// A task returned a failure status.
    pub const TASK_EXECUTION_FAILURE: u32 = 0x9003;
    /// A task's measured period exceeded the master period.
    pub const TASK_TIME_QUOTA_VIOLATION: u32 = 0x9004;
    /// A step inside the scheduler cycle reported failure.
    pub const OS_COMPONENT_FAILURE: u32 = 0x9005;
}
