// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The cadence operating core.
//!
//! This is the application-independent part of a small cooperative
//! control system: a grid-locked scheduler that runs one task per timer
//! tick, a mode controller with one task queue per operating mode, a
//! CPU-load meter built out of the idle wait itself, a rescue mechanism
//! that abandons and quarantines a runaway task, and a data-driven
//! fault-object engine that turns declarative descriptors into class-coded
//! responses.
//!
//! # Design principles
//!
//! While this isn't a *deeply* principled kernel, there are some basic
//! ideas that appear consistently.
//!
//! 1. Static configuration. The task table, the queues, and the fault
//!    descriptors take a single shape specified at build time; nothing is
//!    allocated and no work is invented at runtime.
//! 2. One owner. The [`sched::Scheduler`] owns every piece of mutable
//!    kernel state and borrows the statically allocated tables; the only
//!    state shared with other contexts is a handful of atomic 16-bit
//!    cells.
//! 3. Data over code. Fault handling is descriptor evaluation, not a web
//!    of callbacks; the standard kernel faults are ordinary descriptors
//!    pointed at the telemetry block.
//! 4. Hosted-testable. The hardware seams (timer, rescue, watchdog) are
//!    small traits with deterministic simulations behind them, so every
//!    scheduling and fault-filter property can be exercised with `cargo
//!    test` on a workstation.

#![cfg_attr(target_os = "none", no_std)]

pub mod app;
pub mod err;
pub mod fault;
pub mod mode;
pub mod obs;
pub mod rescue;
pub mod sched;
pub mod task;
pub mod telemetry;
pub mod time;
pub mod traplog;
