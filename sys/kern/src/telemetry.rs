// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The kernel telemetry block.
//!
//! A small, statically allocated set of 16-bit cells the scheduler
//! publishes into once per cycle. This is what makes the standard fault
//! objects possible: they are ordinary data-driven descriptors whose
//! observables happen to point here. Applications and communication
//! stacks may read these cells freely; the scheduler is the only writer.

use crate::obs::ObsCell;

pub struct Telemetry {
    /// CPU load of the most recent cycle, in per-mille of one period.
    pub cpu_load: ObsCell,
    /// Sticky OR-accumulated load maximum; consumed (cleared) by the
    /// fault scan each cycle.
    pub cpu_load_max: ObsCell,
    /// Return status of the most recently dispatched task.
    pub active_retval: ObsCell,
    /// Longest task execution time observed since the last queue switch.
    pub task_period_max: ObsCell,
    /// Mirror of the scheduler status word (`abi::OpStatus` bits).
    pub status: ObsCell,
    /// Diagnostic process code of the most recent dispatch
    /// (`abi::ProcessCode`).
    pub proc_code: ObsCell,
}

impl Telemetry {
    pub const fn new() -> Self {
        Self {
            cpu_load: ObsCell::new(0),
            cpu_load_max: ObsCell::new(0),
            active_retval: ObsCell::new(0),
            task_period_max: ObsCell::new(0),
            status: ObsCell::new(0),
            proc_code: ObsCell::new(0),
        }
    }
}
