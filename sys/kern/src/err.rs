// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common error-handling support.
//!
//! Nothing in this kernel unwinds: every failure either becomes a status
//! bit that a fault descriptor watches, or a `KernError` that the caller
//! folds into the cycle's component-check result. The enum stays small on
//! purpose; rich diagnosis happens through the trace buffer and the fault
//! engine, not through error payloads.

/// Failures internal to the kernel.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum KernError {
    /// A fault descriptor is enabled but cannot be evaluated (no source,
    /// or compare kind `None`). The descriptor is skipped.
    MalformedFault,
    /// The trap-log persistence image could not be encoded or decoded.
    Persist,
}
