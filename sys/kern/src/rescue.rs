// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The rescue seam: how a runaway task gets taken away from the CPU.
//!
//! The contract, independent of platform: a cooperative task whose
//! wall-clock execution exceeds the rescue window is forcibly abandoned,
//! the scheduler's own state is untouched, and the task is reported so the
//! task manager can quarantine it. On the original controller this was a
//! saved-context/jump-past-the-call-site trick in the rescue timer
//! interrupt; that machinery is inherently non-portable, so this crate
//! expresses it as the [`Rescue`] trait and ships two realizations:
//!
//! - [`ThreadRescue`] (hosted): the entry runs on a persistent worker
//!   thread and the scheduler waits with a timeout. On expiry the worker
//!   is detached -- its stack is deliberately leaked for that invocation,
//!   which is exactly the contract -- and a fresh worker is spawned for
//!   the next dispatch.
//! - [`InlineRescue`]: runs the entry inline and never abandons. For task
//!   sets that are trusted to yield; the time-quota fault object still
//!   catches slow tasks after the fact.

use crate::app::TaskEntry;

/// What became of one deadlined task invocation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[must_use]
pub enum RunOutcome {
    /// The entry ran to completion and returned this status.
    Completed(u16),
    /// The rescue window expired (or the invocation was otherwise lost).
    /// The caller must quarantine the task.
    Abandoned,
}

/// Platform capability for running a task entry under a deadline.
pub trait Rescue {
    fn run_deadlined(&mut self, entry: TaskEntry) -> RunOutcome;
}

/// Runs entries inline with no enforcement.
#[derive(Copy, Clone, Debug, Default)]
pub struct InlineRescue;

impl Rescue for InlineRescue {
    fn run_deadlined(&mut self, entry: TaskEntry) -> RunOutcome {
        RunOutcome::Completed(entry())
    }
}

cfg_if::cfg_if! {
    if #[cfg(not(target_os = "none"))] {
        use std::sync::mpsc;
        use std::thread;
        use std::time::Duration;

        /// Hosted rescue realization: a detached worker thread plus a
        /// receive timeout.
        pub struct ThreadRescue {
            window: Duration,
            worker: Option<Worker>,
        }

        struct Worker {
            jobs: mpsc::Sender<TaskEntry>,
            results: mpsc::Receiver<u16>,
        }

        impl Worker {
            fn spawn() -> Self {
                let (jobs, job_rx) = mpsc::channel::<TaskEntry>();
                let (result_tx, results) = mpsc::channel();
                thread::Builder::new()
                    .name("rescue-worker".to_string())
                    .spawn(move || {
                        for entry in job_rx {
                            let status = entry();
                            // An abandoned worker finds its receiver gone
                            // when the stuck task finally returns; exit.
                            if result_tx.send(status).is_err() {
                                break;
                            }
                        }
                    })
                    .expect("spawning rescue worker");
                Self { jobs, results }
            }
        }

        impl ThreadRescue {
            /// `window` is the wall-clock rendition of the rescue period.
            /// The tick-to-duration mapping belongs to the embedder.
            pub fn new(window: Duration) -> Self {
                Self {
                    window,
                    worker: None,
                }
            }
        }

        impl Rescue for ThreadRescue {
            fn run_deadlined(&mut self, entry: TaskEntry) -> RunOutcome {
                let sent = match &self.worker {
                    Some(w) => w.jobs.send(entry).is_ok(),
                    None => false,
                };
                if !sent {
                    // No worker, or the previous one died (a panicking
                    // entry takes its worker with it). Start fresh.
                    let w = Worker::spawn();
                    if w.jobs.send(entry).is_err() {
                        return RunOutcome::Abandoned;
                    }
                    self.worker = Some(w);
                }
                let w = match &self.worker {
                    Some(w) => w,
                    None => return RunOutcome::Abandoned,
                };
                match w.results.recv_timeout(self.window) {
                    Ok(status) => RunOutcome::Completed(status),
                    Err(_) => {
                        // Timeout (or the entry panicked mid-run). The
                        // invocation is lost; detach the worker and leak
                        // its stack for this run.
                        self.worker = None;
                        RunOutcome::Abandoned
                    }
                }
            }
        }
    }
}
