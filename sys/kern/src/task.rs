// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of tasks: runtime state, queue position, and the
//! deadlined dispatch with execution-time measurement.

use crate::app::{TaskDesc, TaskFlags, TaskId};
use crate::rescue::{Rescue, RunOutcome};
use crate::time::Timebase;

/// Runtime state of one task.
///
/// The fields are private so the timing bookkeeping can't drift: the
/// dispatch path is the only writer of the measurement fields, and only
/// `quarantine`/`set_enabled` touch runnability.
#[derive(Debug)]
pub struct Task {
    descriptor: &'static TaskDesc,
    enabled: bool,
    /// Most recent measured execution time, in timer ticks.
    last_period: u16,
    /// Running maximum since the last queue switch.
    period_max: u16,
    /// Most recent return status.
    return_value: u16,
    /// The task exceeded its descriptor's time quota at least once since
    /// the last queue switch.
    quota_violation: bool,
}

impl Task {
    /// Creates a `Task` in its initial state, filling in fields from
    /// `descriptor`.
    pub fn from_descriptor(descriptor: &'static TaskDesc) -> Self {
        Task {
            descriptor,
            enabled: descriptor.flags.contains(TaskFlags::ENABLED),
            last_period: 0,
            period_max: 0,
            return_value: 0,
            quota_violation: false,
        }
    }

    pub fn descriptor(&self) -> &'static TaskDesc {
        self.descriptor
    }

    /// Checks whether dispatch will invoke this task.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Marks the task unrunnable. The dispatch path calls this when the
    /// rescue window expires; the task stays out of rotation until a
    /// switch-over hook (or other application code) re-enables it.
    pub fn quarantine(&mut self) {
        self.enabled = false;
    }

    pub fn set_enabled(&mut self, on: bool) {
        self.enabled = on;
    }

    /// Clears the measurement fields. Runnability is deliberately left
    /// alone; a quarantined task stays quarantined across queue switches
    /// unless a hook decides otherwise.
    pub fn reset_stats(&mut self) {
        self.last_period = 0;
        self.period_max = 0;
        self.return_value = 0;
        self.quota_violation = false;
    }

    pub fn last_period(&self) -> u16 {
        self.last_period
    }

    pub fn period_max(&self) -> u16 {
        self.period_max
    }

    pub fn return_value(&self) -> u16 {
        self.return_value
    }

    pub fn quota_violation(&self) -> bool {
        self.quota_violation
    }

    fn note_return(&mut self, status: u16) {
        self.return_value = status;
    }

    fn note_time(&mut self, elapsed: u16) {
        self.last_period = elapsed;
        if elapsed > self.period_max {
            self.period_max = elapsed;
        }
        if elapsed > self.descriptor.time_quota {
            self.quota_violation = true;
        }
    }
}

/// Position within the currently selected task queue.
#[derive(Copy, Clone, Debug)]
pub struct ActiveQueue {
    tasks: &'static [TaskId],
    index: usize,
}

impl ActiveQueue {
    /// Starts at the head of `tasks`, which must be non-empty -- every
    /// queue can schedule at least the idle task.
    pub fn new(tasks: &'static [TaskId]) -> Self {
        assert!(!tasks.is_empty());
        Self { tasks, index: 0 }
    }

    pub fn size(&self) -> usize {
        self.tasks.len()
    }

    /// Highest valid index.
    pub fn ubound(&self) -> usize {
        self.tasks.len() - 1
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn active_task_id(&self) -> TaskId {
        self.tasks[self.index]
    }

    /// True when the next advance would step past the end of the queue,
    /// which is where the mode-transition check runs.
    pub fn at_rollover(&self) -> bool {
        self.index + 1 > self.ubound()
    }

    pub fn advance(&mut self) {
        self.index += 1;
    }

    pub fn rewind(&mut self) {
        self.index = 0;
    }

    pub fn ids(&self) -> &'static [TaskId] {
        self.tasks
    }
}

/// Everything the scheduler wants to know about one dispatch.
#[derive(Copy, Clone, Debug)]
pub struct Dispatch {
    pub task_id: TaskId,
    /// Measured execution time in timer ticks (0 if measurement failed).
    pub elapsed: u16,
    pub return_value: u16,
    /// The master period elapsed during the task; `elapsed` was
    /// reassembled across the wrap.
    pub period_overrun: bool,
    /// The rescue window expired and the task was quarantined.
    pub abandoned: bool,
    /// The stop timestamp made sense relative to the start timestamp.
    pub measurement_ok: bool,
}

/// Invokes the active task of `queue` under the rescue window, measuring
/// its execution time against the timer.
///
/// The sequence matters and mirrors the grid the whole core is built on:
/// capture start time, arm rescue, invoke (skipping disabled or empty
/// slots), disarm rescue, restore the master period, capture stop time,
/// then reconstruct the elapsed time -- including the single-wrap horizon
/// where the period expired mid-task, in which case the result saturates
/// at the 16-bit limit.
pub fn dispatch_one(
    tasks: &mut [Task],
    queue: &ActiveQueue,
    timebase: &mut impl Timebase,
    rescue: &mut impl Rescue,
    master_period: u16,
    rescue_period: u16,
) -> Dispatch {
    let id = queue.active_task_id();
    let task = &mut tasks[id.index()];

    let t_start = timebase.now();
    timebase.arm_rescue(rescue_period);

    let mut return_value = 0;
    let mut abandoned = false;
    if task.enabled() {
        if let Some(entry) = task.descriptor.entry {
            match rescue.run_deadlined(entry) {
                RunOutcome::Completed(status) => return_value = status,
                RunOutcome::Abandoned => {
                    abandoned = true;
                    task.quarantine();
                }
            }
        }
    }

    timebase.disarm_rescue();
    timebase.set_period(master_period);
    let t_stop = timebase.now();

    task.note_return(return_value);

    let mut measurement_ok = true;
    let mut period_overrun = false;
    let elapsed;
    if timebase.tick_pending() {
        // The timer wrapped while the task ran. Assuming it wrapped only
        // once (the status horizon), the time is the tail of the old
        // period plus the progress into the new one.
        period_overrun = true;
        let total = u32::from(master_period)
            .saturating_sub(t_stop)
            .saturating_add(t_start);
        elapsed = total.min(0xFFFF) as u16;
    } else if t_stop > t_start {
        elapsed = (t_stop - t_start).min(0xFFFF) as u16;
    } else {
        // The counter did not move; nothing sensible to record.
        measurement_ok = false;
        elapsed = 0;
    }

    task.note_time(elapsed);

    Dispatch {
        task_id: id,
        elapsed,
        return_value,
        period_overrun,
        abandoned,
        measurement_ok,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::TASK_OK;
    use crate::rescue::InlineRescue;
    use crate::time::{SimState, SimTimebase};

    /// Timebase whose counter readings are scripted, for exact control of
    /// the measurement math.
    struct ScriptTimebase {
        readings: Vec<u32>,
        next: usize,
        pending: bool,
    }

    impl ScriptTimebase {
        fn new(readings: &[u32], pending: bool) -> Self {
            Self {
                readings: readings.to_vec(),
                next: 0,
                pending,
            }
        }
    }

    impl Timebase for ScriptTimebase {
        fn now(&mut self) -> u32 {
            let v = self.readings[self.next];
            self.next += 1;
            v
        }
        fn set_period(&mut self, _ticks: u16) {}
        fn arm_rescue(&mut self, _ticks: u16) {}
        fn disarm_rescue(&mut self) {}
        fn tick_pending(&self) -> bool {
            self.pending
        }
        fn clear_tick(&mut self) {}
    }

    fn desc(id: u16, entry: Option<fn() -> u16>, quota: u16) -> TaskDesc {
        TaskDesc {
            id: TaskId(id),
            entry,
            time_quota: quota,
            flags: TaskFlags::ENABLED,
        }
    }

    fn leak<T>(v: T) -> &'static T {
        Box::leak(Box::new(v))
    }

    #[test]
    fn measures_a_simulated_task() {
        static SIM: SimState = SimState::new(1, 1000);
        fn busy() -> u16 {
            SIM.advance(300);
            TASK_OK
        }
        let d = leak(desc(0, Some(busy), 500));
        let mut tasks = [Task::from_descriptor(d)];
        let queue = ActiveQueue::new(leak([TaskId(0)]).as_slice());
        let mut tb = SimTimebase::new(&SIM);
        let mut rescue = InlineRescue;

        let r = dispatch_one(&mut tasks, &queue, &mut tb, &mut rescue, 1000, 900);
        // t_start = 1, task advances 300, t_stop = 302.
        assert_eq!(r.elapsed, 301);
        assert!(!r.period_overrun);
        assert!(r.measurement_ok);
        assert_eq!(r.return_value, TASK_OK);
        assert_eq!(tasks[0].last_period(), 301);
        assert_eq!(tasks[0].period_max(), 301);
        assert!(!tasks[0].quota_violation());
    }

    #[test]
    fn overrun_reassembles_across_the_wrap() {
        // Start reading 990, stop reading 30, with the tick pending:
        // elapsed = (1000 - 30) + 990 = 1960.
        let d = leak(desc(0, None, 100));
        let mut tasks = [Task::from_descriptor(d)];
        let queue = ActiveQueue::new(leak([TaskId(0)]).as_slice());
        let mut tb = ScriptTimebase::new(&[990, 30], true);
        let mut rescue = InlineRescue;

        let r = dispatch_one(&mut tasks, &queue, &mut tb, &mut rescue, 1000, 900);
        assert!(r.period_overrun);
        assert_eq!(r.elapsed, 1960);
    }

    #[test]
    fn overrun_saturates_at_sixteen_bits() {
        let d = leak(desc(0, None, 100));
        let mut tasks = [Task::from_descriptor(d)];
        let queue = ActiveQueue::new(leak([TaskId(0)]).as_slice());
        let mut tb = ScriptTimebase::new(&[65_534, 1], true);
        let mut rescue = InlineRescue;

        let r =
            dispatch_one(&mut tasks, &queue, &mut tb, &mut rescue, 65_535, 900);
        assert!(r.period_overrun);
        assert_eq!(r.elapsed, 0xFFFF);
    }

    #[test]
    fn stalled_counter_fails_the_measurement() {
        let d = leak(desc(0, None, 100));
        let mut tasks = [Task::from_descriptor(d)];
        let queue = ActiveQueue::new(leak([TaskId(0)]).as_slice());
        let mut tb = ScriptTimebase::new(&[5, 5], false);
        let mut rescue = InlineRescue;

        let r = dispatch_one(&mut tasks, &queue, &mut tb, &mut rescue, 1000, 900);
        assert!(!r.measurement_ok);
        assert_eq!(r.elapsed, 0);
    }

    #[test]
    fn disabled_task_is_skipped() {
        static SIM: SimState = SimState::new(1, 1000);
        fn never() -> u16 {
            panic!("disabled task must not run");
        }
        let d = leak(desc(0, Some(never), 100));
        let mut tasks = [Task::from_descriptor(d)];
        tasks[0].quarantine();
        let queue = ActiveQueue::new(leak([TaskId(0)]).as_slice());
        let mut tb = SimTimebase::new(&SIM);
        let mut rescue = InlineRescue;

        let r = dispatch_one(&mut tasks, &queue, &mut tb, &mut rescue, 1000, 900);
        assert!(!r.abandoned);
        // A skipped slot reports the failure status.
        assert_eq!(r.return_value, 0);
    }

    #[test]
    fn quota_violation_is_sticky_until_stats_reset() {
        static SIM: SimState = SimState::new(1, 10_000);
        fn slow() -> u16 {
            SIM.advance(700);
            TASK_OK
        }
        let d = leak(desc(0, Some(slow), 500));
        let mut tasks = [Task::from_descriptor(d)];
        let queue = ActiveQueue::new(leak([TaskId(0)]).as_slice());
        let mut tb = SimTimebase::new(&SIM);
        let mut rescue = InlineRescue;

        let r =
            dispatch_one(&mut tasks, &queue, &mut tb, &mut rescue, 10_000, 900);
        assert!(r.elapsed > 500);
        assert!(tasks[0].quota_violation());

        tasks[0].reset_stats();
        assert!(!tasks[0].quota_violation());
        assert_eq!(tasks[0].period_max(), 0);
        // Runnability survives the stats reset.
        assert!(tasks[0].enabled());
    }

    #[test]
    fn queue_position_walks_and_rolls_over() {
        let ids = leak([TaskId(0), TaskId(1), TaskId(2)]);
        let mut q = ActiveQueue::new(ids.as_slice());
        assert_eq!(q.ubound(), 2);
        assert!(!q.at_rollover());
        q.advance();
        q.advance();
        assert_eq!(q.active_task_id(), TaskId(2));
        assert!(q.at_rollover());
        q.rewind();
        assert_eq!(q.index(), 0);
    }
}
