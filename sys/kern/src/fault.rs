// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The fault-object engine.
//!
//! A fault object is a declarative description of one condition worth
//! watching: where to read a 16-bit quantity, how to compare it, how many
//! consecutive observations it takes to believe the result (hysteresis),
//! and what class of response a confirmed fault deserves. The engine walks
//! the descriptor lists once per scheduler cycle and turns readings into
//! edges; everything else in the system reacts to those edges.
//!
//! Two lists exist: the kernel's own descriptors (built by
//! [`os_fault_objects`]) and the application's, scanned strictly in that
//! order.
//!
//! ## Latching
//!
//! `fault_active` follows the filtered condition. `fault_status` latches
//! at the trip edge and stays set until the reset streak completes (or
//! someone calls [`FaultObject::clear`]), even if the raw condition
//! bounces. A *trip edge* requires `trip_count` consecutive trip
//! observations; a *reset edge* requires `reset_count` consecutive reset
//! observations. An observation in the dead band between the two
//! conditions leaves the filter counter untouched; an observation that
//! contradicts an incomplete streak restarts it.

use crate::app::{Hook, SchedulerConfig};
use crate::err::KernError;
use crate::obs::Observable;
use crate::telemetry::Telemetry;
use crate::traplog::TrapLog;
use abi::{errcode, CompareKind, FaultClasses, FaultLevels, OpStatus};

ringbuf::ringbuf!(TRACE, Trace, 32);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Trace {
    TripEdge(u16),
    ResetEdge(u16),
}

/// Static description of one fault object.
#[derive(Copy, Clone, Debug)]
pub struct FaultConfig {
    /// Identifier reported in the trace buffer.
    pub id: u16,
    /// Project-wide 32-bit error code for telemetry.
    pub error_code: u32,
    /// The monitored quantity. An enabled descriptor without one is
    /// malformed.
    pub source: Option<Observable>,
    /// AND mask applied to the source reading.
    pub source_mask: u16,
    /// Optional second observable; when present, its masked reading
    /// replaces both threshold constants.
    pub compare: Option<Observable>,
    pub compare_mask: u16,
    pub compare_kind: CompareKind,
    pub trip_level: u16,
    pub reset_level: u16,
    /// Consecutive trip observations required for a trip edge.
    pub trip_count: u16,
    /// Consecutive reset observations required for a reset edge.
    pub reset_count: u16,
    pub classes: FaultClasses,
    pub levels: FaultLevels,
    /// Run at the trip edge when the `USER` class bit is set.
    pub on_trip: Option<Hook>,
    /// Run at the reset edge when the `USER` class bit is set.
    pub on_reset: Option<Hook>,
}

impl FaultConfig {
    /// Starting point for descriptor literals; fill in what the fault
    /// actually watches.
    pub const EMPTY: Self = Self {
        id: 0,
        error_code: 0,
        source: None,
        source_mask: 0xFFFF,
        compare: None,
        compare_mask: 0xFFFF,
        compare_kind: CompareKind::None,
        trip_level: 0,
        reset_level: 0,
        trip_count: 1,
        reset_count: 1,
        classes: FaultClasses::empty(),
        levels: FaultLevels::empty(),
        on_trip: None,
        on_reset: None,
    };
}

/// Direction of a confirmed state change.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Edge {
    Trip,
    Reset,
}

/// One fault object: configuration plus filter state.
#[derive(Debug)]
pub struct FaultObject {
    config: FaultConfig,
    enabled: bool,
    fault_status: bool,
    fault_active: bool,
    counter: u16,
}

impl FaultObject {
    /// Creates an object in the untripped state.
    pub fn new(config: FaultConfig) -> Self {
        Self {
            config,
            enabled: true,
            fault_status: false,
            fault_active: false,
            counter: 0,
        }
    }

    /// Creates an object latched from the start. The kernel's own
    /// descriptors use this fail-safe default: the first scan either
    /// confirms the fault or walks the latch back through a normal reset
    /// edge.
    pub fn failsafe(config: FaultConfig) -> Self {
        Self {
            config,
            enabled: true,
            fault_status: true,
            fault_active: true,
            counter: 0,
        }
    }

    pub fn config(&self) -> &FaultConfig {
        &self.config
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Disables or re-enables evaluation. A disabled descriptor is not
    /// evaluated and its state is not touched.
    pub fn set_enabled(&mut self, on: bool) {
        self.enabled = on;
    }

    /// True while the latched fault is set.
    pub fn fault_status(&self) -> bool {
        self.fault_status
    }

    /// True while the filtered condition is present.
    pub fn fault_active(&self) -> bool {
        self.fault_active
    }

    pub fn counter(&self) -> u16 {
        self.counter
    }

    /// Drops the latch and the filter state without waiting for the reset
    /// streak.
    pub fn clear(&mut self) {
        self.fault_status = false;
        self.fault_active = false;
        self.counter = 0;
    }

    /// Runs one evaluation, returning the edge if this observation
    /// completed a streak.
    fn evaluate(&mut self) -> Result<Option<Edge>, KernError> {
        let cfg = &self.config;
        let source = cfg.source.ok_or(KernError::MalformedFault)?;
        if cfg.compare_kind == CompareKind::None {
            return Err(KernError::MalformedFault);
        }
        let s = source.read_masked(cfg.source_mask);
        // A live compare reference replaces both threshold constants.
        let (trip_ref, reset_ref) = match cfg.compare {
            Some(cmp) => {
                let v = cmp.read_masked(cfg.compare_mask);
                (v, v)
            }
            None => (cfg.trip_level, cfg.reset_level),
        };

        let (trip, reset) = match cfg.compare_kind {
            CompareKind::None => (false, false),
            CompareKind::GreaterThan => (s > trip_ref, s <= reset_ref),
            CompareKind::LessThan => (s < trip_ref, s >= reset_ref),
            CompareKind::Equal => (s == trip_ref, s != reset_ref),
            CompareKind::NotEqual => (s != trip_ref, s == reset_ref),
            CompareKind::InRange => {
                let inside = reset_ref <= s && s <= trip_ref;
                (inside, !inside)
            }
            CompareKind::OutOfRange => {
                let inside = reset_ref <= s && s <= trip_ref;
                (!inside, inside)
            }
            CompareKind::Boolean => (s != 0, s == 0),
        };

        let mut edge = None;
        if trip {
            if self.fault_status {
                // Still faulted; any progress toward a reset is undone.
                self.fault_active = true;
                self.counter = cfg.reset_count;
            } else {
                if self.counter < cfg.trip_count {
                    self.counter += 1;
                }
                if self.counter >= cfg.trip_count {
                    self.fault_active = true;
                    self.fault_status = true;
                    // The reset streak starts from the full count.
                    self.counter = cfg.reset_count;
                    edge = Some(Edge::Trip);
                }
            }
        } else if reset {
            if self.fault_status {
                if self.counter > 0 {
                    self.counter -= 1;
                }
                if self.counter == 0 {
                    self.fault_active = false;
                    self.fault_status = false;
                    edge = Some(Edge::Reset);
                }
            } else {
                // Healthy and observed healthy; any partial trip streak
                // is forgotten.
                self.fault_active = false;
                self.counter = 0;
            }
        }
        // Neither condition: dead band, the filter holds its state.

        Ok(edge)
    }
}

/// System-level response selected from one scan's trip edges, in
/// precedence order.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FaultAction {
    None,
    /// Set the global notification flag.
    Notify,
    /// Set the global warning flag.
    Warn,
    /// Force the scheduler into FAULT mode.
    EnterFault,
    /// Stop the scheduler and request a warm reset.
    Shutdown,
}

/// Result of a full scan.
#[derive(Copy, Clone, Debug)]
pub struct ScanResult {
    /// Classes of the descriptors that tripped during this scan.
    pub edges: FaultClasses,
    /// Classes of every descriptor currently latched, for the global
    /// status flags (a reset edge retracts its contribution here).
    pub latched: FaultClasses,
    /// False if any enabled descriptor was malformed or a user callback
    /// reported failure.
    pub ok: bool,
}

impl ScanResult {
    /// Collapses the trip-edge bitmap to a single action.
    pub fn action(&self) -> FaultAction {
        if self.edges.contains(FaultClasses::CATASTROPHIC) {
            FaultAction::Shutdown
        } else if self.edges.contains(FaultClasses::CRITICAL) {
            FaultAction::EnterFault
        } else if self.edges.contains(FaultClasses::WARNING) {
            FaultAction::Warn
        } else if self.edges.contains(FaultClasses::FLAG) {
            FaultAction::Notify
        } else {
            FaultAction::None
        }
    }
}

/// Walks both descriptor lists, kernel list first, and evaluates every
/// enabled descriptor.
pub fn scan_all(
    os_list: &mut [FaultObject],
    user_list: &mut [FaultObject],
) -> ScanResult {
    let mut result = ScanResult {
        edges: FaultClasses::empty(),
        latched: FaultClasses::empty(),
        ok: true,
    };

    for obj in os_list.iter_mut().chain(user_list.iter_mut()) {
        if !obj.enabled {
            continue;
        }
        let edge = match obj.evaluate() {
            Ok(edge) => edge,
            Err(_) => {
                result.ok = false;
                continue;
            }
        };
        let user = obj.config.classes.contains(FaultClasses::USER);
        match edge {
            Some(Edge::Trip) => {
                ringbuf::ringbuf_entry!(TRACE, Trace::TripEdge(obj.config.id));
                result.edges |= obj.config.classes;
                if user {
                    if let Some(f) = obj.config.on_trip {
                        result.ok &= f() != 0;
                    }
                }
            }
            Some(Edge::Reset) => {
                ringbuf::ringbuf_entry!(TRACE, Trace::ResetEdge(obj.config.id));
                if user {
                    if let Some(f) = obj.config.on_reset {
                        result.ok &= f() != 0;
                    }
                }
            }
            None => (),
        }
        if obj.fault_status {
            result.latched |= obj.config.classes;
        }
    }

    result
}

/// Builds the kernel's standard fault objects, watching the telemetry
/// block and the trap log. List order is load-bearing: it is the order
/// the scan visits them.
///
/// `on_cpu_failure` is wired as the user trip response of the CPU-failure
/// object, typically an application shutdown-and-safe-state routine that
/// runs before the catastrophic class stops the scheduler.
pub fn os_fault_objects(
    telemetry: &'static Telemetry,
    traplog: &'static TrapLog,
    config: &SchedulerConfig,
    on_cpu_failure: Option<Hook>,
) -> [FaultObject; 5] {
    // The trap log recorded a critical cause: the previous incarnation
    // went down hard, or a trap handler just filed one. Catastrophic:
    // stop and warm-reset through the bounded attempt counter.
    let cpu_failure = FaultObject::failsafe(FaultConfig {
        id: errcode::CPU_FAILURE as u16,
        error_code: errcode::CPU_FAILURE,
        source: Some(Observable::Cell(&traplog.status)),
        source_mask: abi::CPU_RESET_TRIGGER,
        compare_kind: CompareKind::Boolean,
        classes: if on_cpu_failure.is_some() {
            FaultClasses::CATASTROPHIC.union(FaultClasses::USER)
        } else {
            FaultClasses::CATASTROPHIC
        },
        levels: FaultLevels::SW.union(FaultLevels::SI),
        on_trip: on_cpu_failure,
        ..FaultConfig::EMPTY
    });

    // The load meter's sticky maximum breached the warning threshold.
    let cpu_load_overrun = FaultObject::failsafe(FaultConfig {
        id: errcode::CPU_LOAD_OVERRUN as u16,
        error_code: errcode::CPU_LOAD_OVERRUN,
        source: Some(Observable::Cell(&telemetry.cpu_load_max)),
        compare_kind: CompareKind::GreaterThan,
        trip_level: config.cpu_load_warning,
        reset_level: config.cpu_load_normal,
        classes: FaultClasses::WARNING,
        levels: FaultLevels::SW.union(FaultLevels::SI),
        ..FaultConfig::EMPTY
    });

    // The most recent task returned the failure status (zero).
    let task_execution_failure = FaultObject::failsafe(FaultConfig {
        id: errcode::TASK_EXECUTION_FAILURE as u16,
        error_code: errcode::TASK_EXECUTION_FAILURE,
        source: Some(Observable::Cell(&telemetry.active_retval)),
        compare_kind: CompareKind::Equal,
        trip_level: 0,
        reset_level: 0,
        classes: FaultClasses::FLAG,
        levels: FaultLevels::SW,
        ..FaultConfig::EMPTY
    });

    // Some task's measured period exceeded the master period. Recovery
    // takes a sustained streak of healthy measurements.
    let task_time_quota_violation = FaultObject::failsafe(FaultConfig {
        id: errcode::TASK_TIME_QUOTA_VIOLATION as u16,
        error_code: errcode::TASK_TIME_QUOTA_VIOLATION,
        source: Some(Observable::Cell(&telemetry.task_period_max)),
        compare_kind: CompareKind::GreaterThan,
        trip_level: config.master_period,
        reset_level: (u32::from(config.master_period) * 9 / 10) as u16,
        reset_count: 10,
        classes: FaultClasses::WARNING,
        levels: FaultLevels::SW,
        ..FaultConfig::EMPTY
    });

    // A step inside the scheduler cycle reported failure: the component
    // check bit in the status word went to zero.
    let os_component_failure = FaultObject::failsafe(FaultConfig {
        id: errcode::OS_COMPONENT_FAILURE as u16,
        error_code: errcode::OS_COMPONENT_FAILURE,
        source: Some(Observable::Cell(&telemetry.status)),
        source_mask: OpStatus::OS_COMPONENT_CHECK.bits(),
        compare_kind: CompareKind::Equal,
        trip_level: 0,
        reset_level: 0,
        reset_count: 100,
        classes: FaultClasses::WARNING,
        levels: FaultLevels::SW,
        ..FaultConfig::EMPTY
    });

    [
        cpu_failure,
        cpu_load_overrun,
        task_execution_failure,
        task_time_quota_violation,
        os_component_failure,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obs::ObsCell;
    use abi::TASK_OK;
    use core::sync::atomic::{AtomicU16, Ordering};

    fn cell(v: u16) -> &'static ObsCell {
        Box::leak(Box::new(ObsCell::new(v)))
    }

    fn watching(
        src: &'static ObsCell,
        kind: CompareKind,
        trip_level: u16,
        reset_level: u16,
    ) -> FaultConfig {
        FaultConfig {
            id: 1,
            source: Some(Observable::Cell(src)),
            compare_kind: kind,
            trip_level,
            reset_level,
            ..FaultConfig::EMPTY
        }
    }

    fn scan_one(obj: &mut FaultObject) -> ScanResult {
        scan_all(core::slice::from_mut(obj), &mut [])
    }

    #[test]
    fn s1_equal_trip_edge_requests_shutdown() {
        let x = cell(0);
        let mut obj = FaultObject::new(FaultConfig {
            source_mask: 0x0001,
            classes: FaultClasses::CATASTROPHIC,
            ..watching(x, CompareKind::Equal, 1, 1)
        });

        let r = scan_one(&mut obj);
        assert!(!obj.fault_status());
        assert_eq!(r.action(), FaultAction::None);

        x.write(1);
        let r = scan_one(&mut obj);
        assert!(obj.fault_status());
        assert_eq!(r.action(), FaultAction::Shutdown);
    }

    #[test]
    fn s2_boolean_debounce() {
        let x = cell(0);
        let mut obj = FaultObject::new(FaultConfig {
            trip_count: 3,
            reset_count: 2,
            ..watching(x, CompareKind::Boolean, 0, 0)
        });

        let inputs = [1, 1, 0, 1, 1, 1, 0, 0];
        let expected = [false, false, false, false, false, true, true, false];
        for (i, (input, want)) in inputs.iter().zip(expected).enumerate() {
            x.write(*input);
            scan_one(&mut obj);
            assert_eq!(obj.fault_status(), want, "cycle {}", i + 1);
        }
    }

    #[test]
    fn s3_less_than_with_reset_hysteresis() {
        let x = cell(150);
        let mut obj = FaultObject::new(FaultConfig {
            trip_count: 1,
            reset_count: 10,
            ..watching(x, CompareKind::LessThan, 200, 900)
        });

        scan_one(&mut obj);
        assert!(obj.fault_status(), "trips on the first low reading");

        x.write(950);
        for cycle in 2..=10 {
            scan_one(&mut obj);
            assert!(obj.fault_status(), "still latched at cycle {cycle}");
        }
        scan_one(&mut obj);
        assert!(!obj.fault_status(), "clears at cycle 11");
    }

    #[test]
    fn class_precedence_within_one_scan() {
        let hot = cell(1);
        let mk = |classes| {
            FaultObject::new(FaultConfig {
                classes,
                ..watching(hot, CompareKind::Boolean, 0, 0)
            })
        };
        let mut user = [
            mk(FaultClasses::FLAG),
            mk(FaultClasses::WARNING),
            mk(FaultClasses::CRITICAL),
            mk(FaultClasses::CATASTROPHIC),
        ];
        let r = scan_all(&mut [], &mut user);
        assert_eq!(r.action(), FaultAction::Shutdown);

        // Without the catastrophic descriptor, critical wins, and so on
        // down the precedence order.
        let mut user = [
            mk(FaultClasses::FLAG),
            mk(FaultClasses::WARNING),
            mk(FaultClasses::CRITICAL),
        ];
        assert_eq!(scan_all(&mut [], &mut user).action(), FaultAction::EnterFault);

        let mut user = [mk(FaultClasses::FLAG), mk(FaultClasses::WARNING)];
        assert_eq!(scan_all(&mut [], &mut user).action(), FaultAction::Warn);

        let mut user = [mk(FaultClasses::FLAG)];
        assert_eq!(scan_all(&mut [], &mut user).action(), FaultAction::Notify);
    }

    #[test]
    fn dead_band_holds_the_filter() {
        let x = cell(75);
        // Trip above 100, reset at or below 50: 75 is neither.
        let mut obj = FaultObject::new(FaultConfig {
            trip_count: 2,
            ..watching(x, CompareKind::GreaterThan, 100, 50)
        });

        x.write(150);
        scan_one(&mut obj);
        assert_eq!(obj.counter(), 1);

        x.write(75);
        scan_one(&mut obj);
        assert_eq!(obj.counter(), 1, "dead band leaves the streak alone");

        x.write(150);
        scan_one(&mut obj);
        assert!(obj.fault_status());
    }

    #[test]
    fn contradicting_observation_restarts_the_streak() {
        let x = cell(0);
        let mut obj = FaultObject::new(FaultConfig {
            trip_count: 3,
            ..watching(x, CompareKind::Boolean, 0, 0)
        });

        x.write(1);
        scan_one(&mut obj);
        scan_one(&mut obj);
        assert_eq!(obj.counter(), 2);

        // One healthy observation forgets the partial streak entirely.
        x.write(0);
        scan_one(&mut obj);
        assert_eq!(obj.counter(), 0);
    }

    #[test]
    fn range_comparisons() {
        let x = cell(0);
        // In range [10, 20] trips.
        let mut inside = FaultObject::new(watching(x, CompareKind::InRange, 20, 10));
        // Outside [10, 20] trips.
        let mut outside =
            FaultObject::new(watching(x, CompareKind::OutOfRange, 20, 10));

        x.write(15);
        scan_one(&mut inside);
        scan_one(&mut outside);
        assert!(inside.fault_status());
        assert!(!outside.fault_status());

        x.write(5);
        scan_one(&mut inside);
        scan_one(&mut outside);
        assert!(!inside.fault_status());
        assert!(outside.fault_status());
    }

    #[test]
    fn live_compare_reference_replaces_the_levels() {
        let src = cell(10);
        let limit = cell(50);
        let mut obj = FaultObject::new(FaultConfig {
            compare: Some(Observable::Cell(limit)),
            ..watching(src, CompareKind::GreaterThan, 0xFFFF, 0xFFFF)
        });

        scan_one(&mut obj);
        assert!(!obj.fault_status());

        src.write(60);
        scan_one(&mut obj);
        assert!(obj.fault_status());

        // Moving the limit observable moves the threshold.
        limit.write(100);
        scan_one(&mut obj);
        assert!(!obj.fault_status());
    }

    #[test]
    fn malformed_descriptor_is_skipped_and_reported() {
        let mut bad = FaultObject::new(FaultConfig {
            compare_kind: CompareKind::Boolean,
            ..FaultConfig::EMPTY
        });
        let r = scan_one(&mut bad);
        assert!(!r.ok);
        assert!(!bad.fault_status());

        let mut none_kind = FaultObject::new(FaultConfig {
            source: Some(Observable::Cell(cell(1))),
            compare_kind: CompareKind::None,
            ..FaultConfig::EMPTY
        });
        assert!(!scan_one(&mut none_kind).ok);
    }

    #[test]
    fn disabled_descriptor_is_not_touched() {
        let x = cell(1);
        let mut obj = FaultObject::new(watching(x, CompareKind::Boolean, 0, 0));
        obj.set_enabled(false);
        let r = scan_one(&mut obj);
        assert!(r.ok);
        assert!(!obj.fault_status());
        assert_eq!(obj.counter(), 0);
    }

    #[test]
    fn user_callbacks_fire_on_edges_only() {
        static TRIPS: AtomicU16 = AtomicU16::new(0);
        static RESETS: AtomicU16 = AtomicU16::new(0);
        fn on_trip() -> u16 {
            TRIPS.fetch_add(1, Ordering::Relaxed);
            TASK_OK
        }
        fn on_reset() -> u16 {
            RESETS.fetch_add(1, Ordering::Relaxed);
            TASK_OK
        }

        let x = cell(1);
        let mut obj = FaultObject::new(FaultConfig {
            classes: FaultClasses::FLAG.union(FaultClasses::USER),
            on_trip: Some(on_trip),
            on_reset: Some(on_reset),
            ..watching(x, CompareKind::Boolean, 0, 0)
        });

        scan_one(&mut obj);
        scan_one(&mut obj);
        assert_eq!(TRIPS.load(Ordering::Relaxed), 1, "edge, not level");

        x.write(0);
        scan_one(&mut obj);
        scan_one(&mut obj);
        assert_eq!(RESETS.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn callbacks_need_the_user_class() {
        static CALLS: AtomicU16 = AtomicU16::new(0);
        fn on_trip() -> u16 {
            CALLS.fetch_add(1, Ordering::Relaxed);
            TASK_OK
        }

        let x = cell(1);
        let mut obj = FaultObject::new(FaultConfig {
            classes: FaultClasses::FLAG,
            on_trip: Some(on_trip),
            ..watching(x, CompareKind::Boolean, 0, 0)
        });
        scan_one(&mut obj);
        assert!(obj.fault_status());
        assert_eq!(CALLS.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn reset_edge_retracts_latched_classes() {
        let x = cell(1);
        let mut obj = FaultObject::new(FaultConfig {
            classes: FaultClasses::WARNING,
            ..watching(x, CompareKind::Boolean, 0, 0)
        });

        let r = scan_one(&mut obj);
        assert!(r.latched.contains(FaultClasses::WARNING));

        x.write(0);
        let r = scan_one(&mut obj);
        assert!(r.latched.is_empty());
    }

    #[test]
    fn failsafe_start_walks_back_on_a_healthy_scan() {
        let x = cell(0);
        let mut obj = FaultObject::failsafe(FaultConfig {
            classes: FaultClasses::WARNING,
            ..watching(x, CompareKind::Boolean, 0, 0)
        });
        assert!(obj.fault_status());

        // First scan observes the healthy state and resets the latch
        // without any warm-up.
        let r = scan_one(&mut obj);
        assert!(!obj.fault_status());
        assert!(r.latched.is_empty());
    }
}
