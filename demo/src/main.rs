// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hosted simulator for the cadence operating core.
//!
//! This wires a small but complete application -- a task table, the seven
//! mode queues, the kernel telemetry and trap log, one user fault object
//! -- to the simulated timebase and the thread-based rescue host, then
//! drives the bounded warm-restart outer loop that a real board would
//! implement with a CPU reset.
//!
//! The scripted story: the system boots through the automatic mode
//! progression, an idle-queue task requests RUN, and a supply-voltage
//! monitor plays out a sag-and-recover warning followed, every 800
//! heartbeats, by a simulated address-error trap. Each trap is a
//! catastrophic fault: the scheduler stops, the outer loop performs a
//! warm reset, and after `reset_limit` attempts the system halts the way
//! a stuck controller would wait for a human.

use std::time::Duration;

use kern::app::{
    task_idle, App, Hooks, OpMode, QueueDesc, QueueSet, SchedulerConfig,
    TaskDesc, TaskFlags, TaskId, TrapStatus, TASK_OK,
};
use kern::fault::{self, FaultConfig, FaultObject};
use kern::mode::ModeRequest;
use kern::obs::{ObsCell, Observable};
use kern::rescue::ThreadRescue;
use kern::sched::{NoWatchdog, Scheduler, Shutdown};
use kern::task::Task;
use kern::telemetry::Telemetry;
use kern::time::{SimState, SimTimebase};
use kern::traplog::TrapLog;
use abi::{CompareKind, FaultClasses, FaultLevels};

const CONFIG: SchedulerConfig = SchedulerConfig {
    master_period: 10_000,
    rescue_period: 9_000,
    loop_nomblk: 6,
    load_factor: 393,
    reset_limit: 3,
    cpu_load_warning: 980,
    cpu_load_normal: 950,
};

static SIM: SimState = SimState::new(7, 10_000);
static TELEMETRY: Telemetry = Telemetry::new();
static TRAPLOG: TrapLog = TrapLog::new();
static MODE_REQ: ModeRequest = ModeRequest::new();

/// Simulated supply rail, in millivolts.
static SUPPLY_MV: ObsCell = ObsCell::new(12_000);
/// Cycles survived in RUN mode, across warm resets.
static HEARTBEATS: ObsCell = ObsCell::new(0);

fn task_request_run() -> u16 {
    MODE_REQ.post(OpMode::Run);
    TASK_OK
}

fn task_heartbeat() -> u16 {
    HEARTBEATS.write(HEARTBEATS.read().wrapping_add(1));
    SIM.advance(40); // model a little real work on the grid
    TASK_OK
}

/// Scripted plant behavior, keyed off the heartbeat count: one supply
/// sag-and-recover early on, then an address-error trap every 800 beats.
fn task_supply_monitor() -> u16 {
    let beats = HEARTBEATS.read();
    match beats {
        400 => SUPPLY_MV.write(9_000),
        500 => SUPPLY_MV.write(12_000),
        _ => (),
    }
    if beats > 0 && beats % 800 == 0 {
        TRAPLOG.note(TrapStatus::ILLEGAL_ADDRESS);
    }
    TASK_OK
}

fn run_queue_init() -> u16 {
    println!("[mode] entering RUN at heartbeat {}", HEARTBEATS.read());
    TASK_OK
}

fn fault_queue_init() -> u16 {
    println!("[mode] entering FAULT monitoring");
    TASK_OK
}

fn on_undervolt_trip() -> u16 {
    println!("[fault] supply undervolt tripped at {} mV", SUPPLY_MV.read());
    TASK_OK
}

fn on_undervolt_reset() -> u16 {
    println!("[fault] supply undervolt cleared at {} mV", SUPPLY_MV.read());
    TASK_OK
}

/// User response wired to the catastrophic CPU-failure object: bring the
/// application to a safe state before the scheduler winds down.
fn app_reset() -> u16 {
    println!(
        "[fault] catastrophic: application shut down at heartbeat {}",
        HEARTBEATS.read()
    );
    TASK_OK
}

static TASKS: [TaskDesc; 4] = [
    TaskDesc {
        id: TaskId(0),
        entry: Some(task_idle),
        time_quota: 9_000,
        flags: TaskFlags::ENABLED,
    },
    TaskDesc {
        id: TaskId(1),
        entry: Some(task_request_run),
        time_quota: 9_000,
        flags: TaskFlags::ENABLED,
    },
    TaskDesc {
        id: TaskId(2),
        entry: Some(task_heartbeat),
        time_quota: 9_000,
        flags: TaskFlags::ENABLED,
    },
    TaskDesc {
        id: TaskId(3),
        entry: Some(task_supply_monitor),
        time_quota: 9_000,
        flags: TaskFlags::ENABLED,
    },
];

static Q_STARTUP: [TaskId; 1] = [TaskId(0)];
static Q_IDLE: [TaskId; 2] = [TaskId(1), TaskId(0)];
static Q_RUN: [TaskId; 3] = [TaskId(2), TaskId(3), TaskId(0)];

static QUEUES: QueueSet = QueueSet {
    boot: QueueDesc {
        tasks: &Q_STARTUP,
        init: None,
    },
    firmware_init: QueueDesc {
        tasks: &Q_STARTUP,
        init: None,
    },
    startup_sequence: QueueDesc {
        tasks: &Q_STARTUP,
        init: None,
    },
    idle: QueueDesc {
        tasks: &Q_IDLE,
        init: None,
    },
    run: QueueDesc {
        tasks: &Q_RUN,
        init: Some(run_queue_init),
    },
    fault: QueueDesc {
        tasks: &Q_STARTUP,
        init: Some(fault_queue_init),
    },
    standby: QueueDesc {
        tasks: &Q_STARTUP,
        init: None,
    },
};

fn undervolt_fault() -> FaultObject {
    FaultObject::new(FaultConfig {
        id: 0xA001,
        error_code: 0xA001,
        source: Some(Observable::Cell(&SUPPLY_MV)),
        compare_kind: CompareKind::LessThan,
        trip_level: 10_500,
        reset_level: 11_500,
        trip_count: 3,
        reset_count: 5,
        classes: FaultClasses::WARNING.union(FaultClasses::USER),
        levels: FaultLevels::HW,
        on_trip: Some(on_undervolt_trip),
        on_reset: Some(on_undervolt_reset),
        ..FaultConfig::EMPTY
    })
}

fn main() {
    println!("cadence simulator: cold boot");

    loop {
        let mut tasks: [Task; 4] =
            core::array::from_fn(|i| Task::from_descriptor(&TASKS[i]));
        let mut os_faults =
            fault::os_fault_objects(&TELEMETRY, &TRAPLOG, &CONFIG, Some(app_reset));
        let mut user_faults = [undervolt_fault()];

        let mut sched = Scheduler::new(
            App {
                config: CONFIG,
                tasks: &mut tasks,
                queues: &QUEUES,
                os_faults: &mut os_faults,
                user_faults: &mut user_faults,
                telemetry: &TELEMETRY,
                traplog: &TRAPLOG,
                mode_request: &MODE_REQ,
                hooks: Hooks::NONE,
            },
            SimTimebase::new(&SIM),
            ThreadRescue::new(Duration::from_millis(250)),
            NoWatchdog,
        );

        match sched.run() {
            Shutdown::WarmReset => {
                println!(
                    "[boot] warm reset #{} (prior cause: {:?}, cpu load {}%)",
                    TRAPLOG.reset_count(),
                    sched.reset_class(),
                    TELEMETRY.cpu_load.read() / 10,
                );
            }
            Shutdown::Halt => {
                println!(
                    "[boot] reset limit reached after {} attempts; halting",
                    TRAPLOG.reset_count()
                );
                break;
            }
        }
    }

    println!(
        "simulation over: {} heartbeats survived, final supply {} mV",
        HEARTBEATS.read(),
        SUPPLY_MV.read()
    );
}
