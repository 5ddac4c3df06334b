//! Run/stop/step transitions observed through a live simulator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use marsim_core::SimulationStatus;
use marsim_test_utils::{fast_config, wait_until, Harness, MockPhysics, MockScene};
use proptest::prelude::*;

#[test]
fn starts_stopped_and_idle() {
    let h = Harness::new(fast_config());
    assert_eq!(h.sim.status(), SimulationStatus::Stopped);
    assert!(!h.sim.is_sim_running());
    thread::sleep(Duration::from_millis(20));
    assert_eq!(h.physics.step_count(), 0);
    assert_eq!(h.physics.inits(), 1);
}

#[test]
fn start_runs_until_stop() {
    let h = Harness::new(fast_config());
    assert!(h.sim.start_simulation());
    assert!(!h.sim.start_simulation(), "second start is a no-op");
    assert!(h.wait_steps(10));
    assert!(h.sim.is_sim_running());

    assert!(h.sim.stop_simulation());
    assert!(wait_until(Duration::from_secs(5), || h.sim.status()
        == SimulationStatus::Stopped));
    let settled = h.physics.step_count();
    thread::sleep(Duration::from_millis(30));
    assert_eq!(h.physics.step_count(), settled, "no steps after stop settles");
}

#[test]
fn single_step_advances_exactly_one_tick() {
    let h = Harness::new(fast_config());
    h.step_n(1);
    thread::sleep(Duration::from_millis(30));
    assert_eq!(h.physics.step_count(), 1);
    assert_eq!(h.sim.status(), SimulationStatus::Stopped);

    h.step_n(3);
    assert_eq!(h.physics.step_count(), 4);
    let m = h.sim.metrics();
    assert_eq!(m.step_count, 4);
    assert!((m.sim_time_ms - 40.0).abs() < 1e-6);
}

#[test]
fn stop_during_a_step_settles_without_another_step() {
    let h = Harness::with_mocks(
        fast_config(),
        MockPhysics::new().with_step_delay(Duration::from_millis(100)),
        MockScene::new(),
    );
    let seen = Arc::new(Mutex::new(Vec::new()));
    let done = Arc::new(AtomicBool::new(false));
    let sampler = {
        let (sim, seen, done) = (h.sim.handle(), Arc::clone(&seen), Arc::clone(&done));
        thread::spawn(move || {
            while !done.load(Ordering::Acquire) {
                let status = sim.status();
                let mut seen = seen.lock().unwrap();
                if seen.last() != Some(&status) {
                    seen.push(status);
                }
                drop(seen);
                thread::sleep(Duration::from_micros(200));
            }
        })
    };

    assert!(h.sim.single_step());
    assert!(wait_until(Duration::from_secs(5), || h.physics.is_stepping()));
    assert!(h.sim.stop_simulation());
    assert_eq!(h.sim.status(), SimulationStatus::Stopping);
    assert!(!h.sim.stop_simulation(), "already stopping");
    assert!(wait_until(Duration::from_secs(5), || h.sim.status()
        == SimulationStatus::Stopped));
    thread::sleep(Duration::from_millis(150));
    done.store(true, Ordering::Release);
    sampler.join().unwrap();

    assert_eq!(h.physics.step_count(), 1);
    assert_eq!(h.sim.status(), SimulationStatus::Stopped);
    let seen = seen.lock().unwrap().clone();
    assert!(!seen.contains(&SimulationStatus::Running));
    // Never back to stepping once stopping was observed.
    let stopping = seen
        .iter()
        .position(|s| *s == SimulationStatus::Stopping)
        .expect("stopping observed");
    assert!(!seen[stopping..].contains(&SimulationStatus::Stepping));
    assert_eq!(seen.last(), Some(&SimulationStatus::Stopped));
}

#[test]
fn single_step_rejected_while_running() {
    let h = Harness::new(fast_config());
    h.sim.start_simulation();
    assert!(!h.sim.single_step());
    h.sim.stop_simulation();
}

#[test]
fn start_running_config_starts_immediately() {
    let config = marsim_engine::SimConfig {
        start_running: true,
        ..fast_config()
    };
    let h = Harness::new(config);
    assert!(h.wait_steps(3));
    assert_eq!(h.sim.status(), SimulationStatus::Running);
}

#[test]
fn frames_and_bus_follow_ticks() {
    let h = Harness::new(fast_config());
    h.step_n(3);
    let frame = h.sim.latest_frame().expect("frame published");
    assert_eq!(frame.step_count, 3);
    assert_eq!(frame.tick.0, 3);
    let records = h.bus.records();
    assert_eq!(records.len(), 3);
    assert!(records
        .iter()
        .all(|(ch, _)| ch == marsim_core::PHYSICS_UPDATE_CHANNEL));
    assert_eq!(records[2].1.step_count, 3);
}

#[derive(Clone, Copy, Debug)]
enum Op {
    Start,
    Stop,
    Step,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![Just(Op::Start), Just(Op::Stop), Just(Op::Step)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn any_sequence_settles_to_stopped(ops in prop::collection::vec(op(), 1..24)) {
        let h = Harness::new(fast_config());
        let mut last_steps = 0;
        for op in ops {
            match op {
                Op::Start => { h.sim.start_simulation(); }
                Op::Stop => { h.sim.stop_simulation(); }
                Op::Step => { h.sim.single_step(); }
            }
            let status = h.sim.status();
            prop_assert_ne!(status, SimulationStatus::Unknown);
            prop_assert_eq!(SimulationStatus::from_code(status.code()), status);
            let steps = h.physics.step_count();
            prop_assert!(steps >= last_steps);
            last_steps = steps;
        }
        h.sim.stop_simulation();
        let stopped = wait_until(Duration::from_secs(5), || {
            h.sim.status() == SimulationStatus::Stopped
        });
        prop_assert!(stopped);
        let settled = h.physics.step_count();
        thread::sleep(Duration::from_millis(10));
        prop_assert_eq!(h.physics.step_count(), settled);
    }
}
