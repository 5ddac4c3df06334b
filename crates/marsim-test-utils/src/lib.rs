//! Test utilities and mock collaborators for marsim development.
//!
//! Provides mock implementations of the boundary traits
//! ([`PhysicsEngine`](marsim_core::PhysicsEngine),
//! [`SceneStore`](marsim_core::SceneStore),
//! [`DataBus`](marsim_core::DataBus),
//! [`GraphicsConsumer`](marsim_core::GraphicsConsumer)) that record every
//! call into a shared log the test keeps after the mock is moved into the
//! simulator, plus a set of [`fixtures`] plugins.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use marsim_core::{
    DataBus, Frame, GraphicsConsumer, LoadRequest, NodeId, PhysicsEngine, PhysicsError,
    PhysicsUpdate, RequestError, SceneStore, Vector3, WorldParameters,
};
use marsim_engine::{Collaborators, SimConfig, Simulator, SimulatorHandle};

/// Install `env_logger` once for the test binary. Safe to call from every
/// test.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Poll `cond` every millisecond until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
}

/// A config for tests: unpaced, short graphics timeout.
pub fn fast_config() -> SimConfig {
    SimConfig {
        realtime: false,
        sync_timeout_ms: 20,
        ..SimConfig::default()
    }
}

/// A simulator wired to mock collaborators, with the logs kept.
pub struct Harness {
    pub sim: Simulator,
    pub physics: Arc<PhysicsLog>,
    pub scene: Arc<SceneLog>,
    pub bus: Arc<RecordingBus>,
}

impl Harness {
    /// Build with default mocks.
    pub fn new(config: SimConfig) -> Self {
        Self::with_mocks(config, MockPhysics::new(), MockScene::new())
    }

    /// Build with preconfigured mocks. The scene watches the physics log.
    pub fn with_mocks(config: SimConfig, physics: MockPhysics, scene: MockScene) -> Self {
        init_logging();
        let physics_log = physics.log();
        let scene = scene.watching(Arc::clone(&physics_log));
        let scene_log = scene.log();
        let bus = Arc::new(RecordingBus::new());
        let collaborators = Collaborators::new(physics, scene).with_data_bus(bus.clone());
        let sim = match Simulator::new(config, collaborators) {
            Ok(sim) => sim,
            Err(e) => panic!("simulator construction failed: {e}"),
        };
        Self {
            sim,
            physics: physics_log,
            scene: scene_log,
            bus,
        }
    }

    /// Single-step `n` times, waiting for each step to land.
    pub fn step_n(&self, n: usize) {
        for _ in 0..n {
            let before = self.physics.step_count();
            assert!(self.sim.single_step(), "single_step rejected");
            assert!(
                wait_until(Duration::from_secs(5), || {
                    self.physics.step_count() > before
                        && self.sim.status() == marsim_core::SimulationStatus::Stopped
                }),
                "step did not complete"
            );
        }
    }

    /// Wait until at least `n` steps have run in total.
    pub fn wait_steps(&self, n: usize) -> bool {
        wait_until(Duration::from_secs(5), || self.physics.step_count() >= n)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// ── MockPhysics ──────────────────────────────────────────────────

/// One recorded physics step.
#[derive(Clone, Debug, PartialEq)]
pub struct StepRecord {
    pub dt: f64,
    pub gravity: Vector3,
    pub world: WorldParameters,
    pub started: Instant,
}

#[derive(Default)]
struct PhysicsState {
    steps: Vec<StepRecord>,
    gravity: Vector3,
    world: WorldParameters,
    connections: HashSet<(NodeId, NodeId)>,
    inits: usize,
    frees: usize,
    fail_steps: HashSet<usize>,
}

/// Shared record of everything a [`MockPhysics`] saw.
#[derive(Default)]
pub struct PhysicsLog {
    state: Mutex<PhysicsState>,
    stepping: AtomicBool,
    overlaps: AtomicUsize,
}

impl PhysicsLog {
    pub fn steps(&self) -> Vec<StepRecord> {
        lock(&self.state).steps.clone()
    }

    pub fn step_count(&self) -> usize {
        lock(&self.state).steps.len()
    }

    pub fn gravity(&self) -> Vector3 {
        lock(&self.state).gravity
    }

    pub fn world(&self) -> WorldParameters {
        lock(&self.state).world
    }

    pub fn is_connected(&self, a: NodeId, b: NodeId) -> bool {
        lock(&self.state).connections.contains(&(a, b))
    }

    pub fn inits(&self) -> usize {
        lock(&self.state).inits
    }

    pub fn frees(&self) -> usize {
        lock(&self.state).frees
    }

    /// Whether a step is executing right now.
    pub fn is_stepping(&self) -> bool {
        self.stepping.load(Ordering::Acquire)
    }

    /// World mutations observed while a step was executing.
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::Acquire)
    }

    /// Make the `n`-th step (1-based) fail with `SolverDiverged`.
    pub fn fail_step(&self, n: usize) {
        lock(&self.state).fail_steps.insert(n);
    }

    fn check_quiet(&self) {
        if self.is_stepping() {
            self.overlaps.fetch_add(1, Ordering::AcqRel);
        }
    }
}

/// A physics engine that records calls and sleeps for a configurable time
/// per step.
pub struct MockPhysics {
    log: Arc<PhysicsLog>,
    step_delay: Duration,
    fail_init: bool,
    collisions: usize,
}

impl MockPhysics {
    pub fn new() -> Self {
        Self {
            log: Arc::new(PhysicsLog::default()),
            step_delay: Duration::ZERO,
            fail_init: false,
            collisions: 0,
        }
    }

    /// Wall-clock time each step takes.
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Make `init_world` fail.
    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    /// Contact count returned by `check_collisions`.
    pub fn with_collisions(mut self, n: usize) -> Self {
        self.collisions = n;
        self
    }

    /// Handle to the shared log; keep it before moving the mock.
    pub fn log(&self) -> Arc<PhysicsLog> {
        Arc::clone(&self.log)
    }
}

impl Default for MockPhysics {
    fn default() -> Self {
        Self::new()
    }
}

impl PhysicsEngine for MockPhysics {
    fn init_world(&mut self) -> Result<(), PhysicsError> {
        if self.fail_init {
            return Err(PhysicsError::InitFailed {
                reason: "mock configured to fail".into(),
            });
        }
        lock(&self.log.state).inits += 1;
        Ok(())
    }

    fn free_world(&mut self) {
        lock(&self.log.state).frees += 1;
    }

    fn step(&mut self, dt: f64) -> Result<(), PhysicsError> {
        self.log.stepping.store(true, Ordering::Release);
        let started = Instant::now();
        if !self.step_delay.is_zero() {
            thread::sleep(self.step_delay);
        }
        let result = {
            let mut st = lock(&self.log.state);
            let record = StepRecord {
                dt,
                gravity: st.gravity,
                world: st.world,
                started,
            };
            st.steps.push(record);
            let n = st.steps.len();
            if st.fail_steps.contains(&n) {
                Err(PhysicsError::SolverDiverged {
                    reason: format!("mock failure at step {n}"),
                })
            } else {
                Ok(())
            }
        };
        self.log.stepping.store(false, Ordering::Release);
        result
    }

    fn set_gravity(&mut self, gravity: Vector3) {
        self.log.check_quiet();
        lock(&self.log.state).gravity = gravity;
    }

    fn set_world_parameters(&mut self, params: &WorldParameters) {
        self.log.check_quiet();
        lock(&self.log.state).world = *params;
    }

    fn check_collisions(&mut self) -> usize {
        self.collisions
    }

    fn connect_nodes(&mut self, a: NodeId, b: NodeId) -> Result<(), PhysicsError> {
        self.log.check_quiet();
        if a == b {
            return Err(PhysicsError::UnknownNode { node: a });
        }
        lock(&self.log.state).connections.insert((a, b));
        Ok(())
    }

    fn disconnect_nodes(&mut self, a: NodeId, b: NodeId) -> Result<(), PhysicsError> {
        self.log.check_quiet();
        if lock(&self.log.state).connections.remove(&(a, b)) {
            Ok(())
        } else {
            Err(PhysicsError::UnknownNode { node: b })
        }
    }
}

// ── MockScene ────────────────────────────────────────────────────

#[derive(Default)]
struct SceneState {
    loads: Vec<LoadRequest>,
    saves: Vec<PathBuf>,
    resets: usize,
    clears: Vec<bool>,
    failing: HashSet<PathBuf>,
}

/// Shared record of everything a [`MockScene`] saw.
#[derive(Default)]
pub struct SceneLog {
    state: Mutex<SceneState>,
    loading: AtomicBool,
    overlaps: AtomicUsize,
    load_during_step: AtomicUsize,
}

impl SceneLog {
    /// Successful loads, in execution order.
    pub fn loads(&self) -> Vec<LoadRequest> {
        lock(&self.state).loads.clone()
    }

    pub fn saves(&self) -> Vec<PathBuf> {
        lock(&self.state).saves.clone()
    }

    pub fn resets(&self) -> usize {
        lock(&self.state).resets
    }

    /// `clear_all` of every clear, in order.
    pub fn clears(&self) -> Vec<bool> {
        lock(&self.state).clears.clone()
    }

    /// Loads that started while another was in progress.
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::Acquire)
    }

    /// Loads that started while a physics step was executing.
    pub fn loads_during_step(&self) -> usize {
        self.load_during_step.load(Ordering::Acquire)
    }

    /// Loads of `path` fail with `FileNotFound`.
    pub fn fail_path(&self, path: impl Into<PathBuf>) {
        lock(&self.state).failing.insert(path.into());
    }
}

/// A scene store that records requests instead of parsing files.
pub struct MockScene {
    log: Arc<SceneLog>,
    physics: Option<Arc<PhysicsLog>>,
    load_delay: Duration,
}

impl MockScene {
    pub fn new() -> Self {
        Self {
            log: Arc::new(SceneLog::default()),
            physics: None,
            load_delay: Duration::ZERO,
        }
    }

    /// Watch this physics log to detect loads overlapping a step.
    pub fn watching(mut self, physics: Arc<PhysicsLog>) -> Self {
        self.physics = Some(physics);
        self
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn log(&self) -> Arc<SceneLog> {
        Arc::clone(&self.log)
    }
}

impl Default for MockScene {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneStore for MockScene {
    fn load(
        &mut self,
        _physics: &mut dyn PhysicsEngine,
        request: &LoadRequest,
    ) -> Result<(), RequestError> {
        if self.log.loading.swap(true, Ordering::AcqRel) {
            self.log.overlaps.fetch_add(1, Ordering::AcqRel);
        }
        if self.physics.as_ref().is_some_and(|p| p.is_stepping()) {
            self.log.load_during_step.fetch_add(1, Ordering::AcqRel);
        }
        if !self.load_delay.is_zero() {
            thread::sleep(self.load_delay);
        }
        let result = {
            let mut st = lock(&self.log.state);
            if st.failing.contains(&request.filename) {
                Err(RequestError::FileNotFound {
                    path: request.filename.clone(),
                })
            } else {
                st.loads.push(request.clone());
                Ok(())
            }
        };
        self.log.loading.store(false, Ordering::Release);
        result
    }

    fn save(&mut self, _physics: &mut dyn PhysicsEngine, path: &Path) -> Result<(), RequestError> {
        if path.as_os_str().is_empty() {
            return Err(RequestError::SaveFailed {
                reason: "empty path".into(),
            });
        }
        lock(&self.log.state).saves.push(path.to_path_buf());
        Ok(())
    }

    fn reset(&mut self, _physics: &mut dyn PhysicsEngine) -> Result<(), RequestError> {
        lock(&self.log.state).resets += 1;
        Ok(())
    }

    fn clear(&mut self, _physics: &mut dyn PhysicsEngine, clear_all: bool) {
        let mut st = lock(&self.log.state);
        st.clears.push(clear_all);
        if clear_all {
            st.loads.clear();
        }
    }
}

// ── RecordingBus ─────────────────────────────────────────────────

/// A data bus that keeps every published record.
#[derive(Default)]
pub struct RecordingBus {
    records: Mutex<Vec<(String, PhysicsUpdate)>>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(String, PhysicsUpdate)> {
        lock(&self.records).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.records).is_empty()
    }
}

impl DataBus for RecordingBus {
    fn publish(&self, channel: &str, update: &PhysicsUpdate) {
        lock(&self.records).push((channel.to_owned(), *update));
    }
}

// ── RecordingRenderer ────────────────────────────────────────────

/// A renderer that records frames and, once attached to a simulator,
/// acknowledges each one immediately.
#[derive(Default)]
pub struct RecordingRenderer {
    frames: Mutex<Vec<Frame>>,
    ack: Mutex<Option<SimulatorHandle>>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acknowledge every subsequent frame through `handle`.
    pub fn attach(&self, handle: SimulatorHandle) {
        *lock(&self.ack) = Some(handle);
    }

    /// Stop acknowledging frames.
    pub fn detach(&self) {
        lock(&self.ack).take();
    }

    pub fn frames(&self) -> Vec<Frame> {
        lock(&self.frames).clone()
    }

    pub fn frame_count(&self) -> usize {
        lock(&self.frames).len()
    }
}

impl GraphicsConsumer for RecordingRenderer {
    fn frame_ready(&self, frame: &Frame) {
        lock(&self.frames).push(frame.clone());
        if let Some(handle) = lock(&self.ack).as_ref() {
            handle.finished_draw();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn physics_records_steps_with_current_gravity() {
        let mut p = MockPhysics::new();
        let log = p.log();
        p.set_gravity(Vector3::new(0.0, 0.0, -1.0));
        p.step(0.01).unwrap();
        p.set_gravity(Vector3::new(0.0, 0.0, -2.0));
        p.step(0.01).unwrap();
        let steps = log.steps();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].gravity.z, -1.0);
        assert_eq!(steps[1].gravity.z, -2.0);
        assert_eq!(log.overlaps(), 0);
    }

    #[test]
    fn physics_fails_configured_step() {
        let mut p = MockPhysics::new();
        let log = p.log();
        log.fail_step(2);
        assert!(p.step(0.01).is_ok());
        assert!(matches!(
            p.step(0.01),
            Err(PhysicsError::SolverDiverged { .. })
        ));
        assert!(p.step(0.01).is_ok());
    }

    #[test]
    fn scene_fails_configured_path() {
        let mut physics = MockPhysics::new();
        let mut scene = MockScene::new();
        let log = scene.log();
        log.fail_path("bad.scn");
        assert!(scene.load(&mut physics, &LoadRequest::new("good.scn")).is_ok());
        assert!(scene.load(&mut physics, &LoadRequest::new("bad.scn")).is_err());
        assert_eq!(log.loads().len(), 1);
        assert_eq!(log.overlaps(), 0);
    }

    #[test]
    fn wait_until_times_out() {
        assert!(wait_until(Duration::from_millis(5), || true));
        assert!(!wait_until(Duration::from_millis(5), || false));
    }
}
