//! User-facing [`Simulator`] and the cloneable [`SimulatorHandle`].
//!
//! # Architecture
//!
//! ```text
//! Caller threads                      Simulation thread
//!     |                                   |
//!     |--start/stop/single_step---------->| controller (status + run token)
//!     |--load/save/reset/new_world------->| RequestQueue, drained between ticks
//!     |   (blocking: waits on ticket)     |   scene.load(physics, req)
//!     |--set_gravity/connect_nodes------->| PendingParams, applied before step
//!     |--add/remove_plugin--------------->| PluginRegistry, promoted next tick
//!     |--physics_thread_lock------------->| PauseGate, holds back the step
//!     |                                   | physics.step(dt)
//!     |<--latest_frame()------------------| FrameRing.push(frame)
//!     |                                   | plugins.physics_tick()
//! Renderer                                |
//!     |<--frame_ready---------------------| GraphicsSyncGate (sync mode waits)
//!     |--finished_draw------------------->|
//!     |                                   | park_timeout(interval - elapsed)
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{self, JoinHandle, Thread};
use std::time::{Duration, Instant};

use marsim_core::{
    ConfigKey, DataBus, Frame, GraphicsConsumer, LoadRequest, MemoryProperties, NodeId, NullBus,
    PhysicsEngine, PhysicsError, PluginId, PropertyListener, PropertyService, PropertyValue,
    RequestError, SceneStore, SimulationStatus, TickId, Vector3,
};

use crate::config::{ConfigError, SimConfig};
use crate::graphics::GraphicsSyncGate;
use crate::metrics::{LoopMetrics, MetricsCell};
use crate::params::{ParamUpdate, PendingParams};
use crate::pause::{PauseGate, PauseGuard};
use crate::plugin::{ControlCenter, Plugin, UpdateMode};
use crate::registry::{PluginFault, PluginInfo, PluginRegistry};
use crate::request::{RequestOutcome, RequestQueue, WorldRequest};
use crate::ring::FrameRing;
use crate::sim_loop::{LoopSummary, SimLoop};

// ── Shared state ─────────────────────────────────────────────────

/// State reachable from every thread.
pub(crate) struct Shared {
    pub controller: crate::step::StepController,
    pub requests: RequestQueue,
    pub params: PendingParams,
    pub plugins: PluginRegistry,
    pub pause: Arc<PauseGate>,
    pub graphics: GraphicsSyncGate,
    pub frames: FrameRing,
    pub metrics: MetricsCell,
    pub shutdown: AtomicBool,
    pub sim_fault: AtomicBool,
    pub scene_changed: AtomicBool,
    pub sim_thread: OnceLock<Thread>,
    pub control: OnceLock<Weak<ControlCenter>>,
}

impl Shared {
    fn new(config: &SimConfig) -> Self {
        Self {
            controller: crate::step::StepController::new(),
            requests: RequestQueue::new(config.max_pending_requests),
            params: PendingParams::new(),
            plugins: PluginRegistry::new(),
            pause: Arc::new(PauseGate::new()),
            graphics: GraphicsSyncGate::new(
                config.sync_graphics,
                Duration::from_millis(config.sync_timeout_ms),
            ),
            frames: FrameRing::new(config.frame_ring_size),
            metrics: MetricsCell::default(),
            shutdown: AtomicBool::new(false),
            sim_fault: AtomicBool::new(false),
            scene_changed: AtomicBool::new(false),
            sim_thread: OnceLock::new(),
            control: OnceLock::new(),
        }
    }

    /// Record a physics error and fan it out to plugins. Returns whether
    /// the error is fatal.
    pub fn report_physics_error(&self, error: &PhysicsError) -> bool {
        log::error!("physics error: {error}");
        self.sim_fault.store(true, Ordering::Release);
        self.metrics.record_physics_error();
        self.plugins.notify_error(error);
        error.is_fatal()
    }

    /// Stop the loop for good and wake it from every wait it may be in.
    pub fn begin_shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!("simulator exit requested");
        self.controller.exit();
        self.pause.release();
        self.graphics.release();
        if let Some(t) = self.sim_thread.get() {
            t.unpark();
        }
    }

    fn on_sim_thread(&self) -> bool {
        self.sim_thread
            .get()
            .is_some_and(|t| t.id() == thread::current().id())
    }

    fn push_param(&self, update: ParamUpdate) {
        self.params.push(update);
        self.controller.wake();
    }
}

// ── SimulatorHandle ──────────────────────────────────────────────

/// Cloneable access to a running simulator from any thread.
///
/// Every method returns promptly: state transitions and parameter writes
/// take a short lock, world mutations are queued for the simulation thread.
/// Only requests made with `blocking = true` (and [`save_scene`],
/// [`check_collisions`]) wait, for the specific request to complete.
///
/// [`save_scene`]: Self::save_scene
/// [`check_collisions`]: Self::check_collisions
#[derive(Clone)]
pub struct SimulatorHandle {
    shared: Arc<Shared>,
}

impl SimulatorHandle {
    // ── State machine ────────────────────────────────────────────

    /// Start continuous stepping. Returns `false` if already running or
    /// after exit.
    pub fn start_simulation(&self) -> bool {
        self.shared.controller.start()
    }

    /// Request a stop. The loop finishes its current tick and settles in
    /// `Stopped`. Returns `false` if nothing was running.
    pub fn stop_simulation(&self) -> bool {
        self.shared.controller.stop()
    }

    /// Advance exactly one tick, then stop. Returns `false` while running.
    pub fn single_step(&self) -> bool {
        self.shared.controller.single_step()
    }

    /// Current status.
    pub fn status(&self) -> SimulationStatus {
        self.shared.controller.status()
    }

    /// Any status other than `Stopped`, including a pending step or stop.
    pub fn is_sim_running(&self) -> bool {
        self.status() != SimulationStatus::Stopped
    }

    /// Ask the simulation thread to exit. Safe from the simulation thread
    /// itself; the owner of the [`Simulator`] joins it on
    /// [`exit`](Simulator::exit) or drop.
    pub fn request_exit(&self) {
        self.shared.begin_shutdown();
    }

    /// Whether exit has been requested.
    pub fn is_exiting(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    // ── Requests ─────────────────────────────────────────────────

    fn submit(&self, request: WorldRequest, blocking: bool) -> Result<RequestOutcome, RequestError> {
        if blocking && self.shared.on_sim_thread() {
            return Err(RequestError::WouldDeadlock);
        }
        let ticket = self.shared.requests.enqueue(request, blocking)?;
        self.shared.controller.wake();
        match ticket {
            Some(ticket) => ticket.wait(),
            None => Ok(RequestOutcome::Done),
        }
    }

    /// Load a scene file. The simulation is stopped while loading and
    /// restarted afterwards if it was running when this was called.
    ///
    /// With `blocking`, returns the load's own result. Otherwise returns
    /// once queued; failures then surface through
    /// [`has_request_fault`](Self::has_request_fault).
    pub fn load_scene(
        &self,
        path: impl Into<PathBuf>,
        robot: &str,
        blocking: bool,
    ) -> Result<(), RequestError> {
        let request = LoadRequest::new(path)
            .robot(robot)
            .was_running(self.status() == SimulationStatus::Running);
        self.load_scene_with(request, blocking)
    }

    /// Load a scene with an explicit request.
    pub fn load_scene_with(&self, request: LoadRequest, blocking: bool) -> Result<(), RequestError> {
        self.submit(WorldRequest::Load(request), blocking).map(drop)
    }

    /// Save the world to `path` at the next tick boundary. Always waits
    /// for the save. Restarts the simulation afterwards if `was_running`.
    pub fn save_scene(
        &self,
        path: impl Into<PathBuf>,
        was_running: bool,
    ) -> Result<(), RequestError> {
        let request = WorldRequest::Save {
            path: path.into(),
            was_running,
        };
        self.submit(request, true).map(drop)
    }

    /// Queue a reset of the world to its loaded state. The simulation is
    /// stopped and simulated time restarts at zero.
    pub fn reset_sim(&self) -> Result<(), RequestError> {
        self.submit(WorldRequest::Reset, false).map(drop)
    }

    /// Queue replacement of the world with an empty one.
    pub fn new_world(&self, clear_all: bool) -> Result<(), RequestError> {
        self.submit(WorldRequest::NewWorld { clear_all }, false)
            .map(drop)
    }

    /// Run collision detection once at the next tick boundary and return
    /// the number of contacts.
    pub fn check_collisions(&self) -> Result<usize, RequestError> {
        match self.submit(WorldRequest::CheckCollisions, true)? {
            RequestOutcome::Collisions(n) => Ok(n),
            RequestOutcome::Done => Ok(0),
        }
    }

    /// Requests waiting to execute.
    pub fn pending_requests(&self) -> usize {
        self.shared.requests.len()
    }

    /// No request is waiting and none is executing.
    pub fn requests_idle(&self) -> bool {
        self.shared.requests.is_idle()
    }

    /// Whether a non-blocking request failed since the last
    /// [`take_request_error`](Self::take_request_error).
    pub fn has_request_fault(&self) -> bool {
        self.shared.requests.has_fault()
    }

    /// Take the last non-blocking request failure.
    pub fn take_request_error(&self) -> Option<RequestError> {
        self.shared.requests.take_last_error()
    }

    // ── Plugins ──────────────────────────────────────────────────

    /// Register a plugin. It receives its first callback on the tick after
    /// the current one.
    pub fn add_plugin(&self, plugin: Box<dyn Plugin>, mode: UpdateMode) -> PluginId {
        self.shared.plugins.add(plugin, mode)
    }

    /// Unregister a plugin. Safe from inside the plugin's own callback.
    pub fn remove_plugin(&self, id: PluginId) -> bool {
        self.shared.plugins.remove(id)
    }

    /// Change which ticks a plugin takes part in.
    pub fn switch_plugin_update_mode(&self, id: PluginId, mode: UpdateMode) -> bool {
        self.shared.plugins.switch_mode(id, mode)
    }

    /// Registered plugins in registration order.
    pub fn plugins(&self) -> Vec<PluginInfo> {
        self.shared.plugins.list()
    }

    /// Number of registered plugins, pending ones included.
    pub fn plugin_count(&self) -> usize {
        self.shared.plugins.len()
    }

    /// Drain recorded plugin faults, oldest first.
    pub fn take_plugin_faults(&self) -> Vec<PluginFault> {
        self.shared.plugins.take_faults()
    }

    // ── World parameters ─────────────────────────────────────────

    /// Set gravity; applied before the next step.
    pub fn set_gravity(&self, gravity: Vector3) -> Result<(), ConfigError> {
        if !gravity.is_finite() {
            return Err(ConfigError::InvalidGravity);
        }
        self.shared.push_param(ParamUpdate::Gravity(gravity));
        Ok(())
    }

    /// Rescale the environment; applied before the next step.
    pub fn rescale_environment(&self, scale: Vector3) -> Result<(), ConfigError> {
        if !(scale.is_finite() && scale.x > 0.0 && scale.y > 0.0 && scale.z > 0.0) {
            return Err(ConfigError::InvalidWorldParameter {
                reason: format!("scale must be positive and finite, got {scale}"),
            });
        }
        self.shared.push_param(ParamUpdate::Scale(scale));
        Ok(())
    }

    /// Join two nodes before the next step. Errors surface as a physics
    /// fault.
    pub fn connect_nodes(&self, a: NodeId, b: NodeId) {
        self.shared.push_param(ParamUpdate::Connect(a, b));
    }

    /// Separate two nodes before the next step.
    pub fn disconnect_nodes(&self, a: NodeId, b: NodeId) {
        self.shared.push_param(ParamUpdate::Disconnect(a, b));
    }

    // ── Pausing ──────────────────────────────────────────────────

    /// Hold back physics stepping. Recursive: stepping resumes only when
    /// every lock has been matched by an unlock. Blocks while a step is in
    /// progress.
    pub fn physics_thread_lock(&self) {
        self.shared.pause.lock();
    }

    /// Release one [`physics_thread_lock`](Self::physics_thread_lock).
    /// Returns `false` if the count was already zero.
    pub fn physics_thread_unlock(&self) -> bool {
        self.shared.pause.unlock()
    }

    /// Scoped [`physics_thread_lock`](Self::physics_thread_lock).
    pub fn pause_physics(&self) -> PauseGuard {
        PauseGuard::new(Arc::clone(&self.shared.pause))
    }

    /// Outstanding pause locks.
    pub fn physics_pause_count(&self) -> u32 {
        self.shared.pause.count()
    }

    // ── Errors and status ────────────────────────────────────────

    /// Report a physics error from outside the loop. Sets the fault flag
    /// and notifies plugins; a fatal error shuts the simulator down.
    pub fn handle_error(&self, error: PhysicsError) {
        if self.shared.report_physics_error(&error) {
            log::error!("fatal physics error reported, shutting down");
            self.shared.begin_shutdown();
        }
    }

    /// Whether a physics error occurred since the last world reset.
    pub fn has_sim_fault(&self) -> bool {
        self.shared.sim_fault.load(Ordering::Acquire)
    }

    /// Whether the scene changed since the flag was last cleared.
    pub fn scene_changed(&self) -> bool {
        self.shared.scene_changed.load(Ordering::Acquire)
    }

    /// Mark the scene as changed, or clear the flag with `reset`.
    pub fn scene_has_changed(&self, reset: bool) {
        self.shared.scene_changed.store(!reset, Ordering::Release);
    }

    /// Simulated time since the last reset, in milliseconds.
    pub fn sim_time_ms(&self) -> f64 {
        self.shared.metrics.snapshot().sim_time_ms
    }

    /// Loop counters.
    pub fn metrics(&self) -> LoopMetrics {
        LoopMetrics {
            graphics_syncs: self.shared.graphics.completed(),
            missed_syncs: self.shared.graphics.missed(),
            plugin_errors: self.shared.plugins.error_count(),
            ..self.shared.metrics.snapshot()
        }
    }

    // ── Graphics ─────────────────────────────────────────────────

    /// Most recently published frame.
    pub fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.shared.frames.latest()
    }

    /// Up to `n` of the newest retained frames, oldest first.
    pub fn recent_frames(&self, n: usize) -> Vec<Arc<Frame>> {
        self.shared.frames.recent(n)
    }

    /// Retained frames published after `tick`, oldest first. A renderer
    /// passes the tick of the last frame it drew to catch up on skipped
    /// ones; frames older than `frame_ring_size` ticks are gone.
    pub fn frames_since(&self, tick: TickId) -> Vec<Arc<Frame>> {
        self.shared.frames.since(tick)
    }

    /// Whether a frame is waiting to be drawn.
    pub fn allow_draw(&self) -> bool {
        self.shared.graphics.allow_draw()
    }

    /// Whether the loop waits for the renderer.
    pub fn sync_graphics(&self) -> bool {
        self.shared.graphics.sync_enabled()
    }

    /// Toggle the renderer handshake.
    pub fn set_sync_graphics(&self, sync: bool) {
        self.shared.graphics.set_sync(sync);
    }

    /// Renderer: the announced frame has been drawn.
    pub fn finished_draw(&self) {
        self.shared.graphics.finished_draw();
    }

    /// Renderer: run gui ticks on the calling thread. Returns how many
    /// plugins were invoked.
    pub fn post_graphics_update(&self) -> usize {
        match self.control_center() {
            Some(control) => self.shared.plugins.gui_tick(&control),
            None => 0,
        }
    }

    /// The shared control center, while the simulator is alive.
    pub fn control_center(&self) -> Option<Arc<ControlCenter>> {
        self.shared.control.get().and_then(Weak::upgrade)
    }
}

// ── Property listener ────────────────────────────────────────────

/// Turns property changes into pending updates applied at the next tick
/// boundary. Holds the simulator weakly.
struct SimPropertyListener {
    shared: Weak<Shared>,
}

impl PropertyListener for SimPropertyListener {
    fn property_changed(&self, key: &str, value: &PropertyValue) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let key: ConfigKey = match key.parse() {
            Ok(k) => k,
            Err(_) => {
                log::debug!("ignoring unknown property '{key}'");
                return;
            }
        };
        match ParamUpdate::from_property(key, value) {
            Some(update) => shared.push_param(update),
            None => log::warn!("rejected value {value} for property '{key}'"),
        }
    }
}

// ── Simulator ────────────────────────────────────────────────────

/// Collaborators handed to [`Simulator::new`].
pub struct Collaborators {
    /// Physics engine, moved into the simulation thread.
    pub physics: Box<dyn PhysicsEngine>,
    /// Scene store, moved into the simulation thread.
    pub scene: Box<dyn SceneStore>,
    /// Telemetry bus.
    pub data_bus: Arc<dyn DataBus>,
    /// Renderer notified of each frame, if any.
    pub graphics: Option<Arc<dyn GraphicsConsumer>>,
    /// Configuration properties.
    pub properties: Arc<dyn PropertyService>,
}

impl Collaborators {
    /// Physics and scene store, with a discarding data bus, no renderer,
    /// and an empty in-memory property service.
    pub fn new(physics: impl PhysicsEngine, scene: impl SceneStore) -> Self {
        Self {
            physics: Box::new(physics),
            scene: Box::new(scene),
            data_bus: Arc::new(NullBus),
            graphics: None,
            properties: Arc::new(MemoryProperties::new()),
        }
    }

    /// Replace the data bus.
    pub fn with_data_bus(mut self, bus: Arc<dyn DataBus>) -> Self {
        self.data_bus = bus;
        self
    }

    /// Attach a renderer.
    pub fn with_graphics(mut self, graphics: Arc<dyn GraphicsConsumer>) -> Self {
        self.graphics = Some(graphics);
        self
    }

    /// Replace the property service.
    pub fn with_properties(mut self, properties: Arc<dyn PropertyService>) -> Self {
        self.properties = properties;
        self
    }
}

/// Report from [`Simulator::exit`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Time spent shutting down.
    pub total_ms: u64,
    /// Whether the simulation thread was joined cleanly.
    pub thread_joined: bool,
    /// Ticks executed over the simulator's lifetime.
    pub ticks_executed: u64,
    /// Queued requests failed with `ShuttingDown`.
    pub requests_abandoned: usize,
}

/// The real-time simulation coordinator.
///
/// Owns the simulation thread. Dereferences to [`SimulatorHandle`] for all
/// operations; clone a handle with [`handle`](Self::handle) to share
/// access with other threads.
pub struct Simulator {
    handle: SimulatorHandle,
    control: Option<Arc<ControlCenter>>,
    thread: Option<JoinHandle<LoopSummary>>,
}

impl Simulator {
    /// Initialize the physics world and spawn the simulation thread.
    ///
    /// Properties already present in the property service override the
    /// matching `config` fields.
    pub fn new(mut config: SimConfig, collaborators: Collaborators) -> Result<Self, ConfigError> {
        let Collaborators {
            mut physics,
            scene,
            data_bus,
            graphics,
            properties,
        } = collaborators;

        // Both spellings the listener accepts; the qualified one wins.
        for key in ConfigKey::ALL {
            let value = properties
                .get(&key.qualified())
                .or_else(|| properties.get(key.as_str()));
            if let Some(value) = value {
                config.apply_property(key, &value)?;
            }
        }
        config.validate()?;

        physics.init_world()?;

        let shared = Arc::new(Shared::new(&config));
        let handle = SimulatorHandle {
            shared: Arc::clone(&shared),
        };
        let control = Arc::new(ControlCenter::new(
            handle.clone(),
            data_bus,
            Arc::clone(&properties),
        ));
        let _ = shared.control.set(Arc::downgrade(&control));
        properties.subscribe(Arc::new(SimPropertyListener {
            shared: Arc::downgrade(&shared),
        }));

        let sim_loop = SimLoop::new(
            &config,
            physics,
            scene,
            Arc::clone(&shared),
            Arc::clone(&control),
            graphics,
        );
        let thread_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("marsim-sim".into())
            .spawn(move || {
                let _ = thread_shared.sim_thread.set(thread::current());
                sim_loop.run()
            })
            .map_err(|e| ConfigError::ThreadSpawnFailed {
                reason: e.to_string(),
            })?;

        log::info!(
            "simulator started: calc_ms={} realtime={} fast_step={} sync_graphics={}",
            config.calc_ms,
            config.realtime,
            config.fast_step,
            config.sync_graphics
        );
        if config.start_running {
            handle.start_simulation();
        }

        Ok(Self {
            handle,
            control: Some(control),
            thread: Some(thread),
        })
    }

    /// A cloneable handle.
    pub fn handle(&self) -> SimulatorHandle {
        self.handle.clone()
    }

    /// Stop the simulation thread and join it. Idempotent.
    ///
    /// Requests still queued fail with [`RequestError::ShuttingDown`];
    /// pause locks and graphics waits are released.
    pub fn exit(&mut self) -> ShutdownReport {
        let Some(thread) = self.thread.take() else {
            return ShutdownReport {
                thread_joined: true,
                ticks_executed: self.handle.shared.metrics.ticks(),
                ..ShutdownReport::default()
            };
        };
        let start = Instant::now();
        self.handle.shared.begin_shutdown();
        thread.thread().unpark();

        let (thread_joined, summary) = match thread.join() {
            Ok(summary) => (true, summary),
            Err(_) => {
                log::error!("simulation thread panicked");
                let ticks = self.handle.shared.metrics.ticks();
                let abandoned = self.handle.shared.requests.close_and_abandon();
                (
                    false,
                    LoopSummary {
                        ticks,
                        requests_abandoned: abandoned,
                    },
                )
            }
        };

        let released = self.handle.shared.plugins.clear();
        self.control.take();
        let report = ShutdownReport {
            total_ms: start.elapsed().as_millis() as u64,
            thread_joined,
            ticks_executed: summary.ticks,
            requests_abandoned: summary.requests_abandoned,
        };
        log::info!("simulator exited ({released} plugin(s) released): {report:?}");
        report
    }
}

impl std::ops::Deref for Simulator {
    type Target = SimulatorHandle;

    fn deref(&self) -> &SimulatorHandle {
        &self.handle
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.exit();
        }
    }
}
