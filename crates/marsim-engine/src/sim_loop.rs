//! Simulation thread body: request draining, stepping, plugin ticks,
//! frame publication, graphics handshake, and pacing.
//!
//! The loop owns the physics engine and the scene store exclusively
//! (moved in via `thread::spawn`). Everything other threads touch lives in
//! [`Shared`] and is reached through short-held locks or atomics; no lock
//! is held across a physics step, a request, or a plugin callback.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use marsim_core::{
    Frame, GraphicsConsumer, PhysicsEngine, PhysicsError, PhysicsUpdate, RequestError,
    SceneStore, SimulationStatus, TickId, Vector3, WorldParameters, PHYSICS_UPDATE_CHANNEL,
};

use crate::config::SimConfig;
use crate::governor::{Pacing, RealtimeGovernor};
use crate::graphics::{SyncOutcome, SyncSchedule};
use crate::params::ParamUpdate;
use crate::plugin::ControlCenter;
use crate::request::{RequestOutcome, WorldRequest};
use crate::simulator::Shared;

/// What the loop hands back when it exits.
#[derive(Debug, Default)]
pub(crate) struct LoopSummary {
    pub ticks: u64,
    pub requests_abandoned: usize,
}

pub(crate) struct SimLoop {
    physics: Box<dyn PhysicsEngine>,
    scene: Box<dyn SceneStore>,
    shared: Arc<Shared>,
    control: Arc<ControlCenter>,
    graphics: Option<Arc<dyn GraphicsConsumer>>,
    governor: RealtimeGovernor,
    schedule: SyncSchedule,
    gravity: Vector3,
    world: WorldParameters,
    tick: TickId,
    sim_time_ms: f64,
    step_count: u64,
    /// Requests dequeued after shutdown began and failed unexecuted.
    refused: usize,
}

impl SimLoop {
    pub fn new(
        config: &SimConfig,
        physics: Box<dyn PhysicsEngine>,
        scene: Box<dyn SceneStore>,
        shared: Arc<Shared>,
        control: Arc<ControlCenter>,
        graphics: Option<Arc<dyn GraphicsConsumer>>,
    ) -> Self {
        Self {
            physics,
            scene,
            shared,
            control,
            graphics,
            governor: RealtimeGovernor::new(config.calc_ms, config.realtime, config.fast_step),
            schedule: SyncSchedule::new(config.sync_interval_ms),
            gravity: config.gravity,
            world: config.world,
            tick: TickId::default(),
            sim_time_ms: 0.0,
            step_count: 0,
            refused: 0,
        }
    }

    fn shutting_down(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Main loop. Runs until the simulator exits.
    pub fn run(mut self) -> LoopSummary {
        log::debug!("simulation thread started");
        self.physics.set_gravity(self.gravity);
        self.physics.set_world_parameters(&self.world);

        loop {
            if self.shutting_down() {
                break;
            }

            // 1. Requests run strictly between ticks.
            self.drain_requests();
            if self.shutting_down() {
                break;
            }

            // 2. Boundary transition, then act on the settled status.
            match self.shared.controller.settle() {
                SimulationStatus::Running => self.tick(),
                SimulationStatus::Stepping => {
                    self.tick();
                    self.shared.controller.finish_step();
                }
                _ => {
                    self.apply_params();
                    // Park until a transition, a request, or a parameter
                    // write sends a run token.
                    if self.shared.requests.is_empty()
                        && self.shared.params.is_empty()
                        && !self.shutting_down()
                    {
                        self.shared.controller.wait_for_wake();
                    }
                }
            }
        }

        let requests_abandoned = self.shared.requests.close_and_abandon() + self.refused;
        if requests_abandoned > 0 {
            log::info!("{requests_abandoned} queued request(s) abandoned at shutdown");
        }
        self.physics.free_world();
        log::info!(
            "simulation thread exiting after {} tick(s)",
            self.shared.metrics.ticks()
        );
        LoopSummary {
            ticks: self.shared.metrics.ticks(),
            requests_abandoned,
        }
    }

    fn drain_requests(&mut self) {
        let shared = Arc::clone(&self.shared);
        let stats = shared.requests.drain_and_execute(|req| self.execute(req));
        if stats.executed > 0 {
            shared.metrics.record_requests(stats.executed, stats.failed);
        }
    }

    fn execute(&mut self, request: &WorldRequest) -> Result<RequestOutcome, RequestError> {
        if self.shutting_down() {
            self.refused += 1;
            return Err(RequestError::ShuttingDown);
        }
        match request {
            WorldRequest::Load(load) => {
                self.halt();
                log::info!(
                    "loading scene {} (robot '{}')",
                    load.filename.display(),
                    load.robot_name
                );
                let result = self.scene.load(self.physics.as_mut(), load);
                if result.is_ok() {
                    self.shared.scene_changed.store(true, Ordering::Release);
                }
                // Resume even after a failed load: the previous world is intact.
                if load.was_running {
                    self.shared.controller.start();
                }
                result.map(|()| RequestOutcome::Done)
            }
            WorldRequest::Save { path, was_running } => {
                self.halt();
                log::info!("saving scene to {}", path.display());
                let result = self.scene.save(self.physics.as_mut(), path);
                if *was_running {
                    self.shared.controller.start();
                }
                result.map(|()| RequestOutcome::Done)
            }
            WorldRequest::Reset => {
                self.halt();
                log::info!("resetting world");
                self.scene.reset(self.physics.as_mut())?;
                self.world_replaced();
                Ok(RequestOutcome::Done)
            }
            WorldRequest::NewWorld { clear_all } => {
                self.halt();
                log::info!("creating new world (clear_all={clear_all})");
                self.scene.clear(self.physics.as_mut(), *clear_all);
                self.physics.free_world();
                if let Err(e) = self.physics.init_world() {
                    self.physics_fault(&e);
                    return Err(e.into());
                }
                self.physics.set_gravity(self.gravity);
                self.physics.set_world_parameters(&self.world);
                self.world_replaced();
                Ok(RequestOutcome::Done)
            }
            WorldRequest::CheckCollisions => {
                Ok(RequestOutcome::Collisions(self.physics.check_collisions()))
            }
        }
    }

    /// Bring the status to `Stopped` before touching the world.
    fn halt(&self) {
        self.shared.controller.stop();
        self.shared.controller.settle();
    }

    fn world_replaced(&mut self) {
        self.sim_time_ms = 0.0;
        self.step_count = 0;
        self.shared
            .metrics
            .record_clock(self.step_count, self.sim_time_ms);
        self.shared.sim_fault.store(false, Ordering::Release);
        self.shared.scene_changed.store(true, Ordering::Release);
        self.shared.plugins.notify_reset();
    }

    fn physics_fault(&self, error: &PhysicsError) {
        if self.shared.report_physics_error(error) {
            log::error!("fatal physics error, shutting down: {error}");
            self.shared.begin_shutdown();
        }
    }

    fn apply_params(&mut self) {
        for update in self.shared.params.take() {
            match update {
                ParamUpdate::Gravity(g) => self.set_gravity(g),
                ParamUpdate::GravityX(x) => self.set_gravity(Vector3 { x, ..self.gravity }),
                ParamUpdate::GravityY(y) => self.set_gravity(Vector3 { y, ..self.gravity }),
                ParamUpdate::GravityZ(z) => self.set_gravity(Vector3 { z, ..self.gravity }),
                ParamUpdate::Erp(erp) => self.set_world(WorldParameters { erp, ..self.world }),
                ParamUpdate::Cfm(cfm) => self.set_world(WorldParameters { cfm, ..self.world }),
                ParamUpdate::Scale(scale) => {
                    self.set_world(WorldParameters { scale, ..self.world })
                }
                ParamUpdate::Connect(a, b) => {
                    if let Err(e) = self.physics.connect_nodes(a, b) {
                        self.physics_fault(&e);
                    }
                }
                ParamUpdate::Disconnect(a, b) => {
                    if let Err(e) = self.physics.disconnect_nodes(a, b) {
                        self.physics_fault(&e);
                    }
                }
                ParamUpdate::CalcMs(ms) => self.governor.set_calc_ms(ms),
                ParamUpdate::Realtime(on) => self.governor.set_realtime(on),
                ParamUpdate::FastStep(on) => self.governor.set_fast_step(on),
                ParamUpdate::SyncGraphics(on) => self.shared.graphics.set_sync(on),
                ParamUpdate::SyncIntervalMs(ms) => self.schedule.set_interval_ms(ms),
            }
        }
    }

    fn set_gravity(&mut self, gravity: Vector3) {
        self.gravity = gravity;
        self.physics.set_gravity(gravity);
    }

    fn set_world(&mut self, world: WorldParameters) {
        match world.validate() {
            Ok(()) => {
                self.world = world;
                self.physics.set_world_parameters(&world);
            }
            Err(reason) => log::warn!("ignoring world parameter update: {reason}"),
        }
    }

    /// Execute one tick.
    fn tick(&mut self) {
        let started = Instant::now();
        self.governor.begin_tick(started);
        self.tick = self.tick.next();
        self.shared.plugins.begin_tick(self.tick);

        // 1. Pending writes land before the step, never during it.
        self.apply_params();

        // 2. Step, unless paused. A released gate means shutdown.
        if !self.shared.pause.begin_step() {
            return;
        }
        let result = self.physics.step(self.governor.dt_seconds());
        self.shared.pause.end_step();

        let elapsed_ms = match result {
            Ok(()) => {
                self.step_count += 1;
                self.sim_time_ms += self.governor.calc_ms();
                self.governor.calc_ms()
            }
            Err(e) => {
                self.physics_fault(&e);
                0.0
            }
        };

        // 3. Publish.
        let frame = Frame {
            tick: self.tick,
            sim_time_ms: self.sim_time_ms,
            step_count: self.step_count,
            status: self.shared.controller.status(),
            gravity: self.gravity,
        };
        self.control.data_bus().publish(
            PHYSICS_UPDATE_CHANNEL,
            &PhysicsUpdate {
                tick: self.tick,
                sim_time_ms: self.sim_time_ms,
                step_count: self.step_count,
            },
        );
        let frame = self.shared.frames.push(frame);

        // 4. Plugins.
        self.shared.plugins.physics_tick(
            self.tick,
            &self.control,
            self.physics.as_mut(),
            elapsed_ms,
            self.sim_time_ms,
        );

        // 5. Renderer.
        self.present(&frame);

        let tick_us = started.elapsed().as_micros() as u64;
        self.shared
            .metrics
            .record_tick(self.step_count, self.sim_time_ms, tick_us);

        // 6. Pace.
        self.pace();
    }

    /// The sync schedule counts ticks at `calc_ms` each, so a faulting
    /// engine that advances no simulated time still reaches the renderer.
    fn present(&mut self, frame: &Frame) {
        let gate = &self.shared.graphics;
        if gate.sync_enabled() {
            if !self.schedule.advance(self.governor.calc_ms()) {
                return;
            }
            gate.frame_ready();
            if let Some(consumer) = &self.graphics {
                consumer.frame_ready(frame);
            }
            if gate.wait_for_draw() == SyncOutcome::TimedOut {
                log::debug!("tick {} continued without a drawn frame", frame.tick);
            }
        } else {
            gate.frame_ready();
            if let Some(consumer) = &self.graphics {
                consumer.frame_ready(frame);
            }
        }
    }

    fn pace(&mut self) {
        let now = Instant::now();
        match self.governor.plan(now) {
            Pacing::Sleep(remaining) => self.sleep_until(now + remaining),
            Pacing::Behind(over) => {
                log::debug!("tick {} behind schedule by {over:?}", self.tick);
            }
            Pacing::OnTime | Pacing::Unpaced => {}
        }
        self.shared.metrics.record_pacing(
            self.governor.behind_schedule(),
            self.governor.drift().as_micros() as u64,
        );
    }

    /// Sleep with `park_timeout` so shutdown can cut the wait short.
    fn sleep_until(&self, deadline: Instant) {
        loop {
            if self.shutting_down() {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            thread::park_timeout(deadline - now);
        }
    }
}
