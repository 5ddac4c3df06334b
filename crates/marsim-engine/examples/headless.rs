//! Headless simulator: a bouncing ball, a telemetry plugin, and a renderer
//! that acknowledges frames from its own thread.
//!
//! Demonstrates:
//!   1. Constructing a `Simulator` with custom physics and scene collaborators
//!   2. Starting, single-stepping, and stopping the simulation
//!   3. Loading a scene through the request queue while running
//!   4. Changing gravity at runtime (applied at the next tick boundary)
//!   5. Synchronized drawing with `finished_draw`
//!   6. Graceful shutdown with a `ShutdownReport`
//!
//! Run with:
//!   RUST_LOG=info cargo run --example headless

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use marsim_core::{
    Frame, GraphicsConsumer, LoadRequest, NodeId, PhysicsEngine, PhysicsError, PluginError,
    RequestError, SceneStore, Vector3, WorldParameters,
};
use marsim_engine::{Collaborators, Plugin, PluginContext, SimConfig, Simulator, UpdateMode};

// ─── Physics: one ball falling onto a floor ─────────────────────

struct BallWorld {
    height: f64,
    velocity: f64,
    gravity: f64,
    restitution: f64,
    bounces: usize,
}

impl PhysicsEngine for BallWorld {
    fn init_world(&mut self) -> Result<(), PhysicsError> {
        self.height = 10.0;
        self.velocity = 0.0;
        Ok(())
    }

    fn free_world(&mut self) {}

    fn step(&mut self, dt: f64) -> Result<(), PhysicsError> {
        self.velocity += self.gravity * dt;
        self.height += self.velocity * dt;
        if self.height <= 0.0 {
            self.height = -self.height;
            self.velocity = -self.velocity * self.restitution;
            self.bounces += 1;
        }
        if !self.height.is_finite() {
            return Err(PhysicsError::SolverDiverged {
                reason: format!("height {}", self.height),
            });
        }
        Ok(())
    }

    fn set_gravity(&mut self, gravity: Vector3) {
        self.gravity = gravity.z;
    }

    fn set_world_parameters(&mut self, params: &WorldParameters) {
        self.restitution = (1.0 - params.erp).clamp(0.0, 1.0);
    }

    fn check_collisions(&mut self) -> usize {
        self.bounces
    }

    fn connect_nodes(&mut self, _a: NodeId, _b: NodeId) -> Result<(), PhysicsError> {
        Ok(())
    }

    fn disconnect_nodes(&mut self, _a: NodeId, b: NodeId) -> Result<(), PhysicsError> {
        Err(PhysicsError::UnknownNode { node: b })
    }
}

// ─── Scene store: remembers what was loaded ─────────────────────

#[derive(Default)]
struct Scenes {
    loaded: Vec<String>,
}

impl SceneStore for Scenes {
    fn load(
        &mut self,
        physics: &mut dyn PhysicsEngine,
        request: &LoadRequest,
    ) -> Result<(), RequestError> {
        if request.filename.extension().is_none_or(|e| e != "scn") {
            return Err(RequestError::LoadFailed {
                reason: format!("{} is not a scene file", request.filename.display()),
            });
        }
        physics.init_world()?;
        self.loaded.push(request.robot_name.clone());
        Ok(())
    }

    fn save(&mut self, _physics: &mut dyn PhysicsEngine, path: &Path) -> Result<(), RequestError> {
        println!("  (would save {} robots to {})", self.loaded.len(), path.display());
        Ok(())
    }
}

// ─── Plugin: prints sim time every 50 ticks ─────────────────────

struct Telemetry;

impl Plugin for Telemetry {
    fn name(&self) -> &str {
        "telemetry"
    }

    fn update(&mut self, ctx: &mut PluginContext<'_>) -> Result<(), PluginError> {
        if ctx.tick().0 % 50 == 0 {
            let contacts = ctx.physics().check_collisions();
            println!(
                "  tick {:>4}  sim {:>7.1} ms  bounces {contacts}",
                ctx.tick(),
                ctx.sim_time_ms()
            );
        }
        Ok(())
    }
}

// ─── Renderer: acknowledges frames on its own thread ────────────

struct Renderer {
    pending: crossbeam_channel::Sender<Frame>,
}

impl GraphicsConsumer for Renderer {
    fn frame_ready(&self, frame: &Frame) {
        let _ = self.pending.try_send(frame.clone());
    }
}

fn main() {
    marsim_test_utils::init_logging();

    let (frame_tx, frame_rx) = crossbeam_channel::bounded::<Frame>(4);
    let physics = BallWorld {
        height: 0.0,
        velocity: 0.0,
        gravity: 0.0,
        restitution: 0.9,
        bounces: 0,
    };
    let collaborators = Collaborators::new(physics, Scenes::default())
        .with_graphics(Arc::new(Renderer { pending: frame_tx }));
    let config = SimConfig {
        calc_ms: 2.0,
        sync_graphics: true,
        sync_interval_ms: 20.0,
        ..SimConfig::default()
    };
    let mut sim = match Simulator::new(config, collaborators) {
        Ok(sim) => sim,
        Err(e) => {
            eprintln!("failed to start: {e}");
            return;
        }
    };

    // Draw thread: "renders" each announced frame, then acknowledges it.
    let draw_handle = sim.handle();
    let drawing = Arc::new(AtomicBool::new(true));
    let draw_flag = Arc::clone(&drawing);
    let drawer = thread::spawn(move || {
        let mut drawn = 0u64;
        while draw_flag.load(Ordering::Acquire) {
            if let Ok(_frame) = frame_rx.recv_timeout(Duration::from_millis(50)) {
                thread::sleep(Duration::from_millis(1));
                draw_handle.finished_draw();
                draw_handle.post_graphics_update();
                drawn += 1;
            }
        }
        drawn
    });

    sim.add_plugin(Box::new(Telemetry), UpdateMode::Physics);

    println!("single-stepping 3 ticks");
    for _ in 0..3 {
        sim.single_step();
        thread::sleep(Duration::from_millis(10));
    }

    println!("running");
    sim.start_simulation();
    thread::sleep(Duration::from_millis(300));

    println!("loading scene while running");
    match sim.load_scene("rover.scn", "rover", true) {
        Ok(()) => println!("  loaded, status {}", sim.status()),
        Err(e) => println!("  load failed: {e}"),
    }
    if let Err(e) = sim.load_scene("notes.txt", "", true) {
        println!("  rejected as expected: {e}");
    }

    println!("switching to lunar gravity");
    if let Err(e) = sim.set_gravity(Vector3::new(0.0, 0.0, -1.62)) {
        println!("  {e}");
    }
    thread::sleep(Duration::from_millis(300));

    sim.stop_simulation();
    match sim.check_collisions() {
        Ok(n) => println!("bounces so far: {n}"),
        Err(e) => println!("collision check failed: {e}"),
    }
    let _ = sim.save_scene("world.scn", false);

    let metrics = sim.metrics();
    println!(
        "ticks {}  sim time {:.1} ms  syncs {} (missed {})  behind {}",
        metrics.ticks,
        metrics.sim_time_ms,
        metrics.graphics_syncs,
        metrics.missed_syncs,
        metrics.behind_schedule
    );

    let report = sim.exit();
    drawing.store(false, Ordering::Release);
    let drawn = drawer.join().unwrap_or(0);
    println!("shutdown: {report:?}, frames drawn {drawn}");
}
