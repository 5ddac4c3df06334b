//! Reusable plugin test fixtures.
//!
//! - [`CountingPlugin`]: records every callback into a shared [`PluginTally`].
//! - [`FailingPlugin`]: returns an error from every physics update.
//! - [`PanickingPlugin`]: panics in every physics update.
//! - [`SelfRemovingPlugin`]: unregisters itself on its n-th update.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use marsim_core::{PhysicsError, PluginError, TickId};
use marsim_engine::{ControlCenter, Plugin, PluginContext};

/// Order in which plugins were called, shared between several plugins.
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// What a [`CountingPlugin`] observed.
#[derive(Default)]
pub struct PluginTally {
    pub updates: AtomicUsize,
    pub gui_updates: AtomicUsize,
    pub resets: AtomicUsize,
    pub errors: Mutex<Vec<PhysicsError>>,
    pub ticks: Mutex<Vec<TickId>>,
    pub elapsed_ms: Mutex<Vec<f64>>,
}

impl PluginTally {
    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::Acquire)
    }

    pub fn gui_updates(&self) -> usize {
        self.gui_updates.load(Ordering::Acquire)
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::Acquire)
    }

    pub fn errors(&self) -> Vec<PhysicsError> {
        self.errors.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Ticks on which `update` ran.
    pub fn ticks(&self) -> Vec<TickId> {
        self.ticks.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn elapsed_ms(&self) -> Vec<f64> {
        self.elapsed_ms
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Records every callback it receives.
pub struct CountingPlugin {
    name: String,
    seen: Arc<PluginTally>,
    call_log: Option<CallLog>,
}

impl CountingPlugin {
    pub fn new(name: impl Into<String>) -> (Self, Arc<PluginTally>) {
        let seen = Arc::new(PluginTally::default());
        let plugin = Self {
            name: name.into(),
            seen: Arc::clone(&seen),
            call_log: None,
        };
        (plugin, seen)
    }

    /// Also append this plugin's name to `log` on every update.
    pub fn with_call_log(mut self, log: CallLog) -> Self {
        self.call_log = Some(log);
        self
    }
}

impl Plugin for CountingPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn update(&mut self, ctx: &mut PluginContext<'_>) -> Result<(), PluginError> {
        self.seen.updates.fetch_add(1, Ordering::AcqRel);
        self.seen
            .ticks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ctx.tick());
        self.seen
            .elapsed_ms
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ctx.elapsed_ms());
        if let Some(log) = &self.call_log {
            log.lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(self.name.clone());
        }
        Ok(())
    }

    fn gui_update(&mut self, _control: &ControlCenter) -> Result<(), PluginError> {
        self.seen.gui_updates.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn handle_error(&mut self, error: &PhysicsError) {
        self.seen
            .errors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(error.clone());
    }

    fn reset(&mut self) {
        self.seen.resets.fetch_add(1, Ordering::AcqRel);
    }
}

/// Fails every physics update.
pub struct FailingPlugin;

impl Plugin for FailingPlugin {
    fn name(&self) -> &str {
        "failing"
    }

    fn update(&mut self, ctx: &mut PluginContext<'_>) -> Result<(), PluginError> {
        Err(PluginError::ExecutionFailed {
            reason: format!("refused tick {}", ctx.tick()),
        })
    }
}

/// Panics in every physics update.
pub struct PanickingPlugin;

impl Plugin for PanickingPlugin {
    fn name(&self) -> &str {
        "panicking"
    }

    fn update(&mut self, _ctx: &mut PluginContext<'_>) -> Result<(), PluginError> {
        panic!("plugin exploded");
    }
}

/// Removes itself from the registry on its `n`-th update.
pub struct SelfRemovingPlugin {
    remove_on: usize,
    seen: Arc<PluginTally>,
    call_log: Option<CallLog>,
}

impl SelfRemovingPlugin {
    pub fn new(remove_on: usize) -> (Self, Arc<PluginTally>) {
        let seen = Arc::new(PluginTally::default());
        let plugin = Self {
            remove_on,
            seen: Arc::clone(&seen),
            call_log: None,
        };
        (plugin, seen)
    }

    pub fn with_call_log(mut self, log: CallLog) -> Self {
        self.call_log = Some(log);
        self
    }
}

impl Plugin for SelfRemovingPlugin {
    fn name(&self) -> &str {
        "self-removing"
    }

    fn update(&mut self, ctx: &mut PluginContext<'_>) -> Result<(), PluginError> {
        let n = self.seen.updates.fetch_add(1, Ordering::AcqRel) + 1;
        if let Some(log) = &self.call_log {
            log.lock()
                .unwrap_or_else(|e| e.into_inner())
                .push("self-removing".to_owned());
        }
        if n == self.remove_on {
            let id = ctx.plugin_id();
            if !ctx.control().sim().remove_plugin(id) {
                return Err(PluginError::ExecutionFailed {
                    reason: format!("{id} could not remove itself"),
                });
            }
        }
        Ok(())
    }
}
