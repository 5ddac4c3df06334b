//! Plugin registry: one indexed table with a lifecycle tag per entry.
//!
//! Entries move `Pending -> Active` at the first physics tick after the
//! one during which they were registered, and leave the table on removal.
//! Removing a plugin while its own callback is running tags it
//! `Removing`; the entry is dropped at the end of that pass. A removed id
//! is never reused, so a late promotion can never resurrect it.
//!
//! Error and reset notices are queued per plugin and delivered only when
//! the plugin's lock can be taken without waiting. A plugin that is busy in
//! a callback, including one that reported the error itself, gets its
//! notices as soon as that callback returns.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError,
};

use indexmap::IndexMap;
use smallvec::SmallVec;

use marsim_core::{PhysicsEngine, PhysicsError, PluginError, PluginId, TickId};

use crate::plugin::{ControlCenter, Plugin, PluginContext, UpdateMode};

/// Faults retained for [`take_plugin_faults`](crate::SimulatorHandle::take_plugin_faults).
const MAX_FAULTS: usize = 64;

type SharedPlugin = Arc<Mutex<Box<dyn Plugin>>>;

/// Lifecycle tag of a registered plugin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PluginState {
    /// Registered, waiting for the next tick boundary.
    Pending,
    /// Receiving callbacks according to its [`UpdateMode`].
    Active,
    /// Removed while its callback was running; dropped at the end of the pass.
    Removing,
}

/// Read-only description of a registered plugin.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PluginInfo {
    /// Registry id.
    pub id: PluginId,
    /// Name reported by the plugin at registration.
    pub name: String,
    /// Current update mode.
    pub mode: UpdateMode,
    /// Current lifecycle tag.
    pub state: PluginState,
}

/// A plugin callback that returned an error or panicked.
#[derive(Clone, Debug, PartialEq)]
pub struct PluginFault {
    /// Offending plugin.
    pub plugin: PluginId,
    /// Its name.
    pub name: String,
    /// Tick during which the fault happened.
    pub tick: TickId,
    /// What went wrong.
    pub error: PluginError,
}

#[derive(Clone, Debug)]
enum Notice {
    Error(PhysicsError),
    Reset,
}

struct PluginEntry {
    name: String,
    plugin: SharedPlugin,
    mode: UpdateMode,
    state: PluginState,
    registered_at: u64,
}

#[derive(Default)]
struct Table {
    entries: IndexMap<PluginId, PluginEntry>,
    /// Plugin whose physics callback is running.
    updating: Option<PluginId>,
    /// Plugin whose gui callback is running.
    gui_updating: Option<PluginId>,
}

impl Table {
    fn in_flight(&self, id: PluginId) -> bool {
        self.updating == Some(id) || self.gui_updating == Some(id)
    }

    /// Drop entries tagged for removal whose callbacks have returned.
    fn sweep(&mut self) {
        let (updating, gui_updating) = (self.updating, self.gui_updating);
        self.entries.retain(|id, entry| {
            entry.state != PluginState::Removing
                || updating == Some(*id)
                || gui_updating == Some(*id)
        });
    }
}

pub(crate) struct PluginRegistry {
    table: RwLock<Table>,
    current_tick: AtomicU64,
    faults: Mutex<VecDeque<PluginFault>>,
    error_count: AtomicU64,
    notices: Mutex<Vec<(PluginId, Notice)>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(Table::default()),
            current_tick: AtomicU64::new(0),
            faults: Mutex::new(VecDeque::new()),
            error_count: AtomicU64::new(0),
            notices: Mutex::new(Vec::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Table> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Table> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a plugin. It becomes active at the next tick boundary.
    pub fn add(&self, plugin: Box<dyn Plugin>, mode: UpdateMode) -> PluginId {
        let id = PluginId::next();
        let name = plugin.name().to_owned();
        let registered_at = self.current_tick.load(Ordering::Acquire);
        log::info!("plugin '{name}' registered as {id} ({mode:?})");
        self.write().entries.insert(
            id,
            PluginEntry {
                name,
                plugin: Arc::new(Mutex::new(plugin)),
                mode,
                state: PluginState::Pending,
                registered_at,
            },
        );
        id
    }

    /// Unregister a plugin. Returns `false` if the id is unknown.
    ///
    /// The plugin receives no callback that starts after this returns.
    pub fn remove(&self, id: PluginId) -> bool {
        self.notices().retain(|(p, _)| *p != id);
        let mut table = self.write();
        if table.in_flight(id) {
            return match table.entries.get_mut(&id) {
                Some(entry) => {
                    log::debug!("{id} removed during its own callback, deferring");
                    entry.state = PluginState::Removing;
                    true
                }
                None => false,
            };
        }
        match table.entries.shift_remove(&id) {
            Some(entry) => {
                log::info!("plugin '{}' ({id}) removed", entry.name);
                true
            }
            None => false,
        }
    }

    /// Change which ticks a plugin takes part in. Returns `false` if the id
    /// is unknown or already being removed.
    pub fn switch_mode(&self, id: PluginId, mode: UpdateMode) -> bool {
        let mut table = self.write();
        match table.entries.get_mut(&id) {
            Some(entry) if entry.state != PluginState::Removing => {
                log::debug!("{id} update mode {:?} -> {mode:?}", entry.mode);
                entry.mode = mode;
                true
            }
            _ => false,
        }
    }

    pub fn list(&self) -> Vec<PluginInfo> {
        self.read()
            .entries
            .iter()
            .map(|(id, entry)| PluginInfo {
                id: *id,
                name: entry.name.clone(),
                mode: entry.mode,
                state: entry.state,
            })
            .collect()
    }

    /// Drop every entry. Used at shutdown so plugins holding simulator
    /// handles do not keep the shared state alive.
    pub fn clear(&self) -> usize {
        let mut table = self.write();
        let n = table.entries.len();
        table.entries.clear();
        self.notices().clear();
        n
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    /// Record the tick now starting. Plugins added from here on are
    /// promoted no earlier than the following tick.
    pub fn begin_tick(&self, tick: TickId) {
        self.current_tick.store(tick.0, Ordering::Release);
    }

    /// Promote pending entries and snapshot the physics participants.
    fn promote_and_collect(&self, tick: TickId) -> SmallVec<[(PluginId, SharedPlugin); 16]> {
        let mut table = self.write();
        let mut due = SmallVec::new();
        for (id, entry) in table.entries.iter_mut() {
            if entry.state == PluginState::Pending && entry.registered_at < tick.0 {
                log::debug!("plugin '{}' ({id}) active from tick {tick}", entry.name);
                entry.state = PluginState::Active;
            }
            if entry.state == PluginState::Active && entry.mode.physics() {
                due.push((*id, Arc::clone(&entry.plugin)));
            }
        }
        due
    }

    /// Mark `id` as running if it is still an active physics participant.
    fn claim(&self, id: PluginId) -> bool {
        let mut table = self.write();
        let live = table
            .entries
            .get(&id)
            .is_some_and(|e| e.state == PluginState::Active && e.mode.physics());
        if live {
            table.updating = Some(id);
        }
        live
    }

    fn release(&self) {
        self.write().updating = None;
    }

    /// Run one physics pass in insertion order. Returns how many plugins
    /// were invoked.
    pub fn physics_tick(
        &self,
        tick: TickId,
        control: &ControlCenter,
        physics: &mut dyn PhysicsEngine,
        elapsed_ms: f64,
        sim_time_ms: f64,
    ) -> usize {
        let due = self.promote_and_collect(tick);
        let mut invoked = 0;
        for (id, plugin) in due {
            if !self.claim(id) {
                continue;
            }
            let mut ctx = PluginContext {
                control,
                physics: &mut *physics,
                plugin: id,
                tick,
                elapsed_ms,
                sim_time_ms,
            };
            let result = invoke(&plugin, |p| p.update(&mut ctx));
            self.release();
            self.deliver_notices(id, &plugin);
            invoked += 1;
            if let Err(error) = result {
                self.record_fault(id, tick, error);
            }
        }
        self.write().sweep();
        invoked
    }

    /// Run one gui pass on the calling thread.
    pub fn gui_tick(&self, control: &ControlCenter) -> usize {
        let tick = TickId(self.current_tick.load(Ordering::Acquire));
        let due: SmallVec<[(PluginId, SharedPlugin); 16]> = self
            .read()
            .entries
            .iter()
            .filter(|(_, e)| e.state == PluginState::Active && e.mode.gui())
            .map(|(id, e)| (*id, Arc::clone(&e.plugin)))
            .collect();
        let mut invoked = 0;
        for (id, plugin) in due {
            {
                let mut table = self.write();
                let live = table
                    .entries
                    .get(&id)
                    .is_some_and(|e| e.state == PluginState::Active && e.mode.gui());
                if !live {
                    continue;
                }
                table.gui_updating = Some(id);
            }
            let result = invoke(&plugin, |p| p.gui_update(control));
            self.write().gui_updating = None;
            self.deliver_notices(id, &plugin);
            invoked += 1;
            if let Err(error) = result {
                self.record_fault(id, tick, error);
            }
        }
        self.write().sweep();
        invoked
    }

    /// Forward a physics error to every active plugin.
    pub fn notify_error(&self, error: &PhysicsError) {
        self.notify(Notice::Error(error.clone()));
    }

    /// Tell every active plugin that the world was reset.
    pub fn notify_reset(&self) {
        self.notify(Notice::Reset);
    }

    fn notify(&self, notice: Notice) {
        for (id, plugin) in self.active() {
            self.notices().push((id, notice.clone()));
            self.deliver_notices(id, &plugin);
        }
    }

    /// Deliver queued notices to `id` unless another call holds it. The
    /// holder runs this again once it lets go.
    fn deliver_notices(&self, id: PluginId, plugin: &SharedPlugin) {
        loop {
            let mut guard = match plugin.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => return,
            };
            while let Some(notice) = self.next_notice(id) {
                let result = call_guarded(guard.as_mut(), |p| {
                    match &notice {
                        Notice::Error(error) => p.handle_error(error),
                        Notice::Reset => p.reset(),
                    }
                    Ok(())
                });
                if let Err(fault) = result {
                    self.record_fault(id, self.tick(), fault);
                }
            }
            drop(guard);
            // A notice queued while we held the lock saw it busy.
            if !self.notices().iter().any(|(p, _)| *p == id) {
                return;
            }
        }
    }

    fn next_notice(&self, id: PluginId) -> Option<Notice> {
        let live = self
            .read()
            .entries
            .get(&id)
            .is_some_and(|e| e.state == PluginState::Active);
        let mut notices = self.notices();
        if !live {
            notices.retain(|(p, _)| *p != id);
            return None;
        }
        let at = notices.iter().position(|(p, _)| *p == id)?;
        Some(notices.remove(at).1)
    }

    fn notices(&self) -> MutexGuard<'_, Vec<(PluginId, Notice)>> {
        self.notices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn active(&self) -> SmallVec<[(PluginId, SharedPlugin); 16]> {
        self.read()
            .entries
            .iter()
            .filter(|(_, e)| e.state == PluginState::Active)
            .map(|(id, e)| (*id, Arc::clone(&e.plugin)))
            .collect()
    }

    fn tick(&self) -> TickId {
        TickId(self.current_tick.load(Ordering::Acquire))
    }

    fn faults(&self) -> MutexGuard<'_, VecDeque<PluginFault>> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_fault(&self, plugin: PluginId, tick: TickId, error: PluginError) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
        let name = self
            .read()
            .entries
            .get(&plugin)
            .map(|e| e.name.clone())
            .unwrap_or_default();
        log::error!("plugin '{name}' ({plugin}) failed at tick {tick}: {error}");
        let mut faults = self.faults();
        if faults.len() == MAX_FAULTS {
            faults.pop_front();
        }
        faults.push_back(PluginFault {
            plugin,
            name,
            tick,
            error,
        });
    }

    pub fn take_faults(&self) -> Vec<PluginFault> {
        self.faults().drain(..).collect()
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }
}

/// Call into a plugin, turning a panic into [`PluginError::Panicked`].
fn invoke<F>(plugin: &SharedPlugin, f: F) -> Result<(), PluginError>
where
    F: FnOnce(&mut dyn Plugin) -> Result<(), PluginError>,
{
    let mut guard = plugin.lock().unwrap_or_else(PoisonError::into_inner);
    call_guarded(guard.as_mut(), f)
}

fn call_guarded<F>(plugin: &mut dyn Plugin, f: F) -> Result<(), PluginError>
where
    F: FnOnce(&mut dyn Plugin) -> Result<(), PluginError>,
{
    match panic::catch_unwind(AssertUnwindSafe(|| f(plugin))) {
        Ok(result) => result,
        Err(payload) => Err(PluginError::Panicked {
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    impl Plugin for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn update(&mut self, _ctx: &mut PluginContext<'_>) -> Result<(), PluginError> {
            Ok(())
        }
    }

    #[test]
    fn add_is_pending_until_promoted() {
        let reg = PluginRegistry::new();
        reg.begin_tick(TickId(4));
        let id = reg.add(Box::new(Named("a")), UpdateMode::Physics);
        let info = reg.list();
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].id, id);
        assert_eq!(info[0].name, "a");
        assert_eq!(info[0].state, PluginState::Pending);

        // Same tick: still pending.
        drop(reg.promote_and_collect(TickId(4)));
        assert_eq!(reg.list()[0].state, PluginState::Pending);

        let due = reg.promote_and_collect(TickId(5));
        assert_eq!(due.len(), 1);
        assert_eq!(reg.list()[0].state, PluginState::Active);
    }

    #[test]
    fn list_keeps_insertion_order() {
        let reg = PluginRegistry::new();
        let a = reg.add(Box::new(Named("a")), UpdateMode::Physics);
        let b = reg.add(Box::new(Named("b")), UpdateMode::Gui);
        let c = reg.add(Box::new(Named("c")), UpdateMode::Both);
        assert!(reg.remove(b));
        let ids: Vec<_> = reg.list().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![a, c]);
    }

    #[test]
    fn remove_unknown_is_false() {
        let reg = PluginRegistry::new();
        let id = reg.add(Box::new(Named("a")), UpdateMode::Physics);
        assert!(reg.remove(id));
        assert!(!reg.remove(id));
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn removal_before_promotion_wins() {
        let reg = PluginRegistry::new();
        let id = reg.add(Box::new(Named("a")), UpdateMode::Physics);
        assert!(reg.remove(id));
        assert!(reg.promote_and_collect(TickId(10)).is_empty());
        assert!(reg.list().is_empty());
    }

    #[test]
    fn removal_of_in_flight_plugin_is_deferred() {
        let reg = PluginRegistry::new();
        let id = reg.add(Box::new(Named("a")), UpdateMode::Physics);
        drop(reg.promote_and_collect(TickId(1)));
        assert!(reg.claim(id));
        assert!(reg.remove(id));
        assert_eq!(reg.list()[0].state, PluginState::Removing);
        // A tagged entry is never claimed again.
        reg.release();
        assert!(!reg.claim(id));
        reg.write().sweep();
        assert!(reg.list().is_empty());
    }

    #[test]
    fn switch_mode_filters_participants() {
        let reg = PluginRegistry::new();
        let id = reg.add(Box::new(Named("a")), UpdateMode::Physics);
        assert!(reg.switch_mode(id, UpdateMode::Gui));
        assert!(reg.promote_and_collect(TickId(1)).is_empty());
        assert!(reg.switch_mode(id, UpdateMode::Both));
        assert_eq!(reg.promote_and_collect(TickId(2)).len(), 1);
        assert!(!reg.switch_mode(PluginId::next(), UpdateMode::None));
    }

    #[test]
    fn panics_become_plugin_errors() {
        struct Boom;
        impl Plugin for Boom {
            fn name(&self) -> &str {
                "boom"
            }
            fn update(&mut self, _ctx: &mut PluginContext<'_>) -> Result<(), PluginError> {
                Ok(())
            }
            fn reset(&mut self) {
                panic!("reset exploded");
            }
        }

        let reg = PluginRegistry::new();
        reg.add(Box::new(Boom), UpdateMode::Physics);
        drop(reg.promote_and_collect(TickId(1)));
        reg.notify_reset();
        // A plugin that panicked stays callable.
        reg.notify_reset();

        let faults = reg.take_faults();
        assert_eq!(faults.len(), 2);
        assert_eq!(faults[0].name, "boom");
        assert_eq!(
            faults[0].error,
            PluginError::Panicked {
                message: "reset exploded".into()
            }
        );
        assert_eq!(reg.error_count(), 2);
        assert!(reg.take_faults().is_empty());
    }

    #[test]
    fn notices_wait_while_plugin_is_busy() {
        use std::sync::atomic::AtomicUsize;

        struct Resets(Arc<AtomicUsize>);
        impl Plugin for Resets {
            fn name(&self) -> &str {
                "resets"
            }
            fn update(&mut self, _ctx: &mut PluginContext<'_>) -> Result<(), PluginError> {
                Ok(())
            }
            fn reset(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let resets = Arc::new(AtomicUsize::new(0));
        let reg = PluginRegistry::new();
        let id = reg.add(Box::new(Resets(Arc::clone(&resets))), UpdateMode::Physics);
        drop(reg.promote_and_collect(TickId(1)));
        let plugin = Arc::clone(&reg.read().entries[&id].plugin);

        let busy = plugin.lock().unwrap();
        reg.notify_reset();
        reg.notify_reset();
        assert_eq!(resets.load(Ordering::SeqCst), 0);
        drop(busy);

        reg.deliver_notices(id, &plugin);
        assert_eq!(resets.load(Ordering::SeqCst), 2);
        assert!(reg.notices().is_empty());
    }

    #[test]
    fn removal_discards_queued_notices() {
        let reg = PluginRegistry::new();
        let id = reg.add(Box::new(Named("a")), UpdateMode::Physics);
        drop(reg.promote_and_collect(TickId(1)));
        let plugin = Arc::clone(&reg.read().entries[&id].plugin);
        let busy = plugin.lock().unwrap();
        reg.notify_error(&PhysicsError::SolverDiverged {
            reason: "nan".into(),
        });
        assert_eq!(reg.notices().len(), 1);
        assert!(reg.remove(id));
        assert!(reg.notices().is_empty());
        drop(busy);
    }

    #[test]
    fn fault_log_is_bounded() {
        let reg = PluginRegistry::new();
        let id = PluginId::next();
        for _ in 0..(MAX_FAULTS + 10) {
            reg.record_fault(
                id,
                TickId(0),
                PluginError::ExecutionFailed {
                    reason: "x".into(),
                },
            );
        }
        assert_eq!(reg.take_faults().len(), MAX_FAULTS);
        assert_eq!(reg.error_count(), (MAX_FAULTS + 10) as u64);
    }
}
