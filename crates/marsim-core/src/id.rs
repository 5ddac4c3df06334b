//! Strongly-typed identifiers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies a physics node (body) inside the world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Counter for unique [`PluginId`] allocation.
static PLUGIN_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identity of a registered plugin.
///
/// Allocated from a process-wide monotonic counter, so an id is never
/// reused after its plugin is removed. A removed plugin can therefore never
/// be resurrected by a stale handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PluginId(u64);

impl PluginId {
    /// Allocate a fresh, unique plugin id. Thread-safe.
    pub fn next() -> Self {
        Self(PLUGIN_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "plugin#{}", self.0)
    }
}

/// Monotonically increasing tick counter.
///
/// Incremented each time the simulation thread begins a physics tick.
/// `TickId(0)` means no tick has run yet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TickId(pub u64);

impl TickId {
    /// The tick after this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for TickId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugin_ids_are_unique() {
        let a = PluginId::next();
        let b = PluginId::next();
        assert_ne!(a, b);
        assert!(b.get() > a.get());
    }

    #[test]
    fn tick_next_increments() {
        assert_eq!(TickId(4).next(), TickId(5));
        assert_eq!(TickId::default(), TickId(0));
    }
}
