//! Configuration property values and the keys the simulator listens to.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use crate::traits::{PropertyListener, PropertyService};

/// A dynamically-typed configuration value.
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    /// Boolean toggle.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating-point value.
    Double(f64),
    /// Free-form text.
    Text(String),
}

impl PropertyValue {
    /// Interpret as a boolean. Integers are truthy when non-zero.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    /// Interpret as a float. Integers are widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(d) => Some(*d),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Double(d) => write!(f, "{d}"),
            Self::Text(s) => write!(f, "{s:?}"),
        }
    }
}

/// Property keys the simulator reacts to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    /// Simulated milliseconds per tick.
    CalcMs,
    /// Real-time pacing toggle.
    Realtime,
    /// Fast-step toggle (bypasses pacing).
    FastStep,
    /// Synchronized drawing toggle.
    SyncGraphics,
    /// Simulated milliseconds between graphics handshakes.
    SyncIntervalMs,
    /// Gravity X component.
    GravityX,
    /// Gravity Y component.
    GravityY,
    /// Gravity Z component.
    GravityZ,
    /// World error reduction parameter.
    WorldErp,
    /// World constraint force mixing.
    WorldCfm,
}

/// Namespace under which simulator properties may be published.
pub const KEY_PREFIX: &str = "simulator/";

impl ConfigKey {
    /// Every key, in declaration order.
    pub const ALL: [ConfigKey; 10] = [
        Self::CalcMs,
        Self::Realtime,
        Self::FastStep,
        Self::SyncGraphics,
        Self::SyncIntervalMs,
        Self::GravityX,
        Self::GravityY,
        Self::GravityZ,
        Self::WorldErp,
        Self::WorldCfm,
    ];

    /// The canonical property name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CalcMs => "calc_ms",
            Self::Realtime => "realtime",
            Self::FastStep => "fast_step",
            Self::SyncGraphics => "sync_graphics",
            Self::SyncIntervalMs => "sync_interval_ms",
            Self::GravityX => "gravity_x",
            Self::GravityY => "gravity_y",
            Self::GravityZ => "gravity_z",
            Self::WorldErp => "world_erp",
            Self::WorldCfm => "world_cfm",
        }
    }

    /// The name under [`KEY_PREFIX`], e.g. `simulator/calc_ms`.
    pub fn qualified(self) -> String {
        format!("{KEY_PREFIX}{}", self.as_str())
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a property name does not match any [`ConfigKey`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownKey(pub String);

impl fmt::Display for UnknownKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown config key '{}'", self.0)
    }
}

impl std::error::Error for UnknownKey {}

impl FromStr for ConfigKey {
    type Err = UnknownKey;

    /// Case-insensitive; an optional `simulator/` prefix is accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let name = lower.strip_prefix(KEY_PREFIX).unwrap_or(&lower);
        ConfigKey::ALL
            .into_iter()
            .find(|k| k.as_str() == name)
            .ok_or_else(|| UnknownKey(s.to_string()))
    }
}

/// In-memory [`PropertyService`] that stores values and notifies
/// registered listeners on every change.
///
/// Listeners are called on the thread that calls [`set`](PropertyService::set),
/// after the internal lock is released.
#[derive(Default)]
pub struct MemoryProperties {
    values: RwLock<HashMap<String, PropertyValue>>,
    listeners: RwLock<Vec<Arc<dyn PropertyListener>>>,
}

impl MemoryProperties {
    /// An empty property store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl PropertyService for MemoryProperties {
    fn get(&self, key: &str) -> Option<PropertyValue> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: PropertyValue) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.clone());
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for l in listeners {
            l.property_changed(key, &value);
        }
    }

    fn subscribe(&self, listener: Arc<dyn PropertyListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn keys_parse_with_prefix_and_case() {
        assert_eq!("calc_ms".parse::<ConfigKey>(), Ok(ConfigKey::CalcMs));
        assert_eq!(
            "Simulator/Gravity_Z".parse::<ConfigKey>(),
            Ok(ConfigKey::GravityZ)
        );
        assert!("draw_contacts".parse::<ConfigKey>().is_err());
    }

    #[test]
    fn every_key_parses_from_its_name() {
        for k in ConfigKey::ALL {
            assert_eq!(k.as_str().parse::<ConfigKey>(), Ok(k));
            assert_eq!(k.qualified().parse::<ConfigKey>(), Ok(k));
        }
    }

    #[test]
    fn value_coercions() {
        assert_eq!(PropertyValue::Int(0).as_bool(), Some(false));
        assert_eq!(PropertyValue::Int(3).as_f64(), Some(3.0));
        assert_eq!(PropertyValue::Text("x".into()).as_f64(), None);
        assert_eq!(PropertyValue::Double(1.0).as_bool(), None);
    }

    struct Recorder(Mutex<Vec<(String, PropertyValue)>>);

    impl PropertyListener for Recorder {
        fn property_changed(&self, key: &str, value: &PropertyValue) {
            self.0.lock().unwrap().push((key.to_string(), value.clone()));
        }
    }

    #[test]
    fn memory_properties_store_and_notify() {
        let props = MemoryProperties::new();
        let rec = Arc::new(Recorder(Mutex::new(Vec::new())));
        props.subscribe(rec.clone());

        props.set("calc_ms", PropertyValue::Double(5.0));
        assert_eq!(props.get("calc_ms"), Some(PropertyValue::Double(5.0)));
        assert_eq!(props.get("missing"), None);

        let seen = rec.0.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "calc_ms");
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn parse_never_panics(s in ".{0,32}") {
                let _ = s.parse::<ConfigKey>();
            }
        }
    }
}
