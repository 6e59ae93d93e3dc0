// src/publisher.rs - Process-bus publisher
use crate::decode::TextFormat;
use crate::error::{DriverError, Result};
use crate::value::Value;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::trace;

/// The process-bus collaborator the polling engine publishes through.
///
/// Paths are registered once during startup, together with an optional
/// initial value and the display-text converter; every later update goes
/// through [`ValuePublisher::set_value`].
pub trait ValuePublisher: Send + Sync {
    /// Register a path before the event loop starts.
    fn register_path(&self, path: &str, initial: Option<Value>, format: TextFormat) -> Result<()>;

    /// Publish a new value under a registered path.
    fn set_value(&self, path: &str, value: Value) -> Result<()>;
}

#[derive(Debug, Clone)]
struct Published {
    value: Option<Value>,
    format: TextFormat,
}

/// Thread-safe in-process signal bus
///
/// Concrete [`ValuePublisher`] handed to the supervisor side of the
/// process. One instance exists per published service (per battery in
/// per-unit mode, one for the fleet otherwise).
///
/// # Examples
///
/// ```rust
/// use tl48::{SignalBus, TextFormat, Value, ValuePublisher};
///
/// let bus = SignalBus::new("bat_0");
/// bus.register_path("/Soc", None, TextFormat::Unit("%"))?;
/// bus.set_value("/Soc", Value::Float(85.0))?;
/// assert_eq!(bus.get("/Soc"), Some(Value::Float(85.0)));
/// assert_eq!(bus.text("/Soc").as_deref(), Some("85.0%"));
/// # Ok::<(), tl48::DriverError>(())
/// ```
#[derive(Debug, Clone)]
pub struct SignalBus {
    name: String,
    paths: Arc<DashMap<String, Published>>,
}

impl SignalBus {
    /// Create a bus published under `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            paths: Arc::new(DashMap::new()),
        }
    }

    /// The service name this bus is published under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current value of a path, if one has been published.
    pub fn get(&self, path: &str) -> Option<Value> {
        self.paths.get(path).and_then(|entry| entry.value.clone())
    }

    /// Display text of a path's current value.
    pub fn text(&self, path: &str) -> Option<String> {
        let entry = self.paths.get(path)?;
        entry.value.as_ref().map(|v| entry.format.render(v))
    }

    /// Whether a path has been registered.
    pub fn exists(&self, path: &str) -> bool {
        self.paths.contains_key(path)
    }

    /// Number of registered paths.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Whether any path has been registered.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl ValuePublisher for SignalBus {
    fn register_path(&self, path: &str, initial: Option<Value>, format: TextFormat) -> Result<()> {
        trace!("{}: registering path {} = {:?}", self.name, path, initial);
        if self.paths.contains_key(path) {
            return Err(DriverError::Config(format!(
                "duplicate publisher path '{}'",
                path
            )));
        }
        self.paths.insert(
            path.to_string(),
            Published {
                value: initial,
                format,
            },
        );
        Ok(())
    }

    fn set_value(&self, path: &str, value: Value) -> Result<()> {
        trace!("{}: {} = {}", self.name, path, value);
        match self.paths.get_mut(path) {
            Some(mut entry) => {
                entry.value = Some(value);
                Ok(())
            }
            None => Err(DriverError::SignalNotFound(path.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_set() {
        let bus = SignalBus::new("test");
        bus.register_path("/Dc/0/Voltage", None, TextFormat::Unit("V"))
            .unwrap();
        assert!(bus.exists("/Dc/0/Voltage"));
        assert_eq!(bus.get("/Dc/0/Voltage"), None);

        bus.set_value("/Dc/0/Voltage", Value::Float(52.3)).unwrap();
        assert_eq!(bus.get("/Dc/0/Voltage"), Some(Value::Float(52.3)));
        assert_eq!(bus.text("/Dc/0/Voltage").as_deref(), Some("52.3V"));
    }

    #[test]
    fn test_initial_value_is_published() {
        let bus = SignalBus::new("test");
        bus.register_path("/Connected", Some(Value::Int(1)), TextFormat::Plain)
            .unwrap();
        assert_eq!(bus.get("/Connected"), Some(Value::Int(1)));
    }

    #[test]
    fn test_unregistered_path_errors() {
        let bus = SignalBus::new("test");
        assert!(matches!(
            bus.set_value("/Soc", Value::Float(1.0)),
            Err(DriverError::SignalNotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_registration_errors() {
        let bus = SignalBus::new("test");
        bus.register_path("/Soc", None, TextFormat::Plain).unwrap();
        assert!(matches!(
            bus.register_path("/Soc", None, TextFormat::Plain),
            Err(DriverError::Config(_))
        ));
    }
}
