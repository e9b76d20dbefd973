//! Query listeners.
//!
//! Two listener shapes observe a query. [`GeoQueryDataEventListener`]
//! receives the full record with every event; [`GeoQueryEventListener`]
//! receives only record identifiers and is bridged onto the richer shape by
//! [`KeyEventBridge`], which drops `changed` events.

use std::fmt;
use std::sync::Arc;

use crate::core::error::{GeoError, GeoResult, StoreError};
use crate::geo::point::GeoPoint;
use crate::store::Record;

/// Observer receiving full records.
pub trait GeoQueryDataEventListener: Send + Sync {
    /// A record entered the circle.
    fn on_data_entered(&self, record: &Arc<Record>, location: &GeoPoint);

    /// A record left the circle or was deleted.
    fn on_data_exited(&self, record: &Arc<Record>);

    /// A record inside the circle changed location.
    fn on_data_moved(&self, record: &Arc<Record>, location: &GeoPoint);

    /// A record inside the circle changed. Follows every move.
    fn on_data_changed(&self, record: &Arc<Record>, location: &GeoPoint);

    /// Every range finished its initial snapshot.
    fn on_query_ready(&self);

    /// A range subscription or a store read failed.
    fn on_query_error(&self, error: &StoreError);
}

/// Observer receiving record identifiers.
pub trait GeoQueryEventListener: Send + Sync {
    fn on_key_entered(&self, key: &str, location: &GeoPoint);
    fn on_key_exited(&self, key: &str);
    fn on_key_moved(&self, key: &str, location: &GeoPoint);
    fn on_query_ready(&self);
    fn on_query_error(&self, error: &StoreError);
}

/// Adapts a key listener to the data listener shape.
pub struct KeyEventBridge {
    inner: Arc<dyn GeoQueryEventListener>,
}

impl KeyEventBridge {
    pub fn new(inner: Arc<dyn GeoQueryEventListener>) -> Self {
        Self { inner }
    }
}

impl GeoQueryDataEventListener for KeyEventBridge {
    fn on_data_entered(&self, record: &Arc<Record>, location: &GeoPoint) {
        self.inner.on_key_entered(&record.id, location);
    }

    fn on_data_exited(&self, record: &Arc<Record>) {
        self.inner.on_key_exited(&record.id);
    }

    fn on_data_moved(&self, record: &Arc<Record>, location: &GeoPoint) {
        self.inner.on_key_moved(&record.id, location);
    }

    fn on_data_changed(&self, _record: &Arc<Record>, _location: &GeoPoint) {}

    fn on_query_ready(&self) {
        self.inner.on_query_ready();
    }

    fn on_query_error(&self, error: &StoreError) {
        self.inner.on_query_error(error);
    }
}

/// An event decided by the engine.
#[derive(Debug, Clone)]
pub enum QueryEvent {
    Entered {
        record: Arc<Record>,
        location: GeoPoint,
    },
    Exited {
        record: Arc<Record>,
    },
    Moved {
        record: Arc<Record>,
        location: GeoPoint,
    },
    Changed {
        record: Arc<Record>,
        location: GeoPoint,
    },
    Ready,
    Error(StoreError),
}

impl QueryEvent {
    /// Invoke the matching callback on `listener`.
    pub fn dispatch(&self, listener: &dyn GeoQueryDataEventListener) {
        match self {
            QueryEvent::Entered { record, location } => listener.on_data_entered(record, location),
            QueryEvent::Exited { record } => listener.on_data_exited(record),
            QueryEvent::Moved { record, location } => listener.on_data_moved(record, location),
            QueryEvent::Changed { record, location } => listener.on_data_changed(record, location),
            QueryEvent::Ready => listener.on_query_ready(),
            QueryEvent::Error(error) => listener.on_query_error(error),
        }
    }

    /// Identifier of the record the event is about.
    pub fn record_id(&self) -> Option<&str> {
        match self {
            QueryEvent::Entered { record, .. }
            | QueryEvent::Exited { record }
            | QueryEvent::Moved { record, .. }
            | QueryEvent::Changed { record, .. } => Some(&record.id),
            QueryEvent::Ready | QueryEvent::Error(_) => None,
        }
    }

    /// Short name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            QueryEvent::Entered { .. } => "entered",
            QueryEvent::Exited { .. } => "exited",
            QueryEvent::Moved { .. } => "moved",
            QueryEvent::Changed { .. } => "changed",
            QueryEvent::Ready => "ready",
            QueryEvent::Error(_) => "error",
        }
    }
}

impl fmt::Display for QueryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryEvent::Entered { record, location }
            | QueryEvent::Moved { record, location }
            | QueryEvent::Changed { record, location } => {
                write!(f, "{} {} at {}", self.kind(), record.id, location)
            }
            QueryEvent::Exited { record } => write!(f, "exited {}", record.id),
            QueryEvent::Ready => f.write_str("ready"),
            QueryEvent::Error(error) => write!(f, "error: {error}"),
        }
    }
}

/// Which registration call a listener came through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerKind {
    Data,
    Key,
}

/// Identity of a registered listener instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId {
    addr: usize,
    kind: ListenerKind,
}

impl ListenerId {
    /// Identity of a data listener.
    pub fn of_data(listener: &Arc<dyn GeoQueryDataEventListener>) -> Self {
        Self {
            addr: Arc::as_ptr(listener) as *const () as usize,
            kind: ListenerKind::Data,
        }
    }

    /// Identity of a key listener.
    pub fn of_key(listener: &Arc<dyn GeoQueryEventListener>) -> Self {
        Self {
            addr: Arc::as_ptr(listener) as *const () as usize,
            kind: ListenerKind::Key,
        }
    }

    pub fn kind(&self) -> ListenerKind {
        self.kind
    }
}

/// Registered listeners in insertion order.
#[derive(Default)]
pub struct ListenerRegistry {
    entries: Vec<(ListenerId, Arc<dyn GeoQueryDataEventListener>)>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Fails if the same instance is registered.
    pub fn add(
        &mut self,
        id: ListenerId,
        listener: Arc<dyn GeoQueryDataEventListener>,
    ) -> GeoResult<()> {
        if self.contains(id) {
            return Err(GeoError::DuplicateListener);
        }
        self.entries.push((id, listener));
        Ok(())
    }

    /// Unregister a listener, returning it.
    pub fn remove(&mut self, id: ListenerId) -> GeoResult<Arc<dyn GeoQueryDataEventListener>> {
        let position = self
            .entries
            .iter()
            .position(|(entry, _)| *entry == id)
            .ok_or(GeoError::UnknownListener)?;
        Ok(self.entries.remove(position).1)
    }

    pub fn contains(&self, id: ListenerId) -> bool {
        self.entries.iter().any(|(entry, _)| *entry == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every listener.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Current listeners, in registration order.
    pub fn snapshot(&self) -> Vec<Arc<dyn GeoQueryDataEventListener>> {
        self.entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Fields;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Keys(Mutex<Vec<String>>);

    impl GeoQueryEventListener for Keys {
        fn on_key_entered(&self, key: &str, _location: &GeoPoint) {
            self.0.lock().push(format!("entered {key}"));
        }
        fn on_key_exited(&self, key: &str) {
            self.0.lock().push(format!("exited {key}"));
        }
        fn on_key_moved(&self, key: &str, _location: &GeoPoint) {
            self.0.lock().push(format!("moved {key}"));
        }
        fn on_query_ready(&self) {
            self.0.lock().push("ready".into());
        }
        fn on_query_error(&self, _error: &StoreError) {
            self.0.lock().push("error".into());
        }
    }

    #[test]
    fn bridge_swallows_changed() {
        let keys = Arc::new(Keys::default());
        let bridge = KeyEventBridge::new(keys.clone());
        let record = Arc::new(Record::new("a", Fields::new(), 1));
        let location = GeoPoint::new(1.0, 2.0).unwrap();

        for event in [
            QueryEvent::Entered {
                record: record.clone(),
                location,
            },
            QueryEvent::Moved {
                record: record.clone(),
                location,
            },
            QueryEvent::Changed {
                record: record.clone(),
                location,
            },
            QueryEvent::Exited { record },
            QueryEvent::Ready,
        ] {
            event.dispatch(&bridge);
        }

        assert_eq!(
            *keys.0.lock(),
            vec!["entered a", "moved a", "exited a", "ready"]
        );
    }

    #[test]
    fn registry_rejects_duplicates_and_unknown() {
        let keys: Arc<dyn GeoQueryEventListener> = Arc::new(Keys::default());
        let id = ListenerId::of_key(&keys);
        let mut registry = ListenerRegistry::new();

        registry
            .add(id, Arc::new(KeyEventBridge::new(keys.clone())))
            .unwrap();
        assert!(matches!(
            registry.add(id, Arc::new(KeyEventBridge::new(keys.clone()))),
            Err(GeoError::DuplicateListener)
        ));
        assert_eq!(registry.len(), 1);

        registry.remove(id).unwrap();
        assert!(matches!(
            registry.remove(id),
            Err(GeoError::UnknownListener)
        ));
    }
}
