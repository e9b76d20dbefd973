//! Common test utilities.
//!
//! This module contains shared helpers for integration tests.
//! Import with `mod common;` in test files.

#![allow(dead_code)]

use geowatch::core::error::StoreError;
use geowatch::geo::point::{GeoPoint, METERS_PER_DEGREE_LATITUDE};
use geowatch::query::delivery::ImmediateDelivery;
use geowatch::query::listener::{GeoQueryDataEventListener, GeoQueryEventListener};
use geowatch::store::{
    ChangeBatch, ChangeSink, DocumentStore, Fields, GeoStore, LocationFields, MemoryStore,
    RangeQuery, Record, RecordRef, Subscription, WriteMode,
};
use geowatch::StoreResult;
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

/// Default wait for asynchronous delivery.
pub const WAIT: Duration = Duration::from_secs(5);

/// Create a configuration file with the given content.
pub fn create_config_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write config");
    file
}

/// Parse a point, panicking on invalid coordinates.
pub fn point(latitude: f64, longitude: f64) -> GeoPoint {
    GeoPoint::new(latitude, longitude).expect("valid coordinates")
}

/// Point `meters` north of `center`.
pub fn north_of(center: &GeoPoint, meters: f64) -> GeoPoint {
    point(
        center.latitude() + meters / METERS_PER_DEGREE_LATITUDE,
        center.longitude(),
    )
}

/// In-memory store bound with default fields and inline delivery.
pub fn memory_geo_store() -> (MemoryStore, GeoStore) {
    let memory = MemoryStore::new();
    let store = GeoStore::new(Arc::new(memory.clone()), Arc::new(ImmediateDelivery));
    (memory, store)
}

/// Records every callback as a short string such as `entered:a`.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<String>>,
    changed: Condvar,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, event: String) {
        self.events.lock().push(event);
        self.changed.notify_all();
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    /// Return and clear the recorded events.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn count(&self, event: &str) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }

    /// Block until at least `n` events were recorded.
    pub fn wait_for(&self, n: usize, timeout: Duration) -> Vec<String> {
        let deadline = Instant::now() + timeout;
        let mut events = self.events.lock();
        while events.len() < n {
            if self.changed.wait_until(&mut events, deadline).timed_out() {
                break;
            }
        }
        events.clone()
    }
}

impl GeoQueryDataEventListener for RecordingListener {
    fn on_data_entered(&self, record: &Arc<Record>, _location: &GeoPoint) {
        self.push(format!("entered:{}", record.id));
    }

    fn on_data_exited(&self, record: &Arc<Record>) {
        self.push(format!("exited:{}", record.id));
    }

    fn on_data_moved(&self, record: &Arc<Record>, _location: &GeoPoint) {
        self.push(format!("moved:{}", record.id));
    }

    fn on_data_changed(&self, record: &Arc<Record>, _location: &GeoPoint) {
        self.push(format!("changed:{}", record.id));
    }

    fn on_query_ready(&self) {
        self.push("ready".to_string());
    }

    fn on_query_error(&self, error: &StoreError) {
        self.push(format!("error:{}", error));
    }
}

/// Key listener counterpart of [`RecordingListener`].
#[derive(Default)]
pub struct RecordingKeyListener {
    events: Mutex<Vec<String>>,
}

impl RecordingKeyListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl GeoQueryEventListener for RecordingKeyListener {
    fn on_key_entered(&self, key: &str, _location: &GeoPoint) {
        self.events.lock().push(format!("entered:{key}"));
    }

    fn on_key_exited(&self, key: &str) {
        self.events.lock().push(format!("exited:{key}"));
    }

    fn on_key_moved(&self, key: &str, _location: &GeoPoint) {
        self.events.lock().push(format!("moved:{key}"));
    }

    fn on_query_ready(&self) {
        self.events.lock().push("ready".to_string());
    }

    fn on_query_error(&self, error: &StoreError) {
        self.events.lock().push(format!("error:{error}"));
    }
}

/// One subscription captured by [`ManualStore`].
#[derive(Clone)]
pub struct CapturedSubscription {
    pub query: RangeQuery,
    pub sink: ChangeSink,
    pub closed: Arc<AtomicBool>,
}

impl CapturedSubscription {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Push a batch through the sink, as the store would.
    pub fn deliver(&self, batch: StoreResult<ChangeBatch>) {
        (self.sink)(batch);
    }
}

struct ManualSubscription {
    closed: Arc<AtomicBool>,
}

impl Subscription for ManualSubscription {
    fn unsubscribe(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Store that never delivers anything on its own.
///
/// Subscriptions are captured so tests decide which batches arrive, when,
/// and on which (possibly stale) sink.
#[derive(Default)]
pub struct ManualStore {
    records: Mutex<BTreeMap<String, Arc<Record>>>,
    subscriptions: Mutex<Vec<CapturedSubscription>>,
}

impl ManualStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Set the record returned by point reads.
    pub fn put(&self, record: Arc<Record>) {
        self.records.lock().insert(record.id.clone(), record);
    }

    pub fn remove(&self, id: &str) {
        self.records.lock().remove(id);
    }

    pub fn subscriptions(&self) -> Vec<CapturedSubscription> {
        self.subscriptions.lock().clone()
    }

    pub fn open_subscriptions(&self) -> Vec<CapturedSubscription> {
        self.subscriptions()
            .into_iter()
            .filter(|s| !s.is_closed())
            .collect()
    }

    /// Open subscription whose range holds `key`.
    pub fn open_for(&self, key: &str) -> Option<CapturedSubscription> {
        self.open_subscriptions()
            .into_iter()
            .find(|s| s.query.range.contains(key))
    }
}

impl DocumentStore for ManualStore {
    fn point_read(&self, record: &RecordRef) -> StoreResult<Option<Arc<Record>>> {
        Ok(self.records.lock().get(record.id()).cloned())
    }

    fn write(&self, _record: &RecordRef, _fields: Fields, _mode: WriteMode) -> StoreResult<()> {
        Err(StoreError::internal("manual store is read-only"))
    }

    fn delete_fields(&self, _record: &RecordRef, _fields: &[&str]) -> StoreResult<()> {
        Err(StoreError::internal("manual store is read-only"))
    }

    fn subscribe(&self, query: RangeQuery, sink: ChangeSink) -> Box<dyn Subscription> {
        let closed = Arc::new(AtomicBool::new(false));
        self.subscriptions.lock().push(CapturedSubscription {
            query,
            sink,
            closed: Arc::clone(&closed),
        });
        Box::new(ManualSubscription { closed })
    }

    fn fetch(&self, _query: &RangeQuery) -> StoreResult<Vec<Arc<Record>>> {
        Ok(Vec::new())
    }
}

/// Record carrying the default location fields for `location`.
pub fn located_record(id: &str, location: &GeoPoint, revision: u64) -> Arc<Record> {
    Arc::new(Record::new(
        id,
        LocationFields::default().encode(location),
        revision,
    ))
}
