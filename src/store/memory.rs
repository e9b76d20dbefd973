//! In-memory document store with live range watches.
//!
//! Records live in an ordered map and every mutation bumps a store-wide
//! revision. Each watch tracks which records currently fall inside its key
//! range; a mutation diffs that membership and produces at most one change
//! per watch: entering the range is `Added`, leaving it (or deletion) is
//! `Removed`, changing inside it is `Modified`.
//!
//! Sinks are never invoked while the store lock is held. Batches are queued
//! under the lock and handed off in revision order afterwards, so a sink may
//! call back into the store.
//!
//! The store also carries fault hooks used to exercise the engine: holding
//! initial snapshots, failing subscriptions, failing live watches and
//! failing point reads.

use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use super::{
    Change, ChangeBatch, ChangeSink, DocumentStore, Fields, RangeQuery, Record, RecordRef,
    Subscription, WriteMode,
};
use crate::core::error::{StoreError, StoreResult};
use crate::core::outbox::Outbox;

/// Shared in-memory store. Cloning yields another handle to the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    state: Mutex<MemoryState>,
    outbox: Outbox<Delivery>,
}

type Delivery = (ChangeSink, StoreResult<ChangeBatch>);

#[derive(Default)]
struct MemoryState {
    /// Records indexed by id.
    records: BTreeMap<String, Arc<Record>>,

    /// Current revision.
    revision: u64,

    /// Active watches indexed by watch id.
    watches: HashMap<u64, RangeWatch>,

    /// Next watch id.
    next_watch_id: u64,

    /// Whether new watches hold back their batches.
    hold_snapshots: bool,

    /// Subscriptions whose range contains one of these keys fail.
    failing_keys: Vec<(String, StoreError)>,

    /// Errors returned by upcoming point reads.
    point_read_failures: VecDeque<StoreError>,

    subscribe_calls: u64,
    unsubscribe_calls: u64,
    point_reads: u64,
}

struct RangeWatch {
    query: RangeQuery,

    /// Ids of the records currently inside the range.
    members: BTreeSet<String>,

    sink: ChangeSink,

    /// Batches withheld until [`MemoryStore::release_held`].
    held: Option<Vec<ChangeBatch>>,
}

impl RangeWatch {
    fn send(&mut self, batch: ChangeBatch, outbox: &Outbox<Delivery>) {
        match self.held.as_mut() {
            Some(held) => held.push(batch),
            None => outbox.push((Arc::clone(&self.sink), Ok(batch))),
        }
    }
}

/// Store statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStoreStats {
    /// Number of records.
    pub records: usize,
    /// Number of live watches.
    pub watch_count: usize,
    /// Total subscribe calls.
    pub subscribe_calls: u64,
    /// Total effective unsubscribe calls.
    pub unsubscribe_calls: u64,
    /// Total point reads.
    pub point_reads: u64,
    /// Current revision.
    pub revision: u64,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delete a record.
    pub fn delete(&self, record: &RecordRef) -> StoreResult<()> {
        {
            let mut state = self.inner.state.lock();
            let Some(previous) = state.records.remove(record.id()) else {
                return Err(StoreError::NotFound {
                    id: record.id().to_string(),
                });
            };
            state.revision += 1;
            self.inner.notify(&mut state, &previous, None);
        }
        self.inner.flush();
        Ok(())
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.inner.state.lock().records.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().records.is_empty()
    }

    /// Get statistics.
    pub fn stats(&self) -> MemoryStoreStats {
        let state = self.inner.state.lock();
        MemoryStoreStats {
            records: state.records.len(),
            watch_count: state.watches.len(),
            subscribe_calls: state.subscribe_calls,
            unsubscribe_calls: state.unsubscribe_calls,
            point_reads: state.point_reads,
            revision: state.revision,
        }
    }

    /// Make new subscriptions withhold their batches until released.
    pub fn hold_initial_snapshots(&self, hold: bool) {
        self.inner.state.lock().hold_snapshots = hold;
    }

    /// Deliver every withheld batch, in order, and stop holding them.
    pub fn release_held(&self) {
        {
            let mut state = self.inner.state.lock();
            for watch in state.watches.values_mut() {
                if let Some(held) = watch.held.take() {
                    for batch in held {
                        self.inner.outbox.push((Arc::clone(&watch.sink), Ok(batch)));
                    }
                }
            }
        }
        self.inner.flush();
    }

    /// Fail every later subscription whose range contains `key`.
    pub fn fail_subscriptions_containing(&self, key: impl Into<String>, error: StoreError) {
        self.inner
            .state
            .lock()
            .failing_keys
            .push((key.into(), error));
    }

    /// Stop failing subscriptions.
    pub fn clear_subscription_failures(&self) {
        self.inner.state.lock().failing_keys.clear();
    }

    /// Send `error` to every live watch whose range contains `key` and drop
    /// those watches. Returns the number of watches failed.
    pub fn fail_watches_containing(&self, key: &str, error: StoreError) -> usize {
        let failed = {
            let mut state = self.inner.state.lock();
            let ids: Vec<u64> = state
                .watches
                .iter()
                .filter(|(_, watch)| watch.query.range.contains(key))
                .map(|(id, _)| *id)
                .collect();
            for id in &ids {
                if let Some(watch) = state.watches.remove(id) {
                    self.inner.outbox.push((watch.sink, Err(error.clone())));
                }
            }
            ids.len()
        };
        self.inner.flush();
        failed
    }

    /// Fail the next `count` point reads with `error`.
    pub fn fail_next_point_reads(&self, count: usize, error: StoreError) {
        let mut state = self.inner.state.lock();
        for _ in 0..count {
            state.point_read_failures.push_back(error.clone());
        }
    }
}

impl MemoryInner {
    /// Queue the change of one record for every watch. `current` is the
    /// record after the mutation, `None` once deleted.
    fn notify(
        &self,
        state: &mut MemoryState,
        previous: &Arc<Record>,
        current: Option<&Arc<Record>>,
    ) {
        let id = previous.id.as_str();
        for watch in state.watches.values_mut() {
            let was_member = watch.members.contains(id);
            let is_member = current.is_some_and(|record| watch.query.matches(record));

            let change = match (was_member, is_member, current) {
                (false, true, Some(record)) => {
                    watch.members.insert(id.to_string());
                    Change::added(Arc::clone(record))
                }
                (true, true, Some(record)) => Change::modified(Arc::clone(record)),
                (true, false, _) => {
                    watch.members.remove(id);
                    // A deleted record is reported with its last fields.
                    Change::removed(Arc::clone(current.unwrap_or(previous)))
                }
                _ => continue,
            };
            watch.send(ChangeBatch::new(vec![change]), &self.outbox);
        }
    }

    fn flush(&self) {
        self.outbox.drain(|(sink, batch)| sink(batch));
    }

    fn unsubscribe(&self, watch_id: u64) {
        let mut state = self.state.lock();
        if state.watches.remove(&watch_id).is_some() {
            state.unsubscribe_calls += 1;
            tracing::debug!(watch_id, "watch closed");
        }
    }
}

impl DocumentStore for MemoryStore {
    fn point_read(&self, record: &RecordRef) -> StoreResult<Option<Arc<Record>>> {
        let mut state = self.inner.state.lock();
        state.point_reads += 1;
        if let Some(error) = state.point_read_failures.pop_front() {
            return Err(error);
        }
        Ok(state.records.get(record.id()).cloned())
    }

    fn write(&self, record: &RecordRef, fields: Fields, mode: WriteMode) -> StoreResult<()> {
        {
            let mut state = self.inner.state.lock();
            state.revision += 1;
            let revision = state.revision;

            let previous = state.records.get(record.id()).cloned();
            let mut merged = match (mode, &previous) {
                (WriteMode::Merge, Some(existing)) => existing.fields.clone(),
                _ => Fields::new(),
            };
            merged.extend(fields);

            let updated = Arc::new(Record::new(record.id(), merged, revision));
            state
                .records
                .insert(record.id().to_string(), Arc::clone(&updated));
            let previous = previous.unwrap_or_else(|| Arc::clone(&updated));
            self.inner.notify(&mut state, &previous, Some(&updated));
        }
        self.inner.flush();
        Ok(())
    }

    fn delete_fields(&self, record: &RecordRef, fields: &[&str]) -> StoreResult<()> {
        {
            let mut state = self.inner.state.lock();
            let Some(existing) = state.records.get(record.id()).cloned() else {
                return Err(StoreError::NotFound {
                    id: record.id().to_string(),
                });
            };

            let mut remaining = existing.fields.clone();
            for field in fields {
                remaining.remove(*field);
            }

            state.revision += 1;
            let updated = Arc::new(Record::new(record.id(), remaining, state.revision));
            state
                .records
                .insert(record.id().to_string(), Arc::clone(&updated));
            self.inner.notify(&mut state, &existing, Some(&updated));
        }
        self.inner.flush();
        Ok(())
    }

    fn subscribe(&self, query: RangeQuery, sink: ChangeSink) -> Box<dyn Subscription> {
        let watch_id = {
            let mut state = self.inner.state.lock();
            state.subscribe_calls += 1;
            state.next_watch_id += 1;
            let watch_id = state.next_watch_id;

            let failure = state
                .failing_keys
                .iter()
                .find(|(key, _)| query.range.contains(key))
                .map(|(_, error)| error.clone());

            if let Some(error) = failure {
                tracing::debug!(watch_id, query = %query, "subscription rejected");
                self.inner.outbox.push((sink, Err(error)));
            } else {
                let matching: Vec<Arc<Record>> = state
                    .records
                    .values()
                    .filter(|record| query.matches(record))
                    .cloned()
                    .collect();

                let mut watch = RangeWatch {
                    members: matching.iter().map(|record| record.id.clone()).collect(),
                    query,
                    sink,
                    held: state.hold_snapshots.then(Vec::new),
                };
                let snapshot = ChangeBatch::new(matching.into_iter().map(Change::added).collect());
                watch.send(snapshot, &self.inner.outbox);

                tracing::debug!(watch_id, query = %watch.query, "watch opened");
                state.watches.insert(watch_id, watch);
            }
            watch_id
        };
        self.inner.flush();

        Box::new(MemorySubscription {
            store: Arc::downgrade(&self.inner),
            watch_id,
            closed: AtomicBool::new(false),
        })
    }

    fn fetch(&self, query: &RangeQuery) -> StoreResult<Vec<Arc<Record>>> {
        let state = self.inner.state.lock();
        Ok(state
            .records
            .values()
            .filter(|record| query.matches(record))
            .cloned()
            .collect())
    }
}

struct MemorySubscription {
    store: Weak<MemoryInner>,
    watch_id: u64,
    closed: AtomicBool,
}

impl Subscription for MemorySubscription {
    fn unsubscribe(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(store) = self.store.upgrade() {
            store.unsubscribe(self.watch_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::planner::KeyRange;
    use crate::store::ChangeKind;
    use serde_json::json;

    type Seen = Arc<Mutex<Vec<StoreResult<Vec<(ChangeKind, String)>>>>>;

    fn recorder() -> (ChangeSink, Seen) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&seen);
        let sink: ChangeSink = Arc::new(move |batch: StoreResult<ChangeBatch>| {
            captured.lock().push(batch.map(|batch| {
                batch
                    .changes
                    .iter()
                    .map(|change| (change.kind, change.record.id.clone()))
                    .collect()
            }));
        });
        (sink, seen)
    }

    fn put(store: &MemoryStore, id: &str, key: &str) {
        let mut fields = Fields::new();
        fields.insert("g".into(), json!(key));
        store
            .write(&RecordRef::new(id), fields, WriteMode::Merge)
            .unwrap();
    }

    fn query(prefix: &str) -> RangeQuery {
        RangeQuery::new("g", KeyRange::for_prefix(prefix))
    }

    #[test]
    fn snapshot_then_incremental_changes() {
        let store = MemoryStore::new();
        put(&store, "a", "u4pr0");
        put(&store, "b", "9q8y0");

        let (sink, seen) = recorder();
        let _sub = store.subscribe(query("u4pr"), sink);
        put(&store, "c", "u4pr1");
        put(&store, "a", "u4pr2");
        put(&store, "a", "9q8y1");

        let seen = seen.lock();
        assert_eq!(seen[0], Ok(vec![(ChangeKind::Added, "a".to_string())]));
        assert_eq!(seen[1], Ok(vec![(ChangeKind::Added, "c".to_string())]));
        assert_eq!(seen[2], Ok(vec![(ChangeKind::Modified, "a".to_string())]));
        assert_eq!(seen[3], Ok(vec![(ChangeKind::Removed, "a".to_string())]));
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn merge_keeps_unmentioned_fields() {
        let store = MemoryStore::new();
        let record = RecordRef::new("a");
        let mut fields = Fields::new();
        fields.insert("name".into(), json!("Ada"));
        store.write(&record, fields, WriteMode::Replace).unwrap();
        put(&store, "a", "u4pr");

        let read = store.point_read(&record).unwrap().unwrap();
        assert_eq!(read.get_str("name"), Some("Ada"));
        assert_eq!(read.get_str("g"), Some("u4pr"));

        store.delete_fields(&record, &["g"]).unwrap();
        let read = store.point_read(&record).unwrap().unwrap();
        assert!(read.get("g").is_none());
        assert!(matches!(
            store.delete_fields(&RecordRef::new("missing"), &["g"]),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let store = MemoryStore::new();
        let (sink, seen) = recorder();
        let sub = store.subscribe(query("u4"), sink);
        sub.unsubscribe();
        sub.unsubscribe();
        put(&store, "a", "u4pr");

        let stats = store.stats();
        assert_eq!(stats.watch_count, 0);
        assert_eq!(stats.unsubscribe_calls, 1);
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn held_snapshots_are_released_in_order() {
        let store = MemoryStore::new();
        store.hold_initial_snapshots(true);
        let (sink, seen) = recorder();
        let _sub = store.subscribe(query("u4"), sink);
        put(&store, "a", "u4pr");
        assert!(seen.lock().is_empty());

        store.release_held();
        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], Ok(vec![]));
        assert_eq!(seen[1], Ok(vec![(ChangeKind::Added, "a".to_string())]));
    }

    #[test]
    fn failure_hooks() {
        let store = MemoryStore::new();
        store.fail_subscriptions_containing("u4pr", StoreError::permission_denied("rules"));
        let (sink, seen) = recorder();
        let _sub = store.subscribe(query("u4"), sink);
        assert!(matches!(
            seen.lock()[0],
            Err(StoreError::PermissionDenied { .. })
        ));
        assert_eq!(store.stats().watch_count, 0);

        store.fail_next_point_reads(1, StoreError::unavailable("offline"));
        assert!(store.point_read(&RecordRef::new("a")).is_err());
        assert!(store.point_read(&RecordRef::new("a")).unwrap().is_none());
    }

    #[test]
    fn deletion_reports_removed() {
        let store = MemoryStore::new();
        put(&store, "a", "u4pr");
        let (sink, seen) = recorder();
        let _sub = store.subscribe(query("u4"), sink);
        store.delete(&RecordRef::new("a")).unwrap();

        assert_eq!(
            seen.lock()[1],
            Ok(vec![(ChangeKind::Removed, "a".to_string())])
        );
        assert!(store.is_empty());
    }
}
