//! Live radius query engine.
//!
//! A [`GeoQuery`] keeps one store subscription per planned key range and
//! folds their change batches into per-record membership. Each decided
//! transition becomes a [`QueryEvent`] handed to the delivery context.
//!
//! # Locking
//!
//! All engine state sits behind one mutex. Store calls (subscribe,
//! unsubscribe, point reads) are collected while the lock is held and issued
//! after it is released; their results re-acquire the lock to apply. Events
//! are queued in decision order under the lock and handed to the delivery
//! context after it is released.
//!
//! # Range lifecycle
//!
//! Every planned range carries a token. A batch whose token no longer
//! matches the planned range (torn down, or replaced by a re-plan) is
//! discarded. A range is `Pending` until its first batch, then `Ready`. An
//! error marks it `Failed` and closes it; the next re-plan reopens it.

use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};

use crate::core::error::{GeoResult, StoreError, StoreResult};
use crate::core::outbox::Outbox;
use crate::geo::cell::GeoCell;
use crate::geo::planner::{CoveragePlanner, KeyRange};
use crate::geo::point::GeoPoint;
use crate::query::delivery::EventDelivery;
use crate::query::listener::{
    GeoQueryDataEventListener, GeoQueryEventListener, KeyEventBridge, ListenerId,
    ListenerRegistry, QueryEvent,
};
use crate::query::membership::{MembershipStore, Transition};
use crate::store::{
    ChangeBatch, ChangeKind, ChangeSink, DocumentStore, LocationFields, Record, Subscription,
};

/// Collaborators shared by every query created from one store binding.
#[derive(Clone)]
pub struct QueryContext {
    pub store: Arc<dyn DocumentStore>,
    pub fields: LocationFields,
    pub planner: CoveragePlanner,
    pub delivery: Arc<dyn EventDelivery>,
}

/// State of one planned range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeStatus {
    /// Subscribed, initial snapshot not yet delivered.
    Pending,
    /// Streaming incremental changes.
    Ready,
    /// Subscription failed and was closed.
    Failed,
}

/// State of the query as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPhase {
    /// No listeners, no subscriptions.
    Idle,
    /// At least one range has not delivered its snapshot.
    Loading,
    /// Every range delivered its snapshot.
    Ready,
}

struct RangeSlot {
    token: u64,
    status: RangeStatus,
    subscription: Option<Box<dyn Subscription>>,
}

impl RangeSlot {
    fn pending(token: u64) -> Self {
        Self {
            token,
            status: RangeStatus::Pending,
            subscription: None,
        }
    }
}

struct QueryState {
    center: GeoPoint,
    radius_m: f64,
    listeners: ListenerRegistry,
    ranges: BTreeMap<KeyRange, RangeSlot>,
    membership: MembershipStore,

    /// Removal checks whose point read failed, retried on the next re-plan.
    unresolved: BTreeMap<String, u64>,

    next_token: u64,
    phase: QueryPhase,
}

/// An event bound to the listeners registered when it was decided.
struct Dispatch {
    listeners: Vec<Arc<dyn GeoQueryDataEventListener>>,
    event: QueryEvent,
}

/// Store calls to issue once the state lock is released.
#[derive(Default)]
struct Followup {
    teardown: Vec<Box<dyn Subscription>>,
    subscribe: Vec<(KeyRange, u64)>,
    recheck: Vec<(String, u64)>,
}

struct QueryInner {
    context: QueryContext,
    state: Mutex<QueryState>,
    events: Outbox<Dispatch>,
    this: Weak<QueryInner>,
}

/// A live radius query.
///
/// Subscriptions open when the first listener is added and close when the
/// last one is removed or the query is dropped.
pub struct GeoQuery {
    inner: Arc<QueryInner>,
}

impl GeoQuery {
    /// Create an idle query. Radius is in kilometers.
    pub fn new(context: QueryContext, center: GeoPoint, radius_km: f64) -> GeoResult<Self> {
        let radius_m = context.planner.radius_from_km(radius_km)?;
        let inner = Arc::new_cyclic(|this| QueryInner {
            context,
            state: Mutex::new(QueryState {
                center,
                radius_m,
                listeners: ListenerRegistry::new(),
                ranges: BTreeMap::new(),
                membership: MembershipStore::new(),
                unresolved: BTreeMap::new(),
                next_token: 0,
                phase: QueryPhase::Idle,
            }),
            events: Outbox::new(),
            this: this.clone(),
        });
        Ok(Self { inner })
    }

    /// Current center.
    pub fn center(&self) -> GeoPoint {
        self.inner.state.lock().center
    }

    /// Current radius in kilometers, after clamping.
    pub fn radius(&self) -> f64 {
        self.inner.state.lock().radius_m / 1000.0
    }

    /// Move the circle.
    pub fn set_center(&self, center: GeoPoint) {
        self.inner.relocate(Some(center), None);
    }

    /// Resize the circle. Radius is in kilometers.
    pub fn set_radius(&self, radius_km: f64) -> GeoResult<()> {
        let radius_m = self.inner.context.planner.radius_from_km(radius_km)?;
        self.inner.relocate(None, Some(radius_m));
        Ok(())
    }

    /// Move and resize the circle in one re-plan.
    ///
    /// Calling this with unchanged values reopens failed ranges and
    /// otherwise leaves subscriptions untouched.
    pub fn set_center_and_radius(&self, center: GeoPoint, radius_km: f64) -> GeoResult<()> {
        let radius_m = self.inner.context.planner.radius_from_km(radius_km)?;
        self.inner.relocate(Some(center), Some(radius_m));
        Ok(())
    }

    /// Register a listener receiving full records.
    pub fn add_listener(&self, listener: Arc<dyn GeoQueryDataEventListener>) -> GeoResult<()> {
        self.inner.register(ListenerId::of_data(&listener), listener)
    }

    /// Register a listener receiving record identifiers.
    pub fn add_key_listener(&self, listener: Arc<dyn GeoQueryEventListener>) -> GeoResult<()> {
        let id = ListenerId::of_key(&listener);
        self.inner
            .register(id, Arc::new(KeyEventBridge::new(listener)))
    }

    /// Unregister a data listener.
    pub fn remove_listener(&self, listener: &Arc<dyn GeoQueryDataEventListener>) -> GeoResult<()> {
        self.inner.unregister(ListenerId::of_data(listener))
    }

    /// Unregister a key listener.
    pub fn remove_key_listener(&self, listener: &Arc<dyn GeoQueryEventListener>) -> GeoResult<()> {
        self.inner.unregister(ListenerId::of_key(listener))
    }

    /// Unregister every listener and close all subscriptions.
    pub fn remove_all_listeners(&self) {
        let mut followup = Followup::default();
        {
            let mut state = self.inner.state.lock();
            state.listeners.clear();
            self.inner.reset(&mut state, &mut followup);
        }
        self.inner.finish(followup);
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.state.lock().listeners.len()
    }

    /// Planned ranges. An idle query reports the ranges it would open.
    pub fn ranges(&self) -> BTreeSet<KeyRange> {
        let state = self.inner.state.lock();
        if state.phase == QueryPhase::Idle {
            return self.inner.context.planner.plan(&state.center, state.radius_m);
        }
        state.ranges.keys().cloned().collect()
    }

    /// Status of one planned range.
    pub fn range_status(&self, range: &KeyRange) -> Option<RangeStatus> {
        self.inner
            .state
            .lock()
            .ranges
            .get(range)
            .map(|slot| slot.status)
    }

    pub fn phase(&self) -> QueryPhase {
        self.inner.state.lock().phase
    }

    pub fn is_ready(&self) -> bool {
        self.phase() == QueryPhase::Ready
    }

    /// Check if a record is currently inside the circle.
    pub fn contains_record(&self, id: &str) -> bool {
        self.inner
            .state
            .lock()
            .membership
            .get(id)
            .is_some_and(|info| info.in_circle)
    }

    /// Records inside the circle with their locations, ordered by id.
    pub fn records_in_circle(&self) -> Vec<(Arc<Record>, GeoPoint)> {
        self.inner
            .state
            .lock()
            .membership
            .in_circle()
            .map(|info| (Arc::clone(&info.record), info.location))
            .collect()
    }
}

impl Drop for GeoQuery {
    fn drop(&mut self) {
        self.remove_all_listeners();
    }
}

impl QueryInner {
    fn register(
        &self,
        id: ListenerId,
        listener: Arc<dyn GeoQueryDataEventListener>,
    ) -> GeoResult<()> {
        let mut followup = Followup::default();
        {
            let mut state = self.state.lock();
            state.listeners.add(id, Arc::clone(&listener))?;

            if state.listeners.len() == 1 {
                tracing::info!(
                    center = %state.center,
                    radius_m = state.radius_m,
                    "query started"
                );
                state.phase = QueryPhase::Loading;
                self.replan(&mut state, &mut followup);
            } else {
                // Late listeners catch up on what the others already saw.
                for info in state.membership.in_circle() {
                    self.events.push(Dispatch {
                        listeners: vec![Arc::clone(&listener)],
                        event: QueryEvent::Entered {
                            record: Arc::clone(&info.record),
                            location: info.location,
                        },
                    });
                }
                if state.phase == QueryPhase::Ready {
                    self.events.push(Dispatch {
                        listeners: vec![listener],
                        event: QueryEvent::Ready,
                    });
                }
            }
        }
        self.finish(followup);
        Ok(())
    }

    fn unregister(&self, id: ListenerId) -> GeoResult<()> {
        let mut followup = Followup::default();
        {
            let mut state = self.state.lock();
            state.listeners.remove(id)?;
            if state.listeners.is_empty() {
                self.reset(&mut state, &mut followup);
            }
        }
        self.finish(followup);
        Ok(())
    }

    fn relocate(&self, center: Option<GeoPoint>, radius_m: Option<f64>) {
        let mut followup = Followup::default();
        {
            let mut state = self.state.lock();
            if let Some(center) = center {
                state.center = center;
            }
            if let Some(radius_m) = radius_m {
                state.radius_m = radius_m;
            }
            if !state.listeners.is_empty() {
                self.replan(&mut state, &mut followup);
            }
        }
        self.finish(followup);
    }

    /// Reconcile open ranges with a fresh plan and re-evaluate every record.
    fn replan(&self, state: &mut QueryState, followup: &mut Followup) {
        let planned = self.context.planner.plan(&state.center, state.radius_m);

        let closing: Vec<KeyRange> = state
            .ranges
            .iter()
            .filter(|(range, slot)| slot.status == RangeStatus::Failed || !planned.contains(*range))
            .map(|(range, _)| range.clone())
            .collect();
        for range in closing {
            if let Some(slot) = state.ranges.remove(&range) {
                tracing::debug!(range = %range, "closing range");
                followup.teardown.extend(slot.subscription);
            }
        }

        let mut opened = false;
        for range in planned {
            if state.ranges.contains_key(&range) {
                continue;
            }
            state.next_token += 1;
            let token = state.next_token;
            state.ranges.insert(range.clone(), RangeSlot::pending(token));
            followup.subscribe.push((range, token));
            opened = true;
        }

        self.reevaluate(state);
        followup
            .recheck
            .extend(std::mem::take(&mut state.unresolved));

        if opened {
            state.phase = QueryPhase::Loading;
        }
        self.check_ready(state);
    }

    /// Apply the current circle to every known record.
    fn reevaluate(&self, state: &mut QueryState) {
        for id in state.membership.ids() {
            let Some(info) = state.membership.get(&id) else {
                continue;
            };
            let covered = self.covered(state, &info.cell);
            let in_circle = covered && info.location.distance_to(&state.center) <= state.radius_m;
            let was_in_circle = info.in_circle;
            let record = Arc::clone(&info.record);
            let location = info.location;

            if !covered {
                state.membership.remove(&id);
                if was_in_circle {
                    self.emit(state, QueryEvent::Exited { record });
                }
                continue;
            }

            if in_circle != was_in_circle {
                state.membership.set_in_circle(&id, in_circle);
                let event = if in_circle {
                    QueryEvent::Entered { record, location }
                } else {
                    QueryEvent::Exited { record }
                };
                self.emit(state, event);
            }
        }
    }

    fn reset(&self, state: &mut QueryState, followup: &mut Followup) {
        if state.phase == QueryPhase::Idle && state.ranges.is_empty() {
            return;
        }
        for (_, slot) in std::mem::take(&mut state.ranges) {
            followup.teardown.extend(slot.subscription);
        }
        state.membership.clear();
        state.unresolved.clear();
        state.phase = QueryPhase::Idle;
        tracing::info!(center = %state.center, "query reset");
    }

    fn check_ready(&self, state: &mut QueryState) {
        let all_ready = !state.ranges.is_empty()
            && state
                .ranges
                .values()
                .all(|slot| slot.status == RangeStatus::Ready);
        if state.phase == QueryPhase::Loading && all_ready {
            state.phase = QueryPhase::Ready;
            tracing::debug!(ranges = state.ranges.len(), "query ready");
            self.emit(state, QueryEvent::Ready);
        }
    }

    /// Check if a cell lies in a range that is still being served.
    fn covered(&self, state: &QueryState, cell: &GeoCell) -> bool {
        state
            .ranges
            .iter()
            .any(|(range, slot)| {
                slot.status != RangeStatus::Failed && range.contains(cell.as_str())
            })
    }

    fn sink(&self, range: KeyRange, token: u64) -> ChangeSink {
        let this = self.this.clone();
        Arc::new(move |result: StoreResult<ChangeBatch>| {
            if let Some(inner) = this.upgrade() {
                inner.on_batch(&range, token, result);
            }
        })
    }

    fn on_batch(&self, range: &KeyRange, token: u64, result: StoreResult<ChangeBatch>) {
        let mut followup = Followup::default();
        {
            let mut state = self.state.lock();
            let status = match state.ranges.get(range) {
                Some(slot) if slot.token == token => slot.status,
                _ => {
                    tracing::debug!(range = %range, token, "discarding batch for a closed range");
                    return;
                }
            };
            if status == RangeStatus::Failed {
                tracing::debug!(range = %range, "discarding batch for a failed range");
                return;
            }

            match result {
                Err(error) => self.fail_range(&mut state, range, error, &mut followup),
                Ok(batch) => {
                    if let Some(slot) = state.ranges.get_mut(range) {
                        slot.status = RangeStatus::Ready;
                    }
                    let snapshot: Option<BTreeSet<String>> = (status == RangeStatus::Pending)
                        .then(|| {
                            batch
                                .changes
                                .iter()
                                .map(|change| change.record.id.clone())
                                .collect()
                        });
                    for change in batch.changes {
                        match change.kind {
                            ChangeKind::Added | ChangeKind::Modified => {
                                self.observe(&mut state, change.record)
                            }
                            ChangeKind::Removed => {
                                if let Some(generation) =
                                    state.membership.generation(&change.record.id)
                                {
                                    followup
                                        .recheck
                                        .push((change.record.id.clone(), generation));
                                }
                            }
                        }
                    }
                    if let Some(snapshot) = snapshot {
                        self.evict_missing(&mut state, range, &snapshot);
                        self.check_ready(&mut state);
                    }
                }
            }
        }
        self.finish(followup);
    }

    fn fail_range(
        &self,
        state: &mut QueryState,
        range: &KeyRange,
        error: StoreError,
        followup: &mut Followup,
    ) {
        tracing::warn!(range = %range, error = %error, "range subscription failed");
        if let Some(slot) = state.ranges.get_mut(range) {
            slot.status = RangeStatus::Failed;
            followup.teardown.extend(slot.subscription.take());
        }
        self.emit(state, QueryEvent::Error(error));
    }

    /// Drop tracked records whose last cell lies in `range` but which its
    /// initial snapshot did not report. They vanished while the range was
    /// not being served.
    fn evict_missing(
        &self,
        state: &mut QueryState,
        range: &KeyRange,
        snapshot: &BTreeSet<String>,
    ) {
        for id in state.membership.ids() {
            if snapshot.contains(&id) {
                continue;
            }
            let missing = state
                .membership
                .get(&id)
                .is_some_and(|info| range.contains(info.cell.as_str()));
            if !missing {
                continue;
            }
            state.unresolved.remove(&id);
            if let Some(info) = state.membership.remove(&id) {
                tracing::debug!(
                    record_id = %id,
                    range = %range,
                    "evicting record missing from snapshot"
                );
                if info.in_circle {
                    self.emit(
                        state,
                        QueryEvent::Exited {
                            record: info.record,
                        },
                    );
                }
            }
        }
    }

    fn observe(&self, state: &mut QueryState, record: Arc<Record>) {
        let location = match self.context.fields.location(&record) {
            Ok(Some(location)) => location,
            Ok(None) => {
                tracing::debug!(record_id = %record.id, "ignoring record without location");
                return;
            }
            Err(error) => {
                tracing::warn!(
                    record_id = %record.id,
                    error = %error,
                    "ignoring malformed location"
                );
                return;
            }
        };

        let in_circle = location.distance_to(&state.center) <= state.radius_m;
        let cell = self.context.fields.cell_for(&location);
        let transition = state
            .membership
            .observe(Arc::clone(&record), location, cell, in_circle);

        match transition {
            Transition::Entered => self.emit(state, QueryEvent::Entered { record, location }),
            Transition::MovedAndChanged => {
                self.emit(
                    state,
                    QueryEvent::Moved {
                        record: Arc::clone(&record),
                        location,
                    },
                );
                self.emit(state, QueryEvent::Changed { record, location });
            }
            Transition::Changed => self.emit(state, QueryEvent::Changed { record, location }),
            Transition::Exited => self.emit(state, QueryEvent::Exited { record }),
            Transition::None => {}
        }
    }

    /// Resolve a removal by reading the record's current location.
    fn recheck(&self, id: &str, generation: u64) {
        let reference = self.context.store.record_ref(id);
        let read = self.context.store.point_read(&reference);

        {
            let mut state = self.state.lock();
            if state.membership.generation(id) != Some(generation) {
                tracing::debug!(record_id = %id, "record observed again, dropping removal check");
                return;
            }

            match read {
                Err(error) => {
                    tracing::warn!(
                        record_id = %id,
                        error = %error,
                        "re-reading removed record failed"
                    );
                    state.unresolved.insert(id.to_string(), generation);
                    self.emit(&state, QueryEvent::Error(error));
                }
                Ok(current) => {
                    state.unresolved.remove(id);
                    let location = current
                        .as_deref()
                        .and_then(|record| self.context.fields.location(record).ok().flatten());
                    let still_covered = location.is_some_and(|location| {
                        self.covered(&state, &self.context.fields.cell_for(&location))
                    });
                    if still_covered {
                        // The covering range reports the move.
                        return;
                    }
                    if let Some(info) = state.membership.remove(id) {
                        if info.in_circle {
                            self.emit(
                                &state,
                                QueryEvent::Exited {
                                    record: info.record,
                                },
                            );
                        }
                    }
                }
            }
        }
        self.flush_events();
    }

    fn emit(&self, state: &QueryState, event: QueryEvent) {
        if state.listeners.is_empty() {
            return;
        }
        self.events.push(Dispatch {
            listeners: state.listeners.snapshot(),
            event,
        });
    }

    fn finish(&self, followup: Followup) {
        self.flush_events();

        for subscription in followup.teardown {
            subscription.unsubscribe();
        }
        for (range, token) in followup.subscribe {
            self.open_range(range, token);
        }
        for (id, generation) in followup.recheck {
            self.recheck(&id, generation);
        }
    }

    fn open_range(&self, range: KeyRange, token: u64) {
        let query = self
            .context
            .store
            .range_query(&self.context.fields.geohash, &range);
        tracing::debug!(range = %range, token, "opening range");
        let subscription = self
            .context
            .store
            .subscribe(query, self.sink(range.clone(), token));

        let stale = {
            let mut state = self.state.lock();
            match state.ranges.get_mut(&range) {
                Some(slot) if slot.token == token && slot.status != RangeStatus::Failed => {
                    slot.subscription = Some(subscription);
                    None
                }
                _ => Some(subscription),
            }
        };
        if let Some(subscription) = stale {
            subscription.unsubscribe();
        }
    }

    fn flush_events(&self) {
        self.events.drain(|Dispatch { listeners, event }| {
            self.context.delivery.deliver(Box::new(move || {
                for listener in &listeners {
                    event.dispatch(listener.as_ref());
                }
            }));
        });
    }
}
