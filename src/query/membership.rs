//! Per-record membership state.
//!
//! One [`RecordInfo`] per record seen through any planned range: its last
//! location and cell, the exact in-circle flag and the last record version.
//! Records outside the circle but still covered stay in the table so a later
//! enlargement of the circle can report them without a store read.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::geo::cell::GeoCell;
use crate::geo::point::GeoPoint;
use crate::store::Record;

/// Last known state of one record.
#[derive(Debug, Clone)]
pub struct RecordInfo {
    pub location: GeoPoint,
    pub cell: GeoCell,
    pub in_circle: bool,
    pub record: Arc<Record>,

    /// Bumped on every observation; stale store reads compare against it.
    pub generation: u64,
}

/// Outcome of observing a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Outside (or unseen) to inside.
    Entered,
    /// Inside to inside at a new location.
    MovedAndChanged,
    /// Inside to inside at the same location.
    Changed,
    /// Inside to outside.
    Exited,
    /// Outside to outside.
    None,
}

/// Membership table keyed by record id.
#[derive(Debug, Default)]
pub struct MembershipStore {
    records: BTreeMap<String, RecordInfo>,
    next_generation: u64,
}

impl MembershipStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observation and classify the transition.
    pub fn observe(
        &mut self,
        record: Arc<Record>,
        location: GeoPoint,
        cell: GeoCell,
        in_circle: bool,
    ) -> Transition {
        self.next_generation += 1;
        let info = RecordInfo {
            location,
            cell,
            in_circle,
            record: Arc::clone(&record),
            generation: self.next_generation,
        };

        let previous = self.records.insert(record.id.clone(), info);
        match previous {
            Some(prev) if prev.in_circle => match (in_circle, prev.location == location) {
                (false, _) => Transition::Exited,
                (true, false) => Transition::MovedAndChanged,
                (true, true) => Transition::Changed,
            },
            _ if in_circle => Transition::Entered,
            _ => Transition::None,
        }
    }

    /// Overwrite the in-circle flag, returning the previous one.
    ///
    /// Used when the circle changes; the record itself did not.
    pub fn set_in_circle(&mut self, id: &str, in_circle: bool) -> Option<bool> {
        self.records
            .get_mut(id)
            .map(|info| std::mem::replace(&mut info.in_circle, in_circle))
    }

    pub fn get(&self, id: &str) -> Option<&RecordInfo> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Generation of the last observation of `id`.
    pub fn generation(&self, id: &str) -> Option<u64> {
        self.records.get(id).map(|info| info.generation)
    }

    pub fn remove(&mut self, id: &str) -> Option<RecordInfo> {
        self.records.remove(id)
    }

    /// Ids of every tracked record.
    pub fn ids(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    /// Records inside the circle, ordered by id.
    pub fn in_circle(&self) -> impl Iterator<Item = &RecordInfo> {
        self.records.values().filter(|info| info.in_circle)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
