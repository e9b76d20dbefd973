//! Document store boundary.
//!
//! The query engine consumes a store only through [`DocumentStore`]: stable
//! record handles, point reads, merge writes, field deletion, and live
//! subscriptions to single-field key ranges. Subscriptions deliver an initial
//! snapshot batch followed by incremental batches, or an error.
//!
//! - [`memory`] - In-memory store with range watches
//! - [`binding`] - Location fields and the [`GeoStore`] entry point

pub mod binding;
pub mod memory;

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::core::error::StoreResult;
use crate::geo::planner::KeyRange;

pub use binding::{GeoStore, LocationFields};
pub use memory::{MemoryStore, MemoryStoreStats};

/// Field map of a record.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// A record as read from the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    /// Record identifier, unique within the store.
    pub id: String,

    /// Stored fields.
    pub fields: Fields,

    /// Store revision at which this version was written.
    pub revision: u64,
}

impl Record {
    /// Create a record.
    pub fn new(id: impl Into<String>, fields: Fields, revision: u64) -> Self {
        Self {
            id: id.into(),
            fields,
            revision,
        }
    }

    /// Get a field value.
    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.fields.get(field)
    }

    /// Get a string field.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(|value| value.as_str())
    }
}

/// Stable handle to a record. Creating one performs no I/O.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordRef {
    id: String,
}

impl RecordRef {
    /// Create a handle for `id`.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Record identifier.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// How a write treats fields it does not mention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Keep unmentioned fields.
    Merge,
    /// Drop unmentioned fields.
    Replace,
}

/// An ordered range query over one field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RangeQuery {
    /// Field the records are ordered by.
    pub field: String,

    /// Inclusive key bounds.
    pub range: KeyRange,
}

impl RangeQuery {
    /// Create a query over `field`.
    pub fn new(field: impl Into<String>, range: KeyRange) -> Self {
        Self {
            field: field.into(),
            range,
        }
    }

    /// Check if a record falls inside the query window.
    pub fn matches(&self, record: &Record) -> bool {
        record
            .get_str(&self.field)
            .is_some_and(|key| self.range.contains(key))
    }
}

impl fmt::Display for RangeQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}", self.field, self.range)
    }
}

/// Kind of change reported for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Record entered the query window.
    Added,
    /// Record left the query window or was deleted.
    Removed,
    /// Record changed while staying in the window.
    Modified,
}

/// One record change within a batch.
#[derive(Debug, Clone)]
pub struct Change {
    pub kind: ChangeKind,
    pub record: Arc<Record>,
}

impl Change {
    pub fn added(record: Arc<Record>) -> Self {
        Self {
            kind: ChangeKind::Added,
            record,
        }
    }

    pub fn removed(record: Arc<Record>) -> Self {
        Self {
            kind: ChangeKind::Removed,
            record,
        }
    }

    pub fn modified(record: Arc<Record>) -> Self {
        Self {
            kind: ChangeKind::Modified,
            record,
        }
    }
}

/// A batch of changes delivered to a subscription.
///
/// The first batch of every subscription is the initial snapshot: every
/// matching record reported as added, possibly none.
#[derive(Debug, Clone, Default)]
pub struct ChangeBatch {
    pub changes: Vec<Change>,
}

impl ChangeBatch {
    /// Create a batch.
    pub fn new(changes: Vec<Change>) -> Self {
        Self { changes }
    }

    /// Number of changes.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Check if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Receives the batches of one subscription. May be called from any thread.
pub type ChangeSink = Arc<dyn Fn(StoreResult<ChangeBatch>) + Send + Sync>;

/// Live subscription handle.
pub trait Subscription: Send + Sync {
    /// Stop delivery. Calling this more than once has no further effect.
    fn unsubscribe(&self);
}

/// Capabilities the engine needs from a document store.
pub trait DocumentStore: Send + Sync {
    /// Handle for a record id.
    fn record_ref(&self, id: &str) -> RecordRef {
        RecordRef::new(id)
    }

    /// Read a record; `Ok(None)` if it does not exist.
    fn point_read(&self, record: &RecordRef) -> StoreResult<Option<Arc<Record>>>;

    /// Write fields, creating the record if needed.
    fn write(&self, record: &RecordRef, fields: Fields, mode: WriteMode) -> StoreResult<()>;

    /// Delete named fields of an existing record.
    fn delete_fields(&self, record: &RecordRef, fields: &[&str]) -> StoreResult<()>;

    /// Build a range query over `field`. Performs no I/O.
    fn range_query(&self, field: &str, range: &KeyRange) -> RangeQuery {
        RangeQuery::new(field, range.clone())
    }

    /// Subscribe to a range query. Batches and errors arrive through `sink`.
    fn subscribe(&self, query: RangeQuery, sink: ChangeSink) -> Box<dyn Subscription>;

    /// Read every record currently inside a range query.
    fn fetch(&self, query: &RangeQuery) -> StoreResult<Vec<Arc<Record>>>;
}
