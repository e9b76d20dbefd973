//! Error types.
//!
//! [`GeoError`] is returned synchronously to callers of the library.
//! [`StoreError`] describes failures reported by the backing document store;
//! on a live query these reach listeners through the query-error event and
//! are never returned across the store boundary.

use thiserror::Error;

/// Errors surfaced by geowatch to its callers.
#[derive(Debug, Error)]
pub enum GeoError {
    /// Latitude outside [-90, 90] or longitude outside [-180, 180].
    #[error("invalid coordinates: [{latitude}, {longitude}]")]
    InvalidCoordinates { latitude: f64, longitude: f64 },

    /// Geohash precision of zero or above the supported maximum.
    #[error("invalid geohash precision {precision}; expected 1..={max}")]
    InvalidPrecision { precision: usize, max: usize },

    /// String is not a geohash over the base-32 alphabet.
    #[error("invalid geohash: {hash:?}")]
    InvalidGeohash { hash: String },

    /// Negative or non-finite query radius.
    #[error("invalid radius: {radius_km} km")]
    InvalidRadius { radius_km: f64 },

    /// The same listener instance was registered twice on one query.
    #[error("listener is already registered on this query")]
    DuplicateListener,

    /// The listener was never registered, or was removed already.
    #[error("listener is not registered on this query")]
    UnknownListener,

    /// A record carries location fields that cannot be parsed.
    #[error("malformed record {record_id}: {reason}")]
    MalformedRecord { record_id: String, reason: String },

    /// Failure reported by the backing store.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GeoError {
    /// Create an InvalidCoordinates error.
    pub fn invalid_coordinates(latitude: f64, longitude: f64) -> Self {
        Self::InvalidCoordinates {
            latitude,
            longitude,
        }
    }

    /// Create a MalformedRecord error.
    pub fn malformed(record_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            record_id: record_id.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error comes from listener registration misuse.
    pub fn is_registry_misuse(&self) -> bool {
        matches!(self, Self::DuplicateListener | Self::UnknownListener)
    }
}

/// Result type using GeoError.
pub type GeoResult<T> = Result<T, GeoError>;

/// Failures reported by a document store.
///
/// Cloneable so one failure can be fanned out to every listener.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Store is unreachable or overloaded.
    #[error("store unavailable: {message}")]
    Unavailable { message: String },

    /// Access rules rejected the operation.
    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    /// Record does not exist.
    #[error("record not found: {id}")]
    NotFound { id: String },

    /// Any other store failure.
    #[error("internal store error: {message}")]
    Internal { message: String },
}

impl StoreError {
    /// Create an Unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Create a PermissionDenied error.
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    /// Create an Internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if re-issuing the operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Result type using StoreError.
pub type StoreResult<T> = Result<T, StoreError>;
