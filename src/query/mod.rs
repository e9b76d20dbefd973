//! Live radius queries.
//!
//! - [`engine`] - Range subscriptions, membership diffing and re-planning
//! - [`membership`] - Per-record state and transition classification
//! - [`listener`] - Listener shapes, events and the listener registry
//! - [`delivery`] - Contexts that run listener callbacks

pub mod delivery;
pub mod engine;
pub mod listener;
pub mod membership;

pub use delivery::{
    delivery_from_config, EventDelivery, ImmediateDelivery, ThreadDelivery, TokioDelivery,
};
pub use engine::{GeoQuery, QueryContext, QueryPhase, RangeStatus};
pub use listener::{GeoQueryDataEventListener, GeoQueryEventListener, QueryEvent};
