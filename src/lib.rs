//! geowatch - live geographic radius queries over range-indexed document stores.
//!
//! Records carry a location as two fields: a geohash string used as the only
//! sort key for range queries, and a `[latitude, longitude]` pair used for
//! exact distance checks. A [`GeoQuery`] covers its circle with a small set of
//! geohash key ranges, subscribes to each one, and turns the raw change
//! streams into entered / exited / moved / changed / ready / error events for
//! its listeners. Moving or resizing the circle re-plans the ranges and only
//! touches the subscriptions that differ.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Listeners                              │
//! │      data listeners (records)   │   key listeners (ids only)    │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  ▲  event delivery context
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Query Engine                             │
//! │  membership │ ready tracking │ re-planning │ stale batch tokens │
//! └─────────────────────────────────────────────────────────────────┘
//!                 │ plan                          ▲ change batches
//! ┌──────────────────────────────┐  ┌────────────────────────────────┐
//! │      Coverage Planner        │  │        Document Store          │
//! │  geohash cells → key ranges  │  │  range subscriptions │ reads   │
//! └──────────────────────────────┘  └────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::error`] - Error types
//! - [`core::outbox`] - Ordered hand-off of work out of locked sections
//!
//! ## Geo
//! - [`geo::point`] - Coordinates and distances
//! - [`geo::cell`] - Geohash encoding, bounds and neighbors
//! - [`geo::planner`] - Circle coverage as key ranges
//!
//! ## Store
//! - [`store`] - Document store contract
//! - [`store::memory`] - In-memory store with live range subscriptions
//! - [`store::binding`] - Location field layout and the [`GeoStore`] facade
//!
//! ## Query
//! - [`query::engine`] - Live query state machine
//! - [`query::membership`] - Per-record membership bookkeeping
//! - [`query::listener`] - Listener traits and registry
//! - [`query::delivery`] - Event delivery contexts
//!
//! ## CLI
//! - [`cli::commands`] - CLI command implementations
//!
//! # Guarantees
//!
//! - Every location within the radius lies in exactly one subscribed range.
//! - Events for one record reach each listener in the order they were decided.
//! - Ready fires once per listener, after every range has loaded its initial
//!   snapshot.
//! - Batches from a replaced subscription are ignored.

// Core infrastructure
pub mod core;

// Geohash math and coverage planning
pub mod geo;

// Document store contract and implementations
pub mod store;

// Live queries
pub mod query;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, error};
pub use self::core::error::{GeoError, GeoResult, StoreError, StoreResult};
pub use geo::{CoveragePlanner, GeoCell, GeoPoint, KeyRange};
pub use query::{GeoQuery, GeoQueryDataEventListener, GeoQueryEventListener, QueryEvent};
pub use store::{DocumentStore, GeoStore, LocationFields, MemoryStore, Record};
