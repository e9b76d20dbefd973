//! Geospatial primitives.
//!
//! - [`point`] - Coordinates and distance helpers
//! - [`cell`] - Geohash encoding, bounding boxes and neighbors
//! - [`planner`] - Covering key ranges for a circle

pub mod cell;
pub mod planner;
pub mod point;

pub use cell::{BoundingBox, Direction, GeoCell};
pub use planner::{CoveragePlanner, KeyRange, MAX_SUFFIX};
pub use point::{distance, GeoPoint};
