//! Store binding.
//!
//! [`LocationFields`] is the persisted shape of a location: a geohash string
//! used as the range-query sort key and a `[latitude, longitude]` pair used
//! for exact membership. [`GeoStore`] binds a document store to that shape
//! and creates queries over it.

use anyhow::Context;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{DocumentStore, Fields, Record, WriteMode};
use crate::core::config::Config;
use crate::core::error::{GeoError, GeoResult};
use crate::geo::cell::{GeoCell, DEFAULT_PRECISION};
use crate::geo::planner::CoveragePlanner;
use crate::geo::point::GeoPoint;
use crate::query::delivery::{delivery_from_config, EventDelivery};
use crate::query::engine::{GeoQuery, QueryContext};

/// Names and encoding of the persisted location fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationFields {
    /// Field holding the geohash string.
    pub geohash: String,

    /// Field holding the `[latitude, longitude]` pair.
    pub location: String,

    storage_precision: usize,
}

impl Default for LocationFields {
    fn default() -> Self {
        Self::new("g", "l", DEFAULT_PRECISION)
    }
}

impl LocationFields {
    pub fn new(
        geohash: impl Into<String>,
        location: impl Into<String>,
        storage_precision: usize,
    ) -> Self {
        Self {
            geohash: geohash.into(),
            location: location.into(),
            storage_precision,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.fields.geohash.clone(),
            config.fields.location.clone(),
            config.geohash.storage_precision,
        )
    }

    /// Length of the geohashes written for a location.
    pub fn storage_precision(&self) -> usize {
        self.storage_precision
    }

    /// Stored cell of a location.
    pub fn cell_for(&self, location: &GeoPoint) -> GeoCell {
        GeoCell::encode_clamped(location, self.storage_precision)
    }

    /// Field values persisting `location`.
    pub fn encode(&self, location: &GeoPoint) -> Fields {
        let mut fields = Fields::new();
        fields.insert(
            self.geohash.clone(),
            json!(self.cell_for(location).as_str()),
        );
        fields.insert(
            self.location.clone(),
            json!([location.latitude(), location.longitude()]),
        );
        fields
    }

    /// Location stored on a record.
    ///
    /// `Ok(None)` when the field is absent; `MalformedRecord` when present
    /// but not a valid `[latitude, longitude]` pair.
    pub fn location(&self, record: &Record) -> GeoResult<Option<GeoPoint>> {
        let value = match record.get(&self.location) {
            None | Some(serde_json::Value::Null) => return Ok(None),
            Some(value) => value,
        };
        serde_json::from_value::<GeoPoint>(value.clone())
            .map(Some)
            .map_err(|e| GeoError::malformed(&record.id, e.to_string()))
    }
}

/// A document store bound to location fields.
#[derive(Clone)]
pub struct GeoStore {
    context: QueryContext,
}

impl GeoStore {
    /// Bind a store with default fields, planning and the given delivery.
    pub fn new(store: Arc<dyn DocumentStore>, delivery: Arc<dyn EventDelivery>) -> Self {
        Self {
            context: QueryContext {
                store,
                fields: LocationFields::default(),
                planner: CoveragePlanner::default(),
                delivery,
            },
        }
    }

    /// Bind a store as configured.
    pub fn from_config(store: Arc<dyn DocumentStore>, config: &Config) -> anyhow::Result<Self> {
        let delivery = delivery_from_config(&config.delivery)
            .with_context(|| format!("failed to start {} event delivery", config.delivery.mode))?;
        Ok(Self {
            context: QueryContext {
                store,
                fields: LocationFields::from_config(config),
                planner: CoveragePlanner::new(
                    config.geohash.storage_precision,
                    config.query.max_radius_km,
                ),
                delivery,
            },
        })
    }

    /// Replace the location fields.
    pub fn with_fields(mut self, fields: LocationFields) -> Self {
        self.context.planner = CoveragePlanner::new(
            fields.storage_precision(),
            self.context.planner.max_radius_km(),
        );
        self.context.fields = fields;
        self
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.context.store
    }

    pub fn fields(&self) -> &LocationFields {
        &self.context.fields
    }

    pub fn planner(&self) -> &CoveragePlanner {
        &self.context.planner
    }

    /// Write a record's location, keeping its other fields.
    pub fn set_location(&self, id: &str, location: &GeoPoint) -> GeoResult<()> {
        let store = &self.context.store;
        store.write(
            &store.record_ref(id),
            self.context.fields.encode(location),
            WriteMode::Merge,
        )?;
        Ok(())
    }

    /// Delete a record's location fields.
    pub fn remove_location(&self, id: &str) -> GeoResult<()> {
        let store = &self.context.store;
        let fields = &self.context.fields;
        store.delete_fields(
            &store.record_ref(id),
            &[fields.geohash.as_str(), fields.location.as_str()],
        )?;
        Ok(())
    }

    /// Read a record's location; `Ok(None)` if the record or field is absent.
    pub fn get_location(&self, id: &str) -> GeoResult<Option<GeoPoint>> {
        let store = &self.context.store;
        match store.point_read(&store.record_ref(id))? {
            Some(record) => self.context.fields.location(&record),
            None => Ok(None),
        }
    }

    /// Create a live query. Radius is in kilometers.
    pub fn query_at_location(&self, center: GeoPoint, radius_km: f64) -> GeoResult<GeoQuery> {
        GeoQuery::new(self.context.clone(), center, radius_km)
    }

    /// Read the records inside a circle once, ordered by id.
    pub fn get_at_location(
        &self,
        center: &GeoPoint,
        radius_km: f64,
    ) -> GeoResult<Vec<Arc<Record>>> {
        let radius_m = self.context.planner.radius_from_km(radius_km)?;
        let store = &self.context.store;
        let mut found = BTreeMap::new();

        for range in self.context.planner.plan(center, radius_m) {
            let query = store.range_query(&self.context.fields.geohash, &range);
            for record in store.fetch(&query)? {
                match self.context.fields.location(&record) {
                    Ok(Some(location)) if location.distance_to(center) <= radius_m => {
                        found.insert(record.id.clone(), record);
                    }
                    Ok(_) => {}
                    Err(error) => {
                        tracing::warn!(
                            record_id = %record.id,
                            error = %error,
                            "ignoring malformed location"
                        );
                    }
                }
            }
        }
        Ok(found.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::delivery::ImmediateDelivery;
    use crate::store::MemoryStore;

    fn geo_store() -> (MemoryStore, GeoStore) {
        let memory = MemoryStore::new();
        let store = GeoStore::new(Arc::new(memory.clone()), Arc::new(ImmediateDelivery));
        (memory, store)
    }

    #[test]
    fn location_round_trip() {
        let (memory, store) = geo_store();
        let location = GeoPoint::new(37.7853889, -122.4056973).unwrap();
        store.set_location("sf", &location).unwrap();

        assert_eq!(store.get_location("sf").unwrap(), Some(location));
        let record = memory.point_read(&store.store().record_ref("sf")).unwrap().unwrap();
        assert_eq!(record.get_str("g"), Some("9q8yywdgue"));

        store.remove_location("sf").unwrap();
        assert_eq!(store.get_location("sf").unwrap(), None);
        assert_eq!(store.get_location("missing").unwrap(), None);
    }

    #[test]
    fn malformed_location_is_reported() {
        let fields = LocationFields::default();
        let mut values = Fields::new();
        values.insert("l".into(), json!(["north", 3]));
        let record = Record::new("bad", values, 1);
        assert!(matches!(
            fields.location(&record),
            Err(GeoError::MalformedRecord { .. })
        ));

        let mut values = Fields::new();
        values.insert("l".into(), json!([95.0, 3.0]));
        assert!(fields.location(&Record::new("bad", values, 1)).is_err());
    }

    #[test]
    fn one_shot_query_filters_exact_distance() {
        let (_memory, store) = geo_store();
        let center = GeoPoint::new(0.0, 0.0).unwrap();
        store.set_location("b", &GeoPoint::new(0.005, 0.0).unwrap()).unwrap();
        store.set_location("a", &GeoPoint::new(0.0, 0.001).unwrap()).unwrap();
        store.set_location("far", &GeoPoint::new(0.0, 0.02).unwrap()).unwrap();

        let ids: Vec<String> = store
            .get_at_location(&center, 1.0)
            .unwrap()
            .iter()
            .map(|record| record.id.clone())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
