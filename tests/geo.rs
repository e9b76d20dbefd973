//! Tests for geohash encoding and coverage planning.

mod common;

use common::point;
use geowatch::geo::cell::{Direction, GeoCell, BASE32};
use geowatch::geo::planner::{merge, range_for_cell, CoveragePlanner, KeyRange};
use geowatch::geo::point::{wrap_longitude, GeoPoint, EARTH_MEAN_RADIUS};
use geowatch::store::LocationFields;
use proptest::prelude::*;

/// Point `distance` meters from `origin` along `bearing` degrees.
fn destination(origin: &GeoPoint, distance: f64, bearing: f64) -> GeoPoint {
    let angular = distance / EARTH_MEAN_RADIUS;
    let theta = bearing.to_radians();
    let phi1 = origin.latitude().to_radians();
    let lambda1 = origin.longitude().to_radians();

    let phi2 = (phi1.sin() * angular.cos() + phi1.cos() * angular.sin() * theta.cos()).asin();
    let lambda2 = lambda1
        + (theta.sin() * angular.sin() * phi1.cos())
            .atan2(angular.cos() - phi1.sin() * phi2.sin());
    point(
        phi2.to_degrees().clamp(-90.0, 90.0),
        wrap_longitude(lambda2.to_degrees()),
    )
}

fn assert_disjoint(ranges: &std::collections::BTreeSet<KeyRange>) {
    let ordered: Vec<&KeyRange> = ranges.iter().collect();
    for pair in ordered.windows(2) {
        assert!(
            pair[0].end() < pair[1].start(),
            "{} and {} overlap",
            pair[0],
            pair[1]
        );
    }
}

// ============================================================================
// Encoding Tests
// ============================================================================

#[test]
fn encode_reference_points() {
    let cases = [
        (57.64911, 10.40744, 11, "u4pruydqqvj"),
        (37.7853889, -122.4056973, 10, "9q8yywdgue"),
        (-33.8688, 151.2093, 12, "r3gx2f77bn44"),
        (-90.0, -180.0, 4, "0000"),
        (90.0, 180.0, 4, "zzzz"),
    ];
    for (lat, lon, precision, expected) in cases {
        let cell = GeoCell::encode_coordinates(lat, lon, precision).unwrap();
        assert_eq!(cell.as_str(), expected, "({lat}, {lon})");
    }
}

#[test]
fn encode_rejects_invalid_input() {
    assert!(GeoCell::encode_coordinates(91.0, 0.0, 5).is_err());
    assert!(GeoCell::encode_coordinates(0.0, -181.0, 5).is_err());
    assert!(GeoCell::encode_coordinates(f64::NAN, 0.0, 5).is_err());
    assert!(GeoCell::encode_coordinates(0.0, 0.0, 0).is_err());
    assert!(GeoCell::encode_coordinates(0.0, 0.0, 23).is_err());
}

#[test]
fn parse_rejects_characters_outside_alphabet() {
    for bad in ["", "abc", "9q8i", "9Q8"] {
        assert!(GeoCell::parse(bad).is_err(), "{bad:?}");
    }
    assert!(GeoCell::parse("9q8yy").is_ok());
}

#[test]
fn bounding_box_contains_encoded_point() {
    let location = point(-33.8688, 151.2093);
    for precision in 1..=12 {
        let cell = GeoCell::encode(&location, precision).unwrap();
        assert!(cell.bounding_box().contains(&location), "{cell}");
    }
}

#[test]
fn parent_is_prefix() {
    let cell = GeoCell::parse("u4pruyd").unwrap();
    let parent = cell.parent().unwrap();
    assert_eq!(parent.as_str(), "u4pruy");
    assert!(parent.is_prefix_of(&cell));
    assert!(GeoCell::parse("u").unwrap().parent().is_none());
}

#[test]
fn neighbors_share_edges() {
    let cell = GeoCell::parse("u4pruyd").unwrap();
    let bbox = cell.bounding_box();
    let north = cell.neighbor(Direction::North).unwrap().bounding_box();
    assert!((north.lat_min - bbox.lat_max).abs() < 1e-9);
    let west = cell.neighbor(Direction::West).unwrap().bounding_box();
    assert!((west.lon_max - bbox.lon_min).abs() < 1e-9);
    assert_eq!(cell.neighbors().len(), 8);
}

#[test]
fn alphabet_is_sorted() {
    assert!(BASE32.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(BASE32.iter().all(|&b| b < b'~'));
}

// ============================================================================
// Planner Tests
// ============================================================================

#[test]
fn plan_covers_small_circle_with_few_ranges() {
    let planner = CoveragePlanner::default();
    let center = point(37.7853889, -122.4056973);
    let ranges = planner.plan(&center, 1000.0);
    assert!(!ranges.is_empty());
    assert!(ranges.len() <= 9);
    assert_disjoint(&ranges);

    let fields = LocationFields::default();
    let key = fields.cell_for(&center);
    assert_eq!(
        ranges.iter().filter(|r| r.contains(key.as_str())).count(),
        1
    );
}

#[test]
fn plan_is_deterministic() {
    let planner = CoveragePlanner::default();
    let center = point(51.5074, -0.1278);
    assert_eq!(planner.plan(&center, 2500.0), planner.plan(&center, 2500.0));
}

#[test]
fn plan_across_antimeridian() {
    let planner = CoveragePlanner::default();
    let center = point(0.0, 179.999);
    let ranges = planner.plan(&center, 5000.0);
    let fields = LocationFields::default();
    for location in [point(0.0, 179.999), point(0.0, -179.999), point(0.01, 180.0)] {
        let key = fields.cell_for(&location);
        assert!(
            ranges.iter().any(|r| r.contains(key.as_str())),
            "{location} uncovered"
        );
    }
}

#[test]
fn circle_at_the_seam_reaching_a_pole_covers_the_far_side() {
    let planner = CoveragePlanner::default();
    let fields = LocationFields::default();
    let center = point(80.0, -180.0);
    let target = point(85.0, 5.0);
    assert!(center.distance_to(&target) <= 2_000_000.0);

    let key = fields.cell_for(&target);
    let ranges = planner.plan(&center, 2_000_000.0);
    assert_eq!(
        ranges.iter().filter(|r| r.contains(key.as_str())).count(),
        1,
        "{key} not covered by {ranges:?}"
    );
}

#[test]
fn merge_joins_adjacent_ranges() {
    let merged = merge(vec![range_for_cell("9q8yy", 25), range_for_cell("9q8yz", 25)]);
    assert_eq!(merged.len(), 1);
    let range = merged.iter().next().unwrap();
    assert_eq!(range.start(), "9q8yy");
}

#[test]
fn oversized_radius_is_clamped() {
    let planner = CoveragePlanner::default();
    let center = point(0.0, 0.0);
    assert_eq!(planner.effective_radius(1.0e9), 8_587_000.0);
    assert!(!planner.plan(&center, 1.0e9).is_empty());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn every_point_in_circle_lies_in_exactly_one_range(
        lat in prop_oneof![Just(-90.0f64), Just(90.0f64), -90.0f64..=90.0],
        lon in prop_oneof![Just(-180.0f64), Just(180.0f64), -180.0f64..=180.0],
        radius in prop_oneof![1.0f64..100_000.0, 100_000.0f64..=8_587_000.0],
        bearing in 0.0f64..360.0,
        fraction in 0.0f64..0.999,
    ) {
        let planner = CoveragePlanner::default();
        let fields = LocationFields::default();
        let center = point(lat, lon);
        let ranges = planner.plan(&center, radius);
        let target = destination(&center, radius * fraction, bearing);
        prop_assume!(center.distance_to(&target) <= radius);

        let key = fields.cell_for(&target);
        let hits = ranges.iter().filter(|r| r.contains(key.as_str())).count();
        prop_assert_eq!(hits, 1, "{} at {} not covered exactly once", key, target);
    }

    #[test]
    fn planned_ranges_are_disjoint(
        lat in -89.0f64..89.0,
        lon in -180.0f64..180.0,
        radius in 0.0f64..500_000.0,
    ) {
        let ranges = CoveragePlanner::default().plan(&point(lat, lon), radius);
        prop_assert!(!ranges.is_empty());
        let ordered: Vec<&KeyRange> = ranges.iter().collect();
        for pair in ordered.windows(2) {
            prop_assert!(pair[0].end() < pair[1].start());
        }
    }

    #[test]
    fn merge_is_idempotent(
        lat in -80.0f64..80.0,
        lon in -180.0f64..180.0,
        radius in 10.0f64..50_000.0,
    ) {
        let ranges = CoveragePlanner::default().plan(&point(lat, lon), radius);
        let again = merge(ranges.iter().cloned());
        prop_assert_eq!(again, ranges);
    }
}
