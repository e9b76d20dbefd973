//! Coverage planning.
//!
//! Turns a circle into a set of geohash key ranges whose union contains
//! every stored geohash inside the circle. The ranges are a superset of the
//! answer; exact membership is decided per record by the query engine.
//!
//! Precision is chosen in bits rather than characters, so a range may cover
//! a bit-aligned block of sibling characters (`"9q8y".."9q8z~"` is one cell
//! at 19 bits). Three samples per axis at that precision cover the circle's
//! bounding box, and sorted ranges that touch are merged.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

use crate::core::error::{GeoError, GeoResult};
use crate::geo::cell::{
    char_value, encode_bits, value_char, BASE32, BITS_PER_CHAR, DEFAULT_PRECISION, MAX_PRECISION,
    MAX_PRECISION_BITS,
};
use crate::geo::point::{
    cap_radius_km, distance_to_latitude_degrees, distance_to_longitude_degrees, wrap_longitude,
    GeoPoint, MAX_SUPPORTED_RADIUS_KM,
};

/// Sorts after every geohash character; closes a prefix range.
pub const MAX_SUFFIX: char = '~';

/// Relative slack added to the radius before converting it to degrees.
const RADIUS_MARGIN: f64 = 1e-9;

/// Longitudes sampled when a circle spans the whole parallel.
const POLAR_SAMPLE_LONGITUDES: [f64; 5] = [-180.0, -90.0, 0.0, 90.0, 180.0];

/// Inclusive interval of sort keys backing one range subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct KeyRange {
    start: String,
    end: String,
}

impl KeyRange {
    /// Create a range from explicit bounds.
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Range holding every key that starts with `prefix`.
    pub fn for_prefix(prefix: &str) -> Self {
        Self::new(prefix, format!("{prefix}{MAX_SUFFIX}"))
    }

    /// Lower bound, inclusive.
    pub fn start(&self) -> &str {
        &self.start
    }

    /// Upper bound, inclusive.
    pub fn end(&self) -> &str {
        &self.end
    }

    /// Check if `key` falls inside the range.
    pub fn contains(&self, key: &str) -> bool {
        self.start.as_str() <= key && key <= self.end.as_str()
    }

    /// Check if two ranges share at least one key.
    pub fn overlaps(&self, other: &KeyRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Computes covering key ranges for circles.
#[derive(Debug, Clone)]
pub struct CoveragePlanner {
    /// Longest stored geohash; plans never refine past it.
    storage_precision: usize,

    /// Radius ceiling in kilometers.
    max_radius_km: f64,
}

impl Default for CoveragePlanner {
    fn default() -> Self {
        Self::new(DEFAULT_PRECISION, MAX_SUPPORTED_RADIUS_KM)
    }
}

impl CoveragePlanner {
    /// Create a planner for geohashes stored at `storage_precision`.
    pub fn new(storage_precision: usize, max_radius_km: f64) -> Self {
        Self {
            storage_precision: storage_precision.clamp(1, MAX_PRECISION),
            max_radius_km: max_radius_km.min(MAX_SUPPORTED_RADIUS_KM),
        }
    }

    /// Precision of the stored geohashes this planner targets.
    pub fn storage_precision(&self) -> usize {
        self.storage_precision
    }

    /// Radius ceiling in kilometers.
    pub fn max_radius_km(&self) -> f64 {
        self.max_radius_km
    }

    /// Radius in meters after clamping to the ceiling.
    pub fn effective_radius(&self, radius_m: f64) -> f64 {
        let radius_m = radius_m.max(0.0);
        cap_radius_km(radius_m / 1000.0, self.max_radius_km) * 1000.0
    }

    /// Validate a radius in kilometers and convert it to clamped meters.
    pub fn radius_from_km(&self, radius_km: f64) -> GeoResult<f64> {
        if !radius_km.is_finite() || radius_km < 0.0 {
            return Err(GeoError::InvalidRadius { radius_km });
        }
        Ok(self.effective_radius(radius_km * 1000.0))
    }

    /// Number of geohash bits used for a circle.
    pub fn bits_for(&self, center: &GeoPoint, radius_m: f64) -> usize {
        self.bits_at(center, self.effective_radius(radius_m))
    }

    fn bits_at(&self, center: &GeoPoint, radius_m: f64) -> usize {
        bits_for_bounding_box(center, radius_m).min(self.storage_precision * BITS_PER_CHAR)
    }

    /// Key ranges covering the circle, sorted and disjoint.
    pub fn plan(&self, center: &GeoPoint, radius_m: f64) -> BTreeSet<KeyRange> {
        let radius_m = self.effective_radius(radius_m);
        let bits = self.bits_at(center, radius_m);

        let cells = covering_cells(center, radius_m, bits);
        let ranges = merge(cells.iter().map(|hash| range_for_cell(hash, bits)));

        tracing::debug!(
            center = %center,
            radius_m,
            bits,
            ranges = ranges.len(),
            "planned coverage"
        );
        ranges
    }
}

/// Largest bit precision whose cells are at least as large as the circle's
/// half-extent on both axes.
pub fn bits_for_bounding_box(center: &GeoPoint, radius_m: f64) -> usize {
    let radius_m = radius_m * (1.0 + RADIUS_MARGIN);
    let lat_bits = bits_for_span(180.0, distance_to_latitude_degrees(radius_m));
    let lon_bits = bits_for_span(
        360.0,
        distance_to_longitude_degrees(radius_m, center.latitude()),
    )
    .max(1);

    (2 * lat_bits)
        .min(2 * lon_bits - 1)
        .min(MAX_PRECISION_BITS)
        .max(1)
}

/// Bisections of `span` that keep cells at least `degrees` wide.
fn bits_for_span(span: f64, degrees: f64) -> usize {
    if degrees <= 0.0 {
        return MAX_PRECISION_BITS;
    }
    let bits = (span / degrees).log2().floor();
    if bits <= 0.0 {
        0
    } else {
        (bits as usize).min(MAX_PRECISION_BITS)
    }
}

/// Geohashes of the 3x3 samples spanning the circle's bounding box.
fn covering_cells(center: &GeoPoint, radius_m: f64, bits: usize) -> BTreeSet<String> {
    let radius_m = radius_m * (1.0 + RADIUS_MARGIN);
    let lat_delta = distance_to_latitude_degrees(radius_m);
    let lon_delta = distance_to_longitude_degrees(radius_m, center.latitude());

    let (lat, lon) = (center.latitude(), center.longitude());
    // A circle reaching a pole spans every longitude. Offsets of 180 from a
    // seam center wrap back onto one half, so sample the full parallel.
    let sample_lons: Vec<f64> = if lon_delta >= 180.0 {
        POLAR_SAMPLE_LONGITUDES.to_vec()
    } else {
        vec![
            wrap_longitude(lon - lon_delta),
            lon,
            wrap_longitude(lon + lon_delta),
        ]
    };

    let mut cells = BTreeSet::new();
    for sample_lat in [lat - lat_delta, lat, lat + lat_delta] {
        for &sample_lon in &sample_lons {
            cells.insert(encode_bits(sample_lat.clamp(-90.0, 90.0), sample_lon, bits));
        }
    }
    cells
}

/// Key range of the `bits`-bit cell that `hash` lies in.
///
/// `hash` must be at least `ceil(bits / 5)` characters of valid geohash.
pub fn range_for_cell(hash: &str, bits: usize) -> KeyRange {
    if hash.is_empty() {
        return KeyRange::for_prefix(hash);
    }
    let precision = bits.div_ceil(BITS_PER_CHAR).clamp(1, hash.len());
    let base = &hash[..precision - 1];
    let last = hash[precision - 1..]
        .chars()
        .next()
        .and_then(char_value)
        .unwrap_or(0);

    let significant = bits
        .saturating_sub(BITS_PER_CHAR * (precision - 1))
        .clamp(1, BITS_PER_CHAR);
    let unused = BITS_PER_CHAR - significant;
    let start = (last >> unused) << unused;
    let end = start + ((1u8 << unused) - 1);

    KeyRange::new(
        format!("{base}{}", value_char(start)),
        format!("{base}{}{MAX_SUFFIX}", value_char(end)),
    )
}

/// Collapse overlapping and adjacent ranges.
pub fn merge(ranges: impl IntoIterator<Item = KeyRange>) -> BTreeSet<KeyRange> {
    let sorted: BTreeSet<KeyRange> = ranges.into_iter().collect();
    let mut merged = BTreeSet::new();
    let mut current: Option<KeyRange> = None;

    for next in sorted {
        current = Some(match current.take() {
            None => next,
            Some(mut range) => {
                if next.start <= range.end || adjacent(&range, &next) {
                    if next.end > range.end {
                        range.end = next.end;
                    }
                    range
                } else {
                    merged.insert(range);
                    next
                }
            }
        });
    }
    if let Some(range) = current {
        merged.insert(range);
    }
    merged
}

/// Check that no geohash sorts strictly between `a` and `b`.
///
/// `a` ends with a prefix block closed by [`MAX_SUFFIX`]; the first key after
/// that block is the prefix's successor, padded with `'0'`.
fn adjacent(a: &KeyRange, b: &KeyRange) -> bool {
    let Some(prefix) = a.end.strip_suffix(MAX_SUFFIX) else {
        return false;
    };
    match successor(prefix) {
        Some(next) => b
            .start
            .strip_prefix(next.as_str())
            .is_some_and(|rest| rest.chars().all(|c| c == '0')),
        None => false,
    }
}

/// Smallest geohash greater than every key starting with `prefix`.
fn successor(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        let value = char_value(last)?;
        if (value as usize) + 1 < BASE32.len() {
            chars.push(value_char(value + 1));
            return Some(chars.into_iter().collect());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(lat: f64, lon: f64) -> GeoPoint {
        GeoPoint::new(lat, lon).unwrap()
    }

    #[test]
    fn one_kilometer_at_origin_uses_28_bits() {
        let planner = CoveragePlanner::default();
        assert_eq!(planner.bits_for(&point(0.0, 0.0), 1000.0), 28);
        for range in planner.plan(&point(0.0, 0.0), 1000.0) {
            assert_eq!(range.start().len(), 6);
        }
    }

    #[test]
    fn close_radii_share_a_plan() {
        let planner = CoveragePlanner::default();
        let center = point(0.0, 0.0);
        assert_eq!(planner.plan(&center, 1000.0), planner.plan(&center, 1001.0));
    }

    #[test]
    fn range_for_partial_character() {
        // 19 bits: three full characters and four bits of the fourth.
        let range = range_for_cell("9q8yyk", 19);
        assert_eq!(range, KeyRange::new("9q8y", "9q8z~"));

        let full = range_for_cell("9q8yyk", 20);
        assert_eq!(full, KeyRange::for_prefix("9q8y"));
    }

    #[test]
    fn merges_adjacent_and_overlapping_ranges() {
        let merged = merge([
            KeyRange::for_prefix("9q8y"),
            KeyRange::for_prefix("9q8z"),
            KeyRange::for_prefix("9q90"),
            KeyRange::for_prefix("9q92"),
        ]);
        let expected: BTreeSet<_> = [
            KeyRange::new("9q8y", "9q90~"),
            KeyRange::for_prefix("9q92"),
        ]
        .into_iter()
        .collect();
        assert_eq!(merged, expected);
    }

    #[test]
    fn successor_carries_over_z() {
        assert_eq!(successor("9q8z").as_deref(), Some("9q9"));
        assert_eq!(successor("b").as_deref(), Some("c"));
        assert_eq!(successor("zz"), None);
    }

    #[test]
    fn zero_radius_plans_at_storage_precision() {
        let planner = CoveragePlanner::default();
        let ranges = planner.plan(&point(37.7853889, -122.4056973), 0.0);
        assert_eq!(ranges.len(), 1);
        let range = ranges.iter().next().unwrap();
        assert_eq!(range.start().len(), DEFAULT_PRECISION);
    }

    #[test]
    fn polar_circle_spans_all_longitudes() {
        let planner = CoveragePlanner::default();
        let ranges = planner.plan(&point(89.9, 0.0), 50_000.0);
        assert!(planner.bits_for(&point(89.9, 0.0), 50_000.0) <= 1);
        assert_eq!(ranges.len(), 1);
    }

    #[test]
    fn seam_center_reaching_pole_covers_both_hemispheres() {
        let planner = CoveragePlanner::default();
        let bits = DEFAULT_PRECISION * BITS_PER_CHAR;
        let cases = [
            (point(80.0, -180.0), 2_000_000.0, point(85.0, 5.0)),
            (point(80.0, 180.0), 2_000_000.0, point(85.0, -5.0)),
            (point(-90.0, -180.0), 30_000.0, point(-89.9, 90.0)),
        ];
        for (center, radius_m, target) in cases {
            assert!(center.distance_to(&target) <= radius_m);
            let key = encode_bits(target.latitude(), target.longitude(), bits);
            let ranges = planner.plan(&center, radius_m);
            assert!(
                ranges.iter().any(|range| range.contains(&key)),
                "{target} missing from plan around {center}"
            );
        }
    }

    #[test]
    fn radius_validation() {
        let planner = CoveragePlanner::default();
        assert!(matches!(
            planner.radius_from_km(-1.0),
            Err(GeoError::InvalidRadius { .. })
        ));
        assert!(planner.radius_from_km(f64::NAN).is_err());
        assert_eq!(planner.radius_from_km(1.5).unwrap(), 1500.0);
        assert_eq!(planner.radius_from_km(20_000.0).unwrap(), 8_587_000.0);
    }

    #[test]
    fn key_range_containment() {
        let range = KeyRange::for_prefix("u4pr");
        assert!(range.contains("u4pr"));
        assert!(range.contains("u4pruydqqv"));
        assert!(!range.contains("u4ps0"));
        assert!(range.overlaps(&KeyRange::new("u4pz", "u4q~")));
        assert!(!range.overlaps(&KeyRange::for_prefix("u4ps")));
    }
}
