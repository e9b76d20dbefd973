//! Geohash cells.
//!
//! A geohash interleaves longitude and latitude bisection bits, longitude
//! first, and packs them five at a time into a base-32 alphabet. Longer
//! strings name smaller boxes and every prefix of a hash names a box that
//! contains it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::error::{GeoError, GeoResult};
use crate::geo::point::{wrap_longitude, GeoPoint};

/// Geohash alphabet, indexed by 5-bit value.
pub const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Bits encoded by one geohash character.
pub const BITS_PER_CHAR: usize = 5;

/// Length of geohashes written alongside records unless configured.
pub const DEFAULT_PRECISION: usize = 10;

/// Longest supported geohash.
pub const MAX_PRECISION: usize = 22;

/// Bits carried by a geohash of [`MAX_PRECISION`] characters.
pub const MAX_PRECISION_BITS: usize = MAX_PRECISION * BITS_PER_CHAR;

/// Map a geohash character to its 5-bit value.
pub fn char_value(c: char) -> Option<u8> {
    if !c.is_ascii() {
        return None;
    }
    BASE32
        .iter()
        .position(|&b| b == c as u8)
        .map(|index| index as u8)
}

/// Map a 5-bit value to its geohash character.
///
/// Only the low five bits of `value` are used.
pub fn value_char(value: u8) -> char {
    BASE32[(value & 0x1f) as usize] as char
}

/// String-prefix containment: the box of `a` contains the box of `b`.
pub fn is_prefix_of(a: &str, b: &str) -> bool {
    b.starts_with(a)
}

/// Latitude/longitude rectangle covered by a cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

impl BoundingBox {
    /// Whole coordinate plane.
    pub const WORLD: BoundingBox = BoundingBox {
        lat_min: -90.0,
        lat_max: 90.0,
        lon_min: -180.0,
        lon_max: 180.0,
    };

    /// Check if the point lies within the box, edges included.
    pub fn contains(&self, point: &GeoPoint) -> bool {
        (self.lat_min..=self.lat_max).contains(&point.latitude())
            && (self.lon_min..=self.lon_max).contains(&point.longitude())
    }

    /// Midpoint of the box as `(latitude, longitude)`.
    pub fn center(&self) -> (f64, f64) {
        (
            (self.lat_min + self.lat_max) / 2.0,
            (self.lon_min + self.lon_max) / 2.0,
        )
    }

    /// Height in degrees of latitude.
    pub fn height(&self) -> f64 {
        self.lat_max - self.lat_min
    }

    /// Width in degrees of longitude.
    pub fn width(&self) -> f64 {
        self.lon_max - self.lon_min
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lat [{}, {}] lon [{}, {}]",
            self.lat_min, self.lat_max, self.lon_min, self.lon_max
        )
    }
}

/// Compass direction to an adjacent cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    NorthWest,
}

impl Direction {
    /// All directions, clockwise from north.
    pub const ALL: [Direction; 8] = [
        Direction::North,
        Direction::NorthEast,
        Direction::East,
        Direction::SouthEast,
        Direction::South,
        Direction::SouthWest,
        Direction::West,
        Direction::NorthWest,
    ];

    /// Step as (latitude, longitude) multiples of the cell size.
    fn offset(self) -> (f64, f64) {
        match self {
            Direction::North => (1.0, 0.0),
            Direction::NorthEast => (1.0, 1.0),
            Direction::East => (0.0, 1.0),
            Direction::SouthEast => (-1.0, 1.0),
            Direction::South => (-1.0, 0.0),
            Direction::SouthWest => (-1.0, -1.0),
            Direction::West => (0.0, -1.0),
            Direction::NorthWest => (1.0, -1.0),
        }
    }
}

/// A validated geohash string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GeoCell(String);

impl GeoCell {
    /// Encode a point at `precision` characters.
    pub fn encode(point: &GeoPoint, precision: usize) -> GeoResult<Self> {
        check_precision(precision)?;
        Ok(Self(encode_bits(
            point.latitude(),
            point.longitude(),
            precision * BITS_PER_CHAR,
        )))
    }

    /// Encode a point, clamping `precision` into the supported range.
    pub(crate) fn encode_clamped(point: &GeoPoint, precision: usize) -> Self {
        let precision = precision.clamp(1, MAX_PRECISION);
        Self(encode_bits(
            point.latitude(),
            point.longitude(),
            precision * BITS_PER_CHAR,
        ))
    }

    /// Encode raw coordinates at `precision` characters.
    pub fn encode_coordinates(latitude: f64, longitude: f64, precision: usize) -> GeoResult<Self> {
        let point = GeoPoint::new(latitude, longitude)?;
        Self::encode(&point, precision)
    }

    /// Parse and validate a geohash string.
    pub fn parse(hash: &str) -> GeoResult<Self> {
        if hash.is_empty()
            || hash.len() > MAX_PRECISION
            || hash.chars().any(|c| char_value(c).is_none())
        {
            return Err(GeoError::InvalidGeohash {
                hash: hash.to_string(),
            });
        }
        Ok(Self(hash.to_string()))
    }

    /// The geohash string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length in characters.
    pub fn precision(&self) -> usize {
        self.0.len()
    }

    /// Number of encoded bits.
    pub fn bits(&self) -> usize {
        self.0.len() * BITS_PER_CHAR
    }

    /// Box covered by this cell.
    pub fn bounding_box(&self) -> BoundingBox {
        let mut bbox = BoundingBox::WORLD;
        let mut even = true;
        for value in self.0.chars().filter_map(char_value) {
            for shift in (0..BITS_PER_CHAR).rev() {
                let set = (value >> shift) & 1 == 1;
                if even {
                    let mid = (bbox.lon_min + bbox.lon_max) / 2.0;
                    if set {
                        bbox.lon_min = mid;
                    } else {
                        bbox.lon_max = mid;
                    }
                } else {
                    let mid = (bbox.lat_min + bbox.lat_max) / 2.0;
                    if set {
                        bbox.lat_min = mid;
                    } else {
                        bbox.lat_max = mid;
                    }
                }
                even = !even;
            }
        }
        bbox
    }

    /// Check if this cell's box contains `other`'s box.
    pub fn is_prefix_of(&self, other: &GeoCell) -> bool {
        is_prefix_of(&self.0, &other.0)
    }

    /// The enclosing cell one character shorter.
    pub fn parent(&self) -> Option<GeoCell> {
        if self.0.len() <= 1 {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_string()))
    }

    /// Adjacent cell of the same precision.
    ///
    /// Longitude wraps across the antimeridian; there is no cell beyond a
    /// pole, so northward steps from the top row return `None`.
    pub fn neighbor(&self, direction: Direction) -> Option<GeoCell> {
        let bbox = self.bounding_box();
        let (lat, lon) = bbox.center();
        let (dlat, dlon) = direction.offset();

        let lat = lat + dlat * bbox.height();
        if !(-90.0..=90.0).contains(&lat) {
            return None;
        }
        let lon = wrap_longitude(lon + dlon * bbox.width());
        Some(Self(encode_bits(lat, lon, self.bits())))
    }

    /// All adjacent cells, clockwise from north.
    pub fn neighbors(&self) -> Vec<GeoCell> {
        Direction::ALL
            .iter()
            .filter_map(|&direction| self.neighbor(direction))
            .collect()
    }
}

impl fmt::Display for GeoCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for GeoCell {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for GeoCell {
    type Err = GeoError;

    fn from_str(s: &str) -> GeoResult<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for GeoCell {
    type Error = GeoError;

    fn try_from(value: String) -> GeoResult<Self> {
        Self::parse(&value)
    }
}

impl From<GeoCell> for String {
    fn from(cell: GeoCell) -> Self {
        cell.0
    }
}

fn check_precision(precision: usize) -> GeoResult<()> {
    if precision == 0 || precision > MAX_PRECISION {
        return Err(GeoError::InvalidPrecision {
            precision,
            max: MAX_PRECISION,
        });
    }
    Ok(())
}

/// Encode `bits` interleaved bits, padded with zero bits to whole characters.
///
/// Callers guarantee valid coordinates and `bits <= MAX_PRECISION_BITS`.
pub(crate) fn encode_bits(latitude: f64, longitude: f64, bits: usize) -> String {
    let precision = bits.div_ceil(BITS_PER_CHAR);
    let mut hash = String::with_capacity(precision);
    let (mut lat_min, mut lat_max) = (-90.0_f64, 90.0_f64);
    let (mut lon_min, mut lon_max) = (-180.0_f64, 180.0_f64);

    let mut value = 0u8;
    for bit in 0..precision * BITS_PER_CHAR {
        value <<= 1;
        if bit < bits {
            if bit % 2 == 0 {
                let mid = (lon_min + lon_max) / 2.0;
                if longitude > mid {
                    value |= 1;
                    lon_min = mid;
                } else {
                    lon_max = mid;
                }
            } else {
                let mid = (lat_min + lat_max) / 2.0;
                if latitude > mid {
                    value |= 1;
                    lat_min = mid;
                } else {
                    lat_max = mid;
                }
            }
        }
        if bit % BITS_PER_CHAR == BITS_PER_CHAR - 1 {
            hash.push(value_char(value));
            value = 0;
        }
    }
    hash
}
