//! Encode and decode command implementations.

use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;

use crate::geo::cell::{Direction, GeoCell, DEFAULT_PRECISION};

/// Encode a coordinate pair.
#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// Latitude in degrees.
    #[arg(long, allow_negative_numbers = true)]
    pub lat: f64,

    /// Longitude in degrees.
    #[arg(long, allow_negative_numbers = true)]
    pub lon: f64,

    /// Geohash length.
    #[arg(short, long, default_value_t = DEFAULT_PRECISION)]
    pub precision: usize,
}

/// Decode a geohash.
#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Geohash to decode.
    pub hash: String,

    /// Also list the eight neighbors.
    #[arg(long)]
    pub neighbors: bool,

    /// Output format (text, json).
    #[arg(long, default_value = "text")]
    pub format: String,
}

/// Run the encode command.
pub fn run_encode(args: EncodeArgs) -> Result<()> {
    let cell = GeoCell::encode_coordinates(args.lat, args.lon, args.precision)
        .with_context(|| format!("cannot encode ({}, {})", args.lat, args.lon))?;
    println!("{}", cell);
    Ok(())
}

/// Run the decode command.
pub fn run_decode(args: DecodeArgs) -> Result<()> {
    let cell = GeoCell::parse(&args.hash)?;
    let bbox = cell.bounding_box();
    let (lat, lon) = bbox.center();
    let neighbors: Vec<(Direction, Option<GeoCell>)> = if args.neighbors {
        Direction::ALL.iter().map(|d| (*d, cell.neighbor(*d))).collect()
    } else {
        Vec::new()
    };

    match args.format.as_str() {
        "json" => {
            let mut output = json!({
                "hash": cell.as_str(),
                "bits": cell.bits(),
                "center": [lat, lon],
                "lat_min": bbox.lat_min,
                "lat_max": bbox.lat_max,
                "lon_min": bbox.lon_min,
                "lon_max": bbox.lon_max,
            });
            if args.neighbors {
                let map: serde_json::Map<String, serde_json::Value> = neighbors
                    .iter()
                    .map(|(d, n)| {
                        let value = n.as_ref().map(|n| json!(n.as_str())).unwrap_or(json!(null));
                        (format!("{:?}", d).to_lowercase(), value)
                    })
                    .collect();
                output["neighbors"] = serde_json::Value::Object(map);
            }
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        _ => {
            println!("Geohash: {} ({} bits)", cell, cell.bits());
            println!("  Center: {:.7}, {:.7}", lat, lon);
            println!("  Bounds: {}", bbox);
            for (direction, neighbor) in &neighbors {
                match neighbor {
                    Some(n) => println!("  {:<10} {}", format!("{:?}", direction), n),
                    None => println!("  {:<10} -", format!("{:?}", direction)),
                }
            }
        }
    }
    Ok(())
}
