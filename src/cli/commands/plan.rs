//! Plan command implementation.

use anyhow::Result;
use clap::Args;
use serde_json::json;

use crate::core::config::Config;
use crate::geo::planner::CoveragePlanner;
use crate::geo::point::GeoPoint;

/// Show the key ranges a query would subscribe to.
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Center latitude in degrees.
    #[arg(long, allow_negative_numbers = true)]
    pub lat: f64,

    /// Center longitude in degrees.
    #[arg(long, allow_negative_numbers = true)]
    pub lon: f64,

    /// Radius in kilometers.
    #[arg(short, long)]
    pub radius_km: f64,

    /// Output format (text, json).
    #[arg(long, default_value = "text")]
    pub format: String,
}

/// Run the plan command.
pub fn run_plan(args: PlanArgs, config: &Config) -> Result<()> {
    let planner = CoveragePlanner::new(
        config.geohash.storage_precision,
        config.query.max_radius_km,
    );
    let center = GeoPoint::new(args.lat, args.lon)?;
    let radius_m = planner.effective_radius(planner.radius_from_km(args.radius_km)?);
    let bits = planner.bits_for(&center, radius_m);
    let ranges = planner.plan(&center, radius_m);

    match args.format.as_str() {
        "json" => {
            let output = json!({
                "center": center,
                "radius_m": radius_m,
                "bits": bits,
                "ranges": ranges,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        _ => {
            println!("Coverage plan");
            println!("  Center: {}, {}", center.latitude(), center.longitude());
            println!("  Radius: {:.1} m", radius_m);
            println!("  Bits:   {}", bits);
            println!("  Ranges: {}", ranges.len());
            for range in &ranges {
                println!("    {}", range);
            }
        }
    }
    Ok(())
}
