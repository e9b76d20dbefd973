//! Demo command implementation.
//!
//! Seeds an in-memory store with points scattered around a center, opens a
//! live query and prints its events while records move and disappear.

use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

use crate::core::config::Config;
use crate::core::error::StoreError;
use crate::geo::point::{GeoPoint, METERS_PER_DEGREE_LATITUDE};
use crate::query::listener::{GeoQueryDataEventListener, QueryEvent};
use crate::store::{DocumentStore, Fields, GeoStore, MemoryStore, Record, WriteMode};

/// Run a live query against an in-memory store.
#[derive(Args, Debug)]
pub struct DemoArgs {
    /// Center latitude in degrees.
    #[arg(long, default_value_t = 37.7853889, allow_negative_numbers = true)]
    pub lat: f64,

    /// Center longitude in degrees.
    #[arg(long, default_value_t = -122.4056973, allow_negative_numbers = true)]
    pub lon: f64,

    /// Query radius in kilometers.
    #[arg(short, long, default_value_t = 1.0)]
    pub radius_km: f64,

    /// Number of records to seed.
    #[arg(short, long, default_value_t = 8)]
    pub records: usize,

    /// Seconds to wait for each event before giving up.
    #[arg(long, default_value_t = 5)]
    pub timeout_secs: u64,
}

const QUIET_PERIOD: Duration = Duration::from_millis(200);

/// Forwards every callback into a channel.
struct ChannelListener {
    tx: mpsc::UnboundedSender<QueryEvent>,
}

impl ChannelListener {
    fn send(&self, event: QueryEvent) {
        // The receiver outlives the query; a closed channel means shutdown.
        let _ = self.tx.send(event);
    }
}

impl GeoQueryDataEventListener for ChannelListener {
    fn on_data_entered(&self, record: &Arc<Record>, location: &GeoPoint) {
        self.send(QueryEvent::Entered {
            record: record.clone(),
            location: *location,
        });
    }

    fn on_data_exited(&self, record: &Arc<Record>) {
        self.send(QueryEvent::Exited {
            record: record.clone(),
        });
    }

    fn on_data_moved(&self, record: &Arc<Record>, location: &GeoPoint) {
        self.send(QueryEvent::Moved {
            record: record.clone(),
            location: *location,
        });
    }

    fn on_data_changed(&self, record: &Arc<Record>, location: &GeoPoint) {
        self.send(QueryEvent::Changed {
            record: record.clone(),
            location: *location,
        });
    }

    fn on_query_ready(&self) {
        self.send(QueryEvent::Ready);
    }

    fn on_query_error(&self, error: &StoreError) {
        self.send(QueryEvent::Error(error.clone()));
    }
}

/// Point `fraction` of `radius_m` away from `center`, bearing chosen by `index`.
fn offset(center: &GeoPoint, radius_m: f64, fraction: f64, index: usize) -> Result<GeoPoint> {
    let angle = index as f64 * std::f64::consts::TAU / 7.0;
    let meters = radius_m * fraction;
    let lat = center.latitude() + meters * angle.sin() / METERS_PER_DEGREE_LATITUDE;
    let lon_scale = METERS_PER_DEGREE_LATITUDE * center.latitude().to_radians().cos().max(1e-6);
    let lon = center.longitude() + meters * angle.cos() / lon_scale;
    Ok(GeoPoint::new(lat.clamp(-90.0, 90.0), lon.clamp(-180.0, 180.0))?)
}

async fn next_event(
    rx: &mut mpsc::UnboundedReceiver<QueryEvent>,
    wait: Duration,
) -> Result<QueryEvent> {
    tokio::time::timeout(wait, rx.recv())
        .await
        .context("timed out waiting for a query event")?
        .context("query event channel closed")
}

/// Print events until the query has been quiet for a moment.
async fn drain(rx: &mut mpsc::UnboundedReceiver<QueryEvent>) {
    while let Ok(Some(event)) = tokio::time::timeout(QUIET_PERIOD, rx.recv()).await {
        println!("  {}", event);
    }
}

/// Run the demo command.
pub async fn run_demo(args: DemoArgs, config: &Config) -> Result<()> {
    let memory = MemoryStore::new();
    let store = GeoStore::from_config(Arc::new(memory.clone()), config)?;
    let center = GeoPoint::new(args.lat, args.lon)?;
    let radius_m = args.radius_km * 1000.0;

    // Even indices land inside the circle, odd ones just outside it.
    for index in 0..args.records {
        let fraction = if index % 2 == 0 { 0.5 } else { 1.5 };
        let location = offset(&center, radius_m, fraction, index)?;
        store.set_location(&format!("record-{index}"), &location)?;
    }
    info!(records = args.records, "seeded in-memory store");

    let query = store.query_at_location(center, args.radius_km)?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    query.add_listener(Arc::new(ChannelListener { tx }))?;
    println!(
        "Watching {} range(s) around {} within {} km",
        query.ranges().len(),
        center,
        args.radius_km
    );

    let wait = Duration::from_secs(args.timeout_secs);
    loop {
        let event = next_event(&mut rx, wait).await?;
        println!("  {}", event);
        if matches!(event, QueryEvent::Ready) {
            break;
        }
    }

    if args.records > 0 {
        println!("Moving record-0 within the circle");
        store.set_location("record-0", &offset(&center, radius_m, 0.25, 3)?)?;
        drain(&mut rx).await;

        println!("Moving record-0 out of the circle");
        store.set_location("record-0", &offset(&center, radius_m, 3.0, 0)?)?;
        drain(&mut rx).await;
    }

    if args.records > 2 {
        println!("Updating record-2");
        let mut fields = Fields::new();
        fields.insert("status".into(), json!("idle"));
        memory.write(&memory.record_ref("record-2"), fields, WriteMode::Merge)?;
        drain(&mut rx).await;

        println!("Deleting record-2");
        memory.delete(&memory.record_ref("record-2"))?;
        drain(&mut rx).await;
    }

    println!(
        "{} record(s) remain in the circle",
        query.records_in_circle().len()
    );
    query.remove_all_listeners();
    Ok(())
}
