//! Drives one pipeline run end-to-end against a seeded in-memory store, so
//! the whole path (dedup -> orchestrator -> grading -> persisted ranking)
//! can be exercised without a live Postgres or real provider credentials.
//!
//! Grounded in `ob-poc-web::main`'s "load config, build service, run one
//! request" demo shape.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use triad::{BlocksOutcome, BlocksService, Config};
use triad_store::MemoryStore;
use triad_types::{DayPart, Snapshot};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::load()?;
    let store = Arc::new(MemoryStore::new());

    let snapshot_id = Uuid::new_v4();
    store.seed_snapshot(Snapshot {
        snapshot_id,
        lat: 41.8781,
        lng: -87.6298,
        formatted_address: Some("233 S Wacker Dr, Chicago, IL".to_string()),
        city: Some("Chicago".to_string()),
        state: Some("IL".to_string()),
        timezone: Some("America/Chicago".to_string()),
        created_at: Utc::now(),
        day_part: Some(DayPart::Evening),
        dow: Some(5),
        weather: None,
        air_quality: None,
        airport_context: None,
        is_holiday: false,
        holiday_name: None,
    });

    let service = BlocksService::new(&config, store.clone());
    let cancel = CancellationToken::new();

    tracing::info!(%snapshot_id, "submitting demo snapshot to the pipeline");

    match service.handle_blocks_request(snapshot_id, None, &cancel).await {
        Ok(BlocksOutcome::Ranked(outcome)) => {
            println!("path_taken: {}", outcome.path_taken);
            for candidate in &outcome.candidates {
                println!("  #{} {} ({:?})", candidate.rank, candidate.name, candidate.value_grade);
            }
        }
        Ok(BlocksOutcome::InFlight(status)) => {
            println!("job is in flight: {status:?}");
        }
        Err(e) => {
            eprintln!("pipeline run failed: {e} (code={}, status={})", e.code(), e.http_status());
        }
    }

    Ok(())
}
