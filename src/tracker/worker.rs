use std::sync::Arc;

use anyhow::Result;
use log::{error, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use crate::db::{
    connection::Database,
    models::{IntervalOrigin, PositionReading},
};
use crate::error::{is_conflict, is_not_found};
use crate::geometry::ZoneGeometry;

const RETRY_BACKOFF_MS: u64 = 100;

pub enum TrackerCommand {
    Reading(PositionReading),
    ZoneBackfill { zone_id: i64 },
    /// Ack once every previously queued command has been applied.
    Flush(oneshot::Sender<()>),
}

/// Owns one vehicle's dwell state machine. All mutations for the vehicle
/// flow through this task's queue, so readings apply in submission order
/// and the zone-creation backfill cannot race a live reading.
pub async fn vehicle_worker(
    vehicle_id: i64,
    db: Database,
    geometry: Arc<dyn ZoneGeometry>,
    mut commands: mpsc::Receiver<TrackerCommand>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("tracker worker for vehicle {vehicle_id} shutting down");
                break;
            }
            command = commands.recv() => {
                let Some(command) = command else { break };
                match command {
                    TrackerCommand::Reading(reading) => {
                        handle_reading(&db, geometry.as_ref(), reading).await;
                    }
                    TrackerCommand::ZoneBackfill { zone_id } => {
                        handle_backfill(&db, geometry.as_ref(), vehicle_id, zone_id).await;
                    }
                    TrackerCommand::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
        }
    }
}

async fn handle_reading(db: &Database, geometry: &dyn ZoneGeometry, reading: PositionReading) {
    // Persist first: a reading already stored for this vehicle and
    // timestamp is a replay, and its transitions have already been applied.
    let inserted = match db.insert_reading(&reading).await {
        Ok(inserted) => inserted,
        Err(err) => {
            error!(
                "failed to persist reading at {} for vehicle {}: {err:#}",
                reading.datetime, reading.vehicle_id
            );
            return;
        }
    };
    if !inserted {
        return;
    }

    if let Err(err) = apply_transitions(db, geometry, &reading).await {
        if is_not_found(&err) {
            // Unknown vehicle or zone; retrying cannot help.
            error!(
                "dropping reading at {} for vehicle {}: {err:#}",
                reading.datetime, reading.vehicle_id
            );
            return;
        }
        if is_conflict(&err) {
            warn!(
                "conflict applying reading at {} for vehicle {}, retrying once: {err:#}",
                reading.datetime, reading.vehicle_id
            );
        } else {
            warn!(
                "storage error applying reading at {} for vehicle {}, retrying: {err:#}",
                reading.datetime, reading.vehicle_id
            );
            sleep(Duration::from_millis(RETRY_BACKOFF_MS)).await;
        }

        // The retry re-reads current interval state from scratch. A second
        // failure skips this reading; the stream keeps flowing.
        if let Err(err) = apply_transitions(db, geometry, &reading).await {
            error!(
                "skipping reading at {} for vehicle {}: {err:#}",
                reading.datetime, reading.vehicle_id
            );
        }
    }
}

/// The per-reading state machine. Close first when the vehicle has left
/// its current zone, then open if any zone of the owner contains the new
/// point and no interval is open.
async fn apply_transitions(
    db: &Database,
    geometry: &dyn ZoneGeometry,
    reading: &PositionReading,
) -> Result<()> {
    if let Some(open) = db.get_open_interval_for_vehicle(reading.vehicle_id).await? {
        let still_inside = reading
            .point
            .map(|point| geometry.contains(open.zone_id, point))
            .unwrap_or(false);
        if still_inside {
            return Ok(());
        }
        db.close_interval(&open.id, reading.datetime).await?;
    }

    let Some(point) = reading.point else {
        return Ok(());
    };

    let vehicle = db.get_vehicle(reading.vehicle_id).await?;
    for zone in db.zones_for_customer(vehicle.customer_id).await? {
        // First applicable zone wins; no dual membership.
        if geometry.contains(zone.id, point) {
            db.open_interval(
                reading.vehicle_id,
                zone.id,
                reading.datetime,
                IntervalOrigin::Live,
            )
            .await?;
            break;
        }
    }

    Ok(())
}

async fn handle_backfill(
    db: &Database,
    geometry: &dyn ZoneGeometry,
    vehicle_id: i64,
    zone_id: i64,
) {
    if let Err(err) = apply_backfill(db, geometry, vehicle_id, zone_id).await {
        if is_not_found(&err) {
            error!("dropping backfill of zone {zone_id} for vehicle {vehicle_id}: {err:#}");
            return;
        }
        if is_conflict(&err) {
            warn!(
                "conflict backfilling zone {zone_id} for vehicle {vehicle_id}, retrying once: {err:#}"
            );
        } else {
            warn!(
                "storage error backfilling zone {zone_id} for vehicle {vehicle_id}, retrying: {err:#}"
            );
            sleep(Duration::from_millis(RETRY_BACKOFF_MS)).await;
        }

        if let Err(err) = apply_backfill(db, geometry, vehicle_id, zone_id).await {
            error!("skipping backfill of zone {zone_id} for vehicle {vehicle_id}: {err:#}");
        }
    }
}

/// Reconcile a freshly defined zone against a vehicle's last known
/// position. A vehicle already sitting inside the new geometry gets its
/// open interval (if any) closed at the last reading's time and a new
/// interval for the new zone opened at that same boundary.
async fn apply_backfill(
    db: &Database,
    geometry: &dyn ZoneGeometry,
    vehicle_id: i64,
    zone_id: i64,
) -> Result<()> {
    let Some(reading) = db.latest_reading_for_vehicle(vehicle_id).await? else {
        return Ok(());
    };
    let Some(point) = reading.point else {
        return Ok(());
    };
    if !geometry.contains(zone_id, point) {
        return Ok(());
    }

    if let Some(open) = db.get_open_interval_for_vehicle(vehicle_id).await? {
        if open.zone_id == zone_id {
            // Replayed notification; the zone is already tracked.
            return Ok(());
        }
        db.close_interval_reconciled(&open.id, reading.datetime).await?;
    }

    db.open_interval(
        vehicle_id,
        zone_id,
        reading.datetime,
        IntervalOrigin::Reconciled,
    )
    .await?;

    Ok(())
}
