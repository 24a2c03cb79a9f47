use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::analytics::{
    boundary::{self, FlaggedReading},
    dwell::clipped_duration_seconds,
    histogram::{self, BucketStats},
};
use crate::db::{
    connection::Database,
    models::{DwellInterval, IntervalFilter, PositionReading, Zone},
};
use crate::geometry::ZoneGeometry;
use crate::tracker::TrackerController;

/// Per-vehicle rollup of one zone's history within a query window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleZoneSummary {
    pub vehicle_id: i64,
    pub total_inside_time: i64,
    pub ingress_count: u32,
    pub egress_count: u32,
}

/// The core's interface to its presentation layer: reading ingestion, the
/// zone-definition hook, and the analytical queries over interval history.
#[derive(Clone)]
pub struct DwellService {
    db: Database,
    tracker: TrackerController,
}

impl DwellService {
    pub fn new(db: Database, geometry: Arc<dyn ZoneGeometry>) -> Self {
        let tracker = TrackerController::new(db.clone(), geometry);
        Self { db, tracker }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Feed one reading into the tracker. Replaying an identical reading
    /// (same vehicle and timestamp) is a no-op.
    pub async fn record_reading(&self, reading: PositionReading) -> Result<()> {
        self.tracker.record_reading(reading).await
    }

    /// Notification hook: a new zone was persisted by the external
    /// catalog. Stores the projection and reconciles vehicles already
    /// sitting inside the new geometry.
    pub async fn zone_defined(&self, zone: &Zone) -> Result<()> {
        self.db.upsert_zone(zone).await?;
        self.tracker.zone_created(zone).await
    }

    pub async fn intervals_for_vehicle_in_zone(
        &self,
        zone_id: i64,
        vehicle_id: i64,
        window_start: Option<DateTime<Utc>>,
        window_end: Option<DateTime<Utc>>,
    ) -> Result<Vec<DwellInterval>> {
        self.db
            .list_intervals(IntervalFilter {
                zone_id: Some(zone_id),
                vehicle_id: Some(vehicle_id),
                overlaps_lower: window_start,
                overlaps_upper: window_end,
            })
            .await
    }

    /// Ordered reading list for an interval, noise-filtered, optionally
    /// with boundary context pulled in from just outside the interval's
    /// bounds. Output ascends by timestamp; the noise filter itself runs
    /// over the store-native descending order.
    pub async fn readings_for_interval(
        &self,
        interval_id: &str,
        expand: bool,
    ) -> Result<Vec<FlaggedReading>> {
        let interval = self.db.get_interval(interval_id).await?;
        let range_upper = interval
            .end_at
            .unwrap_or_else(|| Utc::now() + Duration::seconds(1));

        let mut data: Vec<FlaggedReading> = self
            .db
            .readings_in_range(interval.vehicle_id, interval.start_at, range_upper)
            .await?
            .into_iter()
            .map(|reading| FlaggedReading {
                reading,
                expanded: false,
            })
            .collect();

        if expand {
            let (lower_reading, upper_reading) = boundary::expand(&self.db, &interval).await?;
            // Keep descending order: the upper boundary is the newest
            // entry, the lower boundary the oldest.
            if let Some(reading) = upper_reading {
                merge_expanded(&mut data, reading, true);
            }
            if let Some(reading) = lower_reading {
                merge_expanded(&mut data, reading, false);
            }
        }

        let mut readings = boundary::exclude_non_traveling(data);
        readings.sort_by_key(|flagged| flagged.reading.datetime);
        Ok(readings)
    }

    /// Hour-bucketed occupancy, transition and movement-duration stats for
    /// a zone over `[window_start, window_end]`.
    pub async fn histogram(
        &self,
        zone_id: i64,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<BTreeMap<DateTime<Utc>, BucketStats>> {
        let intervals = self
            .db
            .list_intervals(IntervalFilter {
                zone_id: Some(zone_id),
                vehicle_id: None,
                overlaps_lower: Some(window_start),
                overlaps_upper: Some(window_end),
            })
            .await?;

        let mut vehicle_ids: Vec<i64> = intervals.iter().map(|iv| iv.vehicle_id).collect();
        vehicle_ids.sort_unstable();
        vehicle_ids.dedup();

        let states = self
            .db
            .vehicle_states_in_range(vehicle_ids, window_start, window_end)
            .await?;

        Ok(histogram::histogram(&intervals, &states, window_start, window_end))
    }

    pub async fn vehicle_zone_summary(
        &self,
        zone_id: i64,
        vehicle_id: i64,
        window_start: Option<DateTime<Utc>>,
        window_end: Option<DateTime<Utc>>,
    ) -> Result<VehicleZoneSummary> {
        let intervals = self
            .intervals_for_vehicle_in_zone(zone_id, vehicle_id, window_start, window_end)
            .await?;

        let now = Utc::now();
        let total_inside_time = intervals
            .iter()
            .map(|iv| clipped_duration_seconds(iv, window_start, window_end, now))
            .sum();
        let egress_count = intervals.iter().filter(|iv| !iv.is_open()).count() as u32;

        Ok(VehicleZoneSummary {
            vehicle_id,
            total_inside_time,
            ingress_count: intervals.len() as u32,
            egress_count,
        })
    }

    /// Wait until every queued reading and backfill has been applied.
    pub async fn flush(&self) -> Result<()> {
        self.tracker.flush().await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.tracker.shutdown().await
    }
}

/// Merge a boundary reading into a descending list. A reading the range
/// already contains is only flagged, not duplicated.
fn merge_expanded(data: &mut Vec<FlaggedReading>, reading: PositionReading, newest: bool) {
    if let Some(existing) = data
        .iter_mut()
        .find(|flagged| flagged.reading.id.is_some() && flagged.reading.id == reading.id)
    {
        existing.expanded = true;
        return;
    }

    let flagged = FlaggedReading {
        reading,
        expanded: true,
    };
    if newest {
        data.insert(0, flagged);
    } else {
        data.push(flagged);
    }
}
