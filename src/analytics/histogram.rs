use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::analytics::dwell::clipped_span_seconds;
use crate::db::models::{DwellInterval, MovementType, VehicleStateSpan};

/// Occupancy and movement statistics for one hour bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketStats {
    /// Intervals whose start falls within the bucket.
    pub entered: u32,
    /// Intervals whose end falls within the bucket.
    pub exited: u32,
    /// Intervals overlapping the bucket at all, open or closed.
    pub inside: u32,
    pub traveling: i64,
    pub idling: i64,
    pub stopped: i64,
    pub towed: i64,
    pub total: i64,
}

/// Contiguous 1-hour windows covering `[lower, upper]`, ascending. The
/// final bucket is clamped so a partial trailing hour is still included.
pub fn hour_buckets(
    lower: DateTime<Utc>,
    upper: DateTime<Utc>,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let mut buckets = Vec::new();
    let mut start = lower;
    while start < upper {
        let end = (start + Duration::hours(1)).min(upper);
        buckets.push((start, end));
        start = end;
    }
    buckets
}

fn overlaps(
    interval: &DwellInterval,
    bucket_start: DateTime<Utc>,
    bucket_end: DateTime<Utc>,
) -> bool {
    if interval.start_at >= bucket_end {
        return false;
    }
    match interval.end_at {
        // Open intervals extend to infinity.
        None => true,
        // Zero-length intervals overlap nothing.
        Some(end) => end > bucket_start && end > interval.start_at,
    }
}

/// Bucket a zone's intervals and companion vehicle-state spans over
/// `[lower, upper]`. Pure over its inputs: identical intervals and spans
/// always produce identical statistics.
pub fn histogram(
    intervals: &[DwellInterval],
    states: &[VehicleStateSpan],
    lower: DateTime<Utc>,
    upper: DateTime<Utc>,
) -> BTreeMap<DateTime<Utc>, BucketStats> {
    let mut result = BTreeMap::new();

    for (bucket_start, bucket_end) in hour_buckets(lower, upper) {
        let mut stats = BucketStats::default();
        let mut vehicles_present: HashSet<i64> = HashSet::new();

        for interval in intervals {
            if interval.start_at >= bucket_start && interval.start_at < bucket_end {
                stats.entered += 1;
            }
            if let Some(end) = interval.end_at {
                if end >= bucket_start && end < bucket_end {
                    stats.exited += 1;
                }
            }
            if overlaps(interval, bucket_start, bucket_end) {
                stats.inside += 1;
                vehicles_present.insert(interval.vehicle_id);
            }
        }

        for span in states {
            if !vehicles_present.contains(&span.vehicle_id) {
                continue;
            }
            let seconds =
                clipped_span_seconds(span.start_at, span.end_at, bucket_start, bucket_end);
            if seconds == 0 {
                continue;
            }
            match span.movement {
                MovementType::Traveling => stats.traveling += seconds,
                MovementType::Idling => stats.idling += seconds,
                MovementType::Stopped => stats.stopped += seconds,
                MovementType::Towed => stats.towed += seconds,
            }
            stats.total += seconds;
        }

        result.insert(bucket_start, stats);
    }

    result
}
