use anyhow::Result;
use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::db::{
    connection::Database,
    models::{DwellInterval, PositionReading},
};

/// How far outside an interval's bounds we look for context readings.
const EXPANSION_WINDOW_MINUTES: i64 = 10;

/// A reading in a presentation list, marked when it was pulled in from
/// outside the interval's own range by boundary expansion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlaggedReading {
    pub reading: PositionReading,
    pub expanded: bool,
}

/// Find the readings immediately adjacent to an interval's boundaries.
///
/// Lower: the newest valid reading in the ten minutes up to and including
/// the start, the vehicle's last observed state just before entry. Upper:
/// the oldest valid reading in the ten minutes from the end, its first
/// observed state after exit. An open interval has no upper boundary to
/// expand.
pub async fn expand(
    db: &Database,
    interval: &DwellInterval,
) -> Result<(Option<PositionReading>, Option<PositionReading>)> {
    let window = Duration::minutes(EXPANSION_WINDOW_MINUTES);

    let lower = db
        .last_active_reading(
            interval.vehicle_id,
            interval.start_at - window,
            interval.start_at,
        )
        .await?;

    let upper = match interval.end_at {
        Some(end) => {
            db.first_active_reading(interval.vehicle_id, end, end + window)
                .await?
        }
        None => None,
    };

    Ok((lower, upper))
}

/// Collapse runs of non-traveling readings, keeping the single reading
/// that marks each transition out of travel. A reading survives when it is
/// traveling, is first in the sequence, or directly follows a traveling
/// reading. Callers feed this the store-native (descending) order and
/// re-sort the result for presentation.
pub fn exclude_non_traveling(readings: Vec<FlaggedReading>) -> Vec<FlaggedReading> {
    let mut kept = Vec::new();
    let mut prev_traveling: Option<bool> = None;

    for flagged in readings {
        let is_traveling = flagged.reading.movement.is_traveling();
        if is_traveling || prev_traveling.unwrap_or(true) {
            kept.push(flagged);
        }
        prev_traveling = Some(is_traveling);
    }

    kept
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::*;
    use crate::db::models::{
        GeoPoint, IntervalOrigin, MovementType, ReadingStatus, Vehicle, Zone,
    };

    fn reading(at: DateTime<Utc>, movement: MovementType) -> FlaggedReading {
        FlaggedReading {
            reading: PositionReading {
                id: None,
                vehicle_id: 1,
                datetime: at,
                point: None,
                movement,
                status: ReadingStatus::Valid,
            },
            expanded: false,
        }
    }

    fn movements(readings: &[FlaggedReading]) -> Vec<MovementType> {
        readings.iter().map(|r| r.reading.movement).collect()
    }

    #[test]
    fn collapses_trailing_stationary_run() {
        use MovementType::*;

        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let seq = [Stopped, Traveling, Traveling, Stopped, Stopped, Stopped]
            .iter()
            .enumerate()
            .map(|(i, m)| reading(t0 + Duration::seconds(i as i64 * 10), *m))
            .collect();

        let kept = exclude_non_traveling(seq);
        assert_eq!(movements(&kept), vec![Stopped, Traveling, Traveling, Stopped]);
    }

    #[test]
    fn first_reading_always_kept() {
        use MovementType::*;

        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let seq = [Idling, Idling, Towed]
            .iter()
            .enumerate()
            .map(|(i, m)| reading(t0 + Duration::seconds(i as i64 * 10), *m))
            .collect();

        let kept = exclude_non_traveling(seq);
        assert_eq!(movements(&kept), vec![Idling]);
    }

    #[test]
    fn all_traveling_passes_through() {
        use MovementType::*;

        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let seq: Vec<_> = (0..4)
            .map(|i| reading(t0 + Duration::seconds(i * 10), Traveling))
            .collect();

        let kept = exclude_non_traveling(seq.clone());
        assert_eq!(kept.len(), seq.len());
    }

    #[test]
    fn empty_sequence() {
        assert!(exclude_non_traveling(Vec::new()).is_empty());
    }

    async fn insert_reading_at(db: &Database, at: DateTime<Utc>, status: ReadingStatus) {
        db.insert_reading(&PositionReading {
            id: None,
            vehicle_id: 1,
            datetime: at,
            point: Some(GeoPoint {
                latitude: 35.2,
                longitude: -80.8,
            }),
            movement: MovementType::Traveling,
            status,
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn expansion_picks_the_reading_nearest_each_boundary() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_vehicle(&Vehicle {
            id: 1,
            customer_id: 10,
            name: "truck-1".into(),
        })
        .await
        .unwrap();
        db.upsert_zone(&Zone {
            id: 100,
            customer_id: 10,
            name: "depot".into(),
            radius: Some(250.0),
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
        })
        .await
        .unwrap();

        let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let end = start + Duration::minutes(30);
        let interval = db
            .open_interval(1, 100, start, IntervalOrigin::Live)
            .await
            .unwrap();
        let interval = db.close_interval(&interval.id, end).await.unwrap();

        // Two candidates in each ten-minute window; the nearest to the
        // boundary wins, and invalid readings are passed over.
        insert_reading_at(&db, start - Duration::minutes(9), ReadingStatus::Valid).await;
        insert_reading_at(&db, start - Duration::minutes(1), ReadingStatus::Valid).await;
        insert_reading_at(&db, end + Duration::minutes(1), ReadingStatus::Invalid).await;
        insert_reading_at(&db, end + Duration::minutes(2), ReadingStatus::Valid).await;
        insert_reading_at(&db, end + Duration::minutes(8), ReadingStatus::Valid).await;

        let (lower, upper) = expand(&db, &interval).await.unwrap();
        assert_eq!(lower.unwrap().datetime, start - Duration::minutes(1));
        assert_eq!(upper.unwrap().datetime, end + Duration::minutes(2));
    }
}
