use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, types::Value, OptionalExtension, Row, Transaction};
use uuid::Uuid;

use crate::db::{
    connection::Database,
    helpers::{fmt_datetime, parse_datetime, parse_optional_datetime, parse_origin},
    models::{DwellInterval, IntervalFilter, IntervalOrigin},
};
use crate::error::DwellError;

const INTERVAL_COLUMNS: &str =
    "id, vehicle_id, zone_id, start_at, end_at, origin, created_at, updated_at";

fn row_to_interval(row: &Row) -> Result<DwellInterval> {
    let start_at: String = row.get("start_at")?;
    let end_at: Option<String> = row.get("end_at")?;
    let origin: String = row.get("origin")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(DwellInterval {
        id: row.get("id")?,
        vehicle_id: row.get("vehicle_id")?,
        zone_id: row.get("zone_id")?,
        start_at: parse_datetime(&start_at, "start_at")?,
        end_at: parse_optional_datetime(end_at, "end_at")?,
        origin: parse_origin(&origin)?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

/// Both owners must agree before an interval may link a vehicle to a zone.
fn check_owner_agreement(tx: &Transaction<'_>, vehicle_id: i64, zone_id: i64) -> Result<()> {
    let vehicle_owner: Option<i64> = tx
        .query_row(
            "SELECT customer_id FROM vehicles WHERE id = ?1",
            params![vehicle_id],
            |row| row.get(0),
        )
        .optional()?;
    let vehicle_owner = vehicle_owner
        .ok_or_else(|| DwellError::NotFound(format!("vehicle {vehicle_id}")))?;

    let zone_owner: Option<i64> = tx
        .query_row(
            "SELECT customer_id FROM zones WHERE id = ?1",
            params![zone_id],
            |row| row.get(0),
        )
        .optional()?;
    let zone_owner = zone_owner.ok_or_else(|| DwellError::NotFound(format!("zone {zone_id}")))?;

    if vehicle_owner != zone_owner {
        return Err(DwellError::Conflict(format!(
            "vehicle {vehicle_id} (customer {vehicle_owner}) and zone {zone_id} \
             (customer {zone_owner}) belong to different customers"
        ))
        .into());
    }

    Ok(())
}

impl Database {
    /// Open a new dwell interval `[at, ∞)` for a vehicle.
    ///
    /// The uniqueness and overlap checks run in the same transaction as the
    /// insert, on the single writer connection, so two racing opens for one
    /// vehicle cannot both succeed. A zero-length interval (`start == end`)
    /// never counts as overlapping.
    pub async fn open_interval(
        &self,
        vehicle_id: i64,
        zone_id: i64,
        at: DateTime<Utc>,
        origin: IntervalOrigin,
    ) -> Result<DwellInterval> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            check_owner_agreement(&tx, vehicle_id, zone_id)?;

            let open_id: Option<String> = tx
                .query_row(
                    "SELECT id FROM dwell_intervals
                     WHERE vehicle_id = ?1 AND end_at IS NULL",
                    params![vehicle_id],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(open_id) = open_id {
                return Err(DwellError::Conflict(format!(
                    "vehicle {vehicle_id} already has an open interval {open_id}"
                ))
                .into());
            }

            let at_str = fmt_datetime(at);
            let overlapping: Option<String> = tx
                .query_row(
                    "SELECT id FROM dwell_intervals
                     WHERE vehicle_id = ?1
                       AND end_at IS NOT NULL
                       AND end_at > start_at
                       AND end_at > ?2
                     LIMIT 1",
                    params![vehicle_id, at_str],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(other) = overlapping {
                return Err(DwellError::Conflict(format!(
                    "open at {at_str} would overlap interval {other} for vehicle {vehicle_id}"
                ))
                .into());
            }

            let now = Utc::now();
            let interval = DwellInterval {
                id: Uuid::new_v4().to_string(),
                vehicle_id,
                zone_id,
                start_at: at,
                end_at: None,
                origin,
                created_at: now,
                updated_at: now,
            };

            tx.execute(
                "INSERT INTO dwell_intervals
                     (id, vehicle_id, zone_id, start_at, end_at, origin, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?6, ?7)",
                params![
                    interval.id,
                    interval.vehicle_id,
                    interval.zone_id,
                    at_str,
                    interval.origin.as_str(),
                    fmt_datetime(interval.created_at),
                    fmt_datetime(interval.updated_at),
                ],
            )?;

            tx.commit()?;
            Ok(interval)
        })
        .await
    }

    /// Close an open interval at `at`. Fails `Conflict` if the interval is
    /// already closed or `at` precedes its start; the bound may equal the
    /// start (instantaneous enter-and-exit).
    pub async fn close_interval(&self, interval_id: &str, at: DateTime<Utc>) -> Result<DwellInterval> {
        self.close_interval_inner(interval_id, at, false).await
    }

    /// Close an open interval on behalf of the zone-creation backfill; the
    /// record's origin flips to `reconciled` since its end bound was
    /// produced by reconciliation rather than live ingestion.
    pub async fn close_interval_reconciled(
        &self,
        interval_id: &str,
        at: DateTime<Utc>,
    ) -> Result<DwellInterval> {
        self.close_interval_inner(interval_id, at, true).await
    }

    async fn close_interval_inner(
        &self,
        interval_id: &str,
        at: DateTime<Utc>,
        reconciled: bool,
    ) -> Result<DwellInterval> {
        let interval_id = interval_id.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            let existing = tx
                .query_row(
                    &format!(
                        "SELECT {INTERVAL_COLUMNS} FROM dwell_intervals WHERE id = ?1"
                    ),
                    params![interval_id],
                    |row| Ok(row_to_interval(row)),
                )
                .optional()?
                .transpose()?
                .ok_or_else(|| DwellError::NotFound(format!("interval {interval_id}")))?;

            if existing.end_at.is_some() {
                return Err(DwellError::Conflict(format!(
                    "interval {interval_id} is already closed"
                ))
                .into());
            }
            if at < existing.start_at {
                return Err(DwellError::Conflict(format!(
                    "close time {} precedes interval start {}",
                    fmt_datetime(at),
                    fmt_datetime(existing.start_at)
                ))
                .into());
            }

            let origin = if reconciled {
                IntervalOrigin::Reconciled
            } else {
                existing.origin
            };
            let now = Utc::now();

            tx.execute(
                "UPDATE dwell_intervals
                 SET end_at = ?1,
                     origin = ?2,
                     updated_at = ?3
                 WHERE id = ?4",
                params![
                    fmt_datetime(at),
                    origin.as_str(),
                    fmt_datetime(now),
                    interval_id,
                ],
            )?;
            tx.commit()?;

            Ok(DwellInterval {
                end_at: Some(at),
                origin,
                updated_at: now,
                ..existing
            })
        })
        .await
    }

    pub async fn get_interval(&self, interval_id: &str) -> Result<DwellInterval> {
        let interval_id = interval_id.to_string();
        self.execute(move |conn| {
            conn.query_row(
                &format!("SELECT {INTERVAL_COLUMNS} FROM dwell_intervals WHERE id = ?1"),
                params![interval_id],
                |row| Ok(row_to_interval(row)),
            )
            .optional()?
            .transpose()?
            .ok_or_else(|| DwellError::NotFound(format!("interval {interval_id}")).into())
        })
        .await
    }

    pub async fn get_open_interval_for_vehicle(
        &self,
        vehicle_id: i64,
    ) -> Result<Option<DwellInterval>> {
        self.execute(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {INTERVAL_COLUMNS} FROM dwell_intervals
                     WHERE vehicle_id = ?1 AND end_at IS NULL"
                ),
                params![vehicle_id],
                |row| Ok(row_to_interval(row)),
            )
            .optional()?
            .transpose()
        })
        .await
    }

    /// List intervals newest-first. An open interval sorts before every
    /// closed one regardless of its start: it is conceptually still
    /// happening, hence the most recent.
    pub async fn list_intervals(&self, filter: IntervalFilter) -> Result<Vec<DwellInterval>> {
        self.execute(move |conn| {
            let mut clauses: Vec<&str> = Vec::new();
            let mut args: Vec<Value> = Vec::new();

            if let Some(zone_id) = filter.zone_id {
                args.push(Value::Integer(zone_id));
                clauses.push("zone_id = ?");
            }
            if let Some(vehicle_id) = filter.vehicle_id {
                args.push(Value::Integer(vehicle_id));
                clauses.push("vehicle_id = ?");
            }
            if let Some(upper) = filter.overlaps_upper {
                args.push(Value::Text(fmt_datetime(upper)));
                clauses.push("start_at < ?");
            }
            if let Some(lower) = filter.overlaps_lower {
                args.push(Value::Text(fmt_datetime(lower)));
                clauses.push("(end_at IS NULL OR (end_at > start_at AND end_at > ?))");
            }

            let mut sql = format!("SELECT {INTERVAL_COLUMNS} FROM dwell_intervals");
            if !clauses.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&clauses.join(" AND "));
            }
            sql.push_str(" ORDER BY (end_at IS NULL) DESC, start_at DESC");

            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(args))?;
            let mut intervals = Vec::new();
            while let Some(row) = rows.next()? {
                intervals.push(row_to_interval(row)?);
            }
            Ok(intervals)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::*;
    use crate::db::models::{Vehicle, Zone};
    use crate::error::{is_conflict, is_not_found};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    async fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.upsert_vehicle(&Vehicle {
            id: 1,
            customer_id: 10,
            name: "truck-1".into(),
        })
        .await
        .unwrap();
        db.upsert_vehicle(&Vehicle {
            id: 2,
            customer_id: 20,
            name: "truck-2".into(),
        })
        .await
        .unwrap();
        db.upsert_zone(&Zone {
            id: 100,
            customer_id: 10,
            name: "depot".into(),
            radius: Some(250.0),
            created_at: t0(),
        })
        .await
        .unwrap();
        db.upsert_zone(&Zone {
            id: 101,
            customer_id: 10,
            name: "yard".into(),
            radius: None,
            created_at: t0(),
        })
        .await
        .unwrap();
        db
    }

    #[tokio::test]
    async fn open_creates_open_interval() {
        let db = test_db().await;
        let interval = db
            .open_interval(1, 100, t0(), IntervalOrigin::Live)
            .await
            .unwrap();

        assert!(interval.is_open());
        assert_eq!(interval.vehicle_id, 1);
        assert_eq!(interval.zone_id, 100);
        assert_eq!(interval.start_at, t0());
        assert_eq!(interval.origin, IntervalOrigin::Live);
    }

    #[tokio::test]
    async fn second_open_for_same_vehicle_conflicts() {
        let db = test_db().await;
        db.open_interval(1, 100, t0(), IntervalOrigin::Live)
            .await
            .unwrap();

        let err = db
            .open_interval(1, 101, t0() + Duration::minutes(5), IntervalOrigin::Live)
            .await
            .unwrap_err();
        assert!(is_conflict(&err));
    }

    #[tokio::test]
    async fn close_sets_end_and_second_close_conflicts() {
        let db = test_db().await;
        let interval = db
            .open_interval(1, 100, t0(), IntervalOrigin::Live)
            .await
            .unwrap();

        let end = t0() + Duration::hours(1);
        let closed = db.close_interval(&interval.id, end).await.unwrap();
        assert_eq!(closed.end_at, Some(end));
        assert_eq!(closed.origin, IntervalOrigin::Live);

        let err = db
            .close_interval(&interval.id, end + Duration::minutes(1))
            .await
            .unwrap_err();
        assert!(is_conflict(&err));
    }

    #[tokio::test]
    async fn close_before_start_conflicts_but_zero_length_is_allowed() {
        let db = test_db().await;
        let interval = db
            .open_interval(1, 100, t0(), IntervalOrigin::Live)
            .await
            .unwrap();

        let err = db
            .close_interval(&interval.id, t0() - Duration::seconds(1))
            .await
            .unwrap_err();
        assert!(is_conflict(&err));

        // Instantaneous enter-and-exit
        let closed = db.close_interval(&interval.id, t0()).await.unwrap();
        assert_eq!(closed.end_at, Some(t0()));
    }

    #[tokio::test]
    async fn open_overlapping_existing_range_conflicts() {
        let db = test_db().await;
        let first = db
            .open_interval(1, 100, t0(), IntervalOrigin::Live)
            .await
            .unwrap();
        db.close_interval(&first.id, t0() + Duration::hours(2))
            .await
            .unwrap();

        // [t0+1h, ∞) overlaps [t0, t0+2h)
        let err = db
            .open_interval(1, 100, t0() + Duration::hours(1), IntervalOrigin::Live)
            .await
            .unwrap_err();
        assert!(is_conflict(&err));

        // Starting exactly at the previous end is fine (half-open ranges)
        db.open_interval(1, 100, t0() + Duration::hours(2), IntervalOrigin::Live)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn zero_length_interval_never_blocks_reopening() {
        let db = test_db().await;
        let first = db
            .open_interval(1, 100, t0(), IntervalOrigin::Live)
            .await
            .unwrap();
        db.close_interval(&first.id, t0()).await.unwrap();

        // A later open must not collide with the empty range, nor must an
        // open at the very same instant.
        db.open_interval(1, 100, t0(), IntervalOrigin::Live)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn owner_mismatch_conflicts() {
        let db = test_db().await;
        // vehicle 2 belongs to customer 20, zone 100 to customer 10
        let err = db
            .open_interval(2, 100, t0(), IntervalOrigin::Live)
            .await
            .unwrap_err();
        assert!(is_conflict(&err));
    }

    #[tokio::test]
    async fn unknown_references_are_not_found() {
        let db = test_db().await;

        let err = db
            .open_interval(99, 100, t0(), IntervalOrigin::Live)
            .await
            .unwrap_err();
        assert!(is_not_found(&err));

        let err = db
            .open_interval(1, 999, t0(), IntervalOrigin::Live)
            .await
            .unwrap_err();
        assert!(is_not_found(&err));

        let err = db.close_interval("no-such-id", t0()).await.unwrap_err();
        assert!(is_not_found(&err));

        let err = db.get_interval("no-such-id").await.unwrap_err();
        assert!(is_not_found(&err));
    }

    #[tokio::test]
    async fn concurrent_opens_admit_exactly_one() {
        let db = test_db().await;

        let mut handles = Vec::new();
        for i in 0..8 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                db.open_interval(1, 100, t0() + Duration::seconds(i), IntervalOrigin::Live)
                    .await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);

        let intervals = db
            .list_intervals(IntervalFilter {
                vehicle_id: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(intervals.len(), 1);
    }

    #[tokio::test]
    async fn open_interval_sorts_first_regardless_of_start() {
        let db = test_db().await;

        let early_open = db
            .open_interval(1, 100, t0(), IntervalOrigin::Live)
            .await
            .unwrap();
        db.close_interval(&early_open.id, t0() + Duration::hours(1))
            .await
            .unwrap();
        let late = db
            .open_interval(1, 100, t0() + Duration::hours(2), IntervalOrigin::Live)
            .await
            .unwrap();
        db.close_interval(&late.id, t0() + Duration::hours(3))
            .await
            .unwrap();
        // Reopen with a start earlier than the latest closed interval's end
        // is impossible; open one after it instead.
        let open = db
            .open_interval(1, 100, t0() + Duration::hours(4), IntervalOrigin::Live)
            .await
            .unwrap();

        let intervals = db
            .list_intervals(IntervalFilter {
                vehicle_id: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(intervals.len(), 3);
        assert_eq!(intervals[0].id, open.id);
        assert_eq!(intervals[1].id, late.id);
        assert_eq!(intervals[2].id, early_open.id);
    }

    #[tokio::test]
    async fn overlap_window_filter() {
        let db = test_db().await;

        let first = db
            .open_interval(1, 100, t0(), IntervalOrigin::Live)
            .await
            .unwrap();
        db.close_interval(&first.id, t0() + Duration::hours(1))
            .await
            .unwrap();
        let second = db
            .open_interval(1, 100, t0() + Duration::hours(3), IntervalOrigin::Live)
            .await
            .unwrap();

        // Window covering only the first interval
        let intervals = db
            .list_intervals(IntervalFilter {
                vehicle_id: Some(1),
                overlaps_lower: Some(t0() + Duration::minutes(30)),
                overlaps_upper: Some(t0() + Duration::hours(2)),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(intervals.len(), 1);
        assert_eq!(intervals[0].id, first.id);

        // Open interval overlaps any window after its start
        let intervals = db
            .list_intervals(IntervalFilter {
                vehicle_id: Some(1),
                overlaps_lower: Some(t0() + Duration::hours(10)),
                overlaps_upper: Some(t0() + Duration::hours(11)),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(intervals.len(), 1);
        assert_eq!(intervals[0].id, second.id);
    }
}
