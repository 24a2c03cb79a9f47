use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{fmt_datetime, parse_datetime, parse_movement, parse_reading_status},
    models::{GeoPoint, PositionReading},
};

const READING_COLUMNS: &str = "id, vehicle_id, datetime, latitude, longitude, movement, status";

fn row_to_reading(row: &Row) -> Result<PositionReading> {
    let datetime: String = row.get("datetime")?;
    let latitude: Option<f64> = row.get("latitude")?;
    let longitude: Option<f64> = row.get("longitude")?;
    let movement: String = row.get("movement")?;
    let status: String = row.get("status")?;

    let point = match (latitude, longitude) {
        (Some(latitude), Some(longitude)) => Some(GeoPoint {
            latitude,
            longitude,
        }),
        _ => None,
    };

    Ok(PositionReading {
        id: row.get("id")?,
        vehicle_id: row.get("vehicle_id")?,
        datetime: parse_datetime(&datetime, "datetime")?,
        point,
        movement: parse_movement(&movement)?,
        status: parse_reading_status(&status)?,
    })
}

impl Database {
    /// Ingest one reading. Returns `false` when a reading for the same
    /// vehicle and timestamp is already stored, which makes stream replay
    /// idempotent.
    pub async fn insert_reading(&self, reading: &PositionReading) -> Result<bool> {
        let record = reading.clone();
        self.execute(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO position_readings
                     (vehicle_id, datetime, latitude, longitude, movement, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (vehicle_id, datetime) DO NOTHING",
                params![
                    record.vehicle_id,
                    fmt_datetime(record.datetime),
                    record.point.map(|p| p.latitude),
                    record.point.map(|p| p.longitude),
                    record.movement.as_str(),
                    record.status.as_str(),
                ],
            )?;
            Ok(inserted > 0)
        })
        .await
    }

    pub async fn latest_reading_for_vehicle(
        &self,
        vehicle_id: i64,
    ) -> Result<Option<PositionReading>> {
        self.execute(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {READING_COLUMNS} FROM position_readings
                     WHERE vehicle_id = ?1
                     ORDER BY datetime DESC
                     LIMIT 1"
                ),
                params![vehicle_id],
                |row| Ok(row_to_reading(row)),
            )
            .optional()?
            .transpose()
        })
        .await
    }

    /// Readings in `[lower, upper]` in the store's native order: newest
    /// first. Boundary noise filtering runs over this order before the
    /// presentation layer re-sorts ascending.
    pub async fn readings_in_range(
        &self,
        vehicle_id: i64,
        lower: DateTime<Utc>,
        upper: DateTime<Utc>,
    ) -> Result<Vec<PositionReading>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {READING_COLUMNS} FROM position_readings
                 WHERE vehicle_id = ?1 AND datetime >= ?2 AND datetime <= ?3
                 ORDER BY datetime DESC"
            ))?;

            let mut rows = stmt.query(params![
                vehicle_id,
                fmt_datetime(lower),
                fmt_datetime(upper)
            ])?;
            let mut readings = Vec::new();
            while let Some(row) = rows.next()? {
                readings.push(row_to_reading(row)?);
            }
            Ok(readings)
        })
        .await
    }

    /// Earliest valid reading within `[lower, upper]`, if any.
    pub async fn first_active_reading(
        &self,
        vehicle_id: i64,
        lower: DateTime<Utc>,
        upper: DateTime<Utc>,
    ) -> Result<Option<PositionReading>> {
        self.active_boundary_reading(vehicle_id, lower, upper, "ASC").await
    }

    /// Latest valid reading within `[lower, upper]`, if any.
    pub async fn last_active_reading(
        &self,
        vehicle_id: i64,
        lower: DateTime<Utc>,
        upper: DateTime<Utc>,
    ) -> Result<Option<PositionReading>> {
        self.active_boundary_reading(vehicle_id, lower, upper, "DESC").await
    }

    async fn active_boundary_reading(
        &self,
        vehicle_id: i64,
        lower: DateTime<Utc>,
        upper: DateTime<Utc>,
        direction: &'static str,
    ) -> Result<Option<PositionReading>> {
        self.execute(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {READING_COLUMNS} FROM position_readings
                     WHERE vehicle_id = ?1
                       AND status = 'valid'
                       AND datetime >= ?2 AND datetime <= ?3
                     ORDER BY datetime {direction}
                     LIMIT 1"
                ),
                params![vehicle_id, fmt_datetime(lower), fmt_datetime(upper)],
                |row| Ok(row_to_reading(row)),
            )
            .optional()?
            .transpose()
        })
        .await
    }
}
