use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params_from_iter, types::Value, Row};

use crate::db::{
    connection::Database,
    helpers::{fmt_datetime, parse_datetime, parse_movement},
    models::VehicleStateSpan,
};

fn row_to_span(row: &Row) -> Result<VehicleStateSpan> {
    let movement: String = row.get("movement")?;
    let start_at: String = row.get("start_at")?;
    let end_at: String = row.get("end_at")?;

    Ok(VehicleStateSpan {
        id: row.get("id")?,
        vehicle_id: row.get("vehicle_id")?,
        movement: parse_movement(&movement)?,
        start_at: parse_datetime(&start_at, "start_at")?,
        end_at: parse_datetime(&end_at, "end_at")?,
    })
}

impl Database {
    pub async fn insert_vehicle_state(&self, span: &VehicleStateSpan) -> Result<()> {
        let record = span.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO vehicle_states (vehicle_id, movement, start_at, end_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    record.vehicle_id,
                    record.movement.as_str(),
                    fmt_datetime(record.start_at),
                    fmt_datetime(record.end_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// State spans of the given vehicles intersecting `[lower, upper)`,
    /// oldest first.
    pub async fn vehicle_states_in_range(
        &self,
        vehicle_ids: Vec<i64>,
        lower: DateTime<Utc>,
        upper: DateTime<Utc>,
    ) -> Result<Vec<VehicleStateSpan>> {
        if vehicle_ids.is_empty() {
            return Ok(Vec::new());
        }

        self.execute(move |conn| {
            let placeholders = vec!["?"; vehicle_ids.len()].join(", ");
            let sql = format!(
                "SELECT id, vehicle_id, movement, start_at, end_at
                 FROM vehicle_states
                 WHERE vehicle_id IN ({placeholders})
                   AND start_at < ?
                   AND end_at > ?
                 ORDER BY start_at ASC"
            );

            let mut args: Vec<Value> = vehicle_ids.into_iter().map(Value::Integer).collect();
            args.push(Value::Text(fmt_datetime(upper)));
            args.push(Value::Text(fmt_datetime(lower)));

            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(args))?;
            let mut spans = Vec::new();
            while let Some(row) = rows.next()? {
                spans.push(row_to_span(row)?);
            }
            Ok(spans)
        })
        .await
    }
}
