use anyhow::Result;
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{fmt_datetime, parse_datetime},
    models::{Vehicle, Zone},
};
use crate::error::DwellError;

fn row_to_zone(row: &Row) -> Result<Zone> {
    let created_at: String = row.get("created_at")?;
    Ok(Zone {
        id: row.get("id")?,
        customer_id: row.get("customer_id")?,
        name: row.get("name")?,
        radius: row.get("radius")?,
        created_at: parse_datetime(&created_at, "created_at")?,
    })
}

fn row_to_vehicle(row: &Row) -> Result<Vehicle> {
    Ok(Vehicle {
        id: row.get("id")?,
        customer_id: row.get("customer_id")?,
        name: row.get("name")?,
    })
}

impl Database {
    pub async fn upsert_zone(&self, zone: &Zone) -> Result<()> {
        let record = zone.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO zones (id, customer_id, name, radius, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (id) DO UPDATE SET
                     customer_id = excluded.customer_id,
                     name = excluded.name,
                     radius = excluded.radius",
                params![
                    record.id,
                    record.customer_id,
                    record.name,
                    record.radius,
                    fmt_datetime(record.created_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_zone(&self, zone_id: i64) -> Result<Zone> {
        self.execute(move |conn| {
            conn.query_row(
                "SELECT id, customer_id, name, radius, created_at FROM zones WHERE id = ?1",
                params![zone_id],
                |row| Ok(row_to_zone(row)),
            )
            .optional()?
            .transpose()?
            .ok_or_else(|| DwellError::NotFound(format!("zone {zone_id}")).into())
        })
        .await
    }

    /// Zones of one customer in stable catalog order (id ascending). The
    /// tracker relies on this order when several zones contain the same
    /// point: the first applicable zone wins.
    pub async fn zones_for_customer(&self, customer_id: i64) -> Result<Vec<Zone>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, customer_id, name, radius, created_at
                 FROM zones
                 WHERE customer_id = ?1
                 ORDER BY id ASC",
            )?;

            let mut rows = stmt.query(params![customer_id])?;
            let mut zones = Vec::new();
            while let Some(row) = rows.next()? {
                zones.push(row_to_zone(row)?);
            }
            Ok(zones)
        })
        .await
    }

    pub async fn upsert_vehicle(&self, vehicle: &Vehicle) -> Result<()> {
        let record = vehicle.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO vehicles (id, customer_id, name)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (id) DO UPDATE SET
                     customer_id = excluded.customer_id,
                     name = excluded.name",
                params![record.id, record.customer_id, record.name],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_vehicle(&self, vehicle_id: i64) -> Result<Vehicle> {
        self.execute(move |conn| {
            conn.query_row(
                "SELECT id, customer_id, name FROM vehicles WHERE id = ?1",
                params![vehicle_id],
                |row| Ok(row_to_vehicle(row)),
            )
            .optional()?
            .transpose()?
            .ok_or_else(|| DwellError::NotFound(format!("vehicle {vehicle_id}")).into())
        })
        .await
    }

    pub async fn vehicles_for_customer(&self, customer_id: i64) -> Result<Vec<Vehicle>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, customer_id, name
                 FROM vehicles
                 WHERE customer_id = ?1
                 ORDER BY id ASC",
            )?;

            let mut rows = stmt.query(params![customer_id])?;
            let mut vehicles = Vec::new();
            while let Some(row) = rows.next()? {
                vehicles.push(row_to_vehicle(row)?);
            }
            Ok(vehicles)
        })
        .await
    }
}
