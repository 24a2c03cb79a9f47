use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Projection of a zone definition from the external catalog. Geometry
/// itself stays with the catalog; the core only needs identity, ownership
/// and the configured radius.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Zone {
    pub id: i64,
    pub customer_id: i64,
    pub name: String,
    pub radius: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Ownership projection of a tracked vehicle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    pub id: i64,
    pub customer_id: i64,
    pub name: String,
}
