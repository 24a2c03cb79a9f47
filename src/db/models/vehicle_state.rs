use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::reading::MovementType;

/// Precomputed movement-duration span for a vehicle, produced by the
/// external tracker aggregate. Consumed read-only by the histogram.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleStateSpan {
    pub id: Option<i64>,
    pub vehicle_id: i64,
    pub movement: MovementType,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}
