use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// WGS84 position attached to a reading.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Movement classification attached to each reading by the telemetry
/// pipeline. Closed set so downstream aggregation is exhaustively checked.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MovementType {
    Traveling,
    Idling,
    Stopped,
    Towed,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Traveling => "traveling",
            MovementType::Idling => "idling",
            MovementType::Stopped => "stopped",
            MovementType::Towed => "towed",
        }
    }

    pub fn is_traveling(&self) -> bool {
        matches!(self, MovementType::Traveling)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReadingStatus {
    Valid,
    Invalid,
}

impl ReadingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingStatus::Valid => "valid",
            ReadingStatus::Invalid => "invalid",
        }
    }
}

/// One position reading from the external stream. The core never mutates
/// stored readings; they are ingested once and read back for boundary
/// context and tracker decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionReading {
    pub id: Option<i64>,
    pub vehicle_id: i64,
    pub datetime: DateTime<Utc>,
    pub point: Option<GeoPoint>,
    pub movement: MovementType,
    pub status: ReadingStatus,
}

impl PositionReading {
    pub fn is_active(&self) -> bool {
        self.status == ReadingStatus::Valid
    }
}
