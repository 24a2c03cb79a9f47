use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};

use crate::db::models::{IntervalOrigin, MovementType, ReadingStatus};

/// Datetimes are stored as fixed-width RFC 3339 text (microsecond
/// precision, Z suffix) so lexicographic comparison in SQL matches
/// chronological order.
pub fn fmt_datetime(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_optional_datetime(
    value: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    match value {
        Some(raw) => parse_datetime(&raw, field).map(Some),
        None => Ok(None),
    }
}

pub fn parse_movement(value: &str) -> Result<MovementType> {
    match value {
        "traveling" => Ok(MovementType::Traveling),
        "idling" => Ok(MovementType::Idling),
        "stopped" => Ok(MovementType::Stopped),
        "towed" => Ok(MovementType::Towed),
        other => Err(anyhow!("unknown movement type {other}")),
    }
}

pub fn parse_reading_status(value: &str) -> Result<ReadingStatus> {
    match value {
        "valid" => Ok(ReadingStatus::Valid),
        "invalid" => Ok(ReadingStatus::Invalid),
        other => Err(anyhow!("unknown reading status {other}")),
    }
}

pub fn parse_origin(value: &str) -> Result<IntervalOrigin> {
    match value {
        "live" => Ok(IntervalOrigin::Live),
        "reconciled" => Ok(IntervalOrigin::Reconciled),
        other => Err(anyhow!("unknown interval origin {other}")),
    }
}
