use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How an interval boundary was produced: live ingestion of the position
/// stream, or the reconciliation pass that runs when a zone is defined
/// after a vehicle is already sitting inside its geometry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IntervalOrigin {
    Live,
    Reconciled,
}

impl IntervalOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntervalOrigin::Live => "live",
            IntervalOrigin::Reconciled => "reconciled",
        }
    }
}

/// A time range during which a vehicle is recorded as being inside a zone.
///
/// `end_at == None` means the interval is open: the vehicle is still inside.
/// Invariants (enforced by the interval repository):
/// - at most one open interval per vehicle
/// - `[start_at, end_at)` ranges are pairwise non-overlapping per vehicle
/// - `start_at <= end_at` when closed (zero-length intervals are allowed)
/// - vehicle and zone must belong to the same customer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DwellInterval {
    pub id: String,
    pub vehicle_id: i64,
    pub zone_id: i64,
    pub start_at: DateTime<Utc>,
    pub end_at: Option<DateTime<Utc>>,
    pub origin: IntervalOrigin,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DwellInterval {
    pub fn is_open(&self) -> bool {
        self.end_at.is_none()
    }
}

/// Query filter for interval listings. `overlaps_lower`/`overlaps_upper`
/// select intervals whose range intersects the window (an open interval is
/// treated as extending to infinity).
#[derive(Debug, Clone, Default)]
pub struct IntervalFilter {
    pub zone_id: Option<i64>,
    pub vehicle_id: Option<i64>,
    pub overlaps_lower: Option<DateTime<Utc>>,
    pub overlaps_upper: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    // Consumers read these as JSON; the field casing and the origin tag
    // are part of the wire contract.
    #[test]
    fn interval_serializes_with_camel_case_keys() {
        let interval = DwellInterval {
            id: "a1".into(),
            vehicle_id: 1,
            zone_id: 100,
            start_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            end_at: None,
            origin: IntervalOrigin::Reconciled,
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        };

        let value = serde_json::to_value(&interval).unwrap();
        assert_eq!(value["vehicleId"], 1);
        assert_eq!(value["zoneId"], 100);
        assert!(value["endAt"].is_null());
        assert_eq!(value["origin"], "reconciled");
    }
}
