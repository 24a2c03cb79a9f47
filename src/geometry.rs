use crate::db::models::GeoPoint;

/// Containment oracle for zone geometry. Point-in-polygon testing lives
/// with the external geometry service; the tracker only asks whether a
/// point lies inside a zone's area.
pub trait ZoneGeometry: Send + Sync {
    fn contains(&self, zone_id: i64, point: GeoPoint) -> bool;
}
