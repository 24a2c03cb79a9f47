pub mod analytics;
pub mod db;
pub mod error;
pub mod geometry;
pub mod service;
pub mod tracker;

pub use analytics::{BucketStats, FlaggedReading};
pub use db::{
    Database, DwellInterval, GeoPoint, IntervalFilter, IntervalOrigin, MovementType,
    PositionReading, ReadingStatus, Vehicle, VehicleStateSpan, Zone,
};
pub use error::DwellError;
pub use geometry::ZoneGeometry;
pub use service::{DwellService, VehicleZoneSummary};
pub use tracker::TrackerController;

/// Initialize logging for binaries and tests (reads RUST_LOG).
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .try_init();
}
