pub mod dwell_interval;
pub mod reading;
pub mod vehicle_state;
pub mod zone;

pub use dwell_interval::{DwellInterval, IntervalFilter, IntervalOrigin};
pub use reading::{GeoPoint, MovementType, PositionReading, ReadingStatus};
pub use vehicle_state::VehicleStateSpan;
pub use zone::{Vehicle, Zone};
