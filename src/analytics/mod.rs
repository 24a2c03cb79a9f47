pub mod boundary;
pub mod dwell;
pub mod histogram;

pub use boundary::FlaggedReading;
pub use histogram::BucketStats;
