use thiserror::Error;

/// Domain errors surfaced by the interval store. Everything else (I/O,
/// SQLite failures) travels as plain `anyhow::Error` context chains.
#[derive(Debug, Error)]
pub enum DwellError {
    /// An invariant would be violated: open-interval collision, range
    /// overlap, or invalid bound ordering.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Referenced interval/zone/vehicle does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

/// True when the error chain bottoms out in a `Conflict`. Used by the
/// ingestion path to decide between a bounded retry and a skip.
pub fn is_conflict(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<DwellError>(), Some(DwellError::Conflict(_)))
}

pub fn is_not_found(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<DwellError>(), Some(DwellError::NotFound(_)))
}
