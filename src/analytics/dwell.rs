use chrono::{DateTime, Utc};

use crate::db::models::DwellInterval;

/// Seconds of an interval's span that fall inside the query window.
///
/// The window clips only inward: a `window_start` before the interval's
/// start or a `window_end` after its end has no effect. Open intervals
/// extend to `now`. Equal or inverted effective bounds yield 0, never a
/// negative number.
pub fn clipped_duration_seconds(
    interval: &DwellInterval,
    window_start: Option<DateTime<Utc>>,
    window_end: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> i64 {
    let mut lower = interval.start_at;
    if let Some(start) = window_start {
        if start >= lower {
            lower = start;
        }
    }

    let mut upper = interval.end_at.unwrap_or(now);
    if let Some(end) = window_end {
        if end <= upper {
            upper = end;
        }
    }

    (upper - lower).num_seconds().max(0)
}

/// Same clipping rule applied to a closed `[start, end)` span, used for
/// vehicle-state durations inside histogram buckets.
pub fn clipped_span_seconds(
    span_start: DateTime<Utc>,
    span_end: DateTime<Utc>,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> i64 {
    let lower = span_start.max(window_start);
    let upper = span_end.min(window_end);
    (upper - lower).num_seconds().max(0)
}
