//! Quiet hours in the provider's local time.

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use tracing::warn;

use crate::models::SnoozeWindow;

/// Parse an IANA zone name, falling back to UTC.
pub fn resolve_timezone(name: Option<&str>) -> Tz {
    match name {
        None => Tz::UTC,
        Some(name) => name.parse().unwrap_or_else(|_| {
            warn!(timezone = name, "unknown provider timezone, using UTC");
            Tz::UTC
        }),
    }
}

/// Hour of day (0-23) at `now` in `tz`.
pub fn local_hour(now: DateTime<Utc>, tz: Tz) -> u32 {
    now.with_timezone(&tz).hour()
}

/// Whether any window covers the provider's current local hour.
pub fn is_snoozed(windows: &[SnoozeWindow], tz: Tz, now: DateTime<Utc>) -> bool {
    let hour = local_hour(now, tz);
    windows.iter().any(|w| w.contains_hour(hour))
}
