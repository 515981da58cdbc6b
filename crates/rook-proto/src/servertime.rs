//! `server-time` tag formatting.

use chrono::{DateTime, SecondsFormat, Utc};

/// Format a unix timestamp (seconds) as the `@time` tag value:
/// RFC 3339 in UTC with millisecond precision, e.g. `2023-01-01T12:00:00.000Z`.
pub fn format_server_time(unix_secs: i64) -> String {
    let dt = DateTime::<Utc>::from_timestamp(unix_secs, 0).unwrap_or_default();
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}
