// SPDX-License-Identifier: Apache-2.0
//! Millisecond-precision ISO-8601 timestamps, e.g. `2024-03-15T12:34:56.789`.

use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

const FORMAT: &[FormatItem<'_>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]");

/// Format `OffsetDateTime::now_utc()` in the storage format.
pub fn format_now() -> String {
    format(OffsetDateTime::now_utc())
}

/// Format an arbitrary timestamp in the storage format.
pub fn format(dt: OffsetDateTime) -> String {
    // The format description above is a fixed literal with no fallible
    // components for a valid OffsetDateTime, so formatting cannot fail in
    // practice; fall back to RFC 3339 rather than panic if it ever does.
    dt.format(FORMAT)
        .unwrap_or_else(|_| dt.to_string())
}

/// Parse a timestamp previously produced by [`format`]. Falls back to the
/// Unix epoch on malformed input rather than panicking — timestamps are
/// diagnostic metadata, not load-bearing for correctness.
pub fn parse(raw: &str) -> OffsetDateTime {
    time::PrimitiveDateTime::parse(raw, FORMAT)
        .map(|naive| naive.assume_utc())
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_millisecond_precision() {
        let now = OffsetDateTime::now_utc();
        let formatted = format(now);
        let parsed = parse(&formatted);
        assert_eq!(formatted, format(parsed));
    }

    #[test]
    fn matches_expected_shape() {
        let formatted = format_now();
        assert_eq!(formatted.len(), "2024-03-15T12:34:56.789".len());
        assert!(formatted.contains('T'));
    }
}
