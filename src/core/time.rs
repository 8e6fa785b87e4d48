use time::{format_description::well_known::Rfc3339, OffsetDateTime};

pub(crate) fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

pub(crate) fn format_offset(value: OffsetDateTime) -> String {
    value.format(&Rfc3339).unwrap_or_else(|_| value.to_string())
}

/// Whole seconds from `from` to `to`, clamped at zero.
pub(crate) fn elapsed_seconds(from: OffsetDateTime, to: OffsetDateTime) -> u64 {
    let seconds = (to - from).whole_seconds();
    if seconds < 0 {
        0
    } else {
        seconds as u64
    }
}
