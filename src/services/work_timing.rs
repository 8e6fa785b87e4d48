use time::{Duration, OffsetDateTime};

use crate::db::models::Test;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Open,
    NotYetOpen { opens_at: OffsetDateTime },
    Closed { closed_at: OffsetDateTime },
}

pub fn availability(test: &Test, now: OffsetDateTime) -> Availability {
    if let Some(opens_at) = test.start_time.filter(|start| now < *start) {
        return Availability::NotYetOpen { opens_at };
    }
    if let Some(closed_at) = test.end_time.filter(|end| now >= *end) {
        return Availability::Closed { closed_at };
    }
    Availability::Open
}

/// When the attempt started at `session_started_at` must be submitted: the allotted duration,
/// cut short by the test's end time.
pub fn session_deadline(test: &Test, session_started_at: OffsetDateTime) -> OffsetDateTime {
    let duration_deadline =
        session_started_at + Duration::minutes(i64::from(test.duration_minutes));
    match test.end_time {
        Some(test_end) if test_end < duration_deadline => test_end,
        _ => duration_deadline,
    }
}

pub fn remaining(deadline: OffsetDateTime, now: OffsetDateTime) -> std::time::Duration {
    std::time::Duration::try_from(deadline - now).unwrap_or(std::time::Duration::ZERO)
}
