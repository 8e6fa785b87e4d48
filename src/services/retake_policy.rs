use crate::db::models::{ExamResult, Test};

/// Whether `latest` (the student's most recent result for `test`) blocks a new attempt.
///
/// After a reassignment only results submitted later than it count.
pub fn blocks_retake(test: &Test, latest: Option<&ExamResult>) -> bool {
    match (latest, test.reassigned_at) {
        (None, _) => false,
        (Some(result), Some(reassigned_at)) => result.submitted_at > reassigned_at,
        (Some(_), None) => true,
    }
}
