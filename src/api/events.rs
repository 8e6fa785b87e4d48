use serde::Serialize;

use crate::db::types::{ModuleKey, SubmitReason};

/// Notifications for the shell rendering the exam.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    #[serde(rename_all = "camelCase")]
    IntegrityWarning { message: String, count: u32, limit: u32 },
    #[serde(rename_all = "camelCase")]
    ForcedSubmission { reason: SubmitReason },
    #[serde(rename_all = "camelCase")]
    ModuleCompleted { module: ModuleKey, score: f64, next: Option<ModuleKey> },
    #[serde(rename_all = "camelCase")]
    ResultsReady { result_id: String, total_score: f64, max_score: f64 },
    #[serde(rename_all = "camelCase")]
    SubmissionFailed { message: String },
}
