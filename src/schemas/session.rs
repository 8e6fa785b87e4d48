use serde::Serialize;

use crate::db::models::CursorPosition;
use crate::db::types::ModuleKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionPhase {
    Setup,
    Active,
    Submitting,
    Submitted,
    SubmissionFailed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleStatusView {
    pub module: ModuleKey,
    pub title: &'static str,
    pub completed: bool,
    pub unlocked: bool,
    pub answered: usize,
    pub total: usize,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftView {
    pub selected_option: Option<usize>,
    pub transcript: String,
    pub interim_transcript: String,
    pub recording: bool,
    pub recording_completed: bool,
    pub submitted: bool,
}

/// Everything the exam screen renders, taken under one lock.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub test_id: String,
    pub test_title: String,
    pub student_email: String,
    pub phase: SessionPhase,
    pub cursor: Option<CursorPosition>,
    pub current_question_id: Option<String>,
    pub modules: Vec<ModuleStatusView>,
    pub overall_progress: f64,
    pub remaining_seconds: Option<u64>,
    pub fullscreen_violations: u32,
    pub draft: DraftView,
}
