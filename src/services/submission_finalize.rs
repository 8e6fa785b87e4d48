use std::sync::atomic::{AtomicU8, Ordering};

use anyhow::{Context, Result};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::core::time::elapsed_seconds;
use crate::db::models::ExamResult;
use crate::db::types::SubmitReason;
use crate::repositories::{ExamStore, StoreError};
use crate::services::module_sequencer::ModuleSequencer;
use crate::services::progress::ProgressReporter;
use crate::services::scoring::round_marks;

const OPEN: u8 = 0;
const SUBMITTING: u8 = 1;
const SUBMITTED: u8 = 2;
const FAILED: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchState {
    Open,
    Submitting,
    Submitted,
    Failed,
}

/// One-way gate in front of the submission. Only the caller that flips it from `Open` (or
/// from `Failed`, when retrying) does the work.
#[derive(Debug, Default)]
pub(crate) struct SubmissionLatch(AtomicU8);

impl SubmissionLatch {
    pub(crate) fn try_begin(&self) -> bool {
        self.0.compare_exchange(OPEN, SUBMITTING, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    pub(crate) fn try_retry(&self) -> bool {
        self.0.compare_exchange(FAILED, SUBMITTING, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    pub(crate) fn finish(&self, stored: bool) {
        self.0.store(if stored { SUBMITTED } else { FAILED }, Ordering::Release);
    }

    pub(crate) fn state(&self) -> LatchState {
        match self.0.load(Ordering::Acquire) {
            OPEN => LatchState::Open,
            SUBMITTING => LatchState::Submitting,
            SUBMITTED => LatchState::Submitted,
            _ => LatchState::Failed,
        }
    }
}

pub(crate) struct FinalizeInput<'a> {
    pub(crate) student_email: &'a str,
    pub(crate) reason: SubmitReason,
    pub(crate) started_at: OffsetDateTime,
    pub(crate) submitted_at: OffsetDateTime,
    pub(crate) fullscreen_violations: u32,
}

/// Freezes the sequencer and builds the result document from its response book.
pub(crate) fn build_result(
    sequencer: &mut ModuleSequencer,
    input: FinalizeInput<'_>,
) -> ExamResult {
    sequencer.freeze();
    let scores = sequencer.recompute_scores();
    let total_score = round_marks(scores.values().sum());
    let test = sequencer.test();

    ExamResult {
        id: Uuid::new_v4().to_string(),
        student_email: input.student_email.to_string(),
        test_id: test.id.clone(),
        test_title: test.title.clone(),
        scores,
        total_score,
        max_score: test.max_score(),
        responses: sequencer.response_records(),
        submitted_at: input.submitted_at,
        duration_seconds: elapsed_seconds(input.started_at, input.submitted_at),
        submit_reason: input.reason,
        fullscreen_violations: input.fullscreen_violations,
    }
}

/// Stores the result, then marks the live progress record completed.
///
/// Only the result write can fail the submission; the progress update is best effort.
/// A conflict on this result's own id means an earlier attempt was stored after all.
pub(crate) async fn persist_result(
    store: &dyn ExamStore,
    reporter: &ProgressReporter,
    result: &ExamResult,
) -> Result<()> {
    match store.put_result(result.clone()).await {
        Ok(()) => {}
        Err(StoreError::Conflict(id)) if id == result.id => {
            tracing::info!(result_id = %id, "Exam result was already stored");
        }
        Err(err) => return Err(err).context("Failed to store exam result"),
    }

    metrics::counter!("exam_submissions_total", "reason" => result.submit_reason.label())
        .increment(1);
    tracing::info!(
        test_id = %result.test_id,
        student_email = %result.student_email,
        reason = %result.submit_reason,
        total_score = result.total_score,
        max_score = result.max_score,
        "Exam result stored"
    );

    reporter.complete(&result.final_scores()).await;
    Ok(())
}
