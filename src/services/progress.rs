use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::core::time::now_utc;
use crate::db::models::{
    CursorPosition, ExamProgress, FinalScores, ModuleProgress, ProgressFilter, ProgressPatch,
};
use crate::db::types::{ModuleKey, ProgressStatus};
use crate::repositories::{ExamStore, StoreError};
use crate::services::scoring::round_marks;

/// Live view of the response book, as pushed to the monitoring record.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub module_progress: BTreeMap<ModuleKey, ModuleProgress>,
    pub module_scores: BTreeMap<ModuleKey, f64>,
    pub current_question: Option<CursorPosition>,
    pub answered_questions: usize,
    pub total_questions: usize,
}

impl ProgressSnapshot {
    /// Percentage of scorable items answered, in `0..=100`.
    pub fn overall_progress(&self) -> f64 {
        if self.total_questions == 0 {
            return 0.0;
        }
        round_marks(self.answered_questions as f64 / self.total_questions as f64 * 100.0)
    }

    fn into_patch(self, last_question_score: Option<f64>, now: OffsetDateTime) -> ProgressPatch {
        ProgressPatch {
            overall_progress: self.overall_progress(),
            module_progress: self.module_progress,
            module_scores: self.module_scores,
            current_question: self.current_question,
            answered_questions: self.answered_questions,
            total_questions: self.total_questions,
            last_question_score,
            last_updated: now,
        }
    }
}

/// Pushes progress of one attempt to the store.
///
/// Monitoring is best effort: every failure is logged, counted and swallowed, and each call
/// is bounded by the push timeout. The methods report whether the record was written.
#[derive(Clone)]
pub struct ProgressReporter {
    store: Arc<dyn ExamStore>,
    filter: ProgressFilter,
    timeout: Duration,
}

impl ProgressReporter {
    pub fn new(
        store: Arc<dyn ExamStore>,
        test_id: &str,
        student_email: &str,
        timeout: Duration,
    ) -> Self {
        Self { store, filter: ProgressFilter::in_progress(test_id, student_email), timeout }
    }

    pub async fn create(&self, snapshot: ProgressSnapshot, started_at: OffsetDateTime) -> bool {
        let record = ExamProgress {
            id: Uuid::new_v4().to_string(),
            student_email: self.filter.student_email.clone(),
            test_id: self.filter.test_id.clone(),
            status: ProgressStatus::InProgress,
            overall_progress: snapshot.overall_progress(),
            module_progress: snapshot.module_progress,
            module_scores: snapshot.module_scores,
            current_question: snapshot.current_question,
            answered_questions: snapshot.answered_questions,
            total_questions: snapshot.total_questions,
            last_question_score: None,
            total_score: None,
            started_at,
            last_updated: started_at,
            completed_at: None,
        };
        let store = self.store.clone();
        self.push("create", async move { store.create_progress(record).await.map(|()| true) })
            .await
    }

    pub async fn heartbeat(&self, snapshot: ProgressSnapshot) -> bool {
        self.update("heartbeat", snapshot, None).await
    }

    pub async fn question_submitted(&self, snapshot: ProgressSnapshot, score: f64) -> bool {
        self.update("question_submitted", snapshot, Some(score)).await
    }

    pub async fn module_completed(&self, snapshot: ProgressSnapshot) -> bool {
        self.update("module_completed", snapshot, None).await
    }

    pub async fn complete(&self, final_scores: &FinalScores) -> bool {
        let store = self.store.clone();
        let filter = self.filter.clone();
        let scores = final_scores.clone();
        self.push("complete", async move { store.complete_progress(&filter, &scores).await })
            .await
    }

    async fn update(
        &self,
        action: &'static str,
        snapshot: ProgressSnapshot,
        last_question_score: Option<f64>,
    ) -> bool {
        let patch = snapshot.into_patch(last_question_score, now_utc());
        let store = self.store.clone();
        let filter = self.filter.clone();
        self.push(action, async move { store.update_progress(&filter, patch).await }).await
    }

    async fn push<F>(&self, action: &'static str, operation: F) -> bool
    where
        F: Future<Output = Result<bool, StoreError>>,
    {
        match tokio::time::timeout(self.timeout, operation).await {
            Ok(Ok(true)) => true,
            Ok(Ok(false)) => {
                tracing::debug!(
                    action,
                    test_id = %self.filter.test_id,
                    student_email = %self.filter.student_email,
                    "No in-progress record to update"
                );
                false
            }
            Ok(Err(err)) => {
                metrics::counter!("progress_push_failures_total").increment(1);
                tracing::warn!(
                    action,
                    test_id = %self.filter.test_id,
                    student_email = %self.filter.student_email,
                    error = %err,
                    "Progress push failed"
                );
                false
            }
            Err(_) => {
                metrics::counter!("progress_push_failures_total").increment(1);
                tracing::warn!(
                    action,
                    test_id = %self.filter.test_id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Progress push timed out"
                );
                false
            }
        }
    }
}
