use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::db::models::{
    ExamProgress, ExamResult, FinalScores, ProgressFilter, ProgressPatch, Test,
};
use crate::db::types::ProgressStatus;
use crate::repositories::{ExamStore, StoreError};

/// Store kept in process memory, used by rehearsals and tests.
///
/// Writes can be switched to fail to exercise the swallow/retry paths.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    data: RwLock<Data>,
    fail_progress_writes: AtomicBool,
    fail_result_writes: AtomicBool,
}

#[derive(Debug, Default)]
struct Data {
    tests: HashMap<String, Test>,
    results: Vec<ExamResult>,
    progress: Vec<ExamProgress>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_test(&self, test: Test) {
        self.data.write().await.tests.insert(test.id.clone(), test);
    }

    pub async fn insert_result(&self, result: ExamResult) {
        self.data.write().await.results.push(result);
    }

    pub async fn results(&self) -> Vec<ExamResult> {
        self.data.read().await.results.clone()
    }

    pub async fn progress_records(&self) -> Vec<ExamProgress> {
        self.data.read().await.progress.clone()
    }

    pub fn set_progress_writes_failing(&self, failing: bool) {
        self.fail_progress_writes.store(failing, Ordering::SeqCst);
    }

    pub fn set_result_writes_failing(&self, failing: bool) {
        self.fail_result_writes.store(failing, Ordering::SeqCst);
    }

    fn check_progress_writes(&self) -> Result<(), StoreError> {
        if self.fail_progress_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("progress writes disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ExamStore for InMemoryStore {
    async fn get_test(&self, test_id: &str) -> Result<Option<Test>, StoreError> {
        Ok(self.data.read().await.tests.get(test_id).cloned())
    }

    async fn find_result(
        &self,
        test_id: &str,
        student_email: &str,
    ) -> Result<Option<ExamResult>, StoreError> {
        let data = self.data.read().await;
        Ok(data
            .results
            .iter()
            .filter(|result| result.test_id == test_id && result.student_email == student_email)
            .max_by_key(|result| result.submitted_at)
            .cloned())
    }

    async fn create_progress(&self, record: ExamProgress) -> Result<(), StoreError> {
        self.check_progress_writes()?;
        let mut data = self.data.write().await;
        if data.progress.iter().any(|existing| existing.id == record.id) {
            return Err(StoreError::Conflict(record.id));
        }
        data.progress.push(record);
        Ok(())
    }

    async fn update_progress(
        &self,
        filter: &ProgressFilter,
        patch: ProgressPatch,
    ) -> Result<bool, StoreError> {
        self.check_progress_writes()?;
        let mut data = self.data.write().await;
        match data.progress.iter_mut().find(|record| filter.matches(record)) {
            Some(record) => {
                patch.apply(record);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn complete_progress(
        &self,
        filter: &ProgressFilter,
        final_scores: &FinalScores,
    ) -> Result<bool, StoreError> {
        self.check_progress_writes()?;
        let mut data = self.data.write().await;
        match data.progress.iter_mut().find(|record| filter.matches(record)) {
            Some(record) => {
                record.status = ProgressStatus::Completed;
                record.module_scores = final_scores.scores.clone();
                record.total_score = Some(final_scores.total_score);
                record.completed_at = Some(final_scores.submitted_at);
                record.last_updated = final_scores.submitted_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn put_result(&self, record: ExamResult) -> Result<(), StoreError> {
        if self.fail_result_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("result writes disabled".to_string()));
        }
        let mut data = self.data.write().await;
        if data.results.iter().any(|existing| existing.id == record.id) {
            return Err(StoreError::Conflict(record.id));
        }
        data.results.push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use time::macros::datetime;
    use time::OffsetDateTime;

    use super::*;
    use crate::db::types::SubmitReason;
    use crate::test_support::STUDENT_EMAIL;

    fn result(id: &str, submitted_at: OffsetDateTime) -> ExamResult {
        ExamResult {
            id: id.to_string(),
            student_email: STUDENT_EMAIL.to_string(),
            test_id: "T-100".to_string(),
            test_title: "Placement Screening".to_string(),
            scores: BTreeMap::new(),
            total_score: 0.0,
            max_score: 3.0,
            responses: Vec::new(),
            submitted_at,
            duration_seconds: 30,
            submit_reason: SubmitReason::Manual,
            fullscreen_violations: 0,
        }
    }

    #[tokio::test]
    async fn find_result_returns_the_latest_attempt() {
        let store = InMemoryStore::new();
        store.put_result(result("R-2", datetime!(2025-03-02 10:00 UTC))).await.unwrap();
        store.put_result(result("R-1", datetime!(2025-03-01 10:00 UTC))).await.unwrap();

        let latest = store.find_result("T-100", STUDENT_EMAIL).await.unwrap();
        assert_eq!(latest.map(|r| r.id), Some("R-2".to_string()));
        assert!(store.find_result("T-100", "other@college.edu").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_result_ids_conflict() {
        let store = InMemoryStore::new();
        let record = result("R-1", datetime!(2025-03-01 10:00 UTC));
        store.put_result(record.clone()).await.unwrap();

        let err = store.put_result(record).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(id) if id == "R-1"));
        assert_eq!(store.results().await.len(), 1);
    }

    #[tokio::test]
    async fn failing_writes_leave_no_trace() {
        let store = InMemoryStore::new();
        store.set_result_writes_failing(true);

        let err = store.put_result(result("R-1", datetime!(2025-03-01 10:00 UTC))).await;
        assert!(matches!(err, Err(StoreError::Unavailable(_))));
        assert!(store.results().await.is_empty());

        store.set_result_writes_failing(false);
        store.put_result(result("R-1", datetime!(2025-03-01 10:00 UTC))).await.unwrap();
        assert_eq!(store.results().await.len(), 1);
    }
}
