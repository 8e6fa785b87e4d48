//! Access to the external document store holding tests, progress records and results.

mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::db::models::{
    ExamProgress, ExamResult, FinalScores, ProgressFilter, ProgressPatch, Test,
};

pub use memory::InMemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("record already exists: {0}")]
    Conflict(String),
}

#[async_trait]
pub trait ExamStore: Send + Sync {
    async fn get_test(&self, test_id: &str) -> Result<Option<Test>, StoreError>;

    /// Most recent result of `student_email` for `test_id`, if any.
    async fn find_result(
        &self,
        test_id: &str,
        student_email: &str,
    ) -> Result<Option<ExamResult>, StoreError>;

    async fn create_progress(&self, record: ExamProgress) -> Result<(), StoreError>;

    /// Returns `false` when no record matches `filter`; never creates one.
    async fn update_progress(
        &self,
        filter: &ProgressFilter,
        patch: ProgressPatch,
    ) -> Result<bool, StoreError>;

    async fn complete_progress(
        &self,
        filter: &ProgressFilter,
        final_scores: &FinalScores,
    ) -> Result<bool, StoreError>;

    async fn put_result(&self, record: ExamResult) -> Result<(), StoreError>;
}
