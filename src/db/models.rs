use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::db::types::{ModuleKey, ModuleKind, ProgressStatus, SubmitReason};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Test {
    #[validate(length(min = 1, max = 128))]
    pub id: String,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    /// Minutes allowed once the session starts.
    #[serde(rename = "duration")]
    #[validate(range(min = 1, max = 1440))]
    pub duration_minutes: u32,
    #[validate(custom(function = validate_modules))]
    pub modules: BTreeMap<ModuleKey, Module>,
    pub module_order: Vec<ModuleKey>,
    #[serde(default)]
    pub total_marks: Option<f64>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub start_time: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub end_time: Option<OffsetDateTime>,
    /// Set when an administrator re-opened the test; only later results block a retake.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub reassigned_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    pub enabled: bool,
    #[serde(default)]
    pub questions: Vec<Question>,
}

impl Module {
    pub fn is_presentable(&self) -> bool {
        self.enabled && !self.questions.is_empty()
    }

    /// Number of scorable items; comprehension stories count their sub-questions.
    pub fn item_count(&self) -> usize {
        self.questions.iter().map(Question::item_count).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Question {
    Mcq(McqQuestion),
    VoicePrompt(VoicePrompt),
    StoryPrompt(StoryPrompt),
    ComprehensionStory(ComprehensionStory),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McqQuestion {
    pub id: String,
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoicePrompt {
    pub id: String,
    #[serde(alias = "question")]
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryPrompt {
    pub id: String,
    pub question: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComprehensionStory {
    pub id: String,
    pub story: String,
    pub mcqs: Vec<ComprehensionMcq>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComprehensionMcq {
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer: usize,
}

impl ComprehensionMcq {
    pub fn correct_answer_text(&self) -> Option<&str> {
        self.options.get(self.correct_answer).map(String::as_str)
    }
}

impl Question {
    pub fn id(&self) -> &str {
        match self {
            Question::Mcq(q) => &q.id,
            Question::VoicePrompt(q) => &q.id,
            Question::StoryPrompt(q) => &q.id,
            Question::ComprehensionStory(q) => &q.id,
        }
    }

    pub fn item_count(&self) -> usize {
        match self {
            Question::ComprehensionStory(story) => story.mcqs.len(),
            _ => 1,
        }
    }

    pub fn fits(&self, kind: ModuleKind) -> bool {
        matches!(
            (self, kind),
            (Question::Mcq(_), ModuleKind::Mcq)
                | (Question::VoicePrompt(_), ModuleKind::Voice)
                | (Question::StoryPrompt(_), ModuleKind::Storytelling)
                | (Question::ComprehensionStory(_), ModuleKind::Comprehension)
        )
    }

    /// Text played aloud for listening modules.
    pub fn spoken_prompt(&self) -> Option<&str> {
        match self {
            Question::VoicePrompt(q) => Some(&q.text),
            Question::ComprehensionStory(q) => Some(&q.story),
            _ => None,
        }
    }
}

fn validate_modules(modules: &BTreeMap<ModuleKey, Module>) -> Result<(), ValidationError> {
    for (key, module) in modules {
        let mut seen = HashSet::with_capacity(module.questions.len());
        for question in &module.questions {
            if !seen.insert(question.id()) {
                let message =
                    format!("question id '{}' is used twice in module {key}", question.id());
                return Err(
                    ValidationError::new("duplicate_question_id").with_message(message.into())
                );
            }
            if !question.fits(key.kind()) {
                let message = format!("question '{}' does not fit module {key}", question.id());
                return Err(
                    ValidationError::new("question_kind_mismatch").with_message(message.into())
                );
            }
            let answer_in_range = match question {
                Question::Mcq(q) => q.correct_answer < q.options.len(),
                Question::ComprehensionStory(story) => {
                    !story.mcqs.is_empty()
                        && story.mcqs.iter().all(|mcq| mcq.correct_answer < mcq.options.len())
                }
                _ => true,
            };
            if !answer_in_range {
                let message = format!("question '{}' has no valid answer key", question.id());
                return Err(
                    ValidationError::new("correct_answer_out_of_range").with_message(message.into())
                );
            }
        }
    }
    Ok(())
}

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("test definition is invalid: {0}")]
    Invalid(#[from] ValidationErrors),
    #[error("module order references {0}, which the test does not define")]
    UnknownModule(ModuleKey),
    #[error("test has no enabled module with questions")]
    NoPresentableModules,
}

impl Test {
    pub fn module(&self, key: ModuleKey) -> Option<&Module> {
        self.modules.get(&key)
    }

    /// Modules shown to the student, in `module_order`, without duplicates.
    pub fn presentable_modules(&self) -> Vec<ModuleKey> {
        let mut keys: Vec<ModuleKey> = Vec::with_capacity(self.module_order.len());
        for key in &self.module_order {
            if keys.contains(key) {
                continue;
            }
            if self.module(*key).is_some_and(Module::is_presentable) {
                keys.push(*key);
            }
        }
        keys
    }

    /// One mark per scorable item across presentable modules.
    pub fn max_score(&self) -> f64 {
        self.presentable_modules()
            .into_iter()
            .filter_map(|key| self.module(key))
            .map(|module| module.item_count() as f64)
            .sum()
    }

    pub fn check(&self) -> Result<(), DefinitionError> {
        self.validate()?;
        let unknown = self.module_order.iter().find(|key| !self.modules.contains_key(key));
        if let Some(unknown) = unknown {
            return Err(DefinitionError::UnknownModule(*unknown));
        }
        if self.presentable_modules().is_empty() {
            return Err(DefinitionError::NoPresentableModules);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseKey {
    pub module: ModuleKey,
    pub question_id: String,
    /// Sub-question index inside a comprehension story.
    pub sub_index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Answer {
    #[serde(rename_all = "camelCase")]
    Choice { selected_option: usize },
    #[serde(rename_all = "camelCase")]
    Transcript { transcript: String, word_count: usize },
}

impl Answer {
    pub fn transcript(transcript: impl Into<String>) -> Self {
        let transcript = transcript.into();
        let word_count = transcript.split_whitespace().count();
        Answer::Transcript { transcript, word_count }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub answer: Answer,
    pub score: f64,
    pub submitted: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRecord {
    #[serde(flatten)]
    pub key: ResponseKey,
    #[serde(flatten)]
    pub response: Response,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPosition {
    pub module: ModuleKey,
    pub question_index: usize,
    pub sub_index: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleProgress {
    pub completed: bool,
    pub answered: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamProgress {
    pub id: String,
    pub student_email: String,
    pub test_id: String,
    pub status: ProgressStatus,
    pub module_progress: BTreeMap<ModuleKey, ModuleProgress>,
    pub module_scores: BTreeMap<ModuleKey, f64>,
    pub current_question: Option<CursorPosition>,
    /// Percentage in `0..=100`.
    pub overall_progress: f64,
    pub answered_questions: usize,
    pub total_questions: usize,
    pub last_question_score: Option<f64>,
    pub total_score: Option<f64>,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

/// Locates the live progress record of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressFilter {
    pub test_id: String,
    pub student_email: String,
    pub status: ProgressStatus,
}

impl ProgressFilter {
    pub fn in_progress(test_id: impl Into<String>, student_email: impl Into<String>) -> Self {
        Self {
            test_id: test_id.into(),
            student_email: student_email.into(),
            status: ProgressStatus::InProgress,
        }
    }

    pub fn matches(&self, record: &ExamProgress) -> bool {
        record.test_id == self.test_id
            && record.student_email == self.student_email
            && record.status == self.status
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressPatch {
    pub module_progress: BTreeMap<ModuleKey, ModuleProgress>,
    pub module_scores: BTreeMap<ModuleKey, f64>,
    pub current_question: Option<CursorPosition>,
    pub overall_progress: f64,
    pub answered_questions: usize,
    pub total_questions: usize,
    pub last_question_score: Option<f64>,
    pub last_updated: OffsetDateTime,
}

impl ProgressPatch {
    pub fn apply(self, record: &mut ExamProgress) {
        record.module_progress = self.module_progress;
        record.module_scores = self.module_scores;
        record.current_question = self.current_question;
        record.overall_progress = self.overall_progress;
        record.answered_questions = self.answered_questions;
        record.total_questions = self.total_questions;
        if self.last_question_score.is_some() {
            record.last_question_score = self.last_question_score;
        }
        record.last_updated = self.last_updated;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalScores {
    pub scores: BTreeMap<ModuleKey, f64>,
    pub total_score: f64,
    pub max_score: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub submitted_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamResult {
    pub id: String,
    pub student_email: String,
    pub test_id: String,
    pub test_title: String,
    pub scores: BTreeMap<ModuleKey, f64>,
    pub total_score: f64,
    pub max_score: f64,
    pub responses: Vec<ResponseRecord>,
    #[serde(with = "time::serde::rfc3339")]
    pub submitted_at: OffsetDateTime,
    pub duration_seconds: u64,
    pub submit_reason: SubmitReason,
    pub fullscreen_violations: u32,
}

impl ExamResult {
    pub fn final_scores(&self) -> FinalScores {
        FinalScores {
            scores: self.scores.clone(),
            total_score: self.total_score,
            max_score: self.max_score,
            submitted_at: self.submitted_at,
        }
    }
}
