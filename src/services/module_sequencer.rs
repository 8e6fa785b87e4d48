//! The authoritative cursor over a test's presentable modules.
//!
//! The sequencer owns the response book for the attempt. Responses are only ever added, the
//! cursor only moves forward inside a module, and module completion is irreversible.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use thiserror::Error;
use time::OffsetDateTime;

use crate::db::models::{
    Answer, CursorPosition, DefinitionError, ModuleProgress, Question, Response, ResponseKey,
    ResponseRecord, Test,
};
use crate::db::types::{ModuleKey, ModuleKind};
use crate::services::progress::ProgressSnapshot;
use crate::services::scoring;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SequenceError {
    #[error("answering is closed for this attempt")]
    Frozen,
    #[error("every module is already complete")]
    Finished,
    #[error("this question was already submitted")]
    AlreadySubmitted,
    #[error("submit the current question before moving on")]
    NotSubmitted,
    #[error("the answer is not complete: {0}")]
    Incomplete(&'static str),
    #[error("option {0} does not exist for this question")]
    OptionOutOfRange(usize),
    #[error("{0} does not accept this kind of answer")]
    WrongAnswerKind(ModuleKey),
    #[error("{0} is not part of this test")]
    NotPresentable(ModuleKey),
    #[error("{0} is already completed")]
    ModuleCompleted(ModuleKey),
    #[error("complete {blocking} before starting {target}")]
    Locked { target: ModuleKey, blocking: ModuleKey },
}

/// Unsaved state of the question under the cursor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Draft {
    pub selected_option: Option<usize>,
    pub transcript: String,
    pub recording_completed: bool,
    pub submitted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Question(CursorPosition),
    ModuleCompleted { completed: ModuleKey, next: CursorPosition },
    AllModulesComplete { completed: ModuleKey },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedAnswer {
    pub key: ResponseKey,
    pub score: f64,
    pub module_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    At(CursorPosition),
    AllModulesComplete,
}

#[derive(Debug)]
pub struct ModuleSequencer {
    test: Arc<Test>,
    modules: Vec<ModuleKey>,
    cursor: Cursor,
    draft: Draft,
    responses: BTreeMap<ResponseKey, Response>,
    completed: BTreeSet<ModuleKey>,
    scores: BTreeMap<ModuleKey, f64>,
    frozen: bool,
}

impl ModuleSequencer {
    pub fn new(test: Arc<Test>) -> Result<Self, DefinitionError> {
        test.check()?;
        let modules = test.presentable_modules();
        let first = *modules.first().ok_or(DefinitionError::NoPresentableModules)?;
        let scores = modules.iter().map(|key| (*key, 0.0)).collect();

        let mut sequencer = Self {
            test,
            modules,
            cursor: Cursor::AllModulesComplete,
            draft: Draft::default(),
            responses: BTreeMap::new(),
            completed: BTreeSet::new(),
            scores,
            frozen: false,
        };
        let start = sequencer.entry_position(first);
        sequencer.move_to(start);
        Ok(sequencer)
    }

    pub fn test(&self) -> &Test {
        &self.test
    }

    pub fn modules(&self) -> &[ModuleKey] {
        &self.modules
    }

    pub fn cursor(&self) -> Option<CursorPosition> {
        match self.cursor {
            Cursor::At(position) => Some(position),
            Cursor::AllModulesComplete => None,
        }
    }

    pub fn draft(&self) -> &Draft {
        &self.draft
    }

    pub fn is_complete(&self) -> bool {
        self.cursor == Cursor::AllModulesComplete
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn is_module_completed(&self, module: ModuleKey) -> bool {
        self.completed.contains(&module)
    }

    pub fn responses(&self) -> &BTreeMap<ResponseKey, Response> {
        &self.responses
    }

    pub fn response_records(&self) -> Vec<ResponseRecord> {
        self.responses
            .iter()
            .map(|(key, response)| ResponseRecord { key: key.clone(), response: response.clone() })
            .collect()
    }

    pub fn module_scores(&self) -> &BTreeMap<ModuleKey, f64> {
        &self.scores
    }

    pub fn current_question(&self) -> Option<&Question> {
        self.cursor().and_then(|position| self.question_at(position))
    }

    fn question_at(&self, position: CursorPosition) -> Option<&Question> {
        self.test.module(position.module)?.questions.get(position.question_index)
    }

    fn key_for(&self, position: CursorPosition) -> Option<ResponseKey> {
        self.question_at(position).map(|question| ResponseKey {
            module: position.module,
            question_id: question.id().to_string(),
            sub_index: position.sub_index,
        })
    }

    /// Every scorable item of `module`, in presentation order.
    fn items(&self, module: ModuleKey) -> Vec<CursorPosition> {
        let Some(definition) = self.test.module(module) else {
            return Vec::new();
        };
        definition
            .questions
            .iter()
            .enumerate()
            .flat_map(|(question_index, question)| {
                let subs: Vec<Option<usize>> = match question {
                    Question::ComprehensionStory(story) => {
                        (0..story.mcqs.len()).map(Some).collect()
                    }
                    _ => vec![None],
                };
                subs.into_iter()
                    .map(move |sub_index| CursorPosition { module, question_index, sub_index })
            })
            .collect()
    }

    /// First unanswered item of `module`, or its first item when everything is answered.
    fn entry_position(&self, module: ModuleKey) -> CursorPosition {
        let items = self.items(module);
        items
            .iter()
            .find(|position| {
                self.key_for(**position).is_some_and(|key| !self.responses.contains_key(&key))
            })
            .or(items.first())
            .copied()
            .unwrap_or(CursorPosition { module, question_index: 0, sub_index: None })
    }

    fn move_to(&mut self, position: CursorPosition) {
        self.cursor = Cursor::At(position);
        let answered =
            self.key_for(position).is_some_and(|key| self.responses.contains_key(&key));
        self.draft = Draft { submitted: answered, ..Draft::default() };
    }

    fn open_position(&self) -> Result<CursorPosition, SequenceError> {
        if self.frozen {
            return Err(SequenceError::Frozen);
        }
        match self.cursor {
            Cursor::At(position) => Ok(position),
            Cursor::AllModulesComplete => Err(SequenceError::Finished),
        }
    }

    fn editable_position(&self) -> Result<CursorPosition, SequenceError> {
        let position = self.open_position()?;
        if self.draft.submitted {
            return Err(SequenceError::AlreadySubmitted);
        }
        Ok(position)
    }

    pub fn select_option(&mut self, option: usize) -> Result<(), SequenceError> {
        let position = self.editable_position()?;
        match self.question_at(position) {
            Some(Question::Mcq(question)) => {
                if option >= question.options.len() {
                    return Err(SequenceError::OptionOutOfRange(option));
                }
                self.draft.selected_option = Some(option);
                Ok(())
            }
            _ => Err(SequenceError::WrongAnswerKind(position.module)),
        }
    }

    /// Marks a new recording as started. The previous recording no longer counts as finished;
    /// its transcript is dropped unless `keep_transcript` (storytelling adds to it).
    pub fn begin_recording(&mut self, keep_transcript: bool) -> Result<(), SequenceError> {
        let position = self.editable_position()?;
        if !position.module.kind().is_spoken() {
            return Err(SequenceError::WrongAnswerKind(position.module));
        }
        if !keep_transcript {
            self.draft.transcript.clear();
        }
        self.draft.recording_completed = false;
        Ok(())
    }

    /// Stores the committed transcript of the current recording.
    pub fn record_transcript(
        &mut self,
        transcript: &str,
        recording_completed: bool,
    ) -> Result<(), SequenceError> {
        let position = self.editable_position()?;
        if !position.module.kind().is_spoken() {
            return Err(SequenceError::WrongAnswerKind(position.module));
        }
        self.draft.transcript = transcript.trim().to_string();
        self.draft.recording_completed = recording_completed;
        Ok(())
    }

    fn draft_answer(&self, kind: ModuleKind) -> Result<Answer, SequenceError> {
        match kind {
            ModuleKind::Mcq => self
                .draft
                .selected_option
                .map(|selected_option| Answer::Choice { selected_option })
                .ok_or(SequenceError::Incomplete("choose an option")),
            ModuleKind::Voice | ModuleKind::Storytelling | ModuleKind::Comprehension => {
                if self.draft.recording_completed {
                    Ok(Answer::transcript(self.draft.transcript.clone()))
                } else {
                    Err(SequenceError::Incomplete("finish the recording"))
                }
            }
        }
    }

    pub fn submit_answer(&mut self, now: OffsetDateTime) -> Result<SubmittedAnswer, SequenceError> {
        let position = self.editable_position()?;
        let answer = self.draft_answer(position.module.kind())?;
        let question = self.question_at(position).ok_or(SequenceError::Finished)?;
        let key = ResponseKey {
            module: position.module,
            question_id: question.id().to_string(),
            sub_index: position.sub_index,
        };
        let score = scoring::score(position.module, question, position.sub_index, &answer);

        self.responses
            .insert(key.clone(), Response { answer, score, submitted: true, recorded_at: now });
        self.draft.submitted = true;

        let module_score = scoring::module_total(&self.test, position.module, &self.responses);
        self.scores.insert(position.module, module_score);
        Ok(SubmittedAnswer { key, score, module_score })
    }

    pub fn next(&mut self) -> Result<Advance, SequenceError> {
        let position = self.open_position()?;
        if !self.draft.submitted {
            return Err(SequenceError::NotSubmitted);
        }

        let items = self.items(position.module);
        let following = items
            .iter()
            .position(|item| *item == position)
            .and_then(|index| items.get(index + 1))
            .copied();
        if let Some(next) = following {
            self.move_to(next);
            return Ok(Advance::Question(next));
        }

        let completed = position.module;
        self.completed.insert(completed);
        let total = scoring::module_total(&self.test, completed, &self.responses);
        self.scores.insert(completed, total);

        let upcoming = self.modules.iter().copied().find(|key| !self.completed.contains(key));
        match upcoming {
            Some(module) => {
                let next = self.entry_position(module);
                self.move_to(next);
                Ok(Advance::ModuleCompleted { completed, next })
            }
            None => {
                self.cursor = Cursor::AllModulesComplete;
                self.draft = Draft::default();
                Ok(Advance::AllModulesComplete { completed })
            }
        }
    }

    /// Moves the cursor to `target`. Students may only open the first incomplete module;
    /// privileged actors may open any presentable module.
    pub fn navigate_to_module(
        &mut self,
        target: ModuleKey,
        privileged: bool,
    ) -> Result<CursorPosition, SequenceError> {
        if self.frozen {
            return Err(SequenceError::Frozen);
        }
        let Some(index) = self.modules.iter().position(|key| *key == target) else {
            return Err(SequenceError::NotPresentable(target));
        };

        if !privileged {
            if self.completed.contains(&target) {
                return Err(SequenceError::ModuleCompleted(target));
            }
            let blocking =
                self.modules[..index].iter().copied().find(|key| !self.completed.contains(key));
            if let Some(blocking) = blocking {
                return Err(SequenceError::Locked { target, blocking });
            }
        }

        if let Some(position) = self.cursor().filter(|position| position.module == target) {
            return Ok(position);
        }
        let position = self.entry_position(target);
        self.move_to(position);
        Ok(position)
    }

    /// Recomputes every module total from the response book.
    pub fn recompute_scores(&mut self) -> BTreeMap<ModuleKey, f64> {
        for module in &self.modules {
            let total = scoring::module_total(&self.test, *module, &self.responses);
            self.scores.insert(*module, total);
        }
        self.scores.clone()
    }

    pub fn total_score(&self) -> f64 {
        scoring::round_marks(self.scores.values().sum())
    }

    /// Closes the attempt. Every later mutation is rejected.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn progress_snapshot(&self) -> ProgressSnapshot {
        let mut module_progress = BTreeMap::new();
        let mut answered_questions = 0;
        let mut total_questions = 0;

        for module in &self.modules {
            let total = self.test.module(*module).map_or(0, |definition| definition.item_count());
            let answered = self.responses.keys().filter(|key| key.module == *module).count();
            answered_questions += answered;
            total_questions += total;
            module_progress.insert(
                *module,
                ModuleProgress { completed: self.completed.contains(module), answered, total },
            );
        }

        ProgressSnapshot {
            module_progress,
            module_scores: self.scores.clone(),
            current_question: self.cursor(),
            answered_questions,
            total_questions,
        }
    }
}
