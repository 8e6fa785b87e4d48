//! The exam session controller: the single entry point the exam shell talks to.
//!
//! A controller is a cheap `Clone` handle. All mutable session state sits behind one async
//! mutex, while the submission latch lives outside it so that concurrent finalize triggers
//! (timer, manual submit, integrity limit, last module) are resolved without waiting.

use std::sync::{Arc, Weak};
use std::time::Instant;

use time::OffsetDateTime;
use tokio::sync::{broadcast, watch, Mutex};

use crate::api::errors::ExamError;
use crate::api::events::SessionEvent;
use crate::core::config::ExamSettings;
use crate::core::context::SessionContext;
use crate::core::time::{format_offset, now_utc};
use crate::db::models::{CursorPosition, ExamResult, ModuleProgress, Test};
use crate::db::types::{ModuleKey, ModuleKind, SubmitReason};
use crate::repositories::ExamStore;
use crate::schemas::session::{DraftView, ModuleStatusView, SessionPhase, SessionView};
use crate::services::devices::{MediaDevices, MediaSession};
use crate::services::equipment_setup::{EquipmentSetup, SetupStep, StepStatus};
use crate::services::integrity::{
    Fullscreen, IntegrityEvent, IntegrityMonitor, IntegrityPolicy, IntegrityVerdict,
    ViolationKind,
};
use crate::services::module_sequencer::{
    Advance, ModuleSequencer, SequenceError, SubmittedAnswer,
};
use crate::services::progress::{ProgressReporter, ProgressSnapshot};
use crate::services::retake_policy::blocks_retake;
use crate::services::speech::{SpeechRecognizer, SpeechSynthesizer, VoiceHints};
use crate::services::submission_finalize::{
    build_result, persist_result, FinalizeInput, LatchState, SubmissionLatch,
};
use crate::services::voice_capture::{
    CaptureMode, CaptureState, CaptureTelemetry, TranscriptSnapshot, VoiceCapture,
};
use crate::services::work_timing::{availability, remaining, session_deadline, Availability};
use crate::tasks::scheduler;

const EVENT_CAPACITY: usize = 64;

/// External systems the session runs against.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn ExamStore>,
    pub devices: Arc<dyn MediaDevices>,
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub fullscreen: Arc<dyn Fullscreen>,
}

#[derive(Clone)]
pub struct ExamSessionController {
    inner: Arc<SessionInner>,
}

/// Handle held by background tasks so they never keep a session alive.
#[derive(Clone)]
pub(crate) struct WeakSession(Weak<SessionInner>);

impl WeakSession {
    pub(crate) fn upgrade(&self) -> Option<ExamSessionController> {
        self.0.upgrade().map(|inner| ExamSessionController { inner })
    }
}

struct SessionInner {
    context: SessionContext,
    settings: ExamSettings,
    test: Arc<Test>,
    store: Arc<dyn ExamStore>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    fullscreen: Arc<dyn Fullscreen>,
    media: Arc<MediaSession>,
    capture: VoiceCapture,
    reporter: ProgressReporter,
    latch: SubmissionLatch,
    events: broadcast::Sender<SessionEvent>,
    shutdown: watch::Sender<bool>,
    state: Mutex<SessionState>,
}

struct SessionState {
    setup: EquipmentSetup,
    sequencer: ModuleSequencer,
    monitor: IntegrityMonitor,
    started_at: Option<OffsetDateTime>,
    deadline: Option<OffsetDateTime>,
    prepared: Option<ExamResult>,
}

impl ExamSessionController {
    /// Loads `test_id` for the student in `context`, refusing tests that are closed, not yet
    /// open, malformed, or already completed.
    pub async fn load(
        test_id: &str,
        context: SessionContext,
        collaborators: Collaborators,
        settings: ExamSettings,
    ) -> Result<Self, ExamError> {
        let Collaborators { store, devices, recognizer, synthesizer, fullscreen } = collaborators;

        let test = store
            .get_test(test_id)
            .await
            .map_err(|e| ExamError::internal(e, "Failed to load test"))?
            .ok_or_else(|| ExamError::NotFound(test_id.to_string()))?;
        test.check()?;

        match availability(&test, now_utc()) {
            Availability::Open => {}
            Availability::NotYetOpen { opens_at } => {
                return Err(ExamError::NotYetOpen(format_offset(opens_at)));
            }
            Availability::Closed { .. } => return Err(ExamError::Closed),
        }

        let latest = store
            .find_result(&test.id, context.email())
            .await
            .map_err(|e| ExamError::internal(e, "Failed to check previous results"))?;
        if blocks_retake(&test, latest.as_ref()) {
            tracing::info!(
                test_id = %test.id,
                student_email = %context.email(),
                "Retake blocked by an earlier result"
            );
            return Err(ExamError::AlreadyCompleted);
        }

        let test = Arc::new(test);
        let sequencer = ModuleSequencer::new(test.clone())?;
        let monitor = IntegrityMonitor::new(
            IntegrityPolicy::from_settings(&settings),
            context.is_privileged(),
        );
        let media = Arc::new(MediaSession::new(devices));
        let capture = VoiceCapture::new(
            recognizer,
            media.clone(),
            &settings.speech_language,
            settings.recognition_settle(),
        );
        let reporter = ProgressReporter::new(
            store.clone(),
            &test.id,
            context.email(),
            settings.progress_push_timeout(),
        );
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown, _) = watch::channel(false);

        tracing::info!(
            test_id = %test.id,
            student_email = %context.email(),
            modules = sequencer.modules().len(),
            "Exam session loaded"
        );

        Ok(Self {
            inner: Arc::new(SessionInner {
                context,
                settings,
                test,
                store,
                synthesizer,
                fullscreen,
                media,
                capture,
                reporter,
                latch: SubmissionLatch::default(),
                events,
                shutdown,
                state: Mutex::new(SessionState {
                    setup: EquipmentSetup::new(),
                    sequencer,
                    monitor,
                    started_at: None,
                    deadline: None,
                    prepared: None,
                }),
            }),
        })
    }

    pub(crate) fn downgrade(&self) -> WeakSession {
        WeakSession(Arc::downgrade(&self.inner))
    }

    pub fn test(&self) -> &Test {
        &self.inner.test
    }

    pub fn context(&self) -> &SessionContext {
        &self.inner.context
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        // Nobody listening is fine.
        let _ = self.inner.events.send(event);
    }

    fn hints(&self) -> VoiceHints {
        VoiceHints::for_language(self.inner.settings.speech_language.clone())
    }

    fn phase_of(&self, state: &SessionState) -> SessionPhase {
        match self.inner.latch.state() {
            LatchState::Open if state.started_at.is_some() => SessionPhase::Active,
            LatchState::Open => SessionPhase::Setup,
            LatchState::Submitting => SessionPhase::Submitting,
            LatchState::Submitted => SessionPhase::Submitted,
            LatchState::Failed => SessionPhase::SubmissionFailed,
        }
    }

    pub async fn phase(&self) -> SessionPhase {
        let state = self.inner.state.lock().await;
        self.phase_of(&state)
    }

    fn ensure_setup_phase(&self, state: &SessionState) -> Result<(), ExamError> {
        match self.phase_of(state) {
            SessionPhase::Setup => Ok(()),
            SessionPhase::Active => Err(ExamError::AlreadyStarted),
            _ => Err(ExamError::AlreadySubmitted),
        }
    }

    fn ensure_answering(&self, state: &SessionState) -> Result<(), ExamError> {
        match self.phase_of(state) {
            SessionPhase::Active => Ok(()),
            SessionPhase::Setup => Err(ExamError::NotStarted),
            _ => Err(ExamError::AlreadySubmitted),
        }
    }

    pub async fn check_camera(&self) -> Result<(), ExamError> {
        let mut state = self.inner.state.lock().await;
        self.ensure_setup_phase(&state)?;
        state.setup.check_camera(&self.inner.media).await?;
        Ok(())
    }

    /// Plays the sample sentence through the synthesizer.
    pub async fn check_audio(&self) -> Result<(), ExamError> {
        let mut state = self.inner.state.lock().await;
        self.ensure_setup_phase(&state)?;
        let hints = self.hints();
        state.setup.check_audio(self.inner.synthesizer.as_ref(), &hints).await?;
        Ok(())
    }

    pub async fn check_microphone(&self) -> Result<(), ExamError> {
        let mut state = self.inner.state.lock().await;
        self.ensure_setup_phase(&state)?;
        state.setup.check_microphone(&self.inner.media).await?;
        Ok(())
    }

    /// Runs every equipment check that has not passed yet, in order.
    pub async fn run_setup(&self) -> Result<(), ExamError> {
        for step in [SetupStep::Camera, SetupStep::Audio, SetupStep::Microphone] {
            if self.setup_status(step).await == StepStatus::Success {
                continue;
            }
            match step {
                SetupStep::Camera => self.check_camera().await?,
                SetupStep::Audio => self.check_audio().await?,
                SetupStep::Microphone => self.check_microphone().await?,
            }
        }
        Ok(())
    }

    pub async fn setup_status(&self, step: SetupStep) -> StepStatus {
        self.inner.state.lock().await.setup.status(step).clone()
    }

    pub async fn accept_guidelines(&self, accepted: bool) {
        self.inner.state.lock().await.setup.accept_guidelines(accepted);
    }

    /// Starts the clock: creates the progress record, enters fullscreen and spawns the
    /// countdown and heartbeat.
    pub async fn start(&self) -> Result<(), ExamError> {
        let mut state = self.inner.state.lock().await;
        self.ensure_setup_phase(&state)?;
        if !state.setup.is_complete() {
            return Err(ExamError::SetupIncomplete);
        }

        let now = now_utc();
        let deadline = session_deadline(&self.inner.test, now);
        if deadline <= now {
            return Err(ExamError::Closed);
        }
        state.started_at = Some(now);
        state.deadline = Some(deadline);
        state.monitor.arm();
        let snapshot = state.sequencer.progress_snapshot();
        drop(state);

        self.inner.reporter.create(snapshot, now).await;
        if let Err(err) = self.inner.fullscreen.request_fullscreen().await {
            tracing::warn!(error = %err, "Failed to enter fullscreen");
        }
        scheduler::spawn_session_tasks(
            self.downgrade(),
            remaining(deadline, now),
            self.inner.settings.heartbeat_interval(),
            self.inner.shutdown.subscribe(),
        );

        metrics::counter!("exam_sessions_started_total").increment(1);
        tracing::info!(
            test_id = %self.inner.test.id,
            student_email = %self.inner.context.email(),
            deadline = %format_offset(deadline),
            "Exam session started"
        );
        Ok(())
    }

    pub async fn select_option(&self, option: usize) -> Result<(), ExamError> {
        let mut state = self.inner.state.lock().await;
        self.ensure_answering(&state)?;
        state.sequencer.select_option(option)?;
        Ok(())
    }

    /// Starts capturing speech for the current spoken question. Storytelling keeps adding to
    /// the same transcript and stops itself at the recording limit.
    pub async fn start_recording(&self) -> Result<(), ExamError> {
        let mut state = self.inner.state.lock().await;
        self.ensure_answering(&state)?;
        let position = state.sequencer.cursor().ok_or(SequenceError::Finished)?;
        let kind = position.module.kind();
        if !kind.is_spoken() {
            return Err(SequenceError::WrongAnswerKind(position.module).into());
        }
        if state.sequencer.draft().submitted {
            return Err(SequenceError::AlreadySubmitted.into());
        }

        let (mode, limit) = if kind == ModuleKind::Storytelling {
            (CaptureMode::Accumulate, Some(self.inner.settings.story_max_recording()))
        } else {
            (CaptureMode::Replace, None)
        };
        // Held across the start so a concurrent finalize stops this capture afterwards.
        self.inner.capture.start(mode, limit).await?;
        state.sequencer.begin_recording(mode == CaptureMode::Accumulate)?;
        drop(state);
        Ok(())
    }

    pub async fn stop_recording(&self) -> Result<TranscriptSnapshot, ExamError> {
        let mut state = self.inner.state.lock().await;
        self.ensure_answering(&state)?;
        let snapshot = self.inner.capture.stop().await;
        if let Some(failure) = self.inner.capture.failure() {
            return Err(failure.into());
        }
        state.sequencer.record_transcript(&snapshot.committed, snapshot.recording_completed)?;
        Ok(snapshot)
    }

    pub async fn submit_answer(&self) -> Result<SubmittedAnswer, ExamError> {
        let mut state = self.inner.state.lock().await;
        self.ensure_answering(&state)?;
        let position = state.sequencer.cursor().ok_or(SequenceError::Finished)?;

        // A capture that stopped on its own (recording limit) still counts as finished.
        if position.module.kind().is_spoken() && !state.sequencer.draft().submitted {
            let transcript = self.inner.capture.transcript();
            if transcript.state == CaptureState::Listening {
                return Err(SequenceError::Incomplete("finish the recording").into());
            }
            if transcript.recording_completed {
                state.sequencer.record_transcript(&transcript.committed, true)?;
            }
        }

        let submitted = state.sequencer.submit_answer(now_utc())?;
        let snapshot = state.sequencer.progress_snapshot();
        drop(state);

        metrics::counter!("answers_submitted_total", "module" => position.module.as_str())
            .increment(1);
        tracing::info!(
            test_id = %self.inner.test.id,
            module = %position.module,
            question_id = %submitted.key.question_id,
            score = submitted.score,
            "Answer submitted"
        );
        self.inner.reporter.question_submitted(snapshot, submitted.score).await;
        Ok(submitted)
    }

    /// Advances past the submitted question. Completing the last module submits the exam.
    pub async fn next(&self) -> Result<Advance, ExamError> {
        let mut state = self.inner.state.lock().await;
        self.ensure_answering(&state)?;
        let advance = state.sequencer.next()?;
        let snapshot = state.sequencer.progress_snapshot();
        drop(state);

        self.inner.capture.reset().await;
        match advance {
            Advance::Question(_) => Ok(advance),
            Advance::ModuleCompleted { completed, next } => {
                self.module_completed(completed, Some(next.module), snapshot).await;
                Ok(advance)
            }
            Advance::AllModulesComplete { completed } => {
                self.module_completed(completed, None, snapshot).await;
                match self.finalize(SubmitReason::AllModulesComplete).await {
                    Ok(_) | Err(ExamError::AlreadySubmitted) => Ok(advance),
                    Err(err) => Err(err),
                }
            }
        }
    }

    async fn module_completed(
        &self,
        module: ModuleKey,
        next: Option<ModuleKey>,
        snapshot: ProgressSnapshot,
    ) {
        let score = snapshot.module_scores.get(&module).copied().unwrap_or_default();
        tracing::info!(
            test_id = %self.inner.test.id,
            module = %module,
            score,
            "Module completed"
        );
        self.emit(SessionEvent::ModuleCompleted { module, score, next });
        self.inner.reporter.module_completed(snapshot).await;
    }

    pub async fn navigate_to_module(
        &self,
        target: ModuleKey,
    ) -> Result<CursorPosition, ExamError> {
        let mut state = self.inner.state.lock().await;
        self.ensure_answering(&state)?;
        let before = state.sequencer.cursor();
        let position =
            state.sequencer.navigate_to_module(target, self.inner.context.is_privileged())?;
        drop(state);

        if before != Some(position) {
            self.inner.capture.reset().await;
        }
        Ok(position)
    }

    /// Reads the current listening prompt (or comprehension story) aloud.
    pub async fn play_prompt(&self) -> Result<(), ExamError> {
        let text = {
            let state = self.inner.state.lock().await;
            self.ensure_answering(&state)?;
            let position = state.sequencer.cursor().ok_or(SequenceError::Finished)?;
            if !position.module.is_listening() {
                return Err(ExamError::NoPrompt);
            }
            state
                .sequencer
                .current_question()
                .and_then(|question| question.spoken_prompt())
                .map(str::to_string)
                .ok_or(ExamError::NoPrompt)?
        };

        self.inner
            .synthesizer
            .speak(&text, &self.hints())
            .await
            .map_err(|err| ExamError::Playback(err.to_string()))
    }

    /// Applies the lockdown rules to a shell event and acts on the verdict.
    pub async fn handle_integrity_event(&self, event: IntegrityEvent) -> IntegrityVerdict {
        let verdict = self.inner.state.lock().await.monitor.observe(event, Instant::now());

        match &verdict {
            IntegrityVerdict::Warning { kind, count, limit, reenter_fullscreen } => {
                tracing::warn!(
                    test_id = %self.inner.test.id,
                    student_email = %self.inner.context.email(),
                    kind = kind.as_str(),
                    count,
                    limit,
                    "Integrity violation"
                );
                self.emit(SessionEvent::IntegrityWarning {
                    message: warning_message(*kind, *count, *limit),
                    count: *count,
                    limit: *limit,
                });
                if *reenter_fullscreen {
                    if let Err(err) = self.inner.fullscreen.request_fullscreen().await {
                        tracing::warn!(error = %err, "Failed to re-enter fullscreen");
                    }
                }
            }
            IntegrityVerdict::ForceSubmit(reason) => {
                tracing::warn!(
                    test_id = %self.inner.test.id,
                    student_email = %self.inner.context.email(),
                    reason = %reason,
                    "Integrity limit reached; submitting"
                );
                self.emit(SessionEvent::ForcedSubmission { reason: reason.clone() });
                match self.finalize(reason.clone()).await {
                    Ok(_) | Err(ExamError::AlreadySubmitted) => {}
                    Err(err) => tracing::error!(error = %err, "Forced submission failed"),
                }
            }
            _ => {}
        }
        verdict
    }

    /// Submits the attempt. Only the first caller does the work; everyone after it gets
    /// `AlreadySubmitted`.
    pub async fn finalize(&self, reason: SubmitReason) -> Result<ExamResult, ExamError> {
        if self.inner.state.lock().await.started_at.is_none() {
            return Err(ExamError::NotStarted);
        }
        if !self.inner.latch.try_begin() {
            tracing::debug!(reason = %reason, "Submission already claimed");
            return Err(ExamError::AlreadySubmitted);
        }

        self.inner.shutdown.send_replace(true);
        tracing::info!(
            test_id = %self.inner.test.id,
            student_email = %self.inner.context.email(),
            reason = %reason,
            "Finalizing exam session"
        );

        let result = {
            let mut state = self.inner.state.lock().await;
            state.monitor.detach();
            let submitted_at = now_utc();
            let input = FinalizeInput {
                student_email: self.inner.context.email(),
                reason,
                started_at: state.started_at.unwrap_or(submitted_at),
                submitted_at,
                fullscreen_violations: state.monitor.fullscreen_violations(),
            };
            let result = build_result(&mut state.sequencer, input);
            state.prepared = Some(result.clone());
            result
        };
        self.inner.capture.stop().await;

        self.persist(result).await
    }

    /// Stores the result prepared by a failed submission again, under the same id.
    pub async fn retry_submission(&self) -> Result<ExamResult, ExamError> {
        match self.inner.latch.state() {
            LatchState::Failed => {}
            LatchState::Open => return Err(ExamError::NoPendingSubmission),
            LatchState::Submitting | LatchState::Submitted => {
                return Err(ExamError::AlreadySubmitted)
            }
        }
        if !self.inner.latch.try_retry() {
            return Err(ExamError::AlreadySubmitted);
        }

        let prepared = self.inner.state.lock().await.prepared.clone();
        let Some(result) = prepared else {
            self.inner.latch.finish(false);
            return Err(ExamError::NoPendingSubmission);
        };
        tracing::info!(result_id = %result.id, "Retrying exam submission");
        self.persist(result).await
    }

    async fn persist(&self, result: ExamResult) -> Result<ExamResult, ExamError> {
        match persist_result(self.inner.store.as_ref(), &self.inner.reporter, &result).await {
            Ok(()) => {
                self.inner.latch.finish(true);
                if let Err(err) = self.inner.fullscreen.exit_fullscreen().await {
                    tracing::debug!(error = %err, "Failed to exit fullscreen");
                }
                self.inner.media.release().await;
                self.emit(SessionEvent::ResultsReady {
                    result_id: result.id.clone(),
                    total_score: result.total_score,
                    max_score: result.max_score,
                });
                Ok(result)
            }
            Err(err) => {
                self.inner.latch.finish(false);
                self.inner.media.release().await;
                tracing::error!(
                    test_id = %result.test_id,
                    student_email = %result.student_email,
                    error = ?err,
                    "Exam submission failed"
                );
                self.emit(SessionEvent::SubmissionFailed {
                    message: ExamError::SubmissionFailed.to_string(),
                });
                Err(ExamError::SubmissionFailed)
            }
        }
    }

    /// Pushes a progress snapshot while the exam is running. Returns whether it was stored.
    pub(crate) async fn heartbeat(&self) -> bool {
        if self.inner.latch.state() != LatchState::Open {
            return false;
        }
        let snapshot = {
            let state = self.inner.state.lock().await;
            if state.started_at.is_none() {
                return false;
            }
            state.sequencer.progress_snapshot()
        };
        self.inner.reporter.heartbeat(snapshot).await
    }

    /// The stored result, once the submission went through.
    pub async fn result(&self) -> Option<ExamResult> {
        if self.inner.latch.state() != LatchState::Submitted {
            return None;
        }
        self.inner.state.lock().await.prepared.clone()
    }

    pub fn capture_telemetry(&self) -> CaptureTelemetry {
        self.inner.capture.telemetry()
    }

    pub async fn view(&self) -> SessionView {
        let state = self.inner.state.lock().await;
        let snapshot = state.sequencer.progress_snapshot();

        let mut all_before_completed = true;
        let modules = state
            .sequencer
            .modules()
            .iter()
            .map(|module| {
                let progress: ModuleProgress =
                    snapshot.module_progress.get(module).copied().unwrap_or_default();
                let unlocked = all_before_completed && !progress.completed;
                all_before_completed &= progress.completed;
                ModuleStatusView {
                    module: *module,
                    title: module.title(),
                    completed: progress.completed,
                    unlocked,
                    answered: progress.answered,
                    total: progress.total,
                    score: snapshot.module_scores.get(module).copied().unwrap_or_default(),
                }
            })
            .collect();

        let transcript = self.inner.capture.transcript();
        let draft = state.sequencer.draft();
        let draft = DraftView {
            selected_option: draft.selected_option,
            transcript: if draft.transcript.is_empty() {
                transcript.committed.clone()
            } else {
                draft.transcript.clone()
            },
            interim_transcript: transcript.interim.clone(),
            recording: transcript.state == CaptureState::Listening,
            recording_completed: draft.recording_completed || transcript.recording_completed,
            submitted: draft.submitted,
        };

        SessionView {
            test_id: self.inner.test.id.clone(),
            test_title: self.inner.test.title.clone(),
            student_email: self.inner.context.email().to_string(),
            phase: self.phase_of(&state),
            cursor: state.sequencer.cursor(),
            current_question_id: state
                .sequencer
                .current_question()
                .map(|question| question.id().to_string()),
            modules,
            overall_progress: snapshot.overall_progress(),
            remaining_seconds: state
                .deadline
                .map(|deadline| remaining(deadline, now_utc()).as_secs()),
            fullscreen_violations: state.monitor.fullscreen_violations(),
            draft,
        }
    }
}

fn warning_message(kind: ViolationKind, count: u32, limit: u32) -> String {
    match kind {
        ViolationKind::FullscreenExit => format!(
            "You left fullscreen ({count} of {limit}). \
             The exam is submitted automatically at {limit}."
        ),
        ViolationKind::EscapePress => format!(
            "ESC pressed {count} times. Pressing it {limit} times in a row submits the exam."
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::db::types::{ProgressStatus, UserRole};
    use crate::services::devices::DeviceKind;
    use crate::services::simulated::SimulatedDevices;
    use crate::services::speech::RecognitionErrorKind;
    use crate::test_support::{self, TestContext, STUDENT_EMAIL};

    async fn load_error(ctx: &TestContext, test_id: &str) -> ExamError {
        let loaded = ExamSessionController::load(
            test_id,
            SessionContext::student(STUDENT_EMAIL),
            ctx.collaborators(),
            ctx.settings.clone(),
        )
        .await;
        match loaded {
            Ok(_) => panic!("session for {test_id} should not load"),
            Err(err) => err,
        }
    }

    fn story_test() -> Test {
        serde_json::from_value(json!({
            "id": "T-300",
            "title": "Storytelling",
            "duration": 20,
            "modules": {
                "storytelling": {
                    "enabled": true,
                    "questions": [
                        {"type": "storyPrompt", "id": "st-1", "question": "Describe your town"}
                    ]
                }
            },
            "moduleOrder": ["storytelling"]
        }))
        .expect("story test")
    }

    fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        std::iter::from_fn(|| events.try_recv().ok()).collect()
    }

    #[tokio::test]
    async fn load_rejects_unknown_test() {
        let ctx = TestContext::new(test_support::two_module_test()).await;
        let err = load_error(&ctx, "T-404").await;
        assert!(matches!(err, ExamError::NotFound(id) if id == "T-404"));
    }

    #[tokio::test]
    async fn start_requires_setup_and_guidelines() {
        let ctx = TestContext::new(test_support::two_module_test()).await;
        let controller = ctx.load("T-100", SessionContext::student(STUDENT_EMAIL)).await;
        assert_eq!(controller.phase().await, SessionPhase::Setup);

        assert!(matches!(controller.start().await, Err(ExamError::SetupIncomplete)));
        controller.run_setup().await.unwrap();
        assert!(matches!(controller.start().await, Err(ExamError::SetupIncomplete)));

        controller.accept_guidelines(true).await;
        controller.start().await.unwrap();
        assert_eq!(controller.phase().await, SessionPhase::Active);
        assert_eq!(ctx.fullscreen.requests(), 1);

        assert!(matches!(controller.start().await, Err(ExamError::AlreadyStarted)));
        assert!(matches!(controller.check_camera().await, Err(ExamError::AlreadyStarted)));
        let progress = ctx.store.progress_records().await;
        assert_eq!(progress.len(), 1);
        assert_eq!(progress[0].status, ProgressStatus::InProgress);
    }

    #[tokio::test]
    async fn denied_microphone_blocks_setup() {
        let devices = SimulatedDevices::new().deny(DeviceKind::Microphone);
        let ctx = TestContext::with_devices(test_support::two_module_test(), devices).await;
        let controller = ctx.load("T-100", SessionContext::student(STUDENT_EMAIL)).await;

        let err = controller.run_setup().await.unwrap_err();
        assert!(err.is_permission());
        assert_eq!(controller.setup_status(SetupStep::Camera).await, StepStatus::Success);
        assert!(matches!(
            controller.setup_status(SetupStep::Microphone).await,
            StepStatus::Failed(_)
        ));

        controller.accept_guidelines(true).await;
        assert!(matches!(controller.start().await, Err(ExamError::SetupIncomplete)));
    }

    #[tokio::test]
    async fn answering_before_start_is_rejected() {
        let ctx = TestContext::new(test_support::two_module_test()).await;
        let controller = ctx.load("T-100", SessionContext::student(STUDENT_EMAIL)).await;

        assert!(matches!(controller.select_option(1).await, Err(ExamError::NotStarted)));
        assert!(matches!(
            controller.finalize(SubmitReason::Manual).await,
            Err(ExamError::NotStarted)
        ));
        assert!(!controller.heartbeat().await);
    }

    #[tokio::test]
    async fn completing_every_module_submits_exactly_once() {
        let ctx = TestContext::new(test_support::two_module_test()).await;
        let controller = ctx.started("T-100").await;
        let mut events = controller.subscribe();

        controller.select_option(1).await.unwrap();
        assert_eq!(controller.submit_answer().await.unwrap().score, 1.0);
        assert!(matches!(controller.next().await.unwrap(), Advance::Question(_)));
        controller.select_option(0).await.unwrap();
        controller.submit_answer().await.unwrap();
        let advance = controller.next().await.unwrap();
        assert!(matches!(
            advance,
            Advance::ModuleCompleted { completed: ModuleKey::Aptitude, .. }
        ));

        ctx.recognizer.queue_utterance("The quick brown fox");
        controller.start_recording().await.unwrap();
        let snapshot = controller.stop_recording().await.unwrap();
        assert_eq!(snapshot.committed, "The quick brown fox");
        assert_eq!(controller.submit_answer().await.unwrap().score, 1.0);

        let advance = controller.next().await.unwrap();
        assert!(matches!(advance, Advance::AllModulesComplete { .. }));
        assert_eq!(controller.phase().await, SessionPhase::Submitted);

        let results = ctx.store.results().await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].total_score, 3.0);
        assert_eq!(results[0].submit_reason, SubmitReason::AllModulesComplete);
        assert_eq!(controller.result().await.map(|r| r.id), Some(results[0].id.clone()));
        assert_eq!(ctx.store.progress_records().await[0].status, ProgressStatus::Completed);

        let events = drain(&mut events);
        let ready = events
            .iter()
            .filter(|event| matches!(event, SessionEvent::ResultsReady { .. }))
            .count();
        assert_eq!(ready, 1);
        assert!(events.contains(&SessionEvent::ModuleCompleted {
            module: ModuleKey::Aptitude,
            score: 2.0,
            next: Some(ModuleKey::ReadingSpeaking),
        }));

        assert!(matches!(
            controller.finalize(SubmitReason::Manual).await,
            Err(ExamError::AlreadySubmitted)
        ));
        assert!(matches!(controller.select_option(0).await, Err(ExamError::AlreadySubmitted)));
        assert_eq!(ctx.devices.active_streams(), 0);
    }

    #[tokio::test]
    async fn finished_attempt_blocks_a_retake() {
        let ctx = TestContext::new(test_support::two_module_test()).await;
        let controller = ctx.started("T-100").await;
        controller.finalize(SubmitReason::Manual).await.unwrap();

        let err = load_error(&ctx, "T-100").await;
        assert!(matches!(err, ExamError::AlreadyCompleted));
        assert_eq!(err.to_string(), "you have already completed this test");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_submissions_store_one_result() {
        let ctx = TestContext::new(test_support::two_module_test()).await;
        let controller = ctx.started("T-100").await;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let controller = controller.clone();
                tokio::spawn(async move { controller.finalize(SubmitReason::Manual).await })
            })
            .collect();

        let mut stored = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => stored += 1,
                Err(err) => assert!(matches!(err, ExamError::AlreadySubmitted)),
            }
        }
        assert_eq!(stored, 1);
        assert_eq!(ctx.store.results().await.len(), 1);
    }

    #[tokio::test]
    async fn third_fullscreen_exit_forces_submission() {
        let ctx = TestContext::new(test_support::two_module_test()).await;
        let controller = ctx.started("T-100").await;
        let mut events = controller.subscribe();
        let exit = IntegrityEvent::FullscreenChanged { is_fullscreen: false };

        for count in 1..=2 {
            ctx.fullscreen.leave();
            let verdict = controller.handle_integrity_event(exit).await;
            assert!(matches!(verdict, IntegrityVerdict::Warning { count: c, .. } if c == count));
        }
        assert_eq!(ctx.fullscreen.requests(), 3);

        let verdict = controller.handle_integrity_event(exit).await;
        assert!(matches!(verdict, IntegrityVerdict::ForceSubmit(_)));
        assert_eq!(controller.phase().await, SessionPhase::Submitted);

        let results = ctx.store.results().await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].fullscreen_violations, 3);
        assert_eq!(
            results[0].submit_reason,
            SubmitReason::IntegrityViolation("exited fullscreen 3 times".to_string())
        );

        let events = drain(&mut events);
        assert!(matches!(events[0], SessionEvent::IntegrityWarning { count: 1, limit: 3, .. }));
        assert!(events.iter().any(|event| matches!(event, SessionEvent::ForcedSubmission { .. })));
        assert_eq!(
            controller.handle_integrity_event(exit).await,
            IntegrityVerdict::Ignored
        );
    }

    #[tokio::test]
    async fn failed_submission_retries_the_same_result() {
        let ctx = TestContext::new(test_support::two_module_test()).await;
        let controller = ctx.started("T-100").await;
        controller.select_option(1).await.unwrap();
        controller.submit_answer().await.unwrap();
        assert!(ctx.devices.active_streams() > 0);

        ctx.store.set_result_writes_failing(true);
        assert!(matches!(
            controller.finalize(SubmitReason::Manual).await,
            Err(ExamError::SubmissionFailed)
        ));
        assert_eq!(controller.phase().await, SessionPhase::SubmissionFailed);
        assert_eq!(ctx.devices.active_streams(), 0);
        assert!(controller.result().await.is_none());
        let prepared_id = controller
            .inner
            .state
            .lock()
            .await
            .prepared
            .as_ref()
            .map(|result| result.id.clone())
            .unwrap();

        assert!(matches!(
            controller.retry_submission().await,
            Err(ExamError::SubmissionFailed)
        ));
        ctx.store.set_result_writes_failing(false);
        let result = controller.retry_submission().await.unwrap();
        assert_eq!(result.id, prepared_id);
        assert_eq!(result.total_score, 1.0);
        assert_eq!(ctx.store.results().await.len(), 1);
        assert!(matches!(
            controller.retry_submission().await,
            Err(ExamError::AlreadySubmitted)
        ));
    }

    #[tokio::test]
    async fn retry_without_failure_is_rejected() {
        let ctx = TestContext::new(test_support::two_module_test()).await;
        let controller = ctx.started("T-100").await;
        assert!(matches!(
            controller.retry_submission().await,
            Err(ExamError::NoPendingSubmission)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_clock_submits_the_exam() {
        let ctx = TestContext::new(test_support::two_module_test()).await;
        let controller = ctx.started("T-100").await;
        controller.select_option(1).await.unwrap();
        controller.submit_answer().await.unwrap();

        tokio::time::sleep(Duration::from_secs(31 * 60)).await;

        let results = ctx.store.results().await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].submit_reason, SubmitReason::TimeExpired);
        assert_eq!(results[0].total_score, 1.0);
        assert_eq!(controller.phase().await, SessionPhase::Submitted);
    }

    #[tokio::test(start_paused = true)]
    async fn story_recording_stops_at_the_limit() {
        let ctx = TestContext::new(story_test()).await;
        let controller = ctx.started("T-300").await;

        ctx.recognizer
            .queue_utterance("my town is small and quiet with a river and two old bridges");
        controller.start_recording().await.unwrap();
        assert!(controller.view().await.draft.recording);

        tokio::time::sleep(ctx.settings.story_max_recording() + Duration::from_secs(1)).await;
        assert!(!controller.view().await.draft.recording);

        let submitted = controller.submit_answer().await.unwrap();
        assert_eq!(submitted.score, 0.1);
        assert_eq!(controller.capture_telemetry().word_count, 13);
    }

    #[tokio::test]
    async fn submitting_speech_needs_a_finished_recording() {
        let ctx = TestContext::new(story_test()).await;
        let controller = ctx.started("T-300").await;

        assert!(matches!(
            controller.submit_answer().await,
            Err(ExamError::Sequence(SequenceError::Incomplete(_)))
        ));
        assert!(matches!(
            controller.select_option(0).await,
            Err(ExamError::Sequence(SequenceError::WrongAnswerKind(ModuleKey::Storytelling)))
        ));
    }

    #[tokio::test]
    async fn prompts_play_only_in_listening_modules() {
        let ctx = TestContext::new(test_support::full_test()).await;
        let admin = SessionContext::new("admin@college.edu", "Admin", UserRole::Admin);
        let controller = ctx.load("T-200", admin).await;
        controller.run_setup().await.unwrap();
        controller.accept_guidelines(true).await;
        controller.start().await.unwrap();

        assert!(matches!(controller.play_prompt().await, Err(ExamError::NoPrompt)));

        controller.navigate_to_module(ModuleKey::ListeningRepeat).await.unwrap();
        controller.play_prompt().await.unwrap();
        let spoken = ctx.synthesizer.spoken();
        assert_eq!(spoken.last().map(String::as_str), Some("Please close the door"));

        ctx.synthesizer.set_failing(true);
        assert!(matches!(controller.play_prompt().await, Err(ExamError::Playback(_))));
    }

    #[tokio::test]
    async fn students_cannot_skip_ahead() {
        let ctx = TestContext::new(test_support::two_module_test()).await;
        let controller = ctx.started("T-100").await;

        let err = controller.navigate_to_module(ModuleKey::ReadingSpeaking).await.unwrap_err();
        assert!(matches!(
            err,
            ExamError::Sequence(SequenceError::Locked {
                target: ModuleKey::ReadingSpeaking,
                blocking: ModuleKey::Aptitude,
            })
        ));
        let view = controller.view().await;
        assert!(view.modules[0].unlocked);
        assert!(!view.modules[1].unlocked);
    }

    #[tokio::test]
    async fn heartbeat_stops_after_submission() {
        let ctx = TestContext::new(test_support::two_module_test()).await;
        let controller = ctx.started("T-100").await;

        assert!(controller.heartbeat().await);
        controller.finalize(SubmitReason::Manual).await.unwrap();
        assert!(!controller.heartbeat().await);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_task_refreshes_progress_until_submission() {
        let ctx = TestContext::new(test_support::two_module_test()).await;
        let controller = ctx.started("T-100").await;

        ctx.store.set_progress_writes_failing(true);
        controller.select_option(1).await.unwrap();
        controller.submit_answer().await.unwrap();
        ctx.store.set_progress_writes_failing(false);
        assert_eq!(ctx.store.progress_records().await[0].answered_questions, 0);

        tokio::time::sleep(ctx.settings.heartbeat_interval() + Duration::from_secs(1)).await;
        let record = ctx.store.progress_records().await.remove(0);
        assert_eq!(record.answered_questions, 1);
        assert_eq!(record.status, ProgressStatus::InProgress);

        controller.finalize(SubmitReason::Manual).await.unwrap();
        let completed = ctx.store.progress_records().await.remove(0);
        assert_eq!(completed.status, ProgressStatus::Completed);

        tokio::time::sleep(ctx.settings.heartbeat_interval() * 3).await;
        let later = ctx.store.progress_records().await.remove(0);
        assert_eq!(later.status, ProgressStatus::Completed);
        assert_eq!(later.last_updated, completed.last_updated);
    }

    #[tokio::test]
    async fn restarted_recording_must_finish_before_submitting() {
        let ctx = TestContext::new(test_support::two_module_test()).await;
        let controller = ctx.started("T-100").await;
        for option in [1, 0] {
            controller.select_option(option).await.unwrap();
            controller.submit_answer().await.unwrap();
            controller.next().await.unwrap();
        }

        ctx.recognizer.queue_utterance("completely wrong words");
        controller.start_recording().await.unwrap();
        controller.stop_recording().await.unwrap();

        ctx.recognizer.queue_utterance("The quick brown fox");
        controller.start_recording().await.unwrap();
        assert!(matches!(
            controller.submit_answer().await,
            Err(ExamError::Sequence(SequenceError::Incomplete(_)))
        ));
        assert!(!controller.view().await.draft.submitted);

        controller.stop_recording().await.unwrap();
        let submitted = controller.submit_answer().await.unwrap();
        assert_eq!(submitted.score, 1.0);
    }

    #[tokio::test]
    async fn blocked_recognition_surfaces_as_a_permission_error() {
        let ctx = TestContext::new(story_test()).await;
        let controller = ctx.started("T-300").await;

        ctx.recognizer.fail_next_start(RecognitionErrorKind::NotAllowed);
        controller.start_recording().await.unwrap();
        let err = controller.stop_recording().await.unwrap_err();
        assert!(err.is_permission());

        let err = controller.start_recording().await.unwrap_err();
        assert!(err.is_permission());
    }
}
