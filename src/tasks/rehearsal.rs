//! Scripted end-to-end run of one exam session against the simulated collaborators.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;

use crate::api::session::{Collaborators, ExamSessionController};
use crate::core::config::ExamSettings;
use crate::core::context::SessionContext;
use crate::db::models::{ExamResult, Test};
use crate::db::types::ModuleKind;
use crate::repositories::InMemoryStore;
use crate::schemas::rehearsal::{RehearsalScript, ScriptedAnswer};
use crate::schemas::session::SessionPhase;
use crate::services::integrity::IntegrityEvent;
use crate::services::simulated::{
    SimulatedDevices, SimulatedFullscreen, SimulatedRecognizer, SimulatedSynthesizer,
};

pub(crate) async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Sits the whole exam with the answers in `script` and returns the stored result.
///
/// Unscripted multiple-choice questions get the first option; unscripted spoken questions
/// get an empty recording.
pub(crate) async fn rehearse(
    test: Test,
    script: &RehearsalScript,
    settings: ExamSettings,
    default_email: &str,
) -> Result<ExamResult> {
    let test_id = test.id.clone();
    let email = script.student_email.as_deref().unwrap_or(default_email);

    let store = Arc::new(InMemoryStore::new());
    store.insert_test(test).await;
    let recognizer = Arc::new(SimulatedRecognizer::new());
    let fullscreen = Arc::new(SimulatedFullscreen::new());
    let collaborators = Collaborators {
        store: store.clone(),
        devices: Arc::new(SimulatedDevices::new()),
        recognizer: recognizer.clone(),
        synthesizer: Arc::new(SimulatedSynthesizer::new()),
        fullscreen: fullscreen.clone(),
    };

    let controller = ExamSessionController::load(
        &test_id,
        SessionContext::student(email),
        collaborators,
        settings,
    )
    .await
    .context("Failed to open the exam session")?;
    controller.run_setup().await.context("Equipment setup failed")?;
    controller.accept_guidelines(true).await;
    controller.start().await.context("Failed to start the exam")?;

    for _ in 0..script.fullscreen_exits {
        fullscreen.leave();
        controller
            .handle_integrity_event(IntegrityEvent::FullscreenChanged { is_fullscreen: false })
            .await;
    }

    while controller.phase().await == SessionPhase::Active {
        let view = controller.view().await;
        let (Some(position), Some(question_id)) = (view.cursor, view.current_question_id) else {
            break;
        };
        let scripted = script.answers.get(&question_id);

        if position.module.kind() == ModuleKind::Mcq {
            let option = match scripted {
                Some(ScriptedAnswer::Option { option }) => *option,
                _ => {
                    tracing::warn!(question_id = %question_id, "No scripted option; choosing 0");
                    0
                }
            };
            controller.select_option(option).await?;
        } else {
            match scripted.and_then(|answer| answer.utterance(position.sub_index)) {
                Some(utterance) => recognizer.queue_utterance(utterance),
                None => tracing::warn!(question_id = %question_id, "No scripted speech"),
            }
            controller.start_recording().await?;
            controller.stop_recording().await?;
        }

        controller.submit_answer().await?;
        controller.next().await?;
    }

    match controller.phase().await {
        SessionPhase::Submitted => {}
        SessionPhase::SubmissionFailed => bail!("the exam result could not be stored"),
        phase => bail!("rehearsal stopped in phase {phase:?}"),
    }
    controller.result().await.context("Submitted session has no result")
}
