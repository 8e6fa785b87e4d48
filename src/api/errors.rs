use thiserror::Error;

use crate::db::models::DefinitionError;
use crate::services::devices::DeviceError;
use crate::services::equipment_setup::SetupError;
use crate::services::module_sequencer::SequenceError;
use crate::services::voice_capture::CaptureError;

#[derive(Debug, Error)]
pub enum ExamError {
    /// A device or speech permission is missing. Blocking until the student fixes it.
    #[error("{0}")]
    Permission(String),
    #[error("test {0} was not found")]
    NotFound(String),
    #[error("you have already completed this test")]
    AlreadyCompleted,
    #[error("this test has not started yet; it opens at {0}")]
    NotYetOpen(String),
    #[error("this test has ended")]
    Closed,
    #[error(transparent)]
    InvalidTest(#[from] DefinitionError),
    #[error(transparent)]
    Setup(SetupError),
    #[error("finish the equipment setup and accept the guidelines first")]
    SetupIncomplete,
    #[error("the exam has not started")]
    NotStarted,
    #[error("the exam is already in progress")]
    AlreadyStarted,
    #[error("the exam was already submitted")]
    AlreadySubmitted,
    #[error("there is no failed submission to retry")]
    NoPendingSubmission,
    #[error("submitting your answers failed; retry the submission")]
    SubmissionFailed,
    #[error("the current question has nothing to play")]
    NoPrompt,
    #[error("audio playback failed: {0}")]
    Playback(String),
    #[error(transparent)]
    Sequence(#[from] SequenceError),
    #[error(transparent)]
    Capture(CaptureError),
    #[error("{0}")]
    Internal(String),
}

impl ExamError {
    /// Log the underlying error with context and return an `Internal` variant.
    pub(crate) fn internal(err: impl std::fmt::Display, context: &str) -> Self {
        tracing::error!(error = %err, "{context}");
        Self::Internal(context.to_string())
    }

    pub fn is_permission(&self) -> bool {
        matches!(self, ExamError::Permission(_))
    }
}

fn permission_message(err: &DeviceError) -> Option<String> {
    match err {
        DeviceError::PermissionDenied(kind) => {
            Some(format!("Access to the {kind} was denied. Allow it in the browser and retry."))
        }
        DeviceError::NotFound(kind) => {
            Some(format!("No {kind} was found. Connect one and retry."))
        }
        DeviceError::Unavailable { .. } => None,
    }
}

impl From<CaptureError> for ExamError {
    fn from(err: CaptureError) -> Self {
        match &err {
            CaptureError::Device(device) => match permission_message(device) {
                Some(message) => ExamError::Permission(message),
                None => ExamError::Capture(err),
            },
            CaptureError::RecognitionBlocked(_) => ExamError::Permission(err.to_string()),
            CaptureError::Engine(_) => ExamError::Capture(err),
        }
    }
}

impl From<SetupError> for ExamError {
    fn from(err: SetupError) -> Self {
        match &err {
            SetupError::Device(device) => match permission_message(device) {
                Some(message) => ExamError::Permission(message),
                None => ExamError::Setup(err),
            },
            _ => ExamError::Setup(err),
        }
    }
}
