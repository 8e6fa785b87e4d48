use std::fmt;

use thiserror::Error;

use crate::services::devices::{DeviceError, MediaSession};
use crate::services::speech::{SpeechSynthesizer, VoiceHints};

pub const AUDIO_SAMPLE: &str =
    "This is a sound check. If you can hear this sentence clearly, your speakers are working.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStep {
    Camera,
    Audio,
    Microphone,
}

impl SetupStep {
    fn prerequisite(self) -> Option<SetupStep> {
        match self {
            SetupStep::Camera => None,
            SetupStep::Audio => Some(SetupStep::Camera),
            SetupStep::Microphone => Some(SetupStep::Audio),
        }
    }
}

impl fmt::Display for SetupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SetupStep::Camera => "camera check",
            SetupStep::Audio => "audio check",
            SetupStep::Microphone => "microphone check",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Pending,
    Success,
    Failed(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SetupError {
    #[error("finish the {requires} before the {step}")]
    Locked { step: SetupStep, requires: SetupStep },
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("audio playback failed: {0}")]
    Audio(String),
}

/// Gate in front of the exam: camera, then audio, then microphone, plus the guidelines.
#[derive(Debug, Clone)]
pub struct EquipmentSetup {
    camera: StepStatus,
    audio: StepStatus,
    microphone: StepStatus,
    guidelines_accepted: bool,
}

impl Default for EquipmentSetup {
    fn default() -> Self {
        Self {
            camera: StepStatus::Pending,
            audio: StepStatus::Pending,
            microphone: StepStatus::Pending,
            guidelines_accepted: false,
        }
    }
}

impl EquipmentSetup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, step: SetupStep) -> &StepStatus {
        match step {
            SetupStep::Camera => &self.camera,
            SetupStep::Audio => &self.audio,
            SetupStep::Microphone => &self.microphone,
        }
    }

    fn slot(&mut self, step: SetupStep) -> &mut StepStatus {
        match step {
            SetupStep::Camera => &mut self.camera,
            SetupStep::Audio => &mut self.audio,
            SetupStep::Microphone => &mut self.microphone,
        }
    }

    pub fn is_unlocked(&self, step: SetupStep) -> bool {
        step.prerequisite().map_or(true, |before| *self.status(before) == StepStatus::Success)
    }

    fn ensure_unlocked(&self, step: SetupStep) -> Result<(), SetupError> {
        match step.prerequisite() {
            Some(requires) if !self.is_unlocked(step) => Err(SetupError::Locked { step, requires }),
            _ => Ok(()),
        }
    }

    fn record(
        &mut self,
        step: SetupStep,
        outcome: Result<(), SetupError>,
    ) -> Result<(), SetupError> {
        *self.slot(step) = match &outcome {
            Ok(()) => StepStatus::Success,
            Err(err) => StepStatus::Failed(err.to_string()),
        };
        match &outcome {
            Ok(()) => tracing::info!(step = %step, "Equipment check passed"),
            Err(err) => tracing::warn!(step = %step, error = %err, "Equipment check failed"),
        }
        outcome
    }

    pub async fn check_camera(&mut self, media: &MediaSession) -> Result<(), SetupError> {
        self.ensure_unlocked(SetupStep::Camera)?;
        let outcome = media.camera().await.map(|_| ()).map_err(SetupError::from);
        self.record(SetupStep::Camera, outcome)
    }

    /// Plays the sample sentence; succeeds once playback finishes.
    pub async fn check_audio(
        &mut self,
        synthesizer: &dyn SpeechSynthesizer,
        hints: &VoiceHints,
    ) -> Result<(), SetupError> {
        self.ensure_unlocked(SetupStep::Audio)?;
        let outcome = synthesizer
            .speak(AUDIO_SAMPLE, hints)
            .await
            .map_err(|err| SetupError::Audio(err.to_string()));
        self.record(SetupStep::Audio, outcome)
    }

    pub async fn check_microphone(&mut self, media: &MediaSession) -> Result<(), SetupError> {
        self.ensure_unlocked(SetupStep::Microphone)?;
        let outcome = media.microphone().await.map(|_| ()).map_err(SetupError::from);
        self.record(SetupStep::Microphone, outcome)
    }

    pub fn accept_guidelines(&mut self, accepted: bool) {
        self.guidelines_accepted = accepted;
    }

    pub fn guidelines_accepted(&self) -> bool {
        self.guidelines_accepted
    }

    pub fn is_complete(&self) -> bool {
        self.guidelines_accepted
            && [&self.camera, &self.audio, &self.microphone]
                .iter()
                .all(|status| **status == StepStatus::Success)
    }
}
