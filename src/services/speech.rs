//! Seams to the speech-to-text and text-to-speech engines.
//!
//! Engines report through a typed event channel instead of callbacks. The capture session
//! owns the receiving half and pumps it on a spawned task.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Options handed to the recognizer on every `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionOptions {
    pub language: String,
    pub continuous: bool,
    pub interim_results: bool,
}

impl RecognitionOptions {
    pub fn continuous(language: impl Into<String>) -> Self {
        Self { language: language.into(), continuous: true, interim_results: true }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    Result { transcript: String, is_final: bool, confidence: f32 },
    Error(RecognitionErrorKind),
    /// The engine ended the recognition session.
    End,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionErrorKind {
    NotAllowed,
    ServiceNotAllowed,
    AudioCapture,
    NoSpeech,
    Network,
    Aborted,
    Other(String),
}

impl RecognitionErrorKind {
    /// Parses the engine's error code (`"not-allowed"`, `"no-speech"` and so on).
    pub fn from_code(code: &str) -> Self {
        match code {
            "not-allowed" => Self::NotAllowed,
            "service-not-allowed" => Self::ServiceNotAllowed,
            "audio-capture" => Self::AudioCapture,
            "no-speech" => Self::NoSpeech,
            "network" => Self::Network,
            "aborted" => Self::Aborted,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Self::NotAllowed => "not-allowed",
            Self::ServiceNotAllowed => "service-not-allowed",
            Self::AudioCapture => "audio-capture",
            Self::NoSpeech => "no-speech",
            Self::Network => "network",
            Self::Aborted => "aborted",
            Self::Other(code) => code,
        }
    }

    /// Permission and device failures end the attempt; everything else is retried silently.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::NotAllowed | Self::ServiceNotAllowed | Self::AudioCapture)
    }
}

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("speech engine unavailable: {0}")]
    Unavailable(String),
    #[error("speech engine failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn start(
        &self,
        options: RecognitionOptions,
        events: mpsc::Sender<RecognitionEvent>,
    ) -> Result<(), SpeechError>;

    async fn stop(&self) -> Result<(), SpeechError>;
}

/// Preferences for picking a synthesizer voice. Engines may ignore any of them.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceHints {
    pub language: String,
    pub rate: f32,
    pub pitch: f32,
    pub preferred_voices: Vec<String>,
}

impl VoiceHints {
    pub fn for_language(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            rate: 0.9,
            pitch: 1.0,
            preferred_voices: vec!["Google US English".to_string(), "Samantha".to_string()],
        }
    }
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Resolves once the utterance has finished playing.
    async fn speak(&self, text: &str, hints: &VoiceHints) -> Result<(), SpeechError>;
}
