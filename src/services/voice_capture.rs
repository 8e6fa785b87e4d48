//! Continuous speech capture for one exam session.
//!
//! A capture is either idle or listening. While listening, a spawned pump drains the
//! recognizer's event channel: final results are appended to the committed transcript,
//! interim results replace the interim buffer, transient engine errors are skipped and an
//! engine that ends on its own is restarted. Only the committed transcript is ever scored.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::services::devices::{DeviceError, MediaSession};
use crate::services::speech::{
    RecognitionErrorKind, RecognitionEvent, RecognitionOptions, SpeechRecognizer,
};

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// Start from an empty transcript.
    Replace,
    /// Keep what was already committed (storytelling resumes).
    Accumulate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Listening,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("speech recognition blocked ({0}); allow microphone access and reload")]
    RecognitionBlocked(String),
    #[error("speech recognition failed to start: {0}")]
    Engine(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptSnapshot {
    pub state: CaptureState,
    pub committed: String,
    pub interim: String,
    pub recording_completed: bool,
}

/// Informational quality figures. Never used for scoring.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureTelemetry {
    pub average_confidence: Option<f32>,
    pub word_count: usize,
}

#[derive(Debug)]
struct CaptureBook {
    state: CaptureState,
    committed: String,
    interim: String,
    recording_completed: bool,
    confidences: Vec<f32>,
    failure: Option<CaptureError>,
}

impl CaptureBook {
    fn new() -> Self {
        Self {
            state: CaptureState::Idle,
            committed: String::new(),
            interim: String::new(),
            recording_completed: false,
            confidences: Vec::new(),
            failure: None,
        }
    }

    fn snapshot(&self) -> TranscriptSnapshot {
        TranscriptSnapshot {
            state: self.state,
            committed: self.committed.clone(),
            interim: self.interim.clone(),
            recording_completed: self.recording_completed,
        }
    }

    fn commit(&mut self, transcript: &str, confidence: f32) {
        let text = transcript.trim();
        if !text.is_empty() {
            if !self.committed.is_empty() {
                self.committed.push(' ');
            }
            self.committed.push_str(text);
        }
        self.interim.clear();
        self.confidences.push(confidence);
    }
}

#[derive(Clone)]
pub struct VoiceCapture {
    inner: Arc<CaptureInner>,
}

struct CaptureInner {
    recognizer: Arc<dyn SpeechRecognizer>,
    media: Arc<MediaSession>,
    options: RecognitionOptions,
    settle: Duration,
    book: Mutex<CaptureBook>,
    pump: Mutex<Option<JoinHandle<()>>>,
    limit: Mutex<Option<JoinHandle<()>>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl VoiceCapture {
    pub fn new(
        recognizer: Arc<dyn SpeechRecognizer>,
        media: Arc<MediaSession>,
        language: &str,
        settle: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(CaptureInner {
                recognizer,
                media,
                options: RecognitionOptions::continuous(language),
                settle,
                book: Mutex::new(CaptureBook::new()),
                pump: Mutex::new(None),
                limit: Mutex::new(None),
            }),
        }
    }

    /// Begins listening. `max_duration` arms a recording limit that stops the capture on its
    /// own. Starting while already listening is a no-op.
    pub async fn start(
        &self,
        mode: CaptureMode,
        max_duration: Option<Duration>,
    ) -> Result<(), CaptureError> {
        {
            let book = locked(&self.inner.book);
            if let Some(failure) = &book.failure {
                return Err(failure.clone());
            }
            if book.state == CaptureState::Listening {
                return Ok(());
            }
        }

        if let Err(err) = self.inner.media.microphone().await {
            let err = CaptureError::Device(err);
            locked(&self.inner.book).failure = Some(err.clone());
            return Err(err);
        }

        {
            let mut book = locked(&self.inner.book);
            if mode == CaptureMode::Replace {
                book.committed.clear();
                book.confidences.clear();
            }
            book.interim.clear();
            book.recording_completed = false;
            book.state = CaptureState::Listening;
        }

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        if let Err(err) = self.inner.recognizer.start(self.inner.options.clone(), tx.clone()).await
        {
            locked(&self.inner.book).state = CaptureState::Idle;
            return Err(CaptureError::Engine(err.to_string()));
        }

        let pump = tokio::spawn(self.clone().pump(rx, tx));
        if let Some(stale) = locked(&self.inner.pump).replace(pump) {
            stale.abort();
        }

        if let Some(limit) = max_duration {
            let capture = self.clone();
            let timer = tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                // Detach our own handle so `stop` does not abort this task.
                locked(&capture.inner.limit).take();
                tracing::info!(seconds = limit.as_secs(), "Recording limit reached");
                capture.stop().await;
            });
            if let Some(stale) = locked(&self.inner.limit).replace(timer) {
                stale.abort();
            }
        }

        tracing::debug!(?mode, "Voice capture listening");
        Ok(())
    }

    async fn pump(
        self,
        mut events: mpsc::Receiver<RecognitionEvent>,
        restart_tx: mpsc::Sender<RecognitionEvent>,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                RecognitionEvent::Result { transcript, is_final: true, confidence } => {
                    locked(&self.inner.book).commit(&transcript, confidence);
                }
                RecognitionEvent::Result { transcript, is_final: false, .. } => {
                    locked(&self.inner.book).interim = transcript;
                }
                RecognitionEvent::Error(kind) if kind.is_terminal() => {
                    tracing::warn!(code = kind.code(), "Speech recognition blocked");
                    self.fail(&kind);
                    if let Err(err) = self.inner.recognizer.stop().await {
                        tracing::debug!(error = %err, "Recognizer stop after failure failed");
                    }
                    break;
                }
                RecognitionEvent::Error(kind) => {
                    tracing::debug!(code = kind.code(), "Transient speech recognition error");
                }
                RecognitionEvent::End => {
                    let still_listening =
                        locked(&self.inner.book).state == CaptureState::Listening;
                    if !still_listening {
                        break;
                    }
                    tracing::debug!("Recognizer ended while listening; restarting");
                    let restarted = self
                        .inner
                        .recognizer
                        .start(self.inner.options.clone(), restart_tx.clone())
                        .await;
                    if let Err(err) = restarted {
                        tracing::warn!(error = %err, "Failed to restart speech recognition");
                        let mut book = locked(&self.inner.book);
                        book.state = CaptureState::Idle;
                        book.interim.clear();
                        book.failure = Some(CaptureError::Engine(err.to_string()));
                        break;
                    }
                }
            }
        }
    }

    fn fail(&self, kind: &RecognitionErrorKind) {
        let mut book = locked(&self.inner.book);
        book.state = CaptureState::Idle;
        book.interim.clear();
        book.failure = Some(CaptureError::RecognitionBlocked(kind.code().to_string()));
    }

    /// Stops listening and waits for late final results, bounded by the settle timeout.
    /// Returns the transcript with `recording_completed` set.
    pub async fn stop(&self) -> TranscriptSnapshot {
        if let Some(timer) = locked(&self.inner.limit).take() {
            timer.abort();
        }

        let was_listening = {
            let mut book = locked(&self.inner.book);
            let was_listening = book.state == CaptureState::Listening;
            book.state = CaptureState::Idle;
            was_listening
        };

        if was_listening {
            if let Err(err) = self.inner.recognizer.stop().await {
                tracing::debug!(error = %err, "Recognizer stop failed");
            }
        }

        let pump = locked(&self.inner.pump).take();
        if let Some(mut pump) = pump {
            if tokio::time::timeout(self.inner.settle, &mut pump).await.is_err() {
                tracing::debug!("Recognizer did not settle in time");
                pump.abort();
            }
        }

        let mut book = locked(&self.inner.book);
        if was_listening {
            book.recording_completed = true;
        }
        book.interim.clear();
        book.snapshot()
    }

    /// Drops the transcript and any recorded failure.
    pub async fn reset(&self) {
        self.stop().await;
        *locked(&self.inner.book) = CaptureBook::new();
    }

    pub fn transcript(&self) -> TranscriptSnapshot {
        locked(&self.inner.book).snapshot()
    }

    pub fn state(&self) -> CaptureState {
        locked(&self.inner.book).state
    }

    pub fn failure(&self) -> Option<CaptureError> {
        locked(&self.inner.book).failure.clone()
    }

    pub fn telemetry(&self) -> CaptureTelemetry {
        let book = locked(&self.inner.book);
        let average_confidence = if book.confidences.is_empty() {
            None
        } else {
            Some(book.confidences.iter().sum::<f32>() / book.confidences.len() as f32)
        };
        CaptureTelemetry {
            average_confidence,
            word_count: book.committed.split_whitespace().count(),
        }
    }
}
