//! Scripted stand-ins for the browser-side collaborators, used by the rehearsal runner and
//! the test suite.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::services::devices::{DeviceError, DeviceKind, MediaDevices, MediaStream};
use crate::services::integrity::{Fullscreen, FullscreenError};
use crate::services::speech::{
    RecognitionErrorKind, RecognitionEvent, RecognitionOptions, SpeechError, SpeechRecognizer,
    SpeechSynthesizer, VoiceHints,
};

const SIMULATED_CONFIDENCE: f32 = 0.92;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub struct SimulatedTrack {
    stopped: AtomicBool,
}

impl MediaStream for SimulatedTrack {
    fn is_active(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Grants every device unless told otherwise.
#[derive(Debug, Default)]
pub struct SimulatedDevices {
    denied: HashSet<DeviceKind>,
    issued: Mutex<Vec<Arc<SimulatedTrack>>>,
}

impl SimulatedDevices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny(mut self, kind: DeviceKind) -> Self {
        self.denied.insert(kind);
        self
    }

    /// Streams handed out so far that have not been stopped.
    pub fn active_streams(&self) -> usize {
        locked(&self.issued).iter().filter(|track| track.is_active()).count()
    }

    fn issue(&self, kind: DeviceKind) -> Result<Arc<dyn MediaStream>, DeviceError> {
        if self.denied.contains(&kind) {
            return Err(DeviceError::PermissionDenied(kind));
        }
        let track = Arc::new(SimulatedTrack::default());
        locked(&self.issued).push(track.clone());
        Ok(track)
    }
}

#[async_trait]
impl MediaDevices for SimulatedDevices {
    async fn request_camera(&self) -> Result<Arc<dyn MediaStream>, DeviceError> {
        self.issue(DeviceKind::Camera)
    }

    async fn request_microphone(&self) -> Result<Arc<dyn MediaStream>, DeviceError> {
        self.issue(DeviceKind::Microphone)
    }
}

#[derive(Default)]
struct RecognizerState {
    sender: Option<mpsc::Sender<RecognitionEvent>>,
    utterances: VecDeque<String>,
    fail_next_start: Option<RecognitionErrorKind>,
    starts: usize,
}

/// Replays queued utterances as recognition results.
///
/// Each `start` speaks the next queued utterance (an interim result followed by the final
/// one); `stop` ends the session with an `End` event.
#[derive(Default)]
pub struct SimulatedRecognizer {
    state: Mutex<RecognizerState>,
}

impl SimulatedRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_utterance(&self, text: impl Into<String>) {
        locked(&self.state).utterances.push_back(text.into());
    }

    /// The next `start` immediately reports `kind`.
    pub fn fail_next_start(&self, kind: RecognitionErrorKind) {
        locked(&self.state).fail_next_start = Some(kind);
    }

    /// Pushes an event to the running session. Returns false when nothing is listening.
    pub fn emit(&self, event: RecognitionEvent) -> bool {
        let sender = locked(&self.state).sender.clone();
        sender.is_some_and(|sender| sender.try_send(event).is_ok())
    }

    pub fn starts(&self) -> usize {
        locked(&self.state).starts
    }
}

#[async_trait]
impl SpeechRecognizer for SimulatedRecognizer {
    async fn start(
        &self,
        _options: RecognitionOptions,
        events: mpsc::Sender<RecognitionEvent>,
    ) -> Result<(), SpeechError> {
        let (failure, utterance) = {
            let mut state = locked(&self.state);
            state.starts += 1;
            state.sender = Some(events.clone());
            (state.fail_next_start.take(), state.utterances.pop_front())
        };

        if let Some(kind) = failure {
            let _ = events.try_send(RecognitionEvent::Error(kind));
            return Ok(());
        }
        if let Some(text) = utterance {
            let words: Vec<&str> = text.split_whitespace().collect();
            let partial = words[..words.len().div_ceil(2)].join(" ");
            let _ = events.try_send(RecognitionEvent::Result {
                transcript: partial,
                is_final: false,
                confidence: 0.4,
            });
            let _ = events.try_send(RecognitionEvent::Result {
                transcript: text,
                is_final: true,
                confidence: SIMULATED_CONFIDENCE,
            });
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), SpeechError> {
        if let Some(sender) = locked(&self.state).sender.take() {
            let _ = sender.try_send(RecognitionEvent::End);
        }
        Ok(())
    }
}

/// Records what was spoken instead of playing it.
#[derive(Default)]
pub struct SimulatedSynthesizer {
    spoken: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl SimulatedSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn spoken(&self) -> Vec<String> {
        locked(&self.spoken).clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for SimulatedSynthesizer {
    async fn speak(&self, text: &str, _hints: &VoiceHints) -> Result<(), SpeechError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SpeechError::Unavailable("no audio output".to_string()));
        }
        locked(&self.spoken).push(text.to_string());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct SimulatedFullscreen {
    active: AtomicBool,
    requests: AtomicUsize,
}

impl SimulatedFullscreen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// What the shell sees when the student leaves fullscreen.
    pub fn leave(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Fullscreen for SimulatedFullscreen {
    async fn request_fullscreen(&self) -> Result<(), FullscreenError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn exit_fullscreen(&self) -> Result<(), FullscreenError> {
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_fullscreen(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}
