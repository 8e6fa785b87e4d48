use std::sync::Arc;

use serde_json::json;

use crate::api::session::{Collaborators, ExamSessionController};
use crate::core::config::ExamSettings;
use crate::core::context::SessionContext;
use crate::db::models::Test;
use crate::repositories::InMemoryStore;
use crate::services::simulated::{
    SimulatedDevices, SimulatedFullscreen, SimulatedRecognizer, SimulatedSynthesizer,
};

pub(crate) const STUDENT_EMAIL: &str = "student@college.edu";

/// Aptitude (two MCQs, answers 1 and 0) followed by one read-aloud prompt.
pub(crate) fn two_module_test() -> Test {
    serde_json::from_value(json!({
        "id": "T-100",
        "title": "Placement Screening",
        "duration": 30,
        "modules": {
            "aptitude": {
                "enabled": true,
                "questions": [
                    {
                        "type": "mcq",
                        "id": "apt-1",
                        "question": "Which number is even?",
                        "options": ["3", "4", "5"],
                        "correctAnswer": 1
                    },
                    {
                        "type": "mcq",
                        "id": "apt-2",
                        "question": "What is 10 / 2?",
                        "options": ["5", "2"],
                        "correctAnswer": 0
                    }
                ]
            },
            "readingSpeaking": {
                "enabled": true,
                "questions": [
                    {"type": "voicePrompt", "id": "rs-1", "text": "The quick brown fox"}
                ]
            },
            "storytelling": {"enabled": false, "questions": []}
        },
        "moduleOrder": ["aptitude", "storytelling", "readingSpeaking"]
    }))
    .expect("two module test")
}

/// One item in every module; the comprehension story carries two sub-questions.
pub(crate) fn full_test() -> Test {
    serde_json::from_value(json!({
        "id": "T-200",
        "title": "Communication Skills",
        "duration": 60,
        "modules": {
            "aptitude": {
                "enabled": true,
                "questions": [{
                    "type": "mcq", "id": "apt-1", "question": "2 + 2?",
                    "options": ["3", "4"], "correctAnswer": 1
                }]
            },
            "grammarMCQ": {
                "enabled": true,
                "questions": [{
                    "type": "mcq", "id": "gr-1", "question": "She ___ to school.",
                    "options": ["go", "goes"], "correctAnswer": 1
                }]
            },
            "readingSpeaking": {
                "enabled": true,
                "questions": [{"type": "voicePrompt", "id": "rs-1", "text": "Good morning"}]
            },
            "listeningRepeat": {
                "enabled": true,
                "questions": [{"type": "voicePrompt", "id": "lr-1", "text": "Please close the door"}]
            },
            "errorCorrection": {
                "enabled": true,
                "questions": [{"type": "voicePrompt", "id": "ec-1", "question": "He goes home"}]
            },
            "storytelling": {
                "enabled": true,
                "questions": [{"type": "storyPrompt", "id": "st-1", "question": "Describe your town"}]
            },
            "listeningComprehension": {
                "enabled": true,
                "questions": [{
                    "type": "comprehensionStory",
                    "id": "lc-1",
                    "story": "Tom went to the market to buy apples.",
                    "mcqs": [
                        {"question": "What did Tom buy?", "options": ["Oranges", "Apples"], "correctAnswer": 1},
                        {"question": "Where did Tom go?", "options": ["The park", "The market"], "correctAnswer": 1}
                    ]
                }]
            }
        },
        "moduleOrder": [
            "aptitude",
            "grammarMCQ",
            "readingSpeaking",
            "listeningRepeat",
            "errorCorrection",
            "storytelling",
            "listeningComprehension"
        ]
    }))
    .expect("full test")
}

pub(crate) struct TestContext {
    pub(crate) store: Arc<InMemoryStore>,
    pub(crate) devices: Arc<SimulatedDevices>,
    pub(crate) recognizer: Arc<SimulatedRecognizer>,
    pub(crate) synthesizer: Arc<SimulatedSynthesizer>,
    pub(crate) fullscreen: Arc<SimulatedFullscreen>,
    pub(crate) settings: ExamSettings,
}

impl TestContext {
    pub(crate) async fn new(test: Test) -> Self {
        Self::with_devices(test, SimulatedDevices::new()).await
    }

    pub(crate) async fn with_devices(test: Test, devices: SimulatedDevices) -> Self {
        let store = Arc::new(InMemoryStore::new());
        store.insert_test(test).await;
        Self {
            store,
            devices: Arc::new(devices),
            recognizer: Arc::new(SimulatedRecognizer::new()),
            synthesizer: Arc::new(SimulatedSynthesizer::new()),
            fullscreen: Arc::new(SimulatedFullscreen::new()),
            settings: ExamSettings { recognition_settle_millis: 200, ..ExamSettings::default() },
        }
    }

    pub(crate) fn collaborators(&self) -> Collaborators {
        Collaborators {
            store: self.store.clone(),
            devices: self.devices.clone(),
            recognizer: self.recognizer.clone(),
            synthesizer: self.synthesizer.clone(),
            fullscreen: self.fullscreen.clone(),
        }
    }

    pub(crate) async fn load(
        &self,
        test_id: &str,
        context: SessionContext,
    ) -> ExamSessionController {
        ExamSessionController::load(test_id, context, self.collaborators(), self.settings.clone())
            .await
            .expect("load session")
    }

    /// Loads `test_id` for the default student and runs equipment setup and start.
    pub(crate) async fn started(&self, test_id: &str) -> ExamSessionController {
        let controller = self.load(test_id, SessionContext::student(STUDENT_EMAIL)).await;
        controller.run_setup().await.expect("setup");
        controller.accept_guidelines(true).await;
        controller.start().await.expect("start");
        controller
    }
}
