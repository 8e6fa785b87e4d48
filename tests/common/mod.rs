#![allow(dead_code)]

use std::sync::Arc;

use examflow::core::config::ExamSettings;
use examflow::core::context::SessionContext;
use examflow::db::models::Test;
use examflow::repositories::InMemoryStore;
use examflow::services::simulated::{
    SimulatedDevices, SimulatedFullscreen, SimulatedRecognizer, SimulatedSynthesizer,
};
use examflow::{Collaborators, ExamSessionController};
use serde_json::json;

pub const STUDENT: &str = "learner@college.edu";

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub recognizer: Arc<SimulatedRecognizer>,
    pub fullscreen: Arc<SimulatedFullscreen>,
    pub devices: Arc<SimulatedDevices>,
    pub settings: ExamSettings,
}

impl Harness {
    pub async fn with_test(test: Test) -> Self {
        let store = Arc::new(InMemoryStore::new());
        store.insert_test(test).await;
        Self {
            store,
            recognizer: Arc::new(SimulatedRecognizer::new()),
            fullscreen: Arc::new(SimulatedFullscreen::new()),
            devices: Arc::new(SimulatedDevices::new()),
            settings: ExamSettings { recognition_settle_millis: 100, ..ExamSettings::default() },
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            store: self.store.clone(),
            devices: self.devices.clone(),
            recognizer: self.recognizer.clone(),
            synthesizer: Arc::new(SimulatedSynthesizer::new()),
            fullscreen: self.fullscreen.clone(),
        }
    }

    pub async fn open(&self, test_id: &str) -> Result<ExamSessionController, examflow::ExamError> {
        ExamSessionController::load(
            test_id,
            SessionContext::student(STUDENT),
            self.collaborators(),
            self.settings.clone(),
        )
        .await
    }

    pub async fn begin(&self, test_id: &str) -> ExamSessionController {
        let Ok(controller) = self.open(test_id).await else {
            panic!("{test_id} should load");
        };
        controller.run_setup().await.expect("equipment setup");
        controller.accept_guidelines(true).await;
        controller.start().await.expect("start");
        controller
    }
}

/// Grammar MCQ, then a listening-repeat prompt, then a comprehension story with two parts.
pub fn listening_test() -> Test {
    serde_json::from_value(json!({
        "id": "L-1",
        "title": "Listening Check",
        "duration": 45,
        "modules": {
            "grammarMCQ": {
                "enabled": true,
                "questions": [{
                    "type": "mcq", "id": "g-1", "question": "They ___ here.",
                    "options": ["is", "are"], "correctAnswer": 1
                }]
            },
            "listeningRepeat": {
                "enabled": true,
                "questions": [{"type": "voicePrompt", "id": "r-1", "text": "See you tomorrow"}]
            },
            "listeningComprehension": {
                "enabled": true,
                "questions": [{
                    "type": "comprehensionStory",
                    "id": "c-1",
                    "story": "Ana took the train to work on Monday.",
                    "mcqs": [
                        {
                            "question": "How did Ana travel?",
                            "options": ["Bus", "Train"],
                            "correctAnswer": 1
                        },
                        {
                            "question": "Which day?",
                            "options": ["Monday", "Friday"],
                            "correctAnswer": 0
                        }
                    ]
                }]
            },
            "aptitude": {"enabled": true, "questions": []}
        },
        "moduleOrder": ["grammarMCQ", "aptitude", "listeningRepeat", "listeningComprehension"]
    }))
    .expect("listening test")
}
