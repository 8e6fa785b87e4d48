use std::collections::BTreeMap;

use serde::Deserialize;
use validator::Validate;

/// Answers played back by the rehearsal runner, keyed by question id.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RehearsalScript {
    #[serde(default)]
    #[validate(email(message = "studentEmail must be an email address"))]
    pub student_email: Option<String>,
    #[serde(default)]
    pub answers: BTreeMap<String, ScriptedAnswer>,
    /// Fullscreen exits simulated right after the exam starts.
    #[serde(default)]
    #[validate(range(max = 10, message = "fullscreenExits must be at most 10"))]
    pub fullscreen_exits: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ScriptedAnswer {
    Option { option: usize },
    /// One utterance per recording; comprehension stories use one per sub-question.
    Speech { speech: Vec<String> },
}

impl ScriptedAnswer {
    pub fn utterance(&self, sub_index: Option<usize>) -> Option<&str> {
        match self {
            ScriptedAnswer::Option { .. } => None,
            ScriptedAnswer::Speech { speech } => {
                speech.get(sub_index.unwrap_or(0)).map(String::as_str)
            }
        }
    }
}
