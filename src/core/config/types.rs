use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Settings {
    pub(super) runtime: RuntimeSettings,
    pub(super) exam: ExamSettings,
    pub(super) rehearsal: RehearsalSettings,
    pub(super) telemetry: TelemetrySettings,
}

/// Tunables of the exam-taking core.
#[derive(Debug, Clone)]
pub struct ExamSettings {
    pub heartbeat_interval_seconds: u64,
    pub fullscreen_violation_limit: u32,
    pub esc_press_limit: u32,
    pub esc_window_seconds: u64,
    pub speech_language: String,
    pub recognition_settle_millis: u64,
    pub story_max_recording_seconds: u64,
    pub progress_push_timeout_seconds: u64,
}

impl Default for ExamSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_seconds: 10,
            fullscreen_violation_limit: 3,
            esc_press_limit: 3,
            esc_window_seconds: 3,
            speech_language: "en-US".to_string(),
            recognition_settle_millis: 1500,
            story_max_recording_seconds: 180,
            progress_push_timeout_seconds: 5,
        }
    }
}

impl ExamSettings {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    pub fn esc_window(&self) -> Duration {
        Duration::from_secs(self.esc_window_seconds)
    }

    pub fn recognition_settle(&self) -> Duration {
        Duration::from_millis(self.recognition_settle_millis)
    }

    pub fn story_max_recording(&self) -> Duration {
        Duration::from_secs(self.story_max_recording_seconds)
    }

    pub fn progress_push_timeout(&self) -> Duration {
        Duration::from_secs(self.progress_push_timeout_seconds)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RehearsalSettings {
    pub test_file: Option<PathBuf>,
    pub script_file: Option<PathBuf>,
    pub student_email: String,
}

#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    pub log_level: String,
    pub json: bool,
    pub prometheus_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub environment: Environment,
    pub strict_config: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Staging,
    Test,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Staging => "staging",
            Environment::Test => "test",
        }
    }

    pub(super) fn is_production(self) -> bool {
        matches!(self, Environment::Production)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
    #[error("missing required setting {0}")]
    Missing(&'static str),
}
