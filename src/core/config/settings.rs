use std::path::PathBuf;

use super::parsing::{
    env_optional, env_or_default, parse_bool, parse_environment, parse_language_tag,
    parse_positive_u32, parse_positive_u64,
};
use super::types::{
    ConfigError, ExamSettings, RehearsalSettings, RuntimeSettings, Settings, TelemetrySettings,
};

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let environment = parse_environment(
            env_optional("EXAMFLOW_ENV").or_else(|| env_optional("ENVIRONMENT")),
        );
        let strict_config =
            env_optional("EXAMFLOW_STRICT_CONFIG").map(|value| parse_bool(&value)).unwrap_or(false)
                || environment.is_production();

        let heartbeat_interval_seconds = parse_positive_u64(
            "HEARTBEAT_INTERVAL_SECONDS",
            env_or_default("HEARTBEAT_INTERVAL_SECONDS", "10"),
        )?;
        let fullscreen_violation_limit = parse_positive_u32(
            "FULLSCREEN_VIOLATION_LIMIT",
            env_or_default("FULLSCREEN_VIOLATION_LIMIT", "3"),
        )?;
        let esc_press_limit =
            parse_positive_u32("ESC_PRESS_LIMIT", env_or_default("ESC_PRESS_LIMIT", "3"))?;
        let esc_window_seconds =
            parse_positive_u64("ESC_WINDOW_SECONDS", env_or_default("ESC_WINDOW_SECONDS", "3"))?;
        let speech_language =
            parse_language_tag("SPEECH_LANGUAGE", env_or_default("SPEECH_LANGUAGE", "en-US"))?;
        let recognition_settle_millis = parse_positive_u64(
            "RECOGNITION_SETTLE_MILLIS",
            env_or_default("RECOGNITION_SETTLE_MILLIS", "1500"),
        )?;
        let story_max_recording_seconds = parse_positive_u64(
            "STORY_MAX_RECORDING_SECONDS",
            env_or_default("STORY_MAX_RECORDING_SECONDS", "180"),
        )?;
        let progress_push_timeout_seconds = parse_positive_u64(
            "PROGRESS_PUSH_TIMEOUT_SECONDS",
            env_or_default("PROGRESS_PUSH_TIMEOUT_SECONDS", "5"),
        )?;

        let test_file = env_optional("REHEARSAL_TEST_FILE").map(PathBuf::from);
        let script_file = env_optional("REHEARSAL_SCRIPT_FILE").map(PathBuf::from);
        let student_email = env_or_default("REHEARSAL_STUDENT_EMAIL", "rehearsal@example.com");

        let log_level = env_or_default("EXAMFLOW_LOG_LEVEL", "info");
        let json =
            env_optional("EXAMFLOW_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            runtime: RuntimeSettings { environment, strict_config },
            exam: ExamSettings {
                heartbeat_interval_seconds,
                fullscreen_violation_limit,
                esc_press_limit,
                esc_window_seconds,
                speech_language,
                recognition_settle_millis,
                story_max_recording_seconds,
                progress_push_timeout_seconds,
            },
            rehearsal: RehearsalSettings { test_file, script_file, student_email },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn exam(&self) -> &ExamSettings {
        &self.exam
    }

    pub fn rehearsal(&self) -> &RehearsalSettings {
        &self.rehearsal
    }

    pub fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.rehearsal.student_email.contains('@') {
            return Err(ConfigError::InvalidValue {
                field: "REHEARSAL_STUDENT_EMAIL",
                value: self.rehearsal.student_email.clone(),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        let test_file =
            self.rehearsal.test_file.as_ref().ok_or(ConfigError::Missing("REHEARSAL_TEST_FILE"))?;
        if !test_file.is_file() {
            return Err(ConfigError::InvalidValue {
                field: "REHEARSAL_TEST_FILE",
                value: test_file.display().to_string(),
            });
        }

        let script_file = self
            .rehearsal
            .script_file
            .as_ref()
            .ok_or(ConfigError::Missing("REHEARSAL_SCRIPT_FILE"))?;
        if !script_file.is_file() {
            return Err(ConfigError::InvalidValue {
                field: "REHEARSAL_SCRIPT_FILE",
                value: script_file.display().to_string(),
            });
        }

        Ok(())
    }
}
