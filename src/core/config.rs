mod parsing;
mod settings;
mod types;

pub use types::{
    ConfigError, Environment, ExamSettings, RehearsalSettings, RuntimeSettings, Settings,
    TelemetrySettings,
};

#[cfg(test)]
mod tests {
    use std::sync::{Mutex, OnceLock};

    use super::*;

    const VARS: &[&str] = &[
        "EXAMFLOW_ENV",
        "ENVIRONMENT",
        "EXAMFLOW_STRICT_CONFIG",
        "HEARTBEAT_INTERVAL_SECONDS",
        "FULLSCREEN_VIOLATION_LIMIT",
        "ESC_PRESS_LIMIT",
        "ESC_WINDOW_SECONDS",
        "SPEECH_LANGUAGE",
        "RECOGNITION_SETTLE_MILLIS",
        "STORY_MAX_RECORDING_SECONDS",
        "PROGRESS_PUSH_TIMEOUT_SECONDS",
        "REHEARSAL_TEST_FILE",
        "REHEARSAL_SCRIPT_FILE",
        "REHEARSAL_STUDENT_EMAIL",
        "EXAMFLOW_LOG_LEVEL",
        "EXAMFLOW_LOG_JSON",
        "PROMETHEUS_ENABLED",
    ];

    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn defaults_match_exam_rules() {
        let _guard = env_lock();
        clear_env();

        let settings = Settings::load().expect("settings");
        let exam = settings.exam();
        assert_eq!(exam.heartbeat_interval_seconds, 10);
        assert_eq!(exam.fullscreen_violation_limit, 3);
        assert_eq!(exam.esc_press_limit, 3);
        assert_eq!(exam.esc_window_seconds, 3);
        assert_eq!(exam.speech_language, "en-US");
        assert_eq!(settings.runtime().environment, Environment::Development);
        assert!(!settings.telemetry().json);
    }

    #[test]
    fn overrides_are_applied() {
        let _guard = env_lock();
        clear_env();
        std::env::set_var("HEARTBEAT_INTERVAL_SECONDS", "30");
        std::env::set_var("ESC_PRESS_LIMIT", "5");
        std::env::set_var("EXAMFLOW_LOG_JSON", "yes");

        let settings = Settings::load().expect("settings");
        assert_eq!(settings.exam().heartbeat_interval_seconds, 30);
        assert_eq!(settings.exam().esc_press_limit, 5);
        assert!(settings.telemetry().json);
        clear_env();
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let _guard = env_lock();
        clear_env();
        std::env::set_var("FULLSCREEN_VIOLATION_LIMIT", "0");

        let err = Settings::load().expect_err("zero limit");
        assert!(matches!(
            err,
            ConfigError::InvalidValue { field: "FULLSCREEN_VIOLATION_LIMIT", .. }
        ));
        clear_env();
    }

    #[test]
    fn strict_mode_requires_rehearsal_files() {
        let _guard = env_lock();
        clear_env();
        std::env::set_var("EXAMFLOW_STRICT_CONFIG", "1");

        let err = Settings::load().expect_err("missing files");
        assert!(matches!(err, ConfigError::Missing("REHEARSAL_TEST_FILE")));
        clear_env();
    }
}
