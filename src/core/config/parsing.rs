use std::env;

use super::types::{ConfigError, Environment};

pub(super) fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

pub(super) fn env_or_default(key: &str, default: &str) -> String {
    env_optional(key).unwrap_or_else(|| default.to_string())
}

pub(super) fn parse_u32(field: &'static str, value: String) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidValue { field, value })
}

pub(super) fn parse_u64(field: &'static str, value: String) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidValue { field, value })
}

/// Like [`parse_u64`] but rejects zero, for intervals and thresholds.
pub(super) fn parse_positive_u64(field: &'static str, value: String) -> Result<u64, ConfigError> {
    match parse_u64(field, value)? {
        0 => Err(ConfigError::InvalidValue { field, value: "0".to_string() }),
        parsed => Ok(parsed),
    }
}

pub(super) fn parse_positive_u32(field: &'static str, value: String) -> Result<u32, ConfigError> {
    match parse_u32(field, value)? {
        0 => Err(ConfigError::InvalidValue { field, value: "0".to_string() }),
        parsed => Ok(parsed),
    }
}

pub(super) fn parse_language_tag(
    field: &'static str,
    value: String,
) -> Result<String, ConfigError> {
    let valid = value
        .split('-')
        .all(|part| !part.is_empty() && part.chars().all(|ch| ch.is_ascii_alphanumeric()));
    if valid {
        Ok(value)
    } else {
        Err(ConfigError::InvalidValue { field, value })
    }
}

pub(super) fn parse_bool(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "yes" | "YES" | "on" | "ON")
}

pub(super) fn parse_environment(value: Option<String>) -> Environment {
    let normalized = value.unwrap_or_default().to_ascii_lowercase();
    match normalized.as_str() {
        "prod" | "production" => Environment::Production,
        "stage" | "staging" => Environment::Staging,
        "test" | "testing" => Environment::Test,
        _ => Environment::Development,
    }
}
