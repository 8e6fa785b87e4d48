use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Student,
    Admin,
}

/// Section of a test. Each key carries exactly one question kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ModuleKey {
    #[serde(rename = "aptitude")]
    Aptitude,
    #[serde(rename = "grammarMCQ")]
    GrammarMcq,
    #[serde(rename = "readingSpeaking")]
    ReadingSpeaking,
    #[serde(rename = "listeningRepeat")]
    ListeningRepeat,
    #[serde(rename = "errorCorrection")]
    ErrorCorrection,
    #[serde(rename = "storytelling")]
    Storytelling,
    #[serde(rename = "listeningComprehension")]
    ListeningComprehension,
}

impl ModuleKey {
    pub const ALL: [ModuleKey; 7] = [
        ModuleKey::Aptitude,
        ModuleKey::GrammarMcq,
        ModuleKey::ReadingSpeaking,
        ModuleKey::ListeningRepeat,
        ModuleKey::ErrorCorrection,
        ModuleKey::Storytelling,
        ModuleKey::ListeningComprehension,
    ];

    pub fn kind(self) -> ModuleKind {
        match self {
            ModuleKey::Aptitude | ModuleKey::GrammarMcq => ModuleKind::Mcq,
            ModuleKey::ReadingSpeaking
            | ModuleKey::ListeningRepeat
            | ModuleKey::ErrorCorrection => ModuleKind::Voice,
            ModuleKey::Storytelling => ModuleKind::Storytelling,
            ModuleKey::ListeningComprehension => ModuleKind::Comprehension,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ModuleKey::Aptitude => "aptitude",
            ModuleKey::GrammarMcq => "grammarMCQ",
            ModuleKey::ReadingSpeaking => "readingSpeaking",
            ModuleKey::ListeningRepeat => "listeningRepeat",
            ModuleKey::ErrorCorrection => "errorCorrection",
            ModuleKey::Storytelling => "storytelling",
            ModuleKey::ListeningComprehension => "listeningComprehension",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            ModuleKey::Aptitude => "Aptitude",
            ModuleKey::GrammarMcq => "Grammar",
            ModuleKey::ReadingSpeaking => "Reading & Speaking",
            ModuleKey::ListeningRepeat => "Listening & Repeat",
            ModuleKey::ErrorCorrection => "Error Correction",
            ModuleKey::Storytelling => "Storytelling",
            ModuleKey::ListeningComprehension => "Listening Comprehension",
        }
    }

    /// Modules whose prompt is played aloud instead of shown.
    pub fn is_listening(self) -> bool {
        matches!(self, ModuleKey::ListeningRepeat | ModuleKey::ListeningComprehension)
    }
}

impl fmt::Display for ModuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    Mcq,
    Voice,
    Storytelling,
    Comprehension,
}

impl ModuleKind {
    pub fn is_spoken(self) -> bool {
        !matches!(self, ModuleKind::Mcq)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProgressStatus {
    InProgress,
    Completed,
}

/// Why a session was finalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SubmitReason {
    Manual,
    AllModulesComplete,
    TimeExpired,
    IntegrityViolation(String),
}

impl SubmitReason {
    pub fn label(&self) -> &'static str {
        match self {
            SubmitReason::Manual => "manual",
            SubmitReason::AllModulesComplete => "all_modules_complete",
            SubmitReason::TimeExpired => "time_expired",
            SubmitReason::IntegrityViolation(_) => "integrity_violation",
        }
    }
}

impl fmt::Display for SubmitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitReason::IntegrityViolation(detail) => write!(f, "integrity violation: {detail}"),
            other => f.write_str(other.label()),
        }
    }
}
