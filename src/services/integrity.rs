//! Lockdown rules applied while an exam is running.
//!
//! The monitor only produces verdicts. Acting on them (warning the student, forcing the
//! submission) is the session controller's job.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;

use crate::core::config::ExamSettings;
use crate::db::types::SubmitReason;

#[derive(Debug, Error)]
#[error("fullscreen request failed: {0}")]
pub struct FullscreenError(pub String);

#[async_trait]
pub trait Fullscreen: Send + Sync {
    async fn request_fullscreen(&self) -> Result<(), FullscreenError>;
    async fn exit_fullscreen(&self) -> Result<(), FullscreenError>;
    fn is_fullscreen(&self) -> bool;
}

/// Events forwarded by the shell hosting the exam.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityEvent {
    FullscreenChanged { is_fullscreen: bool },
    EscapePressed { in_fullscreen: bool },
    Copy,
    Cut,
    Paste,
    ContextMenu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    FullscreenExit,
    EscapePress,
}

impl ViolationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ViolationKind::FullscreenExit => "fullscreen_exit",
            ViolationKind::EscapePress => "escape_press",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityVerdict {
    /// Not armed, detached, or nothing to enforce.
    Ignored,
    Allowed,
    /// The default action must be prevented.
    Suppressed,
    Warning { kind: ViolationKind, count: u32, limit: u32, reenter_fullscreen: bool },
    ForceSubmit(SubmitReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegrityPolicy {
    pub fullscreen_violation_limit: u32,
    pub esc_press_limit: u32,
    pub esc_window: Duration,
}

impl IntegrityPolicy {
    pub fn from_settings(settings: &ExamSettings) -> Self {
        Self {
            fullscreen_violation_limit: settings.fullscreen_violation_limit,
            esc_press_limit: settings.esc_press_limit,
            esc_window: settings.esc_window(),
        }
    }
}

impl Default for IntegrityPolicy {
    fn default() -> Self {
        Self::from_settings(&ExamSettings::default())
    }
}

#[derive(Debug)]
pub struct IntegrityMonitor {
    policy: IntegrityPolicy,
    privileged: bool,
    armed: bool,
    detached: bool,
    fullscreen_violations: u32,
    esc_presses: u32,
    last_esc: Option<Instant>,
}

impl IntegrityMonitor {
    pub fn new(policy: IntegrityPolicy, privileged: bool) -> Self {
        Self {
            policy,
            privileged,
            armed: false,
            detached: false,
            fullscreen_violations: 0,
            esc_presses: 0,
            last_esc: None,
        }
    }

    /// Starts enforcing. Called when the exam begins.
    pub fn arm(&mut self) {
        if !self.detached {
            self.armed = true;
        }
    }

    /// Stops enforcing for good. Every later event is ignored.
    pub fn detach(&mut self) {
        self.armed = false;
        self.detached = true;
    }

    pub fn is_active(&self) -> bool {
        self.armed && !self.detached
    }

    pub fn fullscreen_violations(&self) -> u32 {
        self.fullscreen_violations
    }

    pub fn observe(&mut self, event: IntegrityEvent, now: Instant) -> IntegrityVerdict {
        if !self.is_active() {
            return IntegrityVerdict::Ignored;
        }

        let verdict = match event {
            IntegrityEvent::Copy
            | IntegrityEvent::Cut
            | IntegrityEvent::Paste
            | IntegrityEvent::ContextMenu => {
                if self.privileged {
                    IntegrityVerdict::Allowed
                } else {
                    IntegrityVerdict::Suppressed
                }
            }
            IntegrityEvent::FullscreenChanged { is_fullscreen: true } => IntegrityVerdict::Ignored,
            IntegrityEvent::FullscreenChanged { is_fullscreen: false } => self.fullscreen_exit(),
            IntegrityEvent::EscapePressed { in_fullscreen: false } => IntegrityVerdict::Ignored,
            IntegrityEvent::EscapePressed { in_fullscreen: true } => self.escape_press(now),
        };

        if matches!(verdict, IntegrityVerdict::ForceSubmit(_)) {
            self.detach();
        }
        verdict
    }

    fn fullscreen_exit(&mut self) -> IntegrityVerdict {
        self.fullscreen_violations += 1;
        let limit = self.policy.fullscreen_violation_limit;
        metrics::counter!(
            "integrity_violations_total",
            "kind" => ViolationKind::FullscreenExit.as_str()
        )
        .increment(1);

        if self.fullscreen_violations >= limit {
            let reason = format!("exited fullscreen {limit} times");
            return IntegrityVerdict::ForceSubmit(SubmitReason::IntegrityViolation(reason));
        }
        IntegrityVerdict::Warning {
            kind: ViolationKind::FullscreenExit,
            count: self.fullscreen_violations,
            limit,
            reenter_fullscreen: true,
        }
    }

    fn escape_press(&mut self, now: Instant) -> IntegrityVerdict {
        let within_window = self
            .last_esc
            .is_some_and(|last| now.saturating_duration_since(last) <= self.policy.esc_window);
        self.esc_presses = if within_window { self.esc_presses + 1 } else { 1 };
        self.last_esc = Some(now);

        let limit = self.policy.esc_press_limit;
        metrics::counter!(
            "integrity_violations_total",
            "kind" => ViolationKind::EscapePress.as_str()
        )
        .increment(1);

        if self.esc_presses >= limit {
            let reason = format!("pressed ESC {limit} times in fullscreen");
            return IntegrityVerdict::ForceSubmit(SubmitReason::IntegrityViolation(reason));
        }
        IntegrityVerdict::Warning {
            kind: ViolationKind::EscapePress,
            count: self.esc_presses,
            limit,
            reenter_fullscreen: false,
        }
    }
}
