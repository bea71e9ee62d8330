//! Guard Models
//!
//! Result types shared by the safety and join guards.

use serde::{Deserialize, Serialize};

/// Outcome of one guard phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardStatus {
    /// Every check in the phase passed
    Passed,
    /// At least one violation was found
    Failed,
    /// The phase did not run (an earlier phase failed)
    Skipped,
}

impl GuardStatus {
    /// Check if this status indicates success
    pub fn is_success(&self) -> bool {
        matches!(self, GuardStatus::Passed | GuardStatus::Skipped)
    }

    /// Check if this status indicates failure
    pub fn is_failure(&self) -> bool {
        matches!(self, GuardStatus::Failed)
    }
}

impl std::fmt::Display for GuardStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuardStatus::Passed => write!(f, "passed"),
            GuardStatus::Failed => write!(f, "failed"),
            GuardStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Which guard produced a result or violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardKind {
    /// Static safety rules
    Safety,
    /// Foreign-key join validation
    Join,
}

impl std::fmt::Display for GuardKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuardKind::Safety => write!(f, "safety"),
            GuardKind::Join => write!(f, "join"),
        }
    }
}

/// A single rule violation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: GuardKind,
    /// Short rule identifier, e.g. `forbidden_keyword`, `missing_limit`
    pub rule: String,
    /// Human-readable description, fed back to the model on correction
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl Violation {
    pub fn safety(rule: &str, message: impl Into<String>) -> Self {
        Self {
            kind: GuardKind::Safety,
            rule: rule.to_string(),
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn join(message: impl Into<String>, suggestion: Option<String>) -> Self {
        Self {
            kind: GuardKind::Join,
            rule: "join_invalid".to_string(),
            message: message.into(),
            suggestion,
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.rule, self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " (suggested path: {})", suggestion)?;
        }
        Ok(())
    }
}

/// Result of one guard phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardResult {
    pub guard: GuardKind,
    pub status: GuardStatus,
    pub message: String,
    pub violations: Vec<Violation>,
    pub duration_ms: u64,
}

impl GuardResult {
    /// Create a passed result.
    pub fn passed(guard: GuardKind, message: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            guard,
            status: GuardStatus::Passed,
            message: message.into(),
            violations: Vec::new(),
            duration_ms,
        }
    }

    /// Create a failed result.
    pub fn failed(guard: GuardKind, violations: Vec<Violation>, duration_ms: u64) -> Self {
        let message = format!("{} {} violation(s)", violations.len(), guard);
        Self {
            guard,
            status: GuardStatus::Failed,
            message,
            violations,
            duration_ms,
        }
    }

    /// Create a skipped result.
    pub fn skipped(guard: GuardKind, reason: &str) -> Self {
        Self {
            guard,
            status: GuardStatus::Skipped,
            message: reason.to_string(),
            violations: Vec::new(),
            duration_ms: 0,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status.is_failure()
    }
}

/// Combined outcome of the guard pipeline for one SQL statement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardReport {
    pub passed: bool,
    pub results: Vec<GuardResult>,
    pub duration_ms: u64,
}

impl GuardReport {
    pub fn new(results: Vec<GuardResult>) -> Self {
        let passed = results.iter().all(|r| r.status.is_success());
        let duration_ms = results.iter().map(|r| r.duration_ms).sum();
        Self {
            passed,
            results,
            duration_ms,
        }
    }

    /// All violations in phase order.
    pub fn violations(&self) -> impl Iterator<Item = &Violation> {
        self.results.iter().flat_map(|r| r.violations.iter())
    }

    /// Guard of the first failing phase.
    pub fn failed_guard(&self) -> Option<GuardKind> {
        self.results.iter().find(|r| r.is_failure()).map(|r| r.guard)
    }

    pub fn result_for(&self, guard: GuardKind) -> Option<&GuardResult> {
        self.results.iter().find(|r| r.guard == guard)
    }

    /// One line per violation, for correction prompts and user-facing errors.
    pub fn feedback(&self) -> String {
        self.violations()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
