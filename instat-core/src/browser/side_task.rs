use std::fmt;

use serde::Serialize;
use tracing::{debug, info, warn};

/// Result of a best-effort step whose failure never aborts the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum SideTaskOutcome {
    Succeeded,
    Skipped(String),
    Failed(String),
}

impl SideTaskOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        SideTaskOutcome::Skipped(reason.into())
    }

    pub fn failed(reason: impl fmt::Display) -> Self {
        SideTaskOutcome::Failed(reason.to_string())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SideTaskOutcome::Succeeded)
    }

    pub fn log(&self, task: &str) {
        match self {
            SideTaskOutcome::Succeeded => info!(task, "side task completed"),
            SideTaskOutcome::Skipped(reason) => debug!(task, %reason, "side task skipped"),
            SideTaskOutcome::Failed(reason) => warn!(task, %reason, "side task failed"),
        }
    }
}

impl fmt::Display for SideTaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SideTaskOutcome::Succeeded => f.write_str("succeeded"),
            SideTaskOutcome::Skipped(reason) => write!(f, "skipped ({reason})"),
            SideTaskOutcome::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_reason() {
        assert_eq!(SideTaskOutcome::Succeeded.to_string(), "succeeded");
        assert_eq!(
            SideTaskOutcome::skipped("not shown").to_string(),
            "skipped (not shown)"
        );
        assert!(!SideTaskOutcome::failed("boom").is_success());
    }

    #[test]
    fn serializes_with_status_tag() {
        let json = serde_json::to_value(SideTaskOutcome::skipped("absent")).unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], "absent");
    }
}
