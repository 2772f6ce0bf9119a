//! Tasks submitted to the swarm for routing.

use serde::{Deserialize, Serialize};

/// How the concurrent strategy combines fulfilled branch results.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisMode {
    /// Pick the single highest-confidence result.
    Best,
    /// Concatenate all result payloads with their originating agent ids.
    Merge,
    /// Return the first fulfilled result.
    First,
}

/// A unit of work submitted by an external caller.
///
/// Only `task_type` drives strategy selection; the remaining fields are
/// free-form hints the caller may or may not supply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub task_type: String,
    pub amount: Option<f64>,
    pub severity: Option<String>,
    #[serde(default)]
    pub required_skills: Vec<String>,
    pub preferred_role: Option<String>,
    pub synthesis: Option<SynthesisMode>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Task {
    /// Create a task of the given type with a fresh id.
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            task_type: task_type.into(),
            amount: None,
            severity: None,
            required_skills: Vec::new(),
            preferred_role: None,
            synthesis: None,
            payload: serde_json::Value::Null,
        }
    }

    /// Set the requested amount (spending, quota, ...).
    pub fn with_amount(mut self, amount: f64) -> Self {
        self.amount = Some(amount);
        self
    }

    /// Set the severity hint.
    pub fn with_severity(mut self, severity: impl Into<String>) -> Self {
        self.severity = Some(severity.into());
        self
    }

    /// Require a set of skills from participants.
    pub fn with_required_skills(mut self, skills: Vec<String>) -> Self {
        self.required_skills = skills;
        self
    }

    /// Prefer participants with a given role.
    pub fn with_preferred_role(mut self, role: impl Into<String>) -> Self {
        self.preferred_role = Some(role.into());
        self
    }

    /// Set the synthesis mode for concurrent fan-out.
    pub fn with_synthesis(mut self, mode: SynthesisMode) -> Self {
        self.synthesis = Some(mode);
        self
    }

    /// Attach a free-form payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Whether the severity hint marks this task as critical.
    pub fn is_critical(&self) -> bool {
        self.severity
            .as_deref()
            .map(|s| s.eq_ignore_ascii_case("critical"))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_builder() {
        let task = Task::new("financial_approval")
            .with_amount(2500.0)
            .with_required_skills(vec!["budgeting".to_string()])
            .with_preferred_role("finance");

        assert_eq!(task.task_type, "financial_approval");
        assert_eq!(task.amount, Some(2500.0));
        assert!(!task.id.is_empty());
        assert!(!task.is_critical());
    }

    #[test]
    fn test_critical_severity() {
        assert!(Task::new("system_alert").with_severity("critical").is_critical());
        assert!(Task::new("system_alert").with_severity("CRITICAL").is_critical());
        assert!(!Task::new("system_alert").with_severity("warning").is_critical());
        assert!(!Task::new("system_alert").is_critical());
    }
}
