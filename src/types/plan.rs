use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::command::Command;
use crate::types::error::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl PlanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlanStatus::Completed | PlanStatus::Failed | PlanStatus::Cancelled)
    }
}

/// What a failed step does to the rest of its plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Navigation commands (back/home/recents) are soft, everything else is hard.
    #[default]
    ByCommandKind,
    AbortOnAny,
    ContinueOnAny,
}

impl FailurePolicy {
    /// Whether the plan keeps going after `step` failed. A planner-declared
    /// `continue_on_failure` on the step wins over the policy.
    pub fn continues_after(&self, step: &PlanStep) -> bool {
        if let Some(declared) = step.continue_on_failure {
            return declared;
        }
        match self {
            FailurePolicy::ByCommandKind => step.command.is_navigation(),
            FailurePolicy::AbortOnAny => false,
            FailurePolicy::ContinueOnAny => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// Outcome of one command. Failures are values, never errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub duration_ms: u64,
}

impl CommandResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error_kind: None,
            message: None,
            duration_ms: 0,
        }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_kind: Some(kind),
            message: Some(message.into()),
            duration_ms: 0,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub command: Command,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CommandResult>,
    /// Planner-declared override of the executor's failure policy for this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_on_failure: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl PlanStep {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            status: StepStatus::Pending,
            result: None,
            continue_on_failure: None,
            confidence: None,
            summary: None,
        }
    }
}

/// An ordered, stateful run of commands.
///
/// `current_index` counts the steps that have finished. It moves forward only,
/// and only while the plan is `Running`; once the plan is terminal nothing
/// about it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPlan {
    pub plan_id: String,
    pub description: String,
    pub steps: Vec<PlanStep>,
    pub current_index: usize,
    pub status: PlanStatus,
    pub created_at: DateTime<Utc>,
}

impl ActionPlan {
    pub fn new(description: impl Into<String>, commands: Vec<Command>) -> Self {
        Self::from_steps(description, commands.into_iter().map(PlanStep::new).collect())
    }

    pub fn from_steps(description: impl Into<String>, steps: Vec<PlanStep>) -> Self {
        Self {
            plan_id: Uuid::new_v4().to_string(),
            description: description.into(),
            steps,
            current_index: 0,
            status: PlanStatus::Pending,
            created_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn commands(&self) -> impl Iterator<Item = &Command> {
        self.steps.iter().map(|s| &s.command)
    }

    /// Pending -> Running. Returns false for any other starting state.
    pub fn start(&mut self) -> bool {
        if self.status != PlanStatus::Pending {
            return false;
        }
        self.status = PlanStatus::Running;
        true
    }

    /// Marks the step at `current_index` as running and hands back its command.
    pub fn begin_current(&mut self) -> Option<Command> {
        if self.status != PlanStatus::Running {
            return None;
        }
        let step = self.steps.get_mut(self.current_index)?;
        step.status = StepStatus::Running;
        Some(step.command.clone())
    }

    /// Records the current step's result and advances the index.
    pub fn finish_current(&mut self, result: CommandResult) -> bool {
        if self.status != PlanStatus::Running {
            return false;
        }
        let Some(step) = self.steps.get_mut(self.current_index) else {
            return false;
        };
        step.status = if result.success {
            StepStatus::Succeeded
        } else {
            StepStatus::Failed
        };
        step.result = Some(result);
        self.current_index += 1;
        true
    }

    /// Moves a running plan to a terminal status. Terminal plans stay as they are.
    pub fn conclude(&mut self, status: PlanStatus) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        true
    }

    pub fn has_remaining(&self) -> bool {
        self.current_index < self.steps.len()
    }

    pub fn failures(&self) -> Vec<StepFailure> {
        self.steps
            .iter()
            .enumerate()
            .filter_map(|(index, step)| {
                let result = step.result.as_ref()?;
                if result.success {
                    return None;
                }
                Some(StepFailure {
                    index,
                    command: step.command.clone(),
                    error_kind: result.error_kind,
                    message: result.message.clone(),
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailure {
    pub index: usize,
    pub command: Command,
    pub error_kind: Option<ErrorKind>,
    pub message: Option<String>,
}

/// What a caller sees once a plan stops: terminal status plus per-step errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanReport {
    pub plan_id: String,
    pub status: PlanStatus,
    pub executed: usize,
    pub total: usize,
    pub failures: Vec<StepFailure>,
    pub duration_ms: u64,
}

impl PlanReport {
    pub fn from_plan(plan: &ActionPlan, duration_ms: u64) -> Self {
        Self {
            plan_id: plan.plan_id.clone(),
            status: plan.status,
            executed: plan.current_index,
            total: plan.steps.len(),
            failures: plan.failures(),
            duration_ms,
        }
    }
}
