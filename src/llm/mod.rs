pub mod client;
pub mod parse;
pub mod prompt;
pub mod scripted;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::PlannerConfig;
use crate::types::command::Command;
use crate::types::error::PlannerError;
use crate::types::plan::{ActionPlan, PlanStep};
use crate::types::screen::ScreenState;

pub use client::HttpPlanner;
pub use parse::parse_planner_text;
pub use scripted::ScriptedPlanner;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
    pub max_retries: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: "qwen-vl-plus".to_string(),
            temperature: 0.2,
            timeout_seconds: 30,
            max_retries: 3,
        }
    }
}

impl From<&PlannerConfig> for ModelConfig {
    fn from(config: &PlannerConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            timeout_seconds: (config.timeout_ms / 1000).max(1),
            max_retries: config.max_retries,
        }
    }
}

/// What the planner is asked: the current screen plus the user's goal.
#[derive(Debug, Clone, Serialize)]
pub struct PlanRequest {
    pub instruction: String,
    pub screen_state: ScreenState,
    pub model: ModelConfig,
}

/// One action as the planner returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedAction {
    #[serde(flatten)]
    pub command: Command,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_on_failure: Option<bool>,
}

impl From<Command> for PlannedAction {
    fn from(command: Command) -> Self {
        Self {
            command,
            confidence: None,
            summary: None,
            continue_on_failure: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanResponse {
    #[serde(default)]
    pub summary: String,
    pub actions: Vec<PlannedAction>,
}

impl PlanResponse {
    pub fn into_action_plan(self, instruction: &str) -> ActionPlan {
        let description = if self.summary.trim().is_empty() {
            instruction.to_string()
        } else {
            self.summary
        };
        let steps = self
            .actions
            .into_iter()
            .map(|a| PlanStep {
                continue_on_failure: a.continue_on_failure,
                confidence: a.confidence,
                summary: a.summary,
                ..PlanStep::new(a.command)
            })
            .collect();
        ActionPlan::from_steps(description, steps)
    }
}

/// Remote service that turns a screen and an instruction into actions.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(
        &self,
        request: &PlanRequest,
        cancel: &CancellationToken,
    ) -> Result<PlanResponse, PlannerError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::command::ScrollDirection;
    use crate::types::plan::PlanStatus;

    #[test]
    fn planned_action_flattens_command_fields() {
        let action: PlannedAction = serde_json::from_str(
            r#"{"type":"scroll","direction":"DOWN","confidence":0.7,"summary":"reveal more","continue_on_failure":true}"#,
        )
        .unwrap();
        assert_eq!(
            action.command,
            Command::Scroll { direction: ScrollDirection::Down, duration_ms: 500 }
        );
        assert_eq!(action.confidence, Some(0.7));
        assert_eq!(action.continue_on_failure, Some(true));

        let json = serde_json::to_value(PlannedAction::from(Command::Tap { x: 3, y: 4 })).unwrap();
        assert_eq!(json, serde_json::json!({"type": "tap", "x": 3, "y": 4}));
    }

    #[test]
    fn response_becomes_pending_plan() {
        let response = PlanResponse {
            summary: String::new(),
            actions: vec![
                PlannedAction {
                    continue_on_failure: Some(true),
                    ..PlannedAction::from(Command::Tap { x: 1, y: 2 })
                },
                PlannedAction::from(Command::Back),
            ],
        };
        let plan = response.into_action_plan("open wifi settings");
        assert_eq!(plan.description, "open wifi settings");
        assert_eq!(plan.status, PlanStatus::Pending);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.steps[0].continue_on_failure, Some(true));
        assert_eq!(plan.current_index, 0);
    }

    #[test]
    fn model_config_follows_planner_config() {
        let planner = PlannerConfig {
            model: "qwen-vl-max".to_string(),
            timeout_ms: 500,
            max_retries: 7,
            ..PlannerConfig::default()
        };
        let model = ModelConfig::from(&planner);
        assert_eq!(model.model, "qwen-vl-max");
        assert_eq!(model.max_retries, 7);
        assert_eq!(model.timeout_seconds, 1);
        assert_eq!(ModelConfig::from(&PlannerConfig::default()).max_retries, 3);
    }
}
