use serde::{Deserialize, Serialize};

use crate::types::command::Command;
use crate::types::plan::{CommandResult, PlanStatus};

// 计划执行进度，供展示层订阅
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlanEvent {
    PlanStarted {
        plan_id: String,
        total: usize,
    },
    StepStarted {
        plan_id: String,
        index: usize,
        command: Command,
    },
    StepFinished {
        plan_id: String,
        index: usize,
        result: CommandResult,
    },
    PlanFinished {
        plan_id: String,
        status: PlanStatus,
        executed: usize,
    },
}

impl PlanEvent {
    pub fn plan_id(&self) -> &str {
        match self {
            PlanEvent::PlanStarted { plan_id, .. }
            | PlanEvent::StepStarted { plan_id, .. }
            | PlanEvent::StepFinished { plan_id, .. }
            | PlanEvent::PlanFinished { plan_id, .. } => plan_id,
        }
    }

    pub fn event_type(&self) -> &str {
        match self {
            PlanEvent::PlanStarted { .. } => "plan_started",
            PlanEvent::StepStarted { .. } => "step_started",
            PlanEvent::StepFinished { .. } => "step_finished",
            PlanEvent::PlanFinished { .. } => "plan_finished",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let ev = PlanEvent::StepStarted {
            plan_id: "p1".into(),
            index: 0,
            command: Command::Back,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "step_started");
        assert_eq!(json["command"]["type"], "back");
        assert_eq!(ev.plan_id(), "p1");
        assert_eq!(ev.event_type(), "step_started");
    }
}
