use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{parse_planner_text, PlanRequest, PlanResponse, Planner, PlannedAction};
use crate::types::command::Command;
use crate::types::error::PlannerError;

/// Offline planner that always answers with the same commands.
#[derive(Debug, Default)]
pub struct ScriptedPlanner {
    response: PlanResponse,
    calls: AtomicUsize,
}

impl ScriptedPlanner {
    pub fn new(summary: impl Into<String>, commands: Vec<Command>) -> Self {
        Self {
            response: PlanResponse {
                summary: summary.into(),
                actions: commands.into_iter().map(PlannedAction::from).collect(),
            },
            calls: AtomicUsize::new(0),
        }
    }

    /// Accepts anything the HTTP planner would accept as a response body.
    pub fn from_text(text: &str) -> Result<Self, PlannerError> {
        Ok(Self {
            response: parse_planner_text(text)?,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn plan(
        &self,
        _request: &PlanRequest,
        cancel: &CancellationToken,
    ) -> Result<PlanResponse, PlannerError> {
        if cancel.is_cancelled() {
            return Err(PlannerError::Cancelled);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response.clone())
    }
}
