use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PlanConfig;
use crate::executor::ActionExecutor;
use crate::types::error::ErrorKind;
use crate::types::event::PlanEvent;
use crate::types::plan::{ActionPlan, CommandResult, PlanReport, PlanStatus};

const EVENT_CAPACITY: usize = 100;

/// Walks an [`ActionPlan`] one command at a time.
///
/// Each command gets its own timeout. A failed step either stops the plan or
/// is stepped over according to the configured failure policy and the step's
/// own `continue_on_failure`. Cancellation is checked before every command;
/// commands that already ran are never undone.
pub struct PlanExecutor {
    executor: Arc<ActionExecutor>,
    config: PlanConfig,
    events: broadcast::Sender<PlanEvent>,
}

impl PlanExecutor {
    pub fn new(executor: Arc<ActionExecutor>, config: PlanConfig) -> Self {
        let (events, _rx) = broadcast::channel(EVENT_CAPACITY);
        Self {
            executor,
            config,
            events,
        }
    }

    pub fn executor(&self) -> &Arc<ActionExecutor> {
        &self.executor
    }

    pub fn config(&self) -> &PlanConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlanEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: PlanEvent) {
        // 没有订阅者时发送失败，忽略
        let _ = self.events.send(event);
    }

    pub async fn run(&self, plan: &mut ActionPlan, cancel: &CancellationToken) -> PlanReport {
        let started = Instant::now();
        if !plan.start() {
            warn!(plan_id = %plan.plan_id, status = ?plan.status, "plan is not pending, refusing to run");
            return PlanReport::from_plan(plan, 0);
        }

        info!(plan_id = %plan.plan_id, total = plan.len(), description = %plan.description, "plan started");
        self.emit(PlanEvent::PlanStarted {
            plan_id: plan.plan_id.clone(),
            total: plan.len(),
        });

        let status = loop {
            if cancel.is_cancelled() {
                break PlanStatus::Cancelled;
            }
            if !plan.has_remaining() {
                break PlanStatus::Completed;
            }

            let index = plan.current_index;
            let Some(command) = plan.begin_current() else {
                break PlanStatus::Failed;
            };
            debug!(plan_id = %plan.plan_id, index, command = %command, "step started");
            self.emit(PlanEvent::StepStarted {
                plan_id: plan.plan_id.clone(),
                index,
                command: command.clone(),
            });

            let step_started = Instant::now();
            let result = match tokio::time::timeout(self.config.command_timeout(), self.executor.execute(&command)).await {
                Ok(result) => result,
                Err(_) => CommandResult::failure(
                    ErrorKind::Timeout,
                    format!("command did not finish within {} ms", self.config.command_timeout_ms),
                )
                .with_duration(step_started.elapsed().as_millis() as u64),
            };

            let keep_going = result.success || self.config.failure_policy.continues_after(&plan.steps[index]);
            if !result.success {
                warn!(
                    plan_id = %plan.plan_id,
                    index,
                    command = %command,
                    error_kind = ?result.error_kind,
                    message = ?result.message,
                    keep_going,
                    "step failed"
                );
            }

            self.emit(PlanEvent::StepFinished {
                plan_id: plan.plan_id.clone(),
                index,
                result: result.clone(),
            });
            plan.finish_current(result);

            if !keep_going {
                break PlanStatus::Failed;
            }

            if plan.has_remaining() && self.config.settle_delay_ms > 0 {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.config.settle_delay()) => {}
                }
            }
        };

        plan.conclude(status);
        info!(plan_id = %plan.plan_id, status = ?plan.status, executed = plan.current_index, "plan finished");
        self.emit(PlanEvent::PlanFinished {
            plan_id: plan.plan_id.clone(),
            status: plan.status,
            executed: plan.current_index,
        });

        PlanReport::from_plan(plan, started.elapsed().as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutorConfig;
    use crate::device::{GestureMode, SimAccessibility, SimGestureSurface, SimNode};
    use crate::types::command::Command;
    use crate::types::geometry::Rect;
    use crate::types::plan::{FailurePolicy, PlanStep, StepStatus};

    struct Harness {
        plans: PlanExecutor,
        accessibility: Arc<SimAccessibility>,
        gestures: Arc<SimGestureSurface>,
    }

    fn harness(config: PlanConfig) -> Harness {
        let root = SimNode::new("FrameLayout").bounds(Rect::new(0, 0, 1080, 2400)).build();
        let accessibility = Arc::new(SimAccessibility::new(Some(root)));
        let gestures = Arc::new(SimGestureSurface::new(GestureMode::Complete));
        let executor = Arc::new(ActionExecutor::new(
            accessibility.clone(),
            gestures.clone(),
            ExecutorConfig {
                gesture_timeout_ms: 200,
                ..ExecutorConfig::default()
            },
        ));
        Harness {
            plans: PlanExecutor::new(executor, config),
            accessibility,
            gestures,
        }
    }

    fn fast() -> PlanConfig {
        PlanConfig {
            settle_delay_ms: 0,
            ..PlanConfig::default()
        }
    }

    #[tokio::test]
    async fn runs_every_step_in_order() {
        let h = harness(fast());
        let mut plan = ActionPlan::new(
            "demo",
            vec![
                Command::Tap { x: 10, y: 10 },
                Command::Swipe { x1: 500, y1: 2000, x2: 500, y2: 400, duration_ms: 300 },
                Command::Home,
            ],
        );
        let report = h.plans.run(&mut plan, &CancellationToken::new()).await;
        assert_eq!(report.status, PlanStatus::Completed);
        assert_eq!(report.executed, 3);
        assert!(report.failures.is_empty());
        assert_eq!(h.gestures.dispatched().len(), 2);
        assert!(plan.steps.iter().all(|s| s.status == StepStatus::Succeeded));
    }

    #[tokio::test]
    async fn hard_failure_stops_the_plan() {
        let h = harness(fast());
        let mut plan = ActionPlan::new(
            "demo",
            vec![
                Command::Tap { x: 5000, y: 10 },
                Command::Back,
                Command::Swipe { x1: 1, y1: 1, x2: 2, y2: 2, duration_ms: 100 },
            ],
        );
        let report = h.plans.run(&mut plan, &CancellationToken::new()).await;
        assert_eq!(report.status, PlanStatus::Failed);
        assert_eq!(report.executed, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].error_kind, Some(ErrorKind::InvalidCoordinates));
        assert!(h.accessibility.global_log().is_empty());
        assert_eq!(plan.steps[1].status, StepStatus::Pending);
        assert_eq!(plan.steps[2].status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn navigation_failure_is_soft() {
        let h = harness(fast());
        h.accessibility.set_global_result(false);
        let mut plan = ActionPlan::new("demo", vec![Command::Back, Command::Tap { x: 100, y: 100 }]);
        let report = h.plans.run(&mut plan, &CancellationToken::new()).await;
        assert_eq!(report.status, PlanStatus::Completed);
        assert_eq!(report.executed, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].index, 0);
        assert_eq!(h.gestures.dispatched().len(), 1);
    }

    #[tokio::test]
    async fn policy_and_step_overrides() {
        let h = harness(PlanConfig {
            failure_policy: FailurePolicy::AbortOnAny,
            ..fast()
        });
        h.accessibility.set_global_result(false);
        let mut plan = ActionPlan::new("demo", vec![Command::Back, Command::Home]);
        let report = h.plans.run(&mut plan, &CancellationToken::new()).await;
        assert_eq!(report.status, PlanStatus::Failed);
        assert_eq!(report.executed, 1);

        let h = harness(fast());
        let mut tolerant = PlanStep::new(Command::Tap { x: -1, y: 0 });
        tolerant.continue_on_failure = Some(true);
        let mut plan = ActionPlan::from_steps("demo", vec![tolerant, PlanStep::new(Command::Tap { x: 1, y: 1 })]);
        let report = h.plans.run(&mut plan, &CancellationToken::new()).await;
        assert_eq!(report.status, PlanStatus::Completed);
        assert_eq!(report.executed, 2);
    }

    #[tokio::test]
    async fn cancellation_stops_before_the_next_command() {
        let h = harness(fast());
        let token = CancellationToken::new();
        let trigger = token.clone();
        h.gestures.on_complete(move |n| {
            if n == 2 {
                trigger.cancel();
            }
        });

        let commands = (0..5).map(|i| Command::Tap { x: 100 + i, y: 100 }).collect();
        let mut plan = ActionPlan::new("five taps", commands);
        let report = h.plans.run(&mut plan, &token).await;

        assert_eq!(report.status, PlanStatus::Cancelled);
        assert_eq!(plan.current_index, 2);
        assert_eq!(h.gestures.completed_count(), 2);
        assert_eq!(plan.steps[1].status, StepStatus::Succeeded);
        assert!(plan.steps[2..].iter().all(|s| s.status == StepStatus::Pending));
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let h = harness(PlanConfig {
            command_timeout_ms: 50,
            ..fast()
        });
        let mut plan = ActionPlan::new("demo", vec![Command::Wait { duration_ms: 5_000 }, Command::Home]);
        let report = h.plans.run(&mut plan, &CancellationToken::new()).await;
        assert_eq!(report.status, PlanStatus::Failed);
        assert_eq!(report.failures[0].error_kind, Some(ErrorKind::Timeout));
        // 超时后执行器不能卡在忙碌状态
        assert!(!h.plans.executor().is_busy());
    }

    #[tokio::test]
    async fn empty_plan_completes_and_events_are_ordered() {
        let h = harness(fast());
        let mut rx = h.plans.subscribe();

        let mut empty = ActionPlan::new("nothing", Vec::new());
        let report = h.plans.run(&mut empty, &CancellationToken::new()).await;
        assert_eq!(report.status, PlanStatus::Completed);
        assert_eq!(report.executed, 0);

        let mut plan = ActionPlan::new("one", vec![Command::Tap { x: 1, y: 1 }]);
        h.plans.run(&mut plan, &CancellationToken::new()).await;

        let mut types = Vec::new();
        while let Ok(event) = rx.try_recv() {
            types.push(event.event_type().to_string());
        }
        assert_eq!(
            types,
            vec![
                "plan_started",
                "plan_finished",
                "plan_started",
                "step_started",
                "step_finished",
                "plan_finished"
            ]
        );
    }

    #[tokio::test]
    async fn finished_plan_is_not_rerun() {
        let h = harness(fast());
        let mut plan = ActionPlan::new("demo", vec![Command::Tap { x: 1, y: 1 }]);
        h.plans.run(&mut plan, &CancellationToken::new()).await;
        let again = h.plans.run(&mut plan, &CancellationToken::new()).await;
        assert_eq!(again.status, PlanStatus::Completed);
        assert_eq!(h.gestures.dispatched().len(), 1);
    }
}
