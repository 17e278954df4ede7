use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::plan_executor::PlanExecutor;
use super::types::{CoordinatorState, PipelinePhase};
use crate::accessibility::{AccessibilityProvider, AccessibilitySnapshotter};
use crate::capture::{CaptureBackend, CaptureSession};
use crate::config::AgentConfig;
use crate::executor::{ActionExecutor, GestureSurface};
use crate::llm::{ModelConfig, PlanRequest, Planner};
use crate::ocr::{OcrEngine, OcrOutcome, OcrService};
use crate::screen::{ScreenStateAggregator, ScreenshotStore};
use crate::types::error::{PipelineError, PlannerError, SnapshotError};
use crate::types::event::PlanEvent;
use crate::types::plan::{ActionPlan, PlanReport};
use crate::types::screen::ScreenState;

/// The platform-facing ports a coordinator drives.
#[derive(Clone)]
pub struct DevicePorts {
    pub capture: Arc<dyn CaptureBackend>,
    pub accessibility: Arc<dyn AccessibilityProvider>,
    pub gestures: Arc<dyn GestureSurface>,
    pub ocr: Arc<dyn OcrEngine>,
}

/// Held for the length of one run. Clears the busy flag on drop.
struct RunGuard<'a> {
    busy: &'a AtomicBool,
    cancel: CancellationToken,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Runs the whole pipeline: capture, OCR, accessibility snapshot,
/// aggregation, planning and plan execution.
///
/// One pipeline run at a time; a second caller gets [`PipelineError::Busy`].
/// Any upstream failure ends the run before a plan is executed.
pub struct Coordinator {
    capture: CaptureSession,
    ocr: OcrService,
    snapshotter: Arc<AccessibilitySnapshotter>,
    aggregator: ScreenStateAggregator,
    planner: Arc<dyn Planner>,
    plans: PlanExecutor,
    model: ModelConfig,
    busy: AtomicBool,
    current: Mutex<CancellationToken>,
    state: Mutex<CoordinatorState>,
}

impl Coordinator {
    pub fn new(
        ports: DevicePorts,
        store: Arc<dyn ScreenshotStore>,
        planner: Arc<dyn Planner>,
        config: &AgentConfig,
    ) -> Self {
        let snapshotter = Arc::new(
            AccessibilitySnapshotter::new(ports.accessibility.clone())
                .with_max_depth(config.accessibility.max_depth),
        );
        let executor = Arc::new(ActionExecutor::new(
            ports.accessibility,
            ports.gestures,
            config.executor.clone(),
        ));

        Self {
            capture: CaptureSession::new(ports.capture, config.capture.clone()),
            ocr: OcrService::new(ports.ocr, config.ocr.timeout()).with_dedup_iou(config.ocr.dedup_iou),
            snapshotter,
            aggregator: ScreenStateAggregator::new(store),
            planner,
            plans: PlanExecutor::new(executor, config.plan.clone()),
            model: ModelConfig::from(&config.planner),
            busy: AtomicBool::new(false),
            current: Mutex::new(CancellationToken::new()),
            state: Mutex::new(CoordinatorState::default()),
        }
    }

    pub fn capture(&self) -> &CaptureSession {
        &self.capture
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlanEvent> {
        self.plans.subscribe()
    }

    pub fn state(&self) -> CoordinatorState {
        self.state.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Cancels whatever run is in progress. The command already executing
    /// finishes; nothing after it is dispatched.
    pub fn cancel(&self) {
        if let Ok(token) = self.current.lock() {
            token.cancel();
        }
    }

    /// Captures and aggregates the current screen.
    pub async fn observe(&self) -> Result<ScreenState, PipelineError> {
        let _run = self.acquire()?;
        let result = self.observe_inner().await;
        self.set_phase(PipelinePhase::Idle);
        result
    }

    /// Observes the screen and asks the planner for a plan, without running it.
    pub async fn request_plan(&self, instruction: &str) -> Result<ActionPlan, PipelineError> {
        let run = self.acquire()?;
        self.update(|s| s.begin(instruction));
        let result = self.plan_inner(instruction, &run.cancel).await;
        self.set_phase(PipelinePhase::Idle);
        result
    }

    /// Runs an already built plan.
    pub async fn execute_plan(&self, mut plan: ActionPlan) -> Result<PlanReport, PipelineError> {
        let run = self.acquire()?;
        self.update(|s| s.begin(&plan.description));
        let report = self.execute_inner(&mut plan, &run.cancel).await;
        Ok(report)
    }

    /// Observe, plan and execute in one go.
    #[instrument(skip(self))]
    pub async fn run_instruction(&self, instruction: &str) -> Result<PlanReport, PipelineError> {
        let run = self.acquire()?;
        let cancel = &run.cancel;
        self.update(|s| s.begin(instruction));

        let mut plan = match self.plan_inner(instruction, cancel).await {
            Ok(plan) => plan,
            Err(e) => {
                warn!(error = %e, "pipeline stopped before execution");
                self.set_phase(PipelinePhase::Idle);
                return Err(e);
            }
        };
        if cancel.is_cancelled() {
            self.set_phase(PipelinePhase::Idle);
            return Err(PipelineError::Cancelled);
        }
        Ok(self.execute_inner(&mut plan, cancel).await)
    }

    // 持有 current 锁完成占用和换令牌，cancel() 不会落在两者之间
    fn acquire(&self) -> Result<RunGuard<'_>, PipelineError> {
        let mut current = self
            .current
            .lock()
            .map_err(|_| PipelineError::Busy)?;
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(PipelineError::Busy);
        }
        let cancel = CancellationToken::new();
        *current = cancel.clone();
        Ok(RunGuard {
            busy: &self.busy,
            cancel,
        })
    }

    fn update<F: FnOnce(&mut CoordinatorState)>(&self, f: F) {
        if let Ok(mut state) = self.state.lock() {
            f(&mut state);
        }
    }

    fn set_phase(&self, phase: PipelinePhase) {
        self.update(|s| s.phase = phase);
    }

    async fn observe_inner(&self) -> Result<ScreenState, PipelineError> {
        self.set_phase(PipelinePhase::Capturing);
        let frame = self.capture.capture_once().await?;

        self.set_phase(PipelinePhase::Recognizing);
        let ocr = OcrOutcome::from_result(self.ocr.recognize(&frame.image).await);
        if let OcrOutcome::Error { message } = &ocr {
            warn!(engine = self.ocr.engine_name(), error = %message, "OCR failed, continuing without text");
        }

        self.set_phase(PipelinePhase::Snapshotting);
        let tree = match self.snapshotter.snapshot() {
            Ok(tree) => Some(tree),
            Err(SnapshotError::NoActiveWindow) => {
                warn!("no active window, aggregating without accessibility data");
                None
            }
        };

        self.set_phase(PipelinePhase::Aggregating);
        let state = match &tree {
            Some(tree) => self.aggregator.aggregate(&frame, &ocr, Some(tree)).await?,
            None => self.aggregator.aggregate_simple(&frame, &ocr).await?,
        };
        self.update(|s| s.last_screen_id = Some(state.id.clone()));
        Ok(state)
    }

    async fn plan_inner(&self, instruction: &str, cancel: &CancellationToken) -> Result<ActionPlan, PipelineError> {
        let screen_state = self.observe_inner().await?;
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        self.set_phase(PipelinePhase::Planning);
        let request = PlanRequest {
            instruction: instruction.to_string(),
            screen_state,
            model: self.model.clone(),
        };
        let response = self.planner.plan(&request, cancel).await.map_err(|e| match e {
            PlannerError::Cancelled => PipelineError::Cancelled,
            other => PipelineError::Planner(other),
        })?;

        let plan = response.into_action_plan(instruction);
        info!(plan_id = %plan.plan_id, steps = plan.len(), "plan received");
        self.update(|s| s.last_plan = Some(plan.clone()));
        Ok(plan)
    }

    async fn execute_inner(&self, plan: &mut ActionPlan, cancel: &CancellationToken) -> PlanReport {
        self.set_phase(PipelinePhase::Executing);
        let report = self.plans.run(plan, cancel).await;
        self.update(|s| {
            s.phase = PipelinePhase::Idle;
            s.last_plan = Some(plan.clone());
            s.last_report = Some(report.clone());
            s.runs += 1;
        });
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::capture::PermissionGrant;
    use crate::device::SimDevice;
    use crate::llm::{PlanResponse, ScriptedPlanner};
    use crate::ocr::TextBlock;
    use crate::screen::MemoryScreenshotStore;
    use crate::types::command::Command;
    use crate::types::error::ErrorKind;
    use crate::types::geometry::Rect;
    use crate::types::plan::PlanStatus;
    use crate::types::screen::OcrStatus;

    struct DownPlanner;

    /// Blocks until its run is cancelled.
    struct StallingPlanner;

    #[async_trait]
    impl Planner for StallingPlanner {
        async fn plan(&self, _: &PlanRequest, cancel: &CancellationToken) -> Result<PlanResponse, PlannerError> {
            cancel.cancelled().await;
            Err(PlannerError::Cancelled)
        }
    }

    #[async_trait]
    impl Planner for DownPlanner {
        async fn plan(&self, _: &PlanRequest, _: &CancellationToken) -> Result<PlanResponse, PlannerError> {
            Err(PlannerError::Status {
                status: 503,
                body: "maintenance".to_string(),
            })
        }
    }

    fn config() -> AgentConfig {
        let mut config = AgentConfig::default();
        config.plan.settle_delay_ms = 0;
        config.capture.width = 1080;
        config.capture.height = 2400;
        config
    }

    async fn started(device: &SimDevice, planner: Arc<dyn Planner>) -> Coordinator {
        let coordinator = Coordinator::new(
            device.ports(),
            Arc::new(MemoryScreenshotStore::new()),
            planner,
            &config(),
        );
        coordinator
            .capture()
            .start_session(&PermissionGrant::new("test"), device.width, device.height, 420)
            .await
            .unwrap();
        coordinator
    }

    fn idle_planner() -> Arc<dyn Planner> {
        Arc::new(ScriptedPlanner::new("nothing", Vec::new()))
    }

    #[tokio::test]
    async fn observe_fuses_all_sources() {
        let device = SimDevice::demo(1080, 2400);
        let coordinator = started(&device, idle_planner()).await;

        let state = coordinator.observe().await.unwrap();
        assert_eq!(state.metadata.width, 1080);
        assert_eq!(state.metadata.ocr_status, OcrStatus::Success);
        assert!(state.ocr_text.starts_with("Settings"));
        assert_eq!(state.metadata.accessibility_node_count, 12);
        assert!(state
            .ui_elements
            .iter()
            .any(|e| e.class_name.as_deref() == Some("android.widget.EditText")));
        assert_eq!(coordinator.state().last_screen_id, Some(state.id));
        assert_eq!(coordinator.state().phase, PipelinePhase::Idle);
    }

    #[tokio::test]
    async fn observe_reads_the_latest_ocr_result() {
        let device = SimDevice::demo(1080, 2400);
        let coordinator = started(&device, idle_planner()).await;
        device
            .ocr
            .set_blocks(vec![TextBlock::single("Wi-Fi", Rect::new(54, 150, 540, 300), 0.9)]);

        let state = coordinator.observe().await.unwrap();
        assert_eq!(state.metadata.ocr_status, OcrStatus::Success);
        assert!(state.ocr_text.contains("Wi-Fi"));
        assert!(!state.ocr_text.contains("Battery"));
    }

    #[tokio::test]
    async fn observe_requires_a_capture_session() {
        let device = SimDevice::demo(1080, 2400);
        let coordinator = Coordinator::new(
            device.ports(),
            Arc::new(MemoryScreenshotStore::new()),
            idle_planner(),
            &config(),
        );
        let err = coordinator.observe().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert!(!coordinator.is_busy());
    }

    #[tokio::test]
    async fn degraded_sources_still_produce_a_state() {
        let device = SimDevice::demo(1080, 2400);
        let coordinator = started(&device, idle_planner()).await;
        device.ocr.set_failing(true);
        device.accessibility.set_root(None);

        let state = coordinator.observe().await.unwrap();
        assert_eq!(state.metadata.ocr_status, OcrStatus::Error);
        assert!(state.metadata.ocr_error.is_some());
        assert!(!state.metadata.has_accessibility_data);
        assert!(state.ocr_text.is_empty());
    }

    #[tokio::test]
    async fn instruction_runs_end_to_end() {
        let device = SimDevice::demo(1080, 2400);
        let planner = Arc::new(ScriptedPlanner::new(
            "search for wifi",
            vec![Command::Tap { x: 540, y: 390 }, Command::InputText { text: "wifi".to_string() }],
        ));
        let coordinator = started(&device, planner.clone()).await;
        let mut events = coordinator.subscribe();

        let report = coordinator.run_instruction("find wifi settings").await.unwrap();
        assert_eq!(report.status, PlanStatus::Completed);
        assert_eq!(report.executed, 2);
        assert_eq!(planner.calls(), 1);
        assert_eq!(device.gestures.dispatched().len(), 1);

        let search = device.accessibility.sim_root().unwrap().children()[1].clone();
        assert_eq!(search.current_text().as_deref(), Some("wifi"));

        let first = events.try_recv().unwrap();
        assert_eq!(first.event_type(), "plan_started");
        let state = coordinator.state();
        assert_eq!(state.runs, 1);
        assert_eq!(state.instruction, "find wifi settings");
        assert_eq!(state.last_report.map(|r| r.status), Some(PlanStatus::Completed));
    }

    #[tokio::test]
    async fn planner_failure_short_circuits() {
        let device = SimDevice::demo(1080, 2400);
        let coordinator = started(&device, Arc::new(DownPlanner)).await;

        let err = coordinator.run_instruction("anything").await.unwrap_err();
        assert!(matches!(err, PipelineError::Planner(PlannerError::Status { status: 503, .. })));
        assert!(device.gestures.dispatched().is_empty());
        assert_eq!(coordinator.state().runs, 0);
        assert!(!coordinator.is_busy());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn second_run_is_rejected_and_cancel_stops_the_first() {
        let device = SimDevice::demo(1080, 2400);
        let coordinator = Arc::new(started(&device, idle_planner()).await);

        let plan = ActionPlan::new(
            "slow",
            vec![
                Command::Wait { duration_ms: 300 },
                Command::Tap { x: 10, y: 10 },
                Command::Tap { x: 20, y: 20 },
            ],
        );
        let runner = coordinator.clone();
        let handle = tokio::spawn(async move { runner.execute_plan(plan).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(coordinator.is_busy());
        assert!(matches!(coordinator.observe().await, Err(PipelineError::Busy)));

        coordinator.cancel();
        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.status, PlanStatus::Cancelled);
        assert_eq!(report.executed, 1);
        assert!(device.gestures.dispatched().is_empty());
        assert!(!coordinator.is_busy());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancel_reaches_a_run_as_soon_as_it_is_busy() {
        let device = SimDevice::demo(1080, 2400);
        let coordinator = Arc::new(started(&device, Arc::new(StallingPlanner)).await);

        let runner = coordinator.clone();
        let handle = tokio::spawn(async move { runner.run_instruction("open wifi").await });
        while !coordinator.is_busy() {
            tokio::task::yield_now().await;
        }
        // 忙碌标志一旦可见，本次运行的令牌已经就位
        coordinator.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("run ignored the cancel")
            .unwrap();
        assert!(matches!(result, Err(PipelineError::Cancelled)));
        assert!(device.gestures.dispatched().is_empty());
        assert!(!coordinator.is_busy());
    }
}
