pub mod gesture;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::accessibility::{find_live_bfs, AccessibilityProvider, GlobalAction, NativeNode, NodeActionError};
use crate::config::ExecutorConfig;
use crate::types::command::{Command, ScrollDirection};
use crate::types::error::ErrorKind;
use crate::types::geometry::{Point, Rect};
use crate::types::plan::CommandResult;

pub use gesture::{DispatchError, Gesture, GestureOutcome, GestureSurface, StrokePath};

/// Clears the in-flight flag on every exit path.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Turns one [`Command`] into a platform gesture or semantic action.
///
/// At most one command runs at a time: a call that arrives while another is
/// in flight fails immediately with `InvalidState`. Every path, including
/// validation and dispatch failures, ends in a [`CommandResult`].
pub struct ActionExecutor {
    accessibility: Arc<dyn AccessibilityProvider>,
    gestures: Arc<dyn GestureSurface>,
    config: ExecutorConfig,
    in_flight: AtomicBool,
}

impl ActionExecutor {
    pub fn new(
        accessibility: Arc<dyn AccessibilityProvider>,
        gestures: Arc<dyn GestureSurface>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            accessibility,
            gestures,
            config,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// An active window exists and nothing is executing.
    pub fn is_ready(&self) -> bool {
        !self.is_busy() && self.accessibility.root().is_some()
    }

    pub async fn execute(&self, command: &Command) -> CommandResult {
        let started = Instant::now();
        let result = self.execute_inner(command).await;
        let elapsed = started.elapsed().as_millis() as u64;

        if result.success {
            debug!(command = %command, elapsed_ms = elapsed, "command succeeded");
        } else {
            warn!(
                command = %command,
                kind = ?result.error_kind,
                message = result.message.as_deref().unwrap_or(""),
                "command failed"
            );
        }
        result.with_duration(elapsed)
    }

    async fn execute_inner(&self, command: &Command) -> CommandResult {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return CommandResult::failure(ErrorKind::InvalidState, "another command executing");
        }
        let _guard = InFlightGuard(&self.in_flight);

        let Some(root) = self.accessibility.root() else {
            return CommandResult::failure(
                ErrorKind::ServiceNotAvailable,
                "accessibility service has no active window",
            );
        };
        let display = root.info().ok().map(|i| i.bounds).filter(|b| !b.is_empty());

        info!(command = %command, "executing command");
        match command {
            Command::Tap { x, y } => {
                if let Err(msg) = validate_points(&command.points(), display) {
                    return CommandResult::failure(ErrorKind::InvalidCoordinates, msg);
                }
                self.dispatch(Gesture::tap(Point::new(*x, *y), self.config.tap_duration_ms))
                    .await
            }
            Command::Swipe { x1, y1, x2, y2, duration_ms } => {
                if let Err(msg) = validate_points(&command.points(), display) {
                    return CommandResult::failure(ErrorKind::InvalidCoordinates, msg);
                }
                let gesture =
                    Gesture::swipe(Point::new(*x1, *y1), Point::new(*x2, *y2), *duration_ms);
                self.dispatch(gesture).await
            }
            Command::Scroll { direction, duration_ms } => {
                self.scroll(root, display, *direction, *duration_ms).await
            }
            Command::InputText { text } => self.input_text(root, text),
            Command::Wait { duration_ms } => {
                tokio::time::sleep(Duration::from_millis(*duration_ms)).await;
                CommandResult::ok()
            }
            Command::Back => self.global(GlobalAction::Back),
            Command::Home => self.global(GlobalAction::Home),
            Command::RecentApps => self.global(GlobalAction::Recents),
        }
    }

    /// Dispatches `gesture` and waits for the platform's completion signal.
    async fn dispatch(&self, gesture: Gesture) -> CommandResult {
        let budget = self.config.gesture_timeout() + Duration::from_millis(gesture.total_duration_ms());
        let (tx, rx) = oneshot::channel();

        if let Err(e) = self.gestures.dispatch(gesture, tx) {
            return CommandResult::failure(ErrorKind::GestureDispatchFailed, e.to_string());
        }

        match tokio::time::timeout(budget, rx).await {
            Ok(Ok(GestureOutcome::Completed)) => CommandResult::ok(),
            Ok(Ok(GestureOutcome::Cancelled)) => CommandResult::failure(
                ErrorKind::GestureDispatchFailed,
                "gesture cancelled by the platform",
            ),
            Ok(Err(_)) => CommandResult::failure(
                ErrorKind::GestureDispatchFailed,
                "gesture completion was never signalled",
            ),
            Err(_) => CommandResult::failure(
                ErrorKind::Timeout,
                format!("gesture did not complete within {} ms", budget.as_millis()),
            ),
        }
    }

    async fn scroll(
        &self,
        root: Arc<dyn NativeNode>,
        display: Option<Rect>,
        direction: ScrollDirection,
        duration_ms: u64,
    ) -> CommandResult {
        let target = find_live_bfs(root, self.config.search_limit, |i| {
            i.is_scrollable && i.is_visible && i.is_enabled
        });
        if let Some((node, info)) = target {
            if node.scroll(direction) {
                return CommandResult::ok();
            }
            debug!(node = ?info.class_name, "scrollable node refused the action");
        }

        // 找不到可滚动节点时退化为屏幕中心滑动
        let Some(screen) = display else {
            return CommandResult::failure(
                ErrorKind::ServiceNotAvailable,
                "display bounds unknown, cannot synthesize scroll",
            );
        };
        info!(direction = direction.as_str(), "no scrollable node, falling back to a centre swipe");
        self.dispatch(Gesture::scroll_fallback(screen, direction, duration_ms)).await
    }

    fn input_text(&self, root: Arc<dyn NativeNode>, text: &str) -> CommandResult {
        let Some((node, _)) = find_live_bfs(root, self.config.search_limit, |i| {
            i.is_focused && i.is_editable
        }) else {
            return CommandResult::failure(ErrorKind::FocusNotFound, "no focused editable node");
        };

        match node.set_text(text) {
            Ok(()) => CommandResult::ok(),
            Err(NodeActionError::PermissionDenied(msg)) => {
                CommandResult::failure(ErrorKind::PermissionDenied, msg)
            }
            Err(e) => CommandResult::failure(ErrorKind::InputMethodNotActive, e.to_string()),
        }
    }

    fn global(&self, action: GlobalAction) -> CommandResult {
        if self.accessibility.perform_global(action) {
            CommandResult::ok()
        } else {
            CommandResult::failure(
                ErrorKind::GestureDispatchFailed,
                format!("global action {:?} was refused", action),
            )
        }
    }
}

/// Every point must lie in `[0, max]` of the command's own extent and, when
/// the display is known, inside the display.
fn validate_points(points: &[Point], display: Option<Rect>) -> Result<(), String> {
    let max_x = points.iter().map(|p| p.x).max().unwrap_or(0);
    let max_y = points.iter().map(|p| p.y).max().unwrap_or(0);
    for p in points {
        if !p.is_valid(max_x, max_y) {
            return Err(format!("({}, {}) is negative", p.x, p.y));
        }
        if let Some(d) = display {
            if !p.is_valid(d.right - 1, d.bottom - 1) {
                return Err(format!(
                    "({}, {}) is outside the {}x{} display",
                    p.x,
                    p.y,
                    d.width(),
                    d.height()
                ));
            }
        }
    }
    Ok(())
}
