use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

use crate::executor::gesture::{DispatchError, Gesture, GestureOutcome, GestureSurface};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureMode {
    /// Resolve as completed immediately.
    Complete,
    /// Resolve as completed after the gesture's own duration.
    Realtime,
    /// Platform cancels the stroke.
    Cancel,
    /// Never resolve.
    Hang,
    /// Refuse the dispatch outright.
    Reject,
}

type CompletionHook = Box<dyn Fn(usize) + Send + Sync>;

/// Records gestures and resolves them according to a [`GestureMode`].
pub struct SimGestureSurface {
    mode: Mutex<GestureMode>,
    log: Mutex<Vec<Gesture>>,
    completed: AtomicUsize,
    parked: Mutex<Vec<oneshot::Sender<GestureOutcome>>>,
    on_complete: Mutex<Option<CompletionHook>>,
}

impl Default for SimGestureSurface {
    fn default() -> Self {
        Self::new(GestureMode::Complete)
    }
}

impl SimGestureSurface {
    pub fn new(mode: GestureMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            log: Mutex::new(Vec::new()),
            completed: AtomicUsize::new(0),
            parked: Mutex::new(Vec::new()),
            on_complete: Mutex::new(None),
        }
    }

    pub fn set_mode(&self, mode: GestureMode) {
        if let Ok(mut m) = self.mode.lock() {
            *m = mode;
        }
    }

    pub fn mode(&self) -> GestureMode {
        self.mode.lock().map(|m| *m).unwrap_or(GestureMode::Reject)
    }

    pub fn dispatched(&self) -> Vec<Gesture> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Called with the running completion count each time a gesture completes,
    /// before the completion is delivered.
    pub fn on_complete<F>(&self, hook: F)
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        if let Ok(mut slot) = self.on_complete.lock() {
            *slot = Some(Box::new(hook));
        }
    }

    /// Resolves every hanging gesture as completed.
    pub fn release_parked(&self) {
        let parked = self
            .parked
            .lock()
            .map(|mut p| std::mem::take(&mut *p))
            .unwrap_or_default();
        for tx in parked {
            let _ = tx.send(GestureOutcome::Completed);
        }
    }

    fn complete(&self, done: oneshot::Sender<GestureOutcome>) {
        let n = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(hook) = self.on_complete.lock() {
            if let Some(hook) = hook.as_ref() {
                hook(n);
            }
        }
        let _ = done.send(GestureOutcome::Completed);
    }
}

impl GestureSurface for SimGestureSurface {
    fn dispatch(
        &self,
        gesture: Gesture,
        done: oneshot::Sender<GestureOutcome>,
    ) -> Result<(), DispatchError> {
        let mode = self.mode();
        if mode == GestureMode::Reject {
            return Err(DispatchError::Rejected("injection disabled".to_string()));
        }
        debug!(?mode, strokes = gesture.strokes.len(), "simulated gesture dispatched");
        let duration = Duration::from_millis(gesture.total_duration_ms());
        if let Ok(mut log) = self.log.lock() {
            log.push(gesture);
        }

        match mode {
            GestureMode::Complete => self.complete(done),
            GestureMode::Realtime => {
                tokio::spawn(async move {
                    tokio::time::sleep(duration).await;
                    let _ = done.send(GestureOutcome::Completed);
                });
            }
            GestureMode::Cancel => {
                let _ = done.send(GestureOutcome::Cancelled);
            }
            GestureMode::Hang => {
                if let Ok(mut parked) = self.parked.lock() {
                    parked.push(done);
                }
            }
            GestureMode::Reject => {}
        }
        Ok(())
    }
}
