use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use super::node::SimNode;
use crate::accessibility::{AccessibilityEvent, AccessibilityProvider, GlobalAction, NativeNode};

/// Accessibility service over a swappable [`SimNode`] tree.
pub struct SimAccessibility {
    root: Mutex<Option<Arc<SimNode>>>,
    events_tx: async_channel::Sender<AccessibilityEvent>,
    events_rx: async_channel::Receiver<AccessibilityEvent>,
    globals: Mutex<Vec<GlobalAction>>,
    global_ok: AtomicBool,
}

impl SimAccessibility {
    pub fn new(root: Option<Arc<SimNode>>) -> Self {
        let (events_tx, events_rx) = async_channel::unbounded();
        Self {
            root: Mutex::new(root),
            events_tx,
            events_rx,
            globals: Mutex::new(Vec::new()),
            global_ok: AtomicBool::new(true),
        }
    }

    pub fn set_root(&self, root: Option<Arc<SimNode>>) {
        if let Ok(mut slot) = self.root.lock() {
            *slot = root;
        }
    }

    pub fn sim_root(&self) -> Option<Arc<SimNode>> {
        self.root.lock().ok().and_then(|r| r.clone())
    }

    pub fn notify(&self, event: AccessibilityEvent) {
        if let Err(e) = self.events_tx.try_send(event) {
            debug!(error = %e, "dropping accessibility event");
        }
    }

    /// Makes every subsequent global action report failure (or success again).
    pub fn set_global_result(&self, ok: bool) {
        self.global_ok.store(ok, Ordering::SeqCst);
    }

    pub fn global_log(&self) -> Vec<GlobalAction> {
        self.globals.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

impl AccessibilityProvider for SimAccessibility {
    fn root(&self) -> Option<Arc<dyn NativeNode>> {
        let root = self.sim_root()?;
        Some(root)
    }

    fn events(&self) -> async_channel::Receiver<AccessibilityEvent> {
        self.events_rx.clone()
    }

    fn perform_global(&self, action: GlobalAction) -> bool {
        if let Ok(mut log) = self.globals.lock() {
            log.push(action);
        }
        let ok = self.global_ok.load(Ordering::SeqCst);
        if ok {
            self.notify(AccessibilityEvent::WindowChanged);
        }
        ok
    }
}
