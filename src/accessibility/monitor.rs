use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::tree::{AccessibilitySnapshotter, UiTree};

/// Keeps the latest accessibility snapshot fresh.
///
/// Change notifications are debounced, then the tree is re-walked and
/// published into a single `watch` slot. Older snapshots are simply replaced.
pub struct AccessibilityMonitor {
    latest: watch::Receiver<Option<Arc<UiTree>>>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AccessibilityMonitor {
    pub fn spawn(snapshotter: Arc<AccessibilitySnapshotter>, debounce: Duration) -> Self {
        Self::spawn_with_token(snapshotter, debounce, CancellationToken::new())
    }

    pub fn spawn_with_token(
        snapshotter: Arc<AccessibilitySnapshotter>,
        debounce: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = watch::channel(None);
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            run(snapshotter, debounce, tx, token).await;
        });
        Self {
            latest: rx,
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn latest(&self) -> Option<Arc<UiTree>> {
        self.latest.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<UiTree>>> {
        self.latest.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Cancels the loop and waits for it to exit. Safe to call more than once.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = match self.handle.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "accessibility monitor task ended abnormally");
            }
        }
    }
}

impl Drop for AccessibilityMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    snapshotter: Arc<AccessibilitySnapshotter>,
    debounce: Duration,
    tx: watch::Sender<Option<Arc<UiTree>>>,
    cancel: CancellationToken,
) {
    let events = snapshotter.provider().events();
    publish(&snapshotter, &tx);
    info!("accessibility monitor started");

    'outer: loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = events.recv() => {
                if next.is_err() {
                    debug!("accessibility event channel closed");
                    break;
                }
            }
        }

        // 合并防抖窗口内的后续事件
        let deadline = tokio::time::sleep(debounce);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break 'outer,
                _ = &mut deadline => break,
                next = events.recv() => match next {
                    Ok(_) => deadline.as_mut().reset(Instant::now() + debounce),
                    Err(_) => break,
                },
            }
        }

        publish(&snapshotter, &tx);
    }
    info!("accessibility monitor stopped");
}

fn publish(snapshotter: &AccessibilitySnapshotter, tx: &watch::Sender<Option<Arc<UiTree>>>) {
    match snapshotter.snapshot() {
        Ok(tree) => {
            debug!(nodes = tree.len(), "accessibility snapshot refreshed");
            tx.send_replace(Some(Arc::new(tree)));
        }
        Err(e) => {
            debug!(error = %e, "no accessibility snapshot available");
            tx.send_replace(None);
        }
    }
}
