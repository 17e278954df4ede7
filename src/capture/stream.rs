use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{CaptureSurface, Frame};

/// Periodic frame delivery. Holds only the latest frame: a consumer slower
/// than the period sees the newest frame and never a backlog.
pub struct FrameStream {
    rx: watch::Receiver<Option<Frame>>,
    cancel: CancellationToken,
}

impl FrameStream {
    pub(crate) fn spawn(
        surface: Arc<dyn CaptureSurface>,
        period: Duration,
        density_dpi: u32,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = watch::channel(None);
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if tx.is_closed() {
                            debug!("frame stream has no consumers left");
                            break;
                        }
                        if let Some(image) = surface.latest_frame() {
                            trace!("publishing frame");
                            tx.send_replace(Some(Frame::new(image, density_dpi)));
                        }
                    }
                }
            }
        });
        (Self { rx, cancel }, handle)
    }

    /// Waits for a frame newer than the last one returned. `None` once the
    /// stream or its session has stopped.
    pub async fn next(&mut self) -> Option<Frame> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            changed = self.rx.changed() => match changed {
                Ok(()) => self.rx.borrow_and_update().clone(),
                Err(_) => None,
            },
        }
    }

    pub fn latest(&self) -> Option<Frame> {
        self.rx.borrow().clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for FrameStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
