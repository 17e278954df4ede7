use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::stream::FrameStream;
use super::{CaptureBackend, CaptureSurface, Frame, PermissionGrant, SurfaceSpec};
use crate::config::CaptureConfig;
use crate::types::error::CaptureError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Starting,
    Capturing,
    /// Torn down by the platform. A new grant is needed to start again.
    Stopped,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureState::Idle => "idle",
            CaptureState::Starting => "starting",
            CaptureState::Capturing => "capturing",
            CaptureState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

struct Inner {
    state: CaptureState,
    surface: Option<Arc<dyn CaptureSurface>>,
    spec: Option<SurfaceSpec>,
    session_token: Option<CancellationToken>,
    tasks: Vec<JoinHandle<()>>,
    generation: u64,
}

struct Shared {
    inner: Mutex<Inner>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Common teardown for explicit stops and platform revocation.
    ///
    /// `generation` restricts the teardown to one particular session so a
    /// late revocation signal cannot stop its successor.
    fn teardown(&self, next: CaptureState, generation: Option<u64>) -> Vec<JoinHandle<()>> {
        let (surface, tasks) = {
            let mut inner = self.lock();
            if let Some(generation) = generation {
                if inner.generation != generation {
                    return Vec::new();
                }
            }
            if let Some(token) = inner.session_token.take() {
                token.cancel();
            }
            inner.state = next;
            inner.spec = None;
            (inner.surface.take(), std::mem::take(&mut inner.tasks))
        };
        // 锁外释放
        if let Some(surface) = surface {
            surface.release();
            info!(state = %next, "capture surface released");
        }
        tasks
    }
}

/// Owns the capture surface and its background work.
///
/// `Idle -> Starting -> Capturing -> (Idle | Stopped)`. Both exits run the
/// same teardown, which cancels the revocation watcher and every stream pump.
pub struct CaptureSession {
    backend: Arc<dyn CaptureBackend>,
    config: CaptureConfig,
    shared: Arc<Shared>,
}

impl CaptureSession {
    pub fn new(backend: Arc<dyn CaptureBackend>, config: CaptureConfig) -> Self {
        Self {
            backend,
            config,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: CaptureState::Idle,
                    surface: None,
                    spec: None,
                    session_token: None,
                    tasks: Vec::new(),
                    generation: 0,
                }),
            }),
        }
    }

    pub fn state(&self) -> CaptureState {
        self.shared.lock().state
    }

    pub fn spec(&self) -> Option<SurfaceSpec> {
        self.shared.lock().spec
    }

    pub async fn start_session(
        &self,
        grant: &PermissionGrant,
        width: u32,
        height: u32,
        density_dpi: u32,
    ) -> Result<(), CaptureError> {
        let generation = {
            let mut inner = self.shared.lock();
            match inner.state {
                CaptureState::Starting | CaptureState::Capturing => {
                    return Err(CaptureError::AlreadyStarted)
                }
                CaptureState::Idle | CaptureState::Stopped => {}
            }
            if !grant.is_valid() {
                return Err(CaptureError::PermissionDenied(
                    "capture grant is missing or expired".to_string(),
                ));
            }
            if width == 0 || height == 0 {
                return Err(CaptureError::Backend(format!(
                    "invalid surface size {}x{}",
                    width, height
                )));
            }
            inner.state = CaptureState::Starting;
            inner.generation += 1;
            inner.generation
        };

        let spec = SurfaceSpec {
            width,
            height,
            density_dpi,
        };
        let surface = match self.backend.open(grant, spec) {
            Ok(surface) => surface,
            Err(e) => {
                warn!(error = %e, "failed to open capture surface");
                self.shared.lock().state = CaptureState::Idle;
                return Err(e);
            }
        };

        let token = CancellationToken::new();
        let watcher = {
            let shared = Arc::clone(&self.shared);
            let revoked = surface.revoked();
            let token = token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = revoked.cancelled() => {
                        warn!("capture permission revoked by the platform, tearing down");
                        // 撤销与主动停止走同一条路径
                        let _ = shared.teardown(CaptureState::Stopped, Some(generation));
                    }
                }
            })
        };

        let mut inner = self.shared.lock();
        if inner.state != CaptureState::Starting || inner.generation != generation {
            // stopped while the surface was opening
            drop(inner);
            token.cancel();
            surface.release();
            return Err(CaptureError::NotCapturing(self.state().to_string()));
        }
        inner.surface = Some(surface);
        inner.spec = Some(spec);
        inner.session_token = Some(token);
        inner.tasks.push(watcher);
        inner.state = CaptureState::Capturing;
        info!(width, height, density_dpi, "capture session started");
        Ok(())
    }

    fn active_surface(&self) -> Result<(Arc<dyn CaptureSurface>, SurfaceSpec, CancellationToken), CaptureError> {
        let inner = self.shared.lock();
        match (&inner.state, &inner.surface, &inner.spec, &inner.session_token) {
            (CaptureState::Capturing, Some(surface), Some(spec), Some(token)) => {
                Ok((Arc::clone(surface), *spec, token.clone()))
            }
            _ => Err(CaptureError::NotCapturing(inner.state.to_string())),
        }
    }

    /// Returns the newest buffered frame, waiting at most the configured
    /// grace period for one to appear.
    pub async fn capture_once(&self) -> Result<Frame, CaptureError> {
        let (surface, spec, token) = self.active_surface()?;
        let grace = self.config.grace();
        let deadline = Instant::now() + grace;

        loop {
            if let Some(image) = surface.latest_frame() {
                return Ok(Frame::new(image, spec.density_dpi));
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(grace_ms = grace.as_millis() as u64, "no frame within grace period");
                return Err(CaptureError::FrameUnavailable(grace.as_millis() as u64));
            }
            let wait = self.config.poll_interval().min(deadline - now);
            tokio::select! {
                _ = token.cancelled() => {
                    return Err(CaptureError::NotCapturing(self.state().to_string()));
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Starts periodic delivery of the latest frame every `period`.
    pub fn start_stream(&self, period: Duration) -> Result<FrameStream, CaptureError> {
        if period.is_zero() {
            return Err(CaptureError::Backend("stream period must be non-zero".to_string()));
        }
        let (surface, spec, token) = self.active_surface()?;
        let (stream, handle) = FrameStream::spawn(surface, period, spec.density_dpi, token.child_token());
        let mut inner = self.shared.lock();
        // 已结束的流任务不再保留句柄
        inner.tasks.retain(|task| !task.is_finished());
        inner.tasks.push(handle);
        Ok(stream)
    }

    /// Releases everything the session holds. Idempotent.
    pub async fn stop_session(&self) {
        let tasks = self.shared.teardown(CaptureState::Idle, None);
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "capture task ended abnormally");
            }
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        let tasks = self.shared.teardown(CaptureState::Idle, None);
        for task in tasks {
            task.abort();
        }
    }
}
