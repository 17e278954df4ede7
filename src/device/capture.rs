use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use image::RgbaImage;
use tokio_util::sync::CancellationToken;

use crate::capture::{CaptureBackend, CaptureSurface, PermissionGrant, SurfaceSpec};
use crate::types::error::CaptureError;

#[derive(Default)]
struct SimDisplay {
    latest: Mutex<Option<Arc<RgbaImage>>>,
    revoke: Mutex<CancellationToken>,
    opened: AtomicUsize,
    released: AtomicUsize,
}

/// Virtual display whose buffer is filled by [`push_frame`](Self::push_frame).
#[derive(Default)]
pub struct SimCaptureBackend {
    display: Arc<SimDisplay>,
}

impl SimCaptureBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_frame(&self, image: RgbaImage) {
        if let Ok(mut slot) = self.display.latest.lock() {
            *slot = Some(Arc::new(image));
        }
    }

    /// The platform withdraws capture permission from the open surface.
    pub fn revoke(&self) {
        if let Ok(token) = self.display.revoke.lock() {
            token.cancel();
        }
    }

    pub fn open_count(&self) -> usize {
        self.display.opened.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> usize {
        self.display.released.load(Ordering::SeqCst)
    }
}

impl CaptureBackend for SimCaptureBackend {
    fn open(
        &self,
        grant: &PermissionGrant,
        _spec: SurfaceSpec,
    ) -> Result<Arc<dyn CaptureSurface>, CaptureError> {
        if !grant.is_valid() {
            return Err(CaptureError::PermissionDenied("grant rejected".to_string()));
        }
        let token = CancellationToken::new();
        if let Ok(mut slot) = self.display.revoke.lock() {
            *slot = token.clone();
        }
        self.display.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(SimSurface {
            display: Arc::clone(&self.display),
            revoked: token,
        }))
    }
}

struct SimSurface {
    display: Arc<SimDisplay>,
    revoked: CancellationToken,
}

impl CaptureSurface for SimSurface {
    fn latest_frame(&self) -> Option<Arc<RgbaImage>> {
        self.display.latest.lock().ok().and_then(|f| f.clone())
    }

    fn release(&self) {
        self.display.released.fetch_add(1, Ordering::SeqCst);
    }

    fn revoked(&self) -> CancellationToken {
        self.revoked.clone()
    }
}
