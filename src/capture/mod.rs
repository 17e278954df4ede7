pub mod session;
pub mod stream;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use image::RgbaImage;
use tokio_util::sync::CancellationToken;

use crate::types::error::CaptureError;

pub use session::{CaptureSession, CaptureState};
pub use stream::FrameStream;

/// Token handed over by the platform once the user consents to screen capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionGrant {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl PermissionGrant {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_at: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.token.trim().is_empty() && self.expires_at.map_or(true, |at| at > Utc::now())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceSpec {
    pub width: u32,
    pub height: u32,
    pub density_dpi: u32,
}

/// One captured bitmap.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: Arc<RgbaImage>,
    pub captured_at: DateTime<Utc>,
    pub density_dpi: u32,
}

impl Frame {
    pub fn new(image: Arc<RgbaImage>, density_dpi: u32) -> Self {
        Self {
            image,
            captured_at: Utc::now(),
            density_dpi,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Opens platform capture surfaces.
pub trait CaptureBackend: Send + Sync {
    fn open(
        &self,
        grant: &PermissionGrant,
        spec: SurfaceSpec,
    ) -> Result<Arc<dyn CaptureSurface>, CaptureError>;
}

/// An open virtual display plus the buffer it renders into.
pub trait CaptureSurface: Send + Sync {
    /// Most recent buffered frame, if the display has produced one.
    fn latest_frame(&self) -> Option<Arc<RgbaImage>>;

    /// Releases the display, the frame sink and the capture handle.
    fn release(&self);

    /// Cancelled by the platform when it revokes capture mid-session.
    fn revoked(&self) -> CancellationToken;
}
