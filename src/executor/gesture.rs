use thiserror::Error;
use tokio::sync::oneshot;

use crate::types::command::ScrollDirection;
use crate::types::geometry::{Point, Rect};

/// One finger's path, in screen pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrokePath {
    pub points: Vec<Point>,
    pub start_delay_ms: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gesture {
    pub strokes: Vec<StrokePath>,
}

impl Gesture {
    pub fn tap(at: Point, duration_ms: u64) -> Self {
        Self {
            strokes: vec![StrokePath {
                points: vec![at],
                start_delay_ms: 0,
                duration_ms: duration_ms.max(1),
            }],
        }
    }

    pub fn swipe(from: Point, to: Point, duration_ms: u64) -> Self {
        Self {
            strokes: vec![StrokePath {
                points: vec![from, to],
                start_delay_ms: 0,
                duration_ms: duration_ms.max(1),
            }],
        }
    }

    /// Swipe across the centre of `screen` that scrolls content in `direction`.
    ///
    /// Scrolling down reveals content below, so the finger travels upward.
    /// Each axis spans a quarter of the screen on either side of centre.
    pub fn scroll_fallback(screen: Rect, direction: ScrollDirection, duration_ms: u64) -> Self {
        let c = screen.center();
        let dx = screen.width() / 4;
        let dy = screen.height() / 4;
        let (from, to) = match direction {
            ScrollDirection::Down => (Point::new(c.x, c.y + dy), Point::new(c.x, c.y - dy)),
            ScrollDirection::Up => (Point::new(c.x, c.y - dy), Point::new(c.x, c.y + dy)),
            ScrollDirection::Right => (Point::new(c.x + dx, c.y), Point::new(c.x - dx, c.y)),
            ScrollDirection::Left => (Point::new(c.x - dx, c.y), Point::new(c.x + dx, c.y)),
        };
        Self::swipe(from, to, duration_ms)
    }

    pub fn total_duration_ms(&self) -> u64 {
        self.strokes
            .iter()
            .map(|s| s.start_delay_ms + s.duration_ms)
            .max()
            .unwrap_or(0)
    }
}

/// Platform verdict on a dispatched gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureOutcome {
    Completed,
    Cancelled,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("gesture rejected by the platform: {0}")]
    Rejected(String),

    #[error("gesture surface is not available")]
    Unavailable,
}

/// Injects synthetic gestures.
///
/// Accepting a gesture says nothing about its completion: the platform
/// resolves `done` exactly once when the stroke finishes or is cancelled.
pub trait GestureSurface: Send + Sync {
    fn dispatch(
        &self,
        gesture: Gesture,
        done: oneshot::Sender<GestureOutcome>,
    ) -> Result<(), DispatchError>;
}
