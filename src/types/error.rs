use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure taxonomy shared by every component. Results carry a kind rather
/// than a concrete error type so callers can branch without downcasting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PermissionDenied,
    ServiceNotAvailable,
    InvalidState,
    InvalidCoordinates,
    FocusNotFound,
    InputMethodNotActive,
    GestureDispatchFailed,
    Timeout,
    StorageError,
    EngineFailure,
    NoTextFound,
    AggregationError,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::ServiceNotAvailable => "service_not_available",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::InvalidCoordinates => "invalid_coordinates",
            ErrorKind::FocusNotFound => "focus_not_found",
            ErrorKind::InputMethodNotActive => "input_method_not_active",
            ErrorKind::GestureDispatchFailed => "gesture_dispatch_failed",
            ErrorKind::Timeout => "timeout",
            ErrorKind::StorageError => "storage_error",
            ErrorKind::EngineFailure => "engine_failure",
            ErrorKind::NoTextFound => "no_text_found",
            ErrorKind::AggregationError => "aggregation_error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Capture permission denied: {0}")]
    PermissionDenied(String),

    #[error("No frame available within {0} ms")]
    FrameUnavailable(u64),

    #[error("Capture session is not active (state: {0})")]
    NotCapturing(String),

    #[error("Capture session already started")]
    AlreadyStarted,

    #[error("Capture backend error: {0}")]
    Backend(String),
}

impl CaptureError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CaptureError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            CaptureError::FrameUnavailable(_) => ErrorKind::Timeout,
            CaptureError::NotCapturing(_) | CaptureError::AlreadyStarted => ErrorKind::InvalidState,
            CaptureError::Backend(_) => ErrorKind::ServiceNotAvailable,
        }
    }
}

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR engine failure: {0}")]
    EngineFailure(String),

    #[error("OCR timed out after {0} ms")]
    Timeout(u64),
}

impl OcrError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OcrError::EngineFailure(_) => ErrorKind::EngineFailure,
            OcrError::Timeout(_) => ErrorKind::Timeout,
        }
    }
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("No active window")]
    NoActiveWindow,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to encode screenshot: {0}")]
    Encode(String),

    #[error("Screenshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Join(String),
}

#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("Screenshot could not be persisted: {0}")]
    Storage(#[from] StorageError),

    #[error("Frame has no pixels")]
    EmptyFrame,
}

impl AggregationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AggregationError::Storage(_) => ErrorKind::StorageError,
            AggregationError::EmptyFrame => ErrorKind::AggregationError,
        }
    }
}

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("Planner transport error: {0}")]
    Transport(String),

    #[error("Planner returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Planner response could not be parsed: {0}")]
    Parse(String),

    #[error("Planner request cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Upstream failures of the coordinator pipeline. Any of these stops the
/// run before a plan reaches execution.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Another plan is already running")]
    Busy,

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Aggregation(#[from] AggregationError),

    #[error(transparent)]
    Planner(#[from] PlannerError),

    #[error("Pipeline cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Busy => ErrorKind::InvalidState,
            PipelineError::Capture(e) => e.kind(),
            PipelineError::Aggregation(e) => e.kind(),
            PipelineError::Planner(_) => ErrorKind::ServiceNotAvailable,
            PipelineError::Cancelled => ErrorKind::InvalidState,
        }
    }
}
