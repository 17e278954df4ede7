use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::geometry::Rect;

/// Stable handle to a persisted screenshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScreenshotRef {
    pub uri: String,
}

impl ScreenshotRef {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBoundingBox {
    pub text: String,
    pub rect: Rect,
    pub confidence: f32,
}

/// Flattened accessibility node, annotated with its ancestor path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiElement {
    pub class_name: Option<String>,
    pub text: Option<String>,
    pub content_description: Option<String>,
    pub resource_id: Option<String>,
    pub package_name: Option<String>,
    pub bounds: Rect,
    pub is_clickable: bool,
    pub is_focusable: bool,
    pub is_enabled: bool,
    pub is_visible: bool,
    pub depth: usize,
    pub view_hierarchy: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrStatus {
    Success,
    NoTextFound,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenMetadata {
    pub width: u32,
    pub height: u32,
    pub density_dpi: u32,
    pub ocr_status: OcrStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr_error: Option<String>,
    pub ocr_block_count: usize,
    pub has_accessibility_data: bool,
    pub accessibility_node_count: usize,
}

/// One aggregated observation of the screen. All rectangles are in
/// full-screen pixel space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenState {
    pub id: String,
    pub screenshot: ScreenshotRef,
    pub timestamp: DateTime<Utc>,
    pub ocr_text: String,
    pub ocr_bounding_boxes: Vec<TextBoundingBox>,
    pub ui_elements: Vec<UiElement>,
    pub metadata: ScreenMetadata,
}

impl ScreenState {
    /// Compact text rendering for planner prompts.
    pub fn describe(&self) -> String {
        let mut out = format!(
            "Screen {}x{} @{}dpi\nText: {}\n",
            self.metadata.width, self.metadata.height, self.metadata.density_dpi, self.ocr_text
        );
        for el in self.ui_elements.iter().filter(|e| e.is_visible) {
            let label = el
                .text
                .as_deref()
                .or(el.content_description.as_deref())
                .unwrap_or("");
            out.push_str(&format!(
                "- [{}] {:?} clickable={} at ({},{})-({},{})\n",
                el.view_hierarchy,
                label,
                el.is_clickable,
                el.bounds.left,
                el.bounds.top,
                el.bounds.right,
                el.bounds.bottom
            ));
        }
        out
    }
}
