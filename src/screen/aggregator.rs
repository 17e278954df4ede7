use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::store::ScreenshotStore;
use crate::accessibility::UiTree;
use crate::capture::Frame;
use crate::ocr::OcrOutcome;
use crate::types::error::AggregationError;
use crate::types::screen::{OcrStatus, ScreenMetadata, ScreenState, TextBoundingBox};

/// Fuses a frame, its OCR result and an accessibility snapshot into one
/// [`ScreenState`].
///
/// Callers serialize aggregation themselves; two overlapping calls are
/// independent and share nothing but the store.
pub struct ScreenStateAggregator {
    store: Arc<dyn ScreenshotStore>,
}

impl ScreenStateAggregator {
    pub fn new(store: Arc<dyn ScreenshotStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ScreenshotStore> {
        &self.store
    }

    #[instrument(skip_all, fields(width = frame.width(), height = frame.height()))]
    pub async fn aggregate(
        &self,
        frame: &Frame,
        ocr: &OcrOutcome,
        tree: Option<&UiTree>,
    ) -> Result<ScreenState, AggregationError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(AggregationError::EmptyFrame);
        }

        // 没有可取回的截图，整个聚合失败
        let screenshot = self.store.save(Arc::clone(&frame.image)).await?;

        let blocks = ocr.blocks();
        let ocr_text = blocks
            .iter()
            .map(|b| b.flattened_text())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        let ocr_bounding_boxes: Vec<TextBoundingBox> = blocks
            .iter()
            .filter_map(|b| {
                b.bounds.map(|rect| TextBoundingBox {
                    text: b.flattened_text(),
                    rect,
                    confidence: b.confidence,
                })
            })
            .collect();

        let ui_elements = tree.map(|t| t.flatten()).unwrap_or_default();
        let (ocr_status, ocr_error) = match ocr {
            OcrOutcome::Success { .. } => (OcrStatus::Success, None),
            OcrOutcome::NoTextFound => (OcrStatus::NoTextFound, None),
            OcrOutcome::Error { message } => (OcrStatus::Error, Some(message.clone())),
        };

        let metadata = ScreenMetadata {
            width: frame.width(),
            height: frame.height(),
            density_dpi: frame.density_dpi,
            ocr_status,
            ocr_error,
            ocr_block_count: blocks.len(),
            has_accessibility_data: !ui_elements.is_empty(),
            accessibility_node_count: ui_elements.len(),
        };

        debug!(
            blocks = blocks.len(),
            elements = ui_elements.len(),
            screenshot = %screenshot.uri,
            "screen state aggregated"
        );

        Ok(ScreenState {
            id: Uuid::new_v4().to_string(),
            screenshot,
            timestamp: Utc::now(),
            ocr_text,
            ocr_bounding_boxes,
            ui_elements,
            metadata,
        })
    }

    /// Same as [`aggregate`](Self::aggregate) without accessibility data.
    pub async fn aggregate_simple(
        &self,
        frame: &Frame,
        ocr: &OcrOutcome,
    ) -> Result<ScreenState, AggregationError> {
        self.aggregate(frame, ocr, None).await
    }
}
