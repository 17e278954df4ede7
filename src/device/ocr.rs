use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use image::RgbaImage;

use crate::ocr::{OcrEngine, TextBlock};
use crate::types::error::OcrError;
use crate::types::geometry::Rect;

/// Returns a preset list of blocks, keeping those that fit the given image.
#[derive(Default)]
pub struct FixedOcrEngine {
    blocks: Mutex<Vec<TextBlock>>,
    failing: AtomicBool,
}

impl FixedOcrEngine {
    pub fn new(blocks: Vec<TextBlock>) -> Self {
        Self {
            blocks: Mutex::new(blocks),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_blocks(&self, blocks: Vec<TextBlock>) {
        if let Ok(mut slot) = self.blocks.lock() {
            *slot = blocks;
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl OcrEngine for FixedOcrEngine {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn recognize(&self, image: &RgbaImage) -> Result<Vec<TextBlock>, OcrError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(OcrError::EngineFailure("simulated engine failure".to_string()));
        }
        let frame = Rect::from_size(0, 0, image.width() as i32, image.height() as i32);
        let blocks = self
            .blocks
            .lock()
            .map_err(|e| OcrError::EngineFailure(e.to_string()))?;
        Ok(blocks
            .iter()
            .filter(|b| b.bounds.map_or(false, |r| frame.intersect(&r) == Some(r)))
            .cloned()
            .collect())
    }
}
