pub mod service;

use async_trait::async_trait;
use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::types::error::OcrError;
use crate::types::geometry::Rect;

pub use service::OcrService;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextElement {
    pub text: String,
    pub bounds: Option<Rect>,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextLine {
    pub text: String,
    pub bounds: Option<Rect>,
    pub confidence: f32,
    pub elements: Vec<TextElement>,
}

/// A recognized paragraph. Bounds are in the space of the bitmap that was
/// actually processed, which may be a cropped region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
    pub bounds: Option<Rect>,
    pub confidence: f32,
    pub lines: Vec<TextLine>,
}

impl TextElement {
    fn translate(&mut self, dx: i32, dy: i32) {
        self.bounds = self.bounds.map(|b| b.translate(dx, dy));
    }
}

impl TextLine {
    pub fn new(text: impl Into<String>, bounds: Rect, confidence: f32) -> Self {
        Self {
            text: text.into(),
            bounds: Some(bounds),
            confidence,
            elements: Vec::new(),
        }
    }

    fn translate(&mut self, dx: i32, dy: i32) {
        self.bounds = self.bounds.map(|b| b.translate(dx, dy));
        for el in &mut self.elements {
            el.translate(dx, dy);
        }
    }
}

impl TextBlock {
    /// Single-line block, the common shape for simple engines.
    pub fn single(text: impl Into<String>, bounds: Rect, confidence: f32) -> Self {
        let text = text.into();
        Self {
            text: text.clone(),
            bounds: Some(bounds),
            confidence,
            lines: vec![TextLine::new(text, bounds, confidence)],
        }
    }

    /// Shifts every box in the block, lines and elements included.
    pub fn translate(&mut self, dx: i32, dy: i32) {
        self.bounds = self.bounds.map(|b| b.translate(dx, dy));
        for line in &mut self.lines {
            line.translate(dx, dy);
        }
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty() && self.lines.iter().all(|l| l.text.trim().is_empty())
    }

    /// Line texts joined by spaces, falling back to the block text.
    pub fn flattened_text(&self) -> String {
        let lines: Vec<&str> = self
            .lines
            .iter()
            .map(|l| l.text.trim())
            .filter(|t| !t.is_empty())
            .collect();
        if lines.is_empty() {
            self.text.trim().to_string()
        } else {
            lines.join(" ")
        }
    }

    pub(crate) fn normalized_text(&self) -> String {
        self.flattened_text()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }
}

/// Black-box text recognizer. Implementations return blocks in the
/// coordinate space of the image they were given.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn recognize(&self, image: &RgbaImage) -> Result<Vec<TextBlock>, OcrError>;
}

/// OCR result as the aggregator consumes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OcrOutcome {
    Success { blocks: Vec<TextBlock> },
    NoTextFound,
    Error { message: String },
}

impl OcrOutcome {
    pub fn from_result(result: Result<Vec<TextBlock>, OcrError>) -> Self {
        match result {
            Ok(blocks) if blocks.is_empty() => OcrOutcome::NoTextFound,
            Ok(blocks) => OcrOutcome::Success { blocks },
            Err(e) => OcrOutcome::Error { message: e.to_string() },
        }
    }

    pub fn blocks(&self) -> &[TextBlock] {
        match self {
            OcrOutcome::Success { blocks } => blocks,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translate_moves_every_level() {
        let mut block = TextBlock::single("Submit", Rect::new(0, 0, 30, 10), 0.9);
        block.lines[0].elements.push(TextElement {
            text: "Submit".into(),
            bounds: Some(Rect::new(1, 1, 29, 9)),
            confidence: 0.9,
        });
        block.translate(100, 1500);
        assert_eq!(block.bounds, Some(Rect::new(100, 1500, 130, 1510)));
        assert_eq!(block.lines[0].bounds, Some(Rect::new(100, 1500, 130, 1510)));
        assert_eq!(block.lines[0].elements[0].bounds, Some(Rect::new(101, 1501, 129, 1509)));
    }

    #[test]
    fn outcome_distinguishes_empty_from_failure() {
        assert_eq!(OcrOutcome::from_result(Ok(vec![])), OcrOutcome::NoTextFound);
        let err = OcrOutcome::from_result(Err(OcrError::EngineFailure("boom".into())));
        assert!(matches!(err, OcrOutcome::Error { .. }));
        assert!(err.blocks().is_empty());
    }

    #[test]
    fn normalized_text_collapses_case_and_spacing() {
        let mut block = TextBlock::single("Sign  In", Rect::new(0, 0, 1, 1), 1.0);
        block.lines.push(TextLine::new(" NOW ", Rect::new(0, 1, 1, 2), 1.0));
        assert_eq!(block.flattened_text(), "Sign  In NOW");
        assert_eq!(block.normalized_text(), "sign in now");
    }
}
