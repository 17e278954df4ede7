use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use image::RgbaImage;
use tracing::{debug, warn};

use super::{OcrEngine, TextBlock};
use crate::types::error::OcrError;
use crate::types::geometry::Rect;

pub const DEFAULT_DEDUP_IOU: f64 = 0.5;

/// Whole-image and region OCR on top of any [`OcrEngine`].
///
/// Region mode crops each rectangle, recognizes it on its own and shifts the
/// returned boxes by the region origin, so callers always receive full-image
/// coordinates. A region that fails is logged and skipped.
pub struct OcrService {
    engine: Arc<dyn OcrEngine>,
    timeout: Duration,
    dedup_iou: f64,
}

impl OcrService {
    pub fn new(engine: Arc<dyn OcrEngine>, timeout: Duration) -> Self {
        Self {
            engine,
            timeout,
            dedup_iou: DEFAULT_DEDUP_IOU,
        }
    }

    pub fn with_dedup_iou(mut self, threshold: f64) -> Self {
        self.dedup_iou = threshold;
        self
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    pub async fn recognize(&self, image: &RgbaImage) -> Result<Vec<TextBlock>, OcrError> {
        let blocks = self.run_engine(image).await?;
        Ok(blocks.into_iter().filter(|b| !b.is_blank()).collect())
    }

    pub async fn recognize_regions(
        &self,
        image: Arc<RgbaImage>,
        regions: &[Rect],
    ) -> Result<Vec<TextBlock>, OcrError> {
        let (width, height) = image.dimensions();

        let jobs = regions.iter().enumerate().map(|(idx, region)| {
            let image = Arc::clone(&image);
            let clamped = region.clamp_to(width, height);
            async move {
                if clamped.is_empty() {
                    debug!(region = ?region, "region lies outside the image, skipping");
                    return None;
                }
                let cropped = match crop(image, clamped).await {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(index = idx, region = ?clamped, error = %e, "crop failed");
                        return None;
                    }
                };
                match self.recognize(&cropped).await {
                    Ok(mut blocks) => {
                        for block in &mut blocks {
                            block.translate(clamped.left, clamped.top);
                        }
                        Some(blocks)
                    }
                    Err(e) => {
                        warn!(index = idx, region = ?clamped, error = %e, "region OCR failed, skipping");
                        None
                    }
                }
            }
        });

        let per_region = join_all(jobs).await;
        let mut accepted: Vec<TextBlock> = Vec::new();
        for block in per_region.into_iter().flatten().flatten() {
            if self.is_duplicate(&accepted, &block) {
                debug!(text = %block.text, "dropping duplicate block from overlapping region");
                continue;
            }
            accepted.push(block);
        }
        Ok(accepted)
    }

    fn is_duplicate(&self, accepted: &[TextBlock], candidate: &TextBlock) -> bool {
        let Some(bounds) = candidate.bounds else {
            return false;
        };
        let text = candidate.normalized_text();
        accepted.iter().any(|b| {
            b.bounds.map_or(false, |other| other.iou(&bounds) >= self.dedup_iou)
                && b.normalized_text() == text
        })
    }

    async fn run_engine(&self, image: &RgbaImage) -> Result<Vec<TextBlock>, OcrError> {
        match tokio::time::timeout(self.timeout, self.engine.recognize(image)).await {
            Ok(result) => result,
            Err(_) => Err(OcrError::Timeout(self.timeout.as_millis() as u64)),
        }
    }
}

/// Copies `region` out of `image` on the blocking pool.
pub async fn crop(image: Arc<RgbaImage>, region: Rect) -> Result<RgbaImage, OcrError> {
    let (width, height) = image.dimensions();
    let r = region.clamp_to(width, height);
    if r.is_empty() {
        return Err(OcrError::EngineFailure(format!("empty crop region {:?}", region)));
    }
    tokio::task::spawn_blocking(move || {
        image::imageops::crop_imm(
            image.as_ref(),
            r.left as u32,
            r.top as u32,
            r.width() as u32,
            r.height() as u32,
        )
        .to_image()
    })
    .await
    .map_err(|e| OcrError::EngineFailure(format!("crop task failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use image::Rgba;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reports one block covering every bright pixel.
    struct BrightPixelEngine;

    #[async_trait]
    impl OcrEngine for BrightPixelEngine {
        fn name(&self) -> &str {
            "bright-pixel"
        }

        async fn recognize(&self, image: &RgbaImage) -> Result<Vec<TextBlock>, OcrError> {
            let mut found: Option<Rect> = None;
            for (x, y, px) in image.enumerate_pixels() {
                if px.0[0] > 128 {
                    let dot = Rect::new(x as i32, y as i32, x as i32 + 1, y as i32 + 1);
                    found = Some(found.map_or(dot, |f| f.union(&dot)));
                }
            }
            Ok(found
                .map(|r| vec![TextBlock::single("mark", r, 1.0)])
                .unwrap_or_default())
        }
    }

    /// Fails on every other call.
    struct FlakyEngine {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl OcrEngine for FlakyEngine {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn recognize(&self, image: &RgbaImage) -> Result<Vec<TextBlock>, OcrError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 1 {
                return Err(OcrError::EngineFailure("model crashed".into()));
            }
            let (w, h) = image.dimensions();
            Ok(vec![TextBlock::single("ok", Rect::new(0, 0, w as i32, h as i32), 0.8)])
        }
    }

    struct SlowEngine;

    #[async_trait]
    impl OcrEngine for SlowEngine {
        fn name(&self) -> &str {
            "slow"
        }

        async fn recognize(&self, _image: &RgbaImage) -> Result<Vec<TextBlock>, OcrError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![])
        }
    }

    fn image_with_marks() -> RgbaImage {
        let mut img = RgbaImage::from_pixel(200, 120, Rgba([0, 0, 0, 255]));
        for x in 60..90 {
            for y in 40..55 {
                img.put_pixel(x, y, Rgba([255, 255, 255, 255]));
            }
        }
        img
    }

    #[tokio::test]
    async fn region_boxes_translate_back_to_cropped_space() {
        let service = OcrService::new(Arc::new(BrightPixelEngine), Duration::from_secs(1));
        let image = Arc::new(image_with_marks());

        for region in [
            Rect::new(50, 30, 120, 80),
            Rect::new(0, 0, 200, 120),
            Rect::new(61, 41, 70, 50),
            Rect::new(75, 10, 150, 47),
        ] {
            let global = service
                .recognize_regions(Arc::clone(&image), &[region])
                .await
                .unwrap();
            let cropped = crop(Arc::clone(&image), region).await.unwrap();
            let local = service.recognize(&cropped).await.unwrap();

            let shifted: Vec<Option<Rect>> = global
                .iter()
                .map(|b| b.bounds.map(|r| r.translate(-region.left, -region.top)))
                .collect();
            let expected: Vec<Option<Rect>> = local.iter().map(|b| b.bounds).collect();
            assert_eq!(shifted, expected, "region {:?}", region);
            assert_eq!(global.len(), 1);
        }
    }

    #[tokio::test]
    async fn region_outside_image_yields_nothing() {
        let service = OcrService::new(Arc::new(BrightPixelEngine), Duration::from_secs(1));
        let image = Arc::new(image_with_marks());
        let blocks = service
            .recognize_regions(image, &[Rect::new(500, 500, 600, 600), Rect::new(0, 0, 10, 10)])
            .await
            .unwrap();
        assert!(blocks.is_empty());
    }

    #[tokio::test]
    async fn failing_region_does_not_abort_siblings() {
        let engine = Arc::new(FlakyEngine { calls: AtomicUsize::new(0) });
        let service = OcrService::new(engine, Duration::from_secs(1));
        let image = Arc::new(image_with_marks());
        let regions = [
            Rect::new(0, 0, 40, 40),
            Rect::new(50, 0, 90, 40),
            Rect::new(100, 0, 140, 40),
        ];
        let blocks = service.recognize_regions(image, &regions).await.unwrap();
        // exactly one of three calls fails
        assert_eq!(blocks.len(), 2);
        for block in &blocks {
            let b = block.bounds.unwrap();
            assert!(regions.iter().any(|r| *r == b));
        }
    }

    #[tokio::test]
    async fn overlapping_regions_do_not_duplicate_text() {
        let service = OcrService::new(Arc::new(BrightPixelEngine), Duration::from_secs(1));
        let image = Arc::new(image_with_marks());
        let blocks = service
            .recognize_regions(
                image,
                &[Rect::new(50, 30, 120, 80), Rect::new(40, 20, 130, 90)],
            )
            .await
            .unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].bounds, Some(Rect::new(60, 40, 90, 55)));
    }

    #[tokio::test]
    async fn slow_engine_times_out() {
        let service = OcrService::new(Arc::new(SlowEngine), Duration::from_millis(20));
        let err = service.recognize(&image_with_marks()).await.unwrap_err();
        assert!(matches!(err, OcrError::Timeout(20)));
    }
}
