//! In-process device that implements every platform port. The binary uses it
//! for dry runs and the test suite uses it as its shared double.

pub mod accessibility;
pub mod capture;
pub mod gestures;
pub mod node;
pub mod ocr;

use std::sync::Arc;

use image::{Rgba, RgbaImage};

use crate::ocr::TextBlock;
use crate::orchestrator::DevicePorts;
use crate::types::geometry::Rect;

pub use accessibility::SimAccessibility;
pub use capture::SimCaptureBackend;
pub use gestures::{GestureMode, SimGestureSurface};
pub use node::{SimNode, SimNodeBuilder, TextBehavior};
pub use ocr::FixedOcrEngine;

pub struct SimDevice {
    pub accessibility: Arc<SimAccessibility>,
    pub gestures: Arc<SimGestureSurface>,
    pub capture: Arc<SimCaptureBackend>,
    pub ocr: Arc<FixedOcrEngine>,
    pub width: u32,
    pub height: u32,
}

impl SimDevice {
    /// A settings-style screen: a title, a focused search field and a
    /// scrollable list of entries. The frame buffer and OCR engine are
    /// seeded from the same layout.
    pub fn demo(width: u32, height: u32) -> Self {
        let w = width as i32;
        let h = height as i32;
        let margin = w / 20;
        let row = h / 16;

        let title = Rect::new(margin, row, w / 2, row * 2);
        let search = Rect::new(margin, row * 2 + row / 4, w - margin, row * 3);
        let list = Rect::new(0, row * 3 + row / 2, w, h - row);
        let entries = ["Network & internet", "Connected devices", "Display", "Battery"];

        let mut list_node = SimNode::new("androidx.recyclerview.widget.RecyclerView")
            .resource_id("com.android.settings:id/recycler_view")
            .bounds(list)
            .scrollable();
        let mut blocks = vec![TextBlock::single("Settings", title, 0.98)];
        for (i, label) in entries.iter().enumerate() {
            let top = list.top + row / 4 + i as i32 * (row + row / 4);
            let bounds = Rect::new(margin, top, w - margin, top + row);
            list_node = list_node.child(
                SimNode::new("android.widget.LinearLayout")
                    .bounds(bounds)
                    .clickable()
                    .child(SimNode::new("android.widget.TextView").bounds(bounds).text(label).build())
                    .build(),
            );
            blocks.push(TextBlock::single(*label, bounds, 0.95));
        }

        let root = SimNode::new("android.widget.FrameLayout")
            .package("com.android.settings")
            .bounds(Rect::from_size(0, 0, w, h))
            .child(SimNode::new("android.widget.TextView").bounds(title).text("Settings").build())
            .child(
                SimNode::new("android.widget.EditText")
                    .resource_id("com.android.settings:id/search")
                    .description("Search settings")
                    .bounds(search)
                    .editable()
                    .focused()
                    .build(),
            )
            .child(list_node.build())
            .build();

        let capture = Arc::new(SimCaptureBackend::new());
        capture.push_frame(render(width, height, &root));

        Self {
            accessibility: Arc::new(SimAccessibility::new(Some(root))),
            gestures: Arc::new(SimGestureSurface::default()),
            capture,
            ocr: Arc::new(FixedOcrEngine::new(blocks)),
            width,
            height,
        }
    }

    pub fn ports(&self) -> DevicePorts {
        DevicePorts {
            capture: self.capture.clone(),
            accessibility: self.accessibility.clone(),
            gestures: self.gestures.clone(),
            ocr: self.ocr.clone(),
        }
    }
}

/// Paints node bounds onto a blank frame. Clickable nodes are filled.
pub fn render(width: u32, height: u32, root: &SimNode) -> RgbaImage {
    let mut img = RgbaImage::from_pixel(width, height, Rgba([250, 250, 250, 255]));
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        let info = node.snapshot_info();
        let r = info.bounds.clamp_to(width, height);
        if !r.is_empty() && info.is_clickable {
            for y in r.top..r.bottom {
                for x in r.left..r.right {
                    img.put_pixel(x as u32, y as u32, Rgba([225, 230, 240, 255]));
                }
            }
        }
        stack.extend(node.children().iter().map(|c| c.as_ref()));
    }
    img
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessibility::AccessibilitySnapshotter;

    #[test]
    fn demo_device_is_consistent() {
        let device = SimDevice::demo(1080, 2400);
        let tree = AccessibilitySnapshotter::new(device.accessibility.clone())
            .snapshot()
            .unwrap();
        // root, title, search, list, 4 rows with a label each
        assert_eq!(tree.len(), 12);
        assert_eq!(tree.root_bounds(), Some(Rect::new(0, 0, 1080, 2400)));
        assert_eq!(device.capture.open_count(), 0);
    }
}
