use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::accessibility::{NativeNode, NodeActionError, NodeInfo, StaleNode};
use crate::types::command::ScrollDirection;
use crate::types::geometry::Rect;

/// How a simulated node reacts to `set_text`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextBehavior {
    Accept,
    PermissionDenied,
    Reject,
}

/// In-memory accessibility node.
pub struct SimNode {
    info: Mutex<NodeInfo>,
    children: Vec<Arc<SimNode>>,
    stale: AtomicBool,
    text_behavior: TextBehavior,
    scroll_ok: bool,
    scrolls: Mutex<Vec<ScrollDirection>>,
}

pub struct SimNodeBuilder {
    info: NodeInfo,
    children: Vec<Arc<SimNode>>,
    text_behavior: TextBehavior,
    scroll_ok: bool,
}

impl SimNode {
    /// An empty class name leaves `class_name` unset.
    pub fn new(class_name: &str) -> SimNodeBuilder {
        SimNodeBuilder {
            info: NodeInfo {
                class_name: (!class_name.is_empty()).then(|| class_name.to_string()),
                is_enabled: true,
                is_visible: true,
                ..NodeInfo::default()
            },
            children: Vec::new(),
            text_behavior: TextBehavior::Accept,
            scroll_ok: true,
        }
    }

    pub fn set_stale(&self, stale: bool) {
        self.stale.store(stale, Ordering::SeqCst);
    }

    pub fn current_text(&self) -> Option<String> {
        self.info.lock().ok().and_then(|i| i.text.clone())
    }

    pub fn set_focused(&self, focused: bool) {
        if let Ok(mut info) = self.info.lock() {
            info.is_focused = focused;
        }
    }

    pub fn scroll_log(&self) -> Vec<ScrollDirection> {
        self.scrolls.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn children(&self) -> &[Arc<SimNode>] {
        &self.children
    }

    pub fn snapshot_info(&self) -> NodeInfo {
        self.info.lock().map(|i| i.clone()).unwrap_or_default()
    }

    fn check(&self) -> Result<(), StaleNode> {
        if self.stale.load(Ordering::SeqCst) {
            Err(StaleNode)
        } else {
            Ok(())
        }
    }
}

impl SimNodeBuilder {
    pub fn bounds(mut self, bounds: Rect) -> Self {
        self.info.bounds = bounds;
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.info.text = Some(text.to_string());
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.info.content_description = Some(description.to_string());
        self
    }

    pub fn resource_id(mut self, id: &str) -> Self {
        self.info.resource_id = Some(id.to_string());
        self
    }

    pub fn package(mut self, package: &str) -> Self {
        self.info.package_name = Some(package.to_string());
        self
    }

    pub fn clickable(mut self) -> Self {
        self.info.is_clickable = true;
        self.info.is_focusable = true;
        self
    }

    pub fn focused(mut self) -> Self {
        self.info.is_focusable = true;
        self.info.is_focused = true;
        self
    }

    pub fn editable(mut self) -> Self {
        self.info.is_editable = true;
        self
    }

    pub fn scrollable(mut self) -> Self {
        self.info.is_scrollable = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.info.is_visible = false;
        self
    }

    pub fn text_behavior(mut self, behavior: TextBehavior) -> Self {
        self.text_behavior = behavior;
        self
    }

    pub fn refuse_scroll(mut self) -> Self {
        self.scroll_ok = false;
        self
    }

    pub fn child(mut self, child: Arc<SimNode>) -> Self {
        self.children.push(child);
        self
    }

    pub fn build(self) -> Arc<SimNode> {
        Arc::new(SimNode {
            info: Mutex::new(self.info),
            children: self.children,
            stale: AtomicBool::new(false),
            text_behavior: self.text_behavior,
            scroll_ok: self.scroll_ok,
            scrolls: Mutex::new(Vec::new()),
        })
    }
}

impl NativeNode for SimNode {
    fn info(&self) -> Result<NodeInfo, StaleNode> {
        self.check()?;
        self.info.lock().map(|i| i.clone()).map_err(|_| StaleNode)
    }

    fn child_count(&self) -> usize {
        if self.check().is_err() {
            return 0;
        }
        self.children.len()
    }

    fn child(&self, index: usize) -> Option<Arc<dyn NativeNode>> {
        self.check().ok()?;
        let child: Arc<dyn NativeNode> = self.children.get(index)?.clone();
        Some(child)
    }

    fn set_text(&self, text: &str) -> Result<(), NodeActionError> {
        self.check()?;
        match self.text_behavior {
            TextBehavior::Accept => {
                let mut info = self.info.lock().map_err(|_| StaleNode)?;
                info.text = Some(text.to_string());
                Ok(())
            }
            TextBehavior::PermissionDenied => Err(NodeActionError::PermissionDenied(
                "secure text field".to_string(),
            )),
            TextBehavior::Reject => Err(NodeActionError::Rejected(
                "input method refused the text".to_string(),
            )),
        }
    }

    fn scroll(&self, direction: ScrollDirection) -> bool {
        if self.check().is_err() || !self.scroll_ok {
            return false;
        }
        if let Ok(mut log) = self.scrolls.lock() {
            log.push(direction);
        }
        true
    }
}
