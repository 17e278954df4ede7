pub mod monitor;
pub mod tree;

use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::command::ScrollDirection;
use crate::types::geometry::Rect;

pub use monitor::AccessibilityMonitor;
pub use tree::{AccessibilitySnapshotter, NodeId, UiNode, UiTree};

/// Properties read from a live native node at one instant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub class_name: Option<String>,
    pub text: Option<String>,
    pub content_description: Option<String>,
    pub resource_id: Option<String>,
    pub package_name: Option<String>,
    pub bounds: Rect,
    pub is_clickable: bool,
    pub is_focusable: bool,
    pub is_focused: bool,
    pub is_editable: bool,
    pub is_scrollable: bool,
    pub is_enabled: bool,
    pub is_visible: bool,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("native node reference is no longer valid")]
pub struct StaleNode;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeActionError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("action rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Stale(#[from] StaleNode),
}

/// Handle to one node of the platform's live UI graph. Any call may find the
/// node already recycled.
pub trait NativeNode: Send + Sync {
    fn info(&self) -> Result<NodeInfo, StaleNode>;

    fn child_count(&self) -> usize;

    fn child(&self, index: usize) -> Option<Arc<dyn NativeNode>>;

    /// Commits `text` into an editable node.
    fn set_text(&self, text: &str) -> Result<(), NodeActionError>;

    /// Semantic scroll. Returns false when the node refused the action.
    fn scroll(&self, direction: ScrollDirection) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessibilityEvent {
    ContentChanged,
    WindowChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlobalAction {
    Back,
    Home,
    Recents,
}

/// Source of the current root node and of change notifications.
pub trait AccessibilityProvider: Send + Sync {
    /// Root of the active window, or `None` when there is no window.
    fn root(&self) -> Option<Arc<dyn NativeNode>>;

    fn events(&self) -> async_channel::Receiver<AccessibilityEvent>;

    fn perform_global(&self, action: GlobalAction) -> bool;
}

/// Breadth-first search over the live graph. Stale nodes are skipped.
pub fn find_live_bfs<F>(
    root: Arc<dyn NativeNode>,
    limit: usize,
    predicate: F,
) -> Option<(Arc<dyn NativeNode>, NodeInfo)>
where
    F: Fn(&NodeInfo) -> bool,
{
    let mut queue: VecDeque<Arc<dyn NativeNode>> = VecDeque::new();
    queue.push_back(root);
    let mut visited = 0usize;

    while let Some(node) = queue.pop_front() {
        visited += 1;
        if visited > limit {
            break;
        }
        let Ok(info) = node.info() else {
            continue;
        };
        if predicate(&info) {
            return Some((node, info));
        }
        for i in 0..node.child_count() {
            if let Some(child) = node.child(i) {
                queue.push_back(child);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SimNode;

    #[test]
    fn bfs_prefers_shallow_matches_and_skips_stale() {
        let deep = SimNode::new("EditText").editable().focused().build();
        let stale = SimNode::new("EditText").editable().focused().build();
        stale.set_stale(true);
        let shallow = SimNode::new("EditText").editable().focused().resource_id("shallow").build();
        let root = SimNode::new("FrameLayout")
            .child(stale)
            .child(SimNode::new("LinearLayout").child(deep).build())
            .child(shallow)
            .build();

        let (_, info) = find_live_bfs(root, 100, |i| i.is_focused && i.is_editable).unwrap();
        assert_eq!(info.resource_id.as_deref(), Some("shallow"));
    }
}
