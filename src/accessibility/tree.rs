use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{AccessibilityProvider, NativeNode, NodeInfo};
use crate::types::error::SnapshotError;
use crate::types::geometry::Rect;
use crate::types::screen::UiElement;

pub const DEFAULT_MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

/// One captured node. `parent` is an index into the owning [`UiTree`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiNode {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub depth: usize,
    pub info: NodeInfo,
}

/// Immutable snapshot of the accessibility graph, stored as a flat
/// pre-order node table. Index 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiTree {
    nodes: Vec<UiNode>,
    pub captured_at: DateTime<Utc>,
}

impl UiTree {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> Option<&UiNode> {
        self.nodes.first()
    }

    pub fn root_bounds(&self) -> Option<Rect> {
        self.root().map(|n| n.info.bounds)
    }

    pub fn get(&self, id: NodeId) -> Option<&UiNode> {
        self.nodes.get(id.0)
    }

    pub fn parent(&self, id: NodeId) -> Option<&UiNode> {
        self.get(id)?.parent.and_then(|p| self.get(p))
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = &UiNode> {
        self.get(id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
            .iter()
            .filter_map(move |c| self.get(*c))
    }

    /// Nodes in pre-order.
    pub fn iter(&self) -> impl Iterator<Item = &UiNode> {
        self.nodes.iter()
    }

    /// Root-to-node path of `className ?: resourceId ?: "Unknown"`, joined by `" > "`.
    pub fn view_hierarchy(&self, id: NodeId) -> String {
        let mut labels = Vec::new();
        let mut cursor = self.get(id);
        while let Some(node) = cursor {
            labels.push(label_of(&node.info));
            cursor = node.parent.and_then(|p| self.get(p));
        }
        labels.reverse();
        labels.join(" > ")
    }

    pub fn flatten(&self) -> Vec<UiElement> {
        self.nodes
            .iter()
            .map(|node| UiElement {
                class_name: node.info.class_name.clone(),
                text: node.info.text.clone(),
                content_description: node.info.content_description.clone(),
                resource_id: node.info.resource_id.clone(),
                package_name: node.info.package_name.clone(),
                bounds: node.info.bounds,
                is_clickable: node.info.is_clickable,
                is_focusable: node.info.is_focusable,
                is_enabled: node.info.is_enabled,
                is_visible: node.info.is_visible,
                depth: node.depth,
                view_hierarchy: self.view_hierarchy(node.id),
            })
            .collect()
    }

    /// Walks the live graph from `root`. Returns `None` when the root itself
    /// is already stale; stale descendants are left out of their parent's children.
    pub fn capture(root: &dyn NativeNode, max_depth: usize) -> Option<UiTree> {
        let mut tree = UiTree {
            nodes: Vec::new(),
            captured_at: Utc::now(),
        };
        tree.walk(root, None, 0, max_depth)?;
        Some(tree)
    }

    fn walk(
        &mut self,
        node: &dyn NativeNode,
        parent: Option<NodeId>,
        depth: usize,
        max_depth: usize,
    ) -> Option<NodeId> {
        let info = match node.info() {
            Ok(info) => info,
            Err(_) => {
                debug!(depth, "skipping stale accessibility node");
                return None;
            }
        };
        let id = NodeId(self.nodes.len());
        self.nodes.push(UiNode {
            id,
            parent,
            children: Vec::new(),
            depth,
            info,
        });

        if depth + 1 >= max_depth {
            return Some(id);
        }
        for i in 0..node.child_count() {
            let Some(child) = node.child(i) else {
                continue;
            };
            if let Some(child_id) = self.walk(child.as_ref(), Some(id), depth + 1, max_depth) {
                self.nodes[id.0].children.push(child_id);
            }
        }
        Some(id)
    }
}

fn label_of(info: &NodeInfo) -> String {
    info.class_name
        .as_deref()
        .filter(|s| !s.is_empty())
        .or(info.resource_id.as_deref().filter(|s| !s.is_empty()))
        .unwrap_or("Unknown")
        .to_string()
}

/// Takes snapshots of the provider's active window.
pub struct AccessibilitySnapshotter {
    provider: Arc<dyn AccessibilityProvider>,
    max_depth: usize,
}

impl AccessibilitySnapshotter {
    pub fn new(provider: Arc<dyn AccessibilityProvider>) -> Self {
        Self {
            provider,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    pub fn provider(&self) -> &Arc<dyn AccessibilityProvider> {
        &self.provider
    }

    pub fn snapshot(&self) -> Result<UiTree, SnapshotError> {
        let root = self.provider.root().ok_or(SnapshotError::NoActiveWindow)?;
        UiTree::capture(root.as_ref(), self.max_depth).ok_or(SnapshotError::NoActiveWindow)
    }
}
