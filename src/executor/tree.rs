//! The executor-side mirrored tree.
//!
//! Nodes are owned flat by handle; structure lives in per-node child lists.
//! The producer only ever references nodes by handle, so lookups go through
//! the handle map and report `ReferenceNotFound` for retired or unknown
//! handles.

use std::collections::HashMap;

use crate::codec::{NodeHandle, WireValue};
use crate::error::{Result, TreewireError};

/// Registration of one event listener on a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerRegistration {
    pub event_type: String,
    pub listener_index: u32,
    pub capture: bool,
    pub once: bool,
    pub passive: bool,
    pub custom_prevent_default: bool,
}

/// One mirrored node.
#[derive(Debug)]
pub struct TreeNode {
    pub handle: NodeHandle,
    pub kind: u16,
    pub name: String,
    pub namespace: Option<String>,
    pub text: String,
    pub children: Vec<NodeHandle>,
    /// Keyed by (name, namespace); `None` is the default namespace.
    pub attributes: HashMap<(String, Option<String>), String>,
    pub properties: HashMap<String, WireValue>,
    pub listeners: Vec<ListenerRegistration>,
}

impl TreeNode {
    fn new(handle: NodeHandle, kind: u16, name: String, namespace: Option<String>, text: String) -> Self {
        Self {
            handle,
            kind,
            name,
            namespace,
            text,
            children: Vec::new(),
            attributes: HashMap::new(),
            properties: HashMap::new(),
            listeners: Vec::new(),
        }
    }

    /// Attribute value in the given namespace.
    pub fn attribute(&self, name: &str, namespace: Option<&str>) -> Option<&str> {
        self.attributes
            .get(&(name.to_string(), namespace.map(|s| s.to_string())))
            .map(|s| s.as_str())
    }
}

/// The real tree the executor owns and mutates.
#[derive(Debug, Default)]
pub struct Tree {
    nodes: HashMap<u32, TreeNode>,
    root: Option<NodeHandle>,
}

impl Tree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a node under the handle the producer issued for it.
    ///
    /// The first node created becomes the root.
    pub fn create_node(
        &mut self,
        handle: NodeHandle,
        kind: u16,
        name: String,
        namespace: Option<String>,
        text: String,
    ) {
        if self.root.is_none() {
            self.root = Some(handle);
        }
        self.nodes
            .insert(handle.0, TreeNode::new(handle, kind, name, namespace, text));
    }

    /// The root handle, once any node exists.
    pub fn root(&self) -> Option<NodeHandle> {
        self.root
    }

    /// Look up a node.
    pub fn get(&self, handle: NodeHandle) -> Result<&TreeNode> {
        self.nodes.get(&handle.0).ok_or_else(|| {
            TreewireError::ReferenceNotFound(format!("no node under handle {}", handle.0))
        })
    }

    /// Look up a node mutably.
    pub fn get_mut(&mut self, handle: NodeHandle) -> Result<&mut TreeNode> {
        self.nodes.get_mut(&handle.0).ok_or_else(|| {
            TreewireError::ReferenceNotFound(format!("no node under handle {}", handle.0))
        })
    }

    /// Whether a handle resolves to a node.
    pub fn contains(&self, handle: NodeHandle) -> bool {
        self.nodes.contains_key(&handle.0)
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Splice children under `target`: detach `removed`, then insert
    /// `added` before `next_sibling` (append when absent or not found).
    pub fn splice_children(
        &mut self,
        target: NodeHandle,
        added: &[NodeHandle],
        next_sibling: Option<NodeHandle>,
        removed: &[NodeHandle],
    ) -> Result<()> {
        // Validate the inserted handles before touching the child list.
        for h in added {
            self.get(*h)?;
        }
        let node = self.get_mut(target)?;

        for h in removed {
            node.children.retain(|c| c != h);
        }

        let position = next_sibling
            .and_then(|next| node.children.iter().position(|c| *c == next))
            .unwrap_or(node.children.len());
        for (offset, h) in added.iter().enumerate() {
            node.children.insert(position + offset, *h);
        }
        Ok(())
    }
}
