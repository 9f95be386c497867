//! Keeps shared content parented under the alignment root

use crate::core::types::Pose;
use crate::scene::graph::{NodeId, SceneError, SceneGraph};
use std::collections::BTreeMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
struct Binding {
    original_parent: Option<NodeId>,
    original_local: Pose,
}

/// Set of content nodes that must live under the alignment root
#[derive(Debug, Clone)]
pub struct ContentBinder {
    keep_world_position: bool,
    bindings: BTreeMap<NodeId, Binding>,
}

impl ContentBinder {
    pub fn new(keep_world_position: bool) -> Self {
        Self {
            keep_world_position,
            bindings: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn is_bound(&self, node: NodeId) -> bool {
        self.bindings.contains_key(&node)
    }

    /// Start tracking a node. Its current parent and local pose are remembered for [`release`](Self::release).
    pub fn bind<S: SceneGraph>(&mut self, scene: &S, node: NodeId) -> Result<(), SceneError> {
        if self.bindings.contains_key(&node) {
            return Ok(());
        }
        let binding = Binding {
            original_parent: scene.parent(node)?,
            original_local: scene.local_pose(node)?,
        };
        self.bindings.insert(node, binding);
        Ok(())
    }

    /// Re-parent every detached bound node under `root`. Returns how many moved.
    ///
    /// Nodes that vanished from the scene are dropped from the binder.
    pub fn ensure_anchored<S: SceneGraph>(&mut self, scene: &mut S, root: NodeId) -> usize {
        let mut moved = 0;
        let mut vanished = Vec::new();

        for node in self.bindings.keys().copied() {
            match scene.parent(node) {
                Ok(Some(parent)) if parent == root => {}
                Ok(_) => match scene.reparent(node, Some(root), self.keep_world_position) {
                    Ok(()) => {
                        debug!(%node, %root, "content anchored");
                        moved += 1;
                    }
                    Err(error) => warn!(%node, %error, "failed to anchor content"),
                },
                Err(SceneError::UnknownNode { .. }) => vanished.push(node),
                Err(error) => warn!(%node, %error, "failed to inspect content"),
            }
        }

        for node in vanished {
            self.bindings.remove(&node);
        }
        moved
    }

    /// Stop tracking a node and put it back under its original parent with its original local pose
    pub fn release<S: SceneGraph>(&mut self, scene: &mut S, node: NodeId) -> Result<bool, SceneError> {
        let Some(binding) = self.bindings.remove(&node) else {
            return Ok(false);
        };
        let original_parent = binding
            .original_parent
            .filter(|parent| scene.contains(*parent));
        scene.reparent(node, original_parent, false)?;
        scene.set_local_pose(node, binding.original_local)?;
        Ok(true)
    }
}
