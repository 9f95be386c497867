//! Scene graph capability and an in-memory tree

use crate::core::types::Pose;
use std::fmt;
use thiserror::Error;

/// Handle to a node in a [`SceneGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SceneError {
    #[error("{node} does not exist")]
    UnknownNode { node: NodeId },
    #[error("parenting {node} under {parent} would create a cycle")]
    Cycle { node: NodeId, parent: NodeId },
}

/// Host scene graph. Parent `None` is the scene (world) root.
pub trait SceneGraph {
    fn create_node(&mut self, name: &str, parent: Option<NodeId>) -> Result<NodeId, SceneError>;

    /// First node with this name
    fn find_node(&self, name: &str) -> Option<NodeId>;

    fn contains(&self, node: NodeId) -> bool;

    fn parent(&self, node: NodeId) -> Result<Option<NodeId>, SceneError>;

    fn local_pose(&self, node: NodeId) -> Result<Pose, SceneError>;

    fn set_local_pose(&mut self, node: NodeId, pose: Pose) -> Result<(), SceneError>;

    /// Pose in world space, composed through every ancestor
    fn world_pose(&self, node: NodeId) -> Result<Pose, SceneError>;

    /// Move `node` under `new_parent`. With `keep_world_pose` the local pose is
    /// rewritten so the world pose is unchanged; otherwise the local pose is kept.
    fn reparent(
        &mut self,
        node: NodeId,
        new_parent: Option<NodeId>,
        keep_world_pose: bool,
    ) -> Result<(), SceneError>;

    fn reparent_preserving_world_pose(
        &mut self,
        node: NodeId,
        new_parent: Option<NodeId>,
    ) -> Result<(), SceneError> {
        self.reparent(node, new_parent, true)
    }
}

#[derive(Debug, Clone)]
struct SceneNode {
    name: String,
    parent: Option<NodeId>,
    local: Pose,
}

/// Flat, index-addressed scene tree
#[derive(Debug, Clone, Default)]
pub struct SceneTree {
    nodes: Vec<SceneNode>,
}

impl SceneTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn name(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(node.0 as usize).map(|n| n.name.as_str())
    }

    /// Direct children of `node`
    pub fn children(&self, node: Option<NodeId>) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.parent == node)
            .map(|(index, _)| NodeId(index as u32))
            .collect()
    }

    fn get(&self, node: NodeId) -> Result<&SceneNode, SceneError> {
        self.nodes
            .get(node.0 as usize)
            .ok_or(SceneError::UnknownNode { node })
    }

    fn get_mut(&mut self, node: NodeId) -> Result<&mut SceneNode, SceneError> {
        self.nodes
            .get_mut(node.0 as usize)
            .ok_or(SceneError::UnknownNode { node })
    }

    fn is_ancestor(&self, ancestor: NodeId, mut node: Option<NodeId>) -> Result<bool, SceneError> {
        while let Some(current) = node {
            if current == ancestor {
                return Ok(true);
            }
            node = self.get(current)?.parent;
        }
        Ok(false)
    }

    fn parent_world(&self, parent: Option<NodeId>) -> Result<Pose, SceneError> {
        match parent {
            Some(parent) => self.world_pose(parent),
            None => Ok(Pose::identity()),
        }
    }
}

impl SceneGraph for SceneTree {
    fn create_node(&mut self, name: &str, parent: Option<NodeId>) -> Result<NodeId, SceneError> {
        if let Some(parent) = parent {
            self.get(parent)?;
        }
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(SceneNode {
            name: name.to_string(),
            parent,
            local: Pose::identity(),
        });
        Ok(id)
    }

    fn find_node(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|n| n.name == name)
            .map(|index| NodeId(index as u32))
    }

    fn contains(&self, node: NodeId) -> bool {
        (node.0 as usize) < self.nodes.len()
    }

    fn parent(&self, node: NodeId) -> Result<Option<NodeId>, SceneError> {
        Ok(self.get(node)?.parent)
    }

    fn local_pose(&self, node: NodeId) -> Result<Pose, SceneError> {
        Ok(self.get(node)?.local)
    }

    fn set_local_pose(&mut self, node: NodeId, pose: Pose) -> Result<(), SceneError> {
        self.get_mut(node)?.local = pose;
        Ok(())
    }

    fn world_pose(&self, node: NodeId) -> Result<Pose, SceneError> {
        let mut pose = self.get(node)?.local;
        let mut parent = self.get(node)?.parent;
        while let Some(current) = parent {
            let entry = self.get(current)?;
            pose = entry.local.compose(&pose);
            parent = entry.parent;
        }
        Ok(pose)
    }

    fn reparent(
        &mut self,
        node: NodeId,
        new_parent: Option<NodeId>,
        keep_world_pose: bool,
    ) -> Result<(), SceneError> {
        self.get(node)?;
        if let Some(parent) = new_parent {
            if self.is_ancestor(node, Some(parent))? {
                return Err(SceneError::Cycle { node, parent });
            }
        }

        let local = if keep_world_pose {
            let world = self.world_pose(node)?;
            self.parent_world(new_parent)?.inverse().compose(&world)
        } else {
            self.get(node)?.local
        };

        let entry = self.get_mut(node)?;
        entry.parent = new_parent;
        entry.local = local;
        Ok(())
    }
}
