//! Scene graph seam and content anchoring

pub mod graph;
pub mod binder;

pub use binder::ContentBinder;
pub use graph::{NodeId, SceneError, SceneGraph, SceneTree};
