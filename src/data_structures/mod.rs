//! Engine data structures: scene graph, transforms, bounds and pools.
//!
//! - `instance` holds per-object transformation data and its packed form
//! - `scene_graph` enables hierarchical scene organization in ordered layers
//! - `bounding_box` accumulates points into axis-aligned boxes
//! - `pool` recycles allocations across frames

pub mod bounding_box;
pub mod instance;
pub mod pool;
pub mod scene_graph;
