//! scene-ngin
//!
//! The scene and resource lifecycle core of a real-time 3D/2D renderer. The
//! crate owns the orchestration around a native graphics API: which objects
//! are in the scene, in which order they are drawn, when their device
//! resources are loaded and unloaded, and how edits from other threads reach
//! the render thread without racing its traversal. The native work itself
//! (buffers, shaders, presenting) happens behind user supplied resource
//! factories and a frame sink.
//!
//! High-level modules
//! - `animation`: step sequences that move, rotate and scale objects over time
//! - `camera`: view points and the closed set of projections
//! - `context`: devices, device resources and the live engine configuration
//! - `data_structures`: scene graph, transforms, bounding boxes and object pools
//! - `error`: the engine error type
//! - `flow`: render-loop participants and the per-frame engine loop
//! - `mutation`: the queue that serialises scene edits into transactions
//! - `render`: frame composition and the presenter seam
//! - `resources`: lazily loaded, reference counted device resources
//!

pub mod animation;
pub mod camera;
pub mod context;
pub mod data_structures;
pub mod error;
pub mod flow;
pub mod mutation;
pub mod render;
pub mod resources;

// Re-exports commonly used types for convenience in downstream code.
pub use cgmath::*;
pub use error::EngineError;
