//! An in-memory spatial index for axis-aligned bounding boxes, keyed by a five-slot
//! (NW/NE/SW/SE/CENTER) node shape. See [`mqr_tree::MqrTree`] for the public API.

pub mod exceptions;
pub mod geometry;
#[cfg(feature = "setup_tracing")]
mod logging;
pub mod mqr_tree;
