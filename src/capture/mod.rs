//! Frame Input Layer
//!
//! Frames arrive from an external camera source that has already captured and
//! pre-processed them. The scanner treats a frame as opaque beyond handing it
//! to a recognition engine.

pub mod frame;

pub use frame::{Frame, FrameMetadata, Rect};
