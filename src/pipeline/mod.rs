pub mod encode;
pub mod latest;
pub mod transform;

pub use latest::{BufferStats, FrameCursor, LatestFrameBuffer};
