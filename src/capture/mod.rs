pub mod decoder;
pub mod frame;
pub mod runner;
pub mod test_pattern;
pub mod v4l2;

pub use frame::Frame;
pub use frame::PixelFormat;
pub use runner::CaptureHandle;
pub use test_pattern::TestPatternSource;
pub use v4l2::V4l2Capture;

use crate::error::CaptureError;
use crate::{CaptureConfig, SourceKind};

/// A producer of decoded frames.
///
/// `read` blocks for as long as the device needs to deliver the next frame.
pub trait FrameSource: Send {
    fn read(&mut self) -> Result<Frame, CaptureError>;

    /// Release the underlying device. Further reads fail.
    fn close(&mut self) {}
}

impl FrameSource for Box<dyn FrameSource> {
    fn read(&mut self) -> Result<Frame, CaptureError> {
        (**self).read()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Open the source selected in the config
pub fn open(config: &CaptureConfig) -> Result<Box<dyn FrameSource>, CaptureError> {
    match config.source {
        SourceKind::V4l2 => Ok(Box::new(V4l2Capture::open(config)?)),
        SourceKind::TestPattern => Ok(Box::new(TestPatternSource::new(
            config.width,
            config.height,
            config.fps,
        ))),
    }
}
