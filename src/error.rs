//! Error types shared across the pipeline

use std::time::Duration;

use thiserror::Error;

/// Errors raised by a [`FrameSource`](crate::capture::FrameSource)
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open capture device {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: std::io::Error,
    },

    #[error("device {0} does not support video capture")]
    NotCaptureDevice(String),

    #[error("no suitable capture device found")]
    NoDevice,

    #[error("unsupported pixel format: {0}")]
    UnsupportedFormat(String),

    #[error("frame read failed: {0}")]
    Read(#[from] std::io::Error),

    #[error("frame decode failed: {0}")]
    Decode(String),

    #[error("capture stream not started")]
    NotStreaming,
}

/// Errors raised while turning a transformed frame into a stream part
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("jpeg encode failed: {0}")]
    Jpeg(#[from] image::ImageError),

    #[error("frame buffer does not match {width}x{height} rgb24")]
    BadFrame { width: u32, height: u32 },

    #[error("encode task aborted: {0}")]
    Aborted(String),
}

/// No frame arrived within the wait window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no frame available within {0:?}")]
pub struct BufferTimeout(pub Duration);
