use bytes::Bytes;
use image::{ImageBuffer, Rgb};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Borrowed RGB24 view over a frame's pixels
pub type RgbView<'a> = ImageBuffer<Rgb<u8>, &'a [u8]>;

/// Decoded RGB24 frame with zero-copy sharing semantics.
///
/// Once built a frame is never mutated; transforms produce a new one.
#[derive(Clone)]
pub struct Frame {
    /// Immutable RGB24 pixels, row-major, `width * height * 3` bytes
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    /// Format the device delivered before decoding
    pub format: PixelFormat,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Yuyv4,
    Mjpeg,
}

impl PixelFormat {
    pub fn fourcc(self) -> [u8; 4] {
        match self {
            PixelFormat::Rgb24 => *b"RGB3",
            PixelFormat::Yuyv4 => *b"YUYV",
            PixelFormat::Mjpeg => *b"MJPG",
        }
    }

    pub fn from_fourcc(code: &[u8; 4]) -> Option<Self> {
        match code {
            b"RGB3" => Some(PixelFormat::Rgb24),
            b"YUYV" => Some(PixelFormat::Yuyv4),
            b"MJPG" => Some(PixelFormat::Mjpeg),
            _ => None,
        }
    }
}

impl Frame {
    /// Wrap decoded RGB24 pixels. Returns `None` if the length doesn't match.
    pub fn from_rgb(
        data: impl Into<Bytes>,
        width: u32,
        height: u32,
        sequence: u64,
        format: PixelFormat,
    ) -> Option<Self> {
        let data = data.into();
        if data.len() != width as usize * height as usize * 3 {
            return None;
        }

        Some(Self {
            data,
            meta: Arc::new(FrameMetadata {
                sequence,
                width,
                height,
                stride: width * 3,
                format,
                device_timestamp: None,
            }),
            timestamp: Instant::now(),
        })
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    pub fn sequence(&self) -> u64 {
        self.meta.sequence
    }

    /// Borrow the pixels as an image view, `None` if data and dimensions disagree
    pub fn view(&self) -> Option<RgbView<'_>> {
        ImageBuffer::from_raw(self.meta.width, self.meta.height, &self.data[..])
    }

    /// Build a sibling frame carrying new pixels but the same identity and timing
    pub fn with_pixels(&self, pixels: Vec<u8>) -> Self {
        debug_assert_eq!(pixels.len(), self.data.len());
        Self {
            data: Bytes::from(pixels),
            meta: Arc::clone(&self.meta),
            timestamp: self.timestamp,
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.meta.sequence)
            .field("width", &self.meta.width)
            .field("height", &self.meta.height)
            .field("format", &self.meta.format)
            .finish()
    }
}
