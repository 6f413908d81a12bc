//! Synthetic source for running without a camera

use std::time::{Duration, Instant};

use super::frame::{Frame, PixelFormat};
use super::FrameSource;
use crate::error::CaptureError;

/// Scrolling RGB gradient paced at the configured frame rate
pub struct TestPatternSource {
    width: u32,
    height: u32,
    interval: Duration,
    next_due: Option<Instant>,
    sequence: u64,
    closed: bool,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            interval: Duration::from_secs(1) / fps.max(1),
            next_due: None,
            sequence: 0,
            closed: false,
        }
    }

    fn render(&self) -> Vec<u8> {
        let (w, h) = (self.width as usize, self.height as usize);
        let shift = self.sequence as usize;
        let mut pixels = Vec::with_capacity(w * h * 3);
        for y in 0..h {
            for x in 0..w {
                pixels.push((((x + shift) % w) * 255 / w) as u8);
                pixels.push((y * 255 / h) as u8);
                pixels.push(((x + y + shift) % 256) as u8);
            }
        }
        pixels
    }
}

impl FrameSource for TestPatternSource {
    fn read(&mut self) -> Result<Frame, CaptureError> {
        if self.closed {
            return Err(CaptureError::NotStreaming);
        }

        // Stand-in for the device's own pacing
        if let Some(due) = self.next_due {
            let now = Instant::now();
            if due > now {
                std::thread::sleep(due - now);
            }
        }
        self.next_due = Some(Instant::now() + self.interval);

        self.sequence += 1;
        Frame::from_rgb(
            self.render(),
            self.width,
            self.height,
            self.sequence,
            PixelFormat::Rgb24,
        )
        .ok_or_else(|| CaptureError::Decode("test pattern size mismatch".into()))
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_have_requested_size_and_increasing_sequence() {
        let mut source = TestPatternSource::new(8, 4, 1000);
        let a = source.read().unwrap();
        let b = source.read().unwrap();
        assert_eq!((a.width(), a.height()), (8, 4));
        assert_eq!(a.data.len(), 8 * 4 * 3);
        assert!(b.sequence() > a.sequence());
    }

    #[test]
    fn read_after_close_fails() {
        let mut source = TestPatternSource::new(2, 2, 30);
        source.close();
        assert!(matches!(source.read(), Err(CaptureError::NotStreaming)));
    }
}
