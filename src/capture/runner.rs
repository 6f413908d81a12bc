//! Dedicated capture thread: read from the source, publish, repeat

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{error, info, warn};

use super::FrameSource;
use crate::pipeline::LatestFrameBuffer;

/// Pause after a failed read so a dead device cannot spin a core
const READ_ERROR_PAUSE: Duration = Duration::from_millis(10);

/// Running capture loop
pub struct CaptureHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    /// Start the capture loop on its own OS thread
    pub fn spawn<S>(mut source: S, buffer: Arc<LatestFrameBuffer>) -> std::io::Result<Self>
    where
        S: FrameSource + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        let thread = std::thread::Builder::new()
            .name("capture".into())
            .spawn(move || {
                info!("Capture loop started");
                run(&mut source, &buffer, &thread_stop);
                source.close();
                info!("Capture loop stopped");
            })?;

        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Signal the loop to stop and wait for the device to be released
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Capture thread panicked");
            }
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

fn run<S: FrameSource>(source: &mut S, buffer: &LatestFrameBuffer, stop: &AtomicBool) {
    while !stop.load(Ordering::Acquire) {
        match source.read() {
            Ok(frame) => {
                metrics::counter!("frames_captured").increment(1);
                buffer.publish(frame);
            }
            Err(e) => {
                metrics::counter!("capture_errors").increment(1);
                warn!("Failed to capture frame: {}", e);
                std::thread::sleep(READ_ERROR_PAUSE);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{Frame, PixelFormat, TestPatternSource};
    use crate::error::CaptureError;
    use std::sync::atomic::AtomicUsize;

    /// Fails every other read, counts closes
    struct Flaky {
        reads: u64,
        closed: Arc<AtomicUsize>,
    }

    impl FrameSource for Flaky {
        fn read(&mut self) -> Result<Frame, CaptureError> {
            self.reads += 1;
            std::thread::sleep(Duration::from_millis(1));
            if self.reads % 2 == 0 {
                return Err(CaptureError::Decode("corrupt".into()));
            }
            Ok(Frame::from_rgb(vec![0u8; 3], 1, 1, self.reads, PixelFormat::Rgb24).unwrap())
        }

        fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn transient_errors_do_not_stop_the_loop() {
        let buffer = Arc::new(LatestFrameBuffer::new());
        let closed = Arc::new(AtomicUsize::new(0));
        let handle = CaptureHandle::spawn(
            Flaky {
                reads: 0,
                closed: Arc::clone(&closed),
            },
            Arc::clone(&buffer),
        )
        .unwrap();

        std::thread::sleep(Duration::from_millis(100));
        assert!(handle.is_running());
        assert!(buffer.stats().frames_published >= 2);

        handle.shutdown();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shutdown_stops_publishing() {
        let buffer = Arc::new(LatestFrameBuffer::new());
        let handle =
            CaptureHandle::spawn(TestPatternSource::new(4, 4, 200), Arc::clone(&buffer)).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        handle.shutdown();

        let published = buffer.stats().frames_published;
        assert!(published > 0);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(buffer.stats().frames_published, published);
    }
}
