//! Latest-wins frame hand-off between the capture thread and viewers

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use crossbeam::utils::CachePadded;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::BufferTimeout;
use crate::Frame;

/// Single-slot buffer that always holds the most recent frame.
///
/// Publishing never blocks and replaces whatever was there. Reading is a
/// snapshot: any number of viewers may observe the same frame.
pub struct LatestFrameBuffer {
    slot: ArcSwapOption<Slot>,
    generation: AtomicU64,
    notify: Notify,

    /// Statistics
    stats: CachePadded<Stats>,
}

struct Slot {
    frame: Arc<Frame>,
    generation: u64,
    observed: AtomicBool,
}

#[derive(Default)]
struct Stats {
    frames_published: AtomicU64,
    frames_overwritten: AtomicU64,
    frames_taken: AtomicU64,
    timeouts: AtomicU64,
}

/// Snapshot of buffer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub frames_published: u64,
    /// Frames replaced before any viewer looked at them
    pub frames_overwritten: u64,
    pub frames_taken: u64,
    pub timeouts: u64,
}

impl LatestFrameBuffer {
    pub fn new() -> Self {
        Self {
            slot: ArcSwapOption::empty(),
            generation: AtomicU64::new(0),
            notify: Notify::new(),
            stats: CachePadded::new(Stats::default()),
        }
    }

    /// Producer: replace the slot with `frame` and wake every waiter
    pub fn publish(&self, frame: Frame) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let slot = Arc::new(Slot {
            frame: Arc::new(frame),
            generation,
            observed: AtomicBool::new(false),
        });

        if let Some(previous) = self.slot.swap(Some(slot)) {
            if !previous.observed.load(Ordering::Relaxed) {
                self.stats.frames_overwritten.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.stats.frames_published.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_waiters();
    }

    /// Latest frame, waiting up to `timeout` if nothing was ever published
    pub async fn take(&self, timeout: Duration) -> Result<Arc<Frame>, BufferTimeout> {
        self.take_after(0, timeout).await.map(|(frame, _)| frame)
    }

    /// Cursor that only yields frames it has not seen yet
    pub fn subscribe(self: &Arc<Self>) -> FrameCursor {
        FrameCursor {
            buffer: Arc::clone(self),
            seen: 0,
        }
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            frames_published: self.stats.frames_published.load(Ordering::Relaxed),
            frames_overwritten: self.stats.frames_overwritten.load(Ordering::Relaxed),
            frames_taken: self.stats.frames_taken.load(Ordering::Relaxed),
            timeouts: self.stats.timeouts.load(Ordering::Relaxed),
        }
    }

    async fn take_after(
        &self,
        seen: u64,
        timeout: Duration,
    ) -> Result<(Arc<Frame>, u64), BufferTimeout> {
        let deadline = Instant::now() + timeout;

        loop {
            // Register interest before checking the slot so a publish in
            // between is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(slot) = self.slot.load_full() {
                if slot.generation > seen {
                    slot.observed.store(true, Ordering::Relaxed);
                    self.stats.frames_taken.fetch_add(1, Ordering::Relaxed);
                    return Ok((Arc::clone(&slot.frame), slot.generation));
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                return Err(BufferTimeout(timeout));
            }
        }
    }
}

impl Default for LatestFrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-viewer read position on a [`LatestFrameBuffer`]
pub struct FrameCursor {
    buffer: Arc<LatestFrameBuffer>,
    seen: u64,
}

impl FrameCursor {
    /// Latest frame newer than the last one this cursor returned.
    ///
    /// Frames published in between are skipped, never queued.
    pub async fn take(&mut self, timeout: Duration) -> Result<Arc<Frame>, BufferTimeout> {
        let (frame, generation) = self.buffer.take_after(self.seen, timeout).await?;
        self.seen = generation;
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PixelFormat;

    fn frame(sequence: u64) -> Frame {
        Frame::from_rgb(vec![0u8; 12], 2, 2, sequence, PixelFormat::Rgb24).unwrap()
    }

    #[tokio::test]
    async fn newest_frame_wins() {
        let buffer = LatestFrameBuffer::new();
        buffer.publish(frame(1));
        buffer.publish(frame(2));

        let taken = buffer.take(Duration::from_millis(100)).await.unwrap();
        assert_eq!(taken.sequence(), 2);

        let stats = buffer.stats();
        assert_eq!(stats.frames_published, 2);
        assert_eq!(stats.frames_overwritten, 1);
    }

    #[tokio::test]
    async fn take_times_out_when_nothing_published() {
        let buffer = LatestFrameBuffer::new();
        let started = std::time::Instant::now();

        let result = buffer.take(Duration::from_millis(100)).await;

        assert_eq!(result.unwrap_err(), BufferTimeout(Duration::from_millis(100)));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(buffer.stats().timeouts, 1);
    }

    #[tokio::test]
    async fn take_is_shared_between_readers() {
        let buffer = Arc::new(LatestFrameBuffer::new());
        buffer.publish(frame(7));

        let a = buffer.take(Duration::from_millis(10)).await.unwrap();
        let b = buffer.take(Duration::from_millis(10)).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let mut c1 = buffer.subscribe();
        let mut c2 = buffer.subscribe();
        assert_eq!(c1.take(Duration::from_millis(10)).await.unwrap().sequence(), 7);
        assert_eq!(c2.take(Duration::from_millis(10)).await.unwrap().sequence(), 7);
    }

    #[tokio::test]
    async fn take_wakes_on_first_publish() {
        let buffer = Arc::new(LatestFrameBuffer::new());
        let waiter = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.take(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        buffer.publish(frame(3));

        let taken = waiter.await.unwrap().unwrap();
        assert_eq!(taken.sequence(), 3);
    }

    #[tokio::test]
    async fn cursor_waits_for_a_newer_frame() {
        let buffer = Arc::new(LatestFrameBuffer::new());
        let mut cursor = buffer.subscribe();
        buffer.publish(frame(1));

        assert_eq!(cursor.take(Duration::from_millis(10)).await.unwrap().sequence(), 1);
        assert!(cursor.take(Duration::from_millis(30)).await.is_err());

        buffer.publish(frame(2));
        buffer.publish(frame(3));
        assert_eq!(cursor.take(Duration::from_millis(10)).await.unwrap().sequence(), 3);
    }
}
