//! Per-viewer encode-and-stream loop

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::EncodeError;
use crate::pipeline::{encode, transform, FrameCursor, LatestFrameBuffer};
use crate::settings::{SettingsStore, ViewerId};
use crate::StreamConfig;

/// Lifecycle of one viewer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Streaming,
    /// Viewer went away
    Closed,
    /// Encoding kept failing
    Failed,
}

/// Streams one viewer's transformed view of the shared feed.
///
/// Each session owns a cursor on the frame buffer and nothing else; when
/// it ends, the buffer, the capture loop and every other session carry on.
pub struct StreamSession {
    viewer: ViewerId,
    cursor: FrameCursor,
    settings: Arc<SettingsStore>,
    frame_timeout: Duration,
    quality: u8,
    max_encode_failures: u32,
    shutdown: Option<watch::Receiver<bool>>,
    state: SessionState,
}

impl StreamSession {
    pub fn new(
        viewer: ViewerId,
        buffer: &Arc<LatestFrameBuffer>,
        settings: Arc<SettingsStore>,
        config: &StreamConfig,
    ) -> Self {
        // Registering intent to view creates the default entry
        settings.get_or_default(&viewer);

        Self {
            viewer,
            cursor: buffer.subscribe(),
            settings,
            // A zero timeout would turn an idle feed into a busy loop
            frame_timeout: Duration::from_millis(config.frame_timeout_ms.max(1)),
            quality: config.jpeg_quality,
            max_encode_failures: config.max_encode_failures.max(1),
            shutdown: None,
            state: SessionState::Idle,
        }
    }

    /// Close the session once `signal` turns true
    pub fn with_shutdown(mut self, signal: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(signal);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the session on its own task.
    ///
    /// Returns the stream of multipart chunks and the task handle, which
    /// resolves to the terminal state. Dropping the receiver closes the
    /// session.
    pub fn spawn(self) -> (flume::Receiver<Bytes>, JoinHandle<SessionState>) {
        let (tx, rx) = flume::bounded(1);
        let handle = tokio::spawn(self.run(tx));
        (rx, handle)
    }

    #[instrument(skip_all, fields(viewer = %self.viewer))]
    pub async fn run(mut self, tx: flume::Sender<Bytes>) -> SessionState {
        self.state = SessionState::Streaming;
        metrics::gauge!("active_sessions").increment(1.0);
        info!("Viewer connected");

        let mut failures = 0u32;
        while self.state == SessionState::Streaming {
            // With an idle feed a departed viewer is noticed here, at most
            // one frame timeout after it left.
            if tx.is_disconnected() {
                self.state = SessionState::Closed;
                break;
            }

            let frame = tokio::select! {
                taken = self.cursor.take(self.frame_timeout) => match taken {
                    Ok(frame) => frame,
                    Err(timeout) => {
                        debug!("{}", timeout);
                        continue;
                    }
                },
                _ = shutdown_requested(&mut self.shutdown) => {
                    debug!("Server shutting down");
                    self.state = SessionState::Closed;
                    break;
                }
            };

            // Settings are sampled once per frame; changes land on the next one
            let settings = self.settings.get_or_default(&self.viewer);
            let quality = self.quality;
            let encoded = tokio::task::spawn_blocking(move || {
                let view = transform::apply(&frame, &settings);
                encode::encode_part(&view, quality)
            })
            .await
            .unwrap_or_else(|e| Err(EncodeError::Aborted(e.to_string())));

            match encoded {
                Ok(part) => {
                    failures = 0;
                    metrics::counter!("frames_encoded").increment(1);
                    if tx.send_async(part).await.is_err() {
                        self.state = SessionState::Closed;
                    }
                }
                Err(e) => {
                    failures += 1;
                    warn!("Encode failed ({}/{}): {}", failures, self.max_encode_failures, e);
                    if failures >= self.max_encode_failures {
                        self.state = SessionState::Failed;
                    }
                }
            }
        }

        metrics::gauge!("active_sessions").decrement(1.0);
        match self.state {
            SessionState::Failed => warn!("Viewer session failed"),
            _ => info!("Viewer disconnected"),
        }
        self.state
    }
}

/// Resolves once shutdown is signalled. Never resolves without a signal or
/// once its sender is gone.
async fn shutdown_requested(signal: &mut Option<watch::Receiver<bool>>) {
    if let Some(rx) = signal {
        let stopped = rx.wait_for(|&stop| stop).await.is_ok();
        if stopped {
            return;
        }
    }
    std::future::pending::<()>().await
}
