//! V4L2 capture over memory-mapped buffers

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::decoder;
use crate::capture::frame::{Frame, FrameMetadata, PixelFormat};
use crate::capture::FrameSource;
use crate::error::CaptureError;
use crate::utils;
use crate::CaptureConfig;

/// V4L2 camera source
pub struct V4l2Capture {
    stream: Option<MmapStream<'static>>,
    path: String,
    width: u32,
    height: u32,
    /// Bytes per line as reported by the driver, padding included
    stride: u32,
    format: PixelFormat,
    sequence: u64,
}

impl V4l2Capture {
    /// Open the device and start streaming.
    ///
    /// Width, height, rate and format are requests; whatever the driver
    /// settles on is read back and used from here on.
    pub fn open(config: &CaptureConfig) -> Result<Self, CaptureError> {
        let path = if config.device.is_empty() {
            utils::auto_detect_device()?.path
        } else {
            config.device.clone()
        };
        info!("Initializing V4L2 capture: {}", path);

        let open_err = |source| CaptureError::Open {
            device: path.clone(),
            source,
        };

        let device = Device::with_path(&path).map_err(open_err)?;

        let caps = device.query_caps().map_err(open_err)?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(CaptureError::NotCaptureDevice(path.clone()));
        }

        let mut fmt = device.format().map_err(open_err)?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = FourCC::new(&config.format.fourcc());
        let fmt = device.set_format(&fmt).map_err(open_err)?;

        let format = PixelFormat::from_fourcc(&fmt.fourcc.repr)
            .ok_or_else(|| CaptureError::UnsupportedFormat(fmt.fourcc.to_string()))?;

        if fmt.width != config.width || fmt.height != config.height || format != config.format {
            warn!(
                "Device negotiated {}x{} {:?} (requested {}x{} {:?})",
                fmt.width, fmt.height, format, config.width, config.height, config.format
            );
        }

        match device.set_params(&Parameters::with_fps(config.fps)) {
            Ok(params) => info!(
                "Frame interval: {}/{}",
                params.interval.numerator, params.interval.denominator
            ),
            Err(e) => warn!("Device rejected frame rate {}: {}", config.fps, e),
        }

        let stream = MmapStream::with_buffers(&device, Type::VideoCapture, config.buffer_count)
            .map_err(open_err)?;
        info!(
            "Capture stream started: {}x{} {:?} ({} bytes/line) with {} buffers",
            fmt.width, fmt.height, format, fmt.stride, config.buffer_count
        );

        Ok(Self {
            stream: Some(stream),
            path,
            width: fmt.width,
            height: fmt.height,
            stride: fmt.stride,
            format,
            sequence: 0,
        })
    }
}

impl FrameSource for V4l2Capture {
    #[instrument(skip(self), fields(device = %self.path))]
    fn read(&mut self) -> Result<Frame, CaptureError> {
        let timestamp = Instant::now();

        let stream = self.stream.as_mut().ok_or(CaptureError::NotStreaming)?;
        let (buf, meta) = stream.next()?;
        let used = (meta.bytesused as usize).min(buf.len());

        let decoded = decoder::decode_frame(
            &buf[..used],
            self.format,
            self.width,
            self.height,
            self.stride,
        )?;

        self.sequence += 1;

        let frame_meta = Arc::new(FrameMetadata {
            sequence: self.sequence,
            width: decoded.width,
            height: decoded.height,
            stride: decoded.width * 3,
            format: self.format,
            device_timestamp: Some(
                Duration::from_secs(meta.timestamp.sec as u64)
                    + Duration::from_micros(meta.timestamp.usec as u64),
            ),
        });

        Ok(Frame {
            data: Bytes::from(decoded.pixels),
            meta: frame_meta,
            timestamp,
        })
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            info!("Released capture device {}", self.path);
        }
    }
}
