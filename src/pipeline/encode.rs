//! JPEG encoding and multipart framing

use std::time::Instant;

use bytes::{BufMut, Bytes, BytesMut};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::error::EncodeError;
use crate::Frame;

/// Multipart boundary token used on `/stream`
pub const BOUNDARY: &str = "frame";

/// Value of the `Content-Type` header for the stream response
pub const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

const PART_HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
const PART_TRAILER: &[u8] = b"\r\n";

/// Encode a frame as JPEG at `quality` (1-100)
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>, EncodeError> {
    let (width, height) = (frame.width(), frame.height());
    if width == 0 || height == 0 || frame.data.len() != width as usize * height as usize * 3 {
        return Err(EncodeError::BadFrame { width, height });
    }

    let start = Instant::now();
    let mut out = Vec::with_capacity(frame.data.len() / 8);
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).encode(
        &frame.data,
        width,
        height,
        ExtendedColorType::Rgb8,
    )?;

    metrics::histogram!("encode_time_us").record(start.elapsed().as_micros() as f64);
    Ok(out)
}

/// Wrap encoded JPEG bytes as one part of the multipart replace stream
pub fn multipart_part(jpeg: &[u8]) -> Bytes {
    let mut part = BytesMut::with_capacity(PART_HEADER.len() + jpeg.len() + PART_TRAILER.len());
    part.put_slice(PART_HEADER);
    part.put_slice(jpeg);
    part.put_slice(PART_TRAILER);
    part.freeze()
}

/// Encode and frame in one step
pub fn encode_part(frame: &Frame, quality: u8) -> Result<Bytes, EncodeError> {
    let jpeg = encode_jpeg(frame, quality)?;
    Ok(multipart_part(&jpeg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PixelFormat;

    #[test]
    fn part_is_framed_for_multipart_replace() {
        let frame = Frame::from_rgb(vec![90u8; 16 * 16 * 3], 16, 16, 1, PixelFormat::Rgb24).unwrap();
        let part = encode_part(&frame, 50).unwrap();

        assert!(part.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n"));
        assert!(part.ends_with(b"\r\n"));

        let jpeg = &part[PART_HEADER.len()..part.len() - PART_TRAILER.len()];
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn encoded_jpeg_decodes_to_same_dimensions() {
        let frame = Frame::from_rgb(vec![10u8; 40 * 30 * 3], 40, 30, 1, PixelFormat::Rgb24).unwrap();
        let jpeg = encode_jpeg(&frame, 50).unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (40, 30));
    }

    #[test]
    fn empty_frame_is_rejected() {
        let frame = Frame::from_rgb(Vec::new(), 0, 0, 1, PixelFormat::Rgb24).unwrap();
        assert!(matches!(
            encode_jpeg(&frame, 50),
            Err(EncodeError::BadFrame { .. })
        ));
    }

    #[test]
    fn boundary_matches_content_type() {
        assert!(STREAM_CONTENT_TYPE.ends_with(&format!("boundary={BOUNDARY}")));
    }
}
