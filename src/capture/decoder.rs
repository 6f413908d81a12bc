use zune_jpeg::zune_core::colorspace::ColorSpace;
use zune_jpeg::zune_core::options::DecoderOptions;
use zune_jpeg::JpegDecoder;

use super::frame::PixelFormat;
use crate::error::CaptureError;

/// Decoded RGB24 pixels with the dimensions they actually came out at
pub struct Decoded {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Decode a raw device buffer into RGB24.
///
/// `width`/`height` are the negotiated dimensions; MJPEG frames report their
/// own size and that wins. `stride` is the driver's bytes per line for
/// uncompressed formats, 0 meaning tightly packed rows.
pub fn decode_frame(
    data: &[u8],
    format: PixelFormat,
    width: u32,
    height: u32,
    stride: u32,
) -> Result<Decoded, CaptureError> {
    match format {
        PixelFormat::Mjpeg => {
            let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGB);
            let mut decoder = JpegDecoder::new_with_options(data, options);
            let pixels = decoder
                .decode()
                .map_err(|e| CaptureError::Decode(format!("{e:?}")))?;
            let (w, h) = decoder
                .dimensions()
                .ok_or_else(|| CaptureError::Decode("jpeg without dimensions".into()))?;
            Ok(Decoded {
                pixels,
                width: w as u32,
                height: h as u32,
            })
        }
        PixelFormat::Rgb24 => {
            let row = width as usize * 3;
            let mut pixels = Vec::with_capacity(row * height as usize);
            for line in rows(data, row, stride, height)? {
                pixels.extend_from_slice(&line[..row]);
            }
            Ok(Decoded {
                pixels,
                width,
                height,
            })
        }
        PixelFormat::Yuyv4 => Ok(Decoded {
            pixels: yuyv_to_rgb(data, width, height, stride)?,
            width,
            height,
        }),
    }
}

/// Packed YUYV 4:2:2 to RGB24 using BT.601 integer coefficients.
///
/// Bytes past `width * 2` in each `stride`-long line are padding and skipped.
pub fn yuyv_to_rgb(
    data: &[u8],
    width: u32,
    height: u32,
    stride: u32,
) -> Result<Vec<u8>, CaptureError> {
    if width % 2 != 0 {
        return Err(CaptureError::Decode(format!("odd yuyv width {width}")));
    }

    let row = width as usize * 2;
    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for line in rows(data, row, stride, height)? {
        for chunk in line[..row].chunks_exact(4) {
            let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
            push_yuv(&mut rgb, y0, u, v);
            push_yuv(&mut rgb, y1, u, v);
        }
    }
    Ok(rgb)
}

/// Split `data` into `height` lines of `stride` bytes, each holding at
/// least `row` bytes of pixels. The last line may omit its padding.
fn rows(
    data: &[u8],
    row: usize,
    stride: u32,
    height: u32,
) -> Result<impl Iterator<Item = &[u8]>, CaptureError> {
    let stride = (stride as usize).max(row);
    let height = height as usize;
    let needed = match height {
        0 => 0,
        h => stride * (h - 1) + row,
    };
    if row == 0 || data.len() < needed {
        return Err(CaptureError::Decode(format!(
            "short frame buffer: {} bytes, need {} ({} lines of {} with stride {})",
            data.len(),
            needed,
            height,
            row,
            stride
        )));
    }
    Ok(data.chunks(stride).take(height))
}

#[inline]
fn push_yuv(out: &mut Vec<u8>, y: u8, u: u8, v: u8) {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;

    let r = (298 * c + 409 * e + 128) >> 8;
    let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
    let b = (298 * c + 516 * d + 128) >> 8;

    out.push(r.clamp(0, 255) as u8);
    out.push(g.clamp(0, 255) as u8);
    out.push(b.clamp(0, 255) as u8);
}
