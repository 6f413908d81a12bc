//! Per-viewer zoom-crop and color transform

use image::imageops::{self, FilterType};
use image::{GenericImageView, Pixel, Rgb, RgbImage};
use tracing::instrument;

use crate::settings::{Filter, ViewerSettings};
use crate::Frame;

/// Centered crop rectangle for a zoom factor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Compute the centered `(W/z, H/z)` crop, never smaller than 1x1
pub fn crop_rect(width: u32, height: u32, zoom: f32) -> CropRect {
    let zoom = if zoom.is_finite() { zoom.max(1.0) } else { 1.0 };
    let crop_w = ((width as f32 / zoom) as u32).clamp(1, width.max(1));
    let crop_h = ((height as f32 / zoom) as u32).clamp(1, height.max(1));

    CropRect {
        x: width.saturating_sub(crop_w) / 2,
        y: height.saturating_sub(crop_h) / 2,
        width: crop_w,
        height: crop_h,
    }
}

/// Apply a viewer's settings to a shared frame, producing a new frame of
/// identical dimensions. The source frame is never touched.
#[instrument(level = "trace", skip_all, fields(seq = frame.sequence()))]
pub fn apply(frame: &Frame, settings: &ViewerSettings) -> Frame {
    let (width, height) = (frame.width(), frame.height());
    if width == 0 || height == 0 {
        return frame.clone();
    }
    let Some(view) = frame.view() else {
        return frame.clone();
    };

    let zoomed = zoom_crop(&view, width, height, settings.zoom());

    let filtered = match (&settings.filter, zoomed) {
        (Filter::None | Filter::Unrecognized(_), None) => return frame.clone(),
        (Filter::None | Filter::Unrecognized(_), Some(img)) => img,
        (filter, zoomed) => {
            let mut img = zoomed.unwrap_or_else(|| {
                copy_region(&view, crop_rect(width, height, 1.0))
            });
            apply_filter(&mut img, filter);
            img
        }
    };

    frame.with_pixels(filtered.into_raw())
}

/// `None` when the zoom leaves the frame untouched
fn zoom_crop<I>(view: &I, width: u32, height: u32, zoom: f32) -> Option<RgbImage>
where
    I: GenericImageView<Pixel = Rgb<u8>>,
{
    let rect = crop_rect(width, height, zoom);
    if rect.width == width && rect.height == height {
        return None;
    }

    let crop = copy_region(view, rect);
    Some(imageops::resize(&crop, width, height, FilterType::Triangle))
}

fn copy_region<I>(view: &I, rect: CropRect) -> RgbImage
where
    I: GenericImageView<Pixel = Rgb<u8>>,
{
    RgbImage::from_fn(rect.width, rect.height, |x, y| {
        view.get_pixel(rect.x + x, rect.y + y)
    })
}

fn apply_filter(img: &mut RgbImage, filter: &Filter) {
    match filter {
        Filter::None | Filter::Unrecognized(_) => {}
        Filter::Grayscale => {
            for px in img.pixels_mut() {
                let luma = px.to_luma().0[0];
                px.0 = [luma; 3];
            }
        }
        Filter::Invert => imageops::invert(img),
        Filter::Red => keep_channel(img, 0),
        Filter::Green => keep_channel(img, 1),
        Filter::Blue => keep_channel(img, 2),
    }
}

fn keep_channel(img: &mut RgbImage, channel: usize) {
    for px in img.pixels_mut() {
        for (i, value) in px.0.iter_mut().enumerate() {
            if i != channel {
                *value = 0;
            }
        }
    }
}
