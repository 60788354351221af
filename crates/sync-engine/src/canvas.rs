//! Fitting frames onto the fixed encoder canvas.
//!
//! The encoder accepts exactly one resolution. Participants publish whatever
//! their camera or screen produces, so every frame is scaled to fit inside
//! the canvas with its aspect ratio preserved and the rest filled black.

use bytes::Bytes;
use image::imageops::{self, FilterType};
use image::RgbImage;
use meetrec_media_model::VideoFrame;

/// Lowest and highest intensity of the placeholder gradient.
const PLACEHOLDER_TOP: f64 = 30.0;
const PLACEHOLDER_BOTTOM: f64 = 90.0;

/// Scale `frame` to fit inside `width x height`, centering it on black.
///
/// Frames that already have the canvas size are returned as-is (the pixel
/// buffer is shared, not copied). Frames whose buffer does not match their
/// dimensions yield a black canvas.
pub fn fit_to_canvas(frame: &VideoFrame, width: u32, height: u32) -> VideoFrame {
    if frame.has_size(width, height) && frame.validate().is_ok() {
        return frame.clone();
    }

    let Some(source) = RgbImage::from_raw(frame.width, frame.height, frame.data.to_vec()) else {
        tracing::debug!(
            width = frame.width,
            height = frame.height,
            len = frame.data.len(),
            "Frame buffer does not match its dimensions, using black canvas"
        );
        return VideoFrame::solid(width, height, [0, 0, 0]);
    };

    let (scaled_w, scaled_h) = fitted_size(frame.width, frame.height, width, height);
    let scaled = imageops::resize(&source, scaled_w, scaled_h, FilterType::Triangle);

    let mut canvas = RgbImage::new(width, height);
    let x = (width - scaled_w) / 2;
    let y = (height - scaled_h) / 2;
    imageops::overlay(&mut canvas, &scaled, x as i64, y as i64);

    VideoFrame {
        width,
        height,
        data: Bytes::from(canvas.into_raw()),
    }
}

/// Largest size with the source aspect ratio that fits the canvas.
fn fitted_size(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> (u32, u32) {
    let scale = (dst_w as f64 / src_w as f64).min(dst_h as f64 / src_h as f64);
    let w = ((src_w as f64 * scale).round() as u32).clamp(1, dst_w);
    let h = ((src_h as f64 * scale).round() as u32).clamp(1, dst_h);
    (w, h)
}

/// Dark vertical gray gradient used for slots without a captured frame.
pub fn placeholder_frame(width: u32, height: u32) -> VideoFrame {
    let row_len = width as usize * 3;
    let mut data = Vec::with_capacity(row_len * height as usize);
    let span = height.saturating_sub(1).max(1) as f64;
    for y in 0..height {
        let t = y as f64 / span;
        let value = (PLACEHOLDER_TOP + t * (PLACEHOLDER_BOTTOM - PLACEHOLDER_TOP)).round() as u8;
        data.resize(data.len() + row_len, value);
    }
    VideoFrame {
        width,
        height,
        data: Bytes::from(data),
    }
}
