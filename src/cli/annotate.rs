use crate::common::{DevMode, Result};
use crate::core::orientation::Orientation;
use crate::core::session::FrameSignal;
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use std::path::PathBuf;

const LEFT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const RIGHT_COLOR: Rgb<u8> = Rgb([0, 255, 255]);
const BLINK_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const NO_FACE_COLOR: Rgb<u8> = Rgb([128, 128, 128]);
const MARKER_SIZE: u32 = 12;

/// Draws the orientation box and a corner marker (red while the eyes are
/// closed, grey when no face was found).
pub fn annotate_frame(frame: &DynamicImage, signal: &FrameSignal) -> DynamicImage {
    let mut img = frame.to_rgb8();

    if let (Some(orientation), Some(bbox)) = (signal.orientation, signal.bbox) {
        let color = match orientation {
            Orientation::Left => LEFT_COLOR,
            Orientation::Right => RIGHT_COLOR,
        };
        let bbox = bbox.clamp(img.width() as f32, img.height() as f32);
        let x0 = bbox.x0 as i32;
        let y0 = bbox.y0 as i32;
        let w = (bbox.width() as u32).max(1);
        let h = (bbox.height() as u32).max(1);

        draw_hollow_rect_mut(&mut img, Rect::at(x0, y0).of_size(w, h), color);
        // Thicker border
        if w > 2 && h > 2 {
            draw_hollow_rect_mut(&mut img, Rect::at(x0 + 1, y0 + 1).of_size(w - 2, h - 2), color);
        }
    }

    let marker = if !signal.face_detected {
        Some(NO_FACE_COLOR)
    } else if signal.is_blinking {
        Some(BLINK_COLOR)
    } else {
        None
    };
    if let Some(color) = marker {
        draw_marker(&mut img, color);
    }

    DynamicImage::ImageRgb8(img)
}

fn draw_marker(img: &mut RgbImage, color: Rgb<u8>) {
    let size = MARKER_SIZE.min(img.width()).min(img.height());
    if size > 0 {
        draw_filled_rect_mut(img, Rect::at(0, 0).of_size(size, size), color);
    }
}

/// Saves the annotated frame under the dev debug directory. Returns the path
/// written, or `None` outside dev mode.
pub fn save_annotated(
    dev_mode: &DevMode,
    frame: &DynamicImage,
    signal: &FrameSignal,
    frame_index: usize,
) -> Result<Option<PathBuf>> {
    let Some(path) = dev_mode.get_debug_path("signal", frame_index) else {
        return Ok(None);
    };

    annotate_frame(frame, signal).save(&path)?;
    tracing::debug!("Saved annotated frame {} to {}", frame_index, path.display());
    Ok(Some(path))
}
