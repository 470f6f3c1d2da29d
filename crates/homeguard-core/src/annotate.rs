//! Draws verdict boxes and labels onto a frame.

use crate::intrusion::{FaceStatus, FaceVerdict};
use ab_glyph::{FontVec, PxScale};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

const BOX_THICKNESS: i32 = 4;
const TEXT_SCALE: f32 = 24.0;
const TEXT_PADDING: u32 = 10;
/// Bar sizing used when no font is loaded.
const FALLBACK_CHAR_WIDTH: u32 = 13;

const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
const RED: Rgb<u8> = Rgb([255, 0, 0]);
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

fn box_color(status: FaceStatus) -> Rgb<u8> {
    match status {
        FaceStatus::Authorized => GREEN,
        FaceStatus::Intrusion => RED,
    }
}

fn measure(font: Option<&FontVec>, text: &str) -> (u32, u32) {
    match font {
        Some(f) => text_size(PxScale::from(TEXT_SCALE), f, text),
        None => (FALLBACK_CHAR_WIDTH * text.chars().count() as u32, TEXT_SCALE as u32),
    }
}

/// Filled bar with optional white text. Skips bars that end up empty.
fn draw_bar(img: &mut RgbImage, x: i32, y: i32, text: &str, color: Rgb<u8>, font: Option<&FontVec>) {
    let (tw, th) = measure(font, text);
    let (w, h) = (tw + TEXT_PADDING, th + TEXT_PADDING);
    if w == 0 || h == 0 {
        return;
    }
    draw_filled_rect_mut(img, Rect::at(x, y).of_size(w, h), color);
    if let Some(f) = font {
        let pad = (TEXT_PADDING / 2) as i32;
        draw_text_mut(img, WHITE, x + pad, y + pad, PxScale::from(TEXT_SCALE), f, text);
    }
}

/// Return a copy of `frame` with one box per verdict: green for authorized
/// faces, red for intrusions, the label above the box and the status below.
pub fn annotate(frame: &RgbImage, verdicts: &[FaceVerdict], font: Option<&FontVec>) -> RgbImage {
    let mut img = frame.clone();
    let (fw, fh) = img.dimensions();

    for v in verdicts {
        let (x1, y1, x2, y2) = v.bbox;
        let (x1, y1) = (x1.min(fw), y1.min(fh));
        let (x2, y2) = (x2.min(fw), y2.min(fh));
        if x2 <= x1 || y2 <= y1 {
            continue;
        }

        let color = box_color(v.status);
        for t in 0..BOX_THICKNESS {
            let w = (x2 - x1) as i32 - 2 * t;
            let h = (y2 - y1) as i32 - 2 * t;
            if w <= 0 || h <= 0 {
                break;
            }
            draw_hollow_rect_mut(
                &mut img,
                Rect::at(x1 as i32 + t, y1 as i32 + t).of_size(w as u32, h as u32),
                color,
            );
        }

        let (_, label_h) = measure(font, &v.label);
        let label_top = y1 as i32 - (label_h + TEXT_PADDING) as i32;
        draw_bar(&mut img, x1 as i32, label_top, &v.label, color, font);
        draw_bar(&mut img, x1 as i32, y2 as i32, v.status.display_name(), color, font);
    }

    img
}

/// Encode an RGB frame as JPEG.
pub fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(img)?;
    Ok(buf)
}
