//! SCRFD face detector via ONNX Runtime.
//!
//! Frames are letterboxed to 640x640, run through SCRFD, and decoded over
//! strides 8/16/32 (two anchors per cell) into boxes with five landmarks.

use crate::onnx;
use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::{DynValue, TensorRef};
use std::path::{Path, PathBuf};
use thiserror::Error;

const INPUT_SIZE: usize = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const SCORE_THRESHOLD: f32 = 0.5;
const NMS_IOU: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector model not found at {}", .0.display())]
    ModelNotFound(PathBuf),
    #[error("unexpected detector output: {0}")]
    BadOutput(String),
    #[error("frame has no pixels")]
    EmptyFrame,
    #[error("onnx runtime: {0}")]
    Ort(#[from] ort::Error),
}

/// Where the letterboxed content sits inside the model input.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Session output positions for one stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrideSlots {
    score: usize,
    bbox: usize,
    kps: usize,
}

/// SCRFD detector. Not `Sync`: one inference at a time.
pub struct FaceDetector {
    session: Session,
    slots: [StrideSlots; 3],
}

impl FaceDetector {
    pub fn load(model_path: impl AsRef<Path>) -> Result<Self, DetectorError> {
        let path = model_path.as_ref();
        if !path.is_file() {
            return Err(DetectorError::ModelNotFound(path.to_path_buf()));
        }

        let session = onnx::open_session(path, "scrfd")?;
        let names = onnx::output_names(&session);
        if names.len() < 9 {
            return Err(DetectorError::BadOutput(format!(
                "expected 9 outputs (score/bbox/kps for each stride), got {}",
                names.len()
            )));
        }

        let slots = stride_slots(&names);
        tracing::debug!(?slots, "scrfd output slots");
        Ok(Self { session, slots })
    }

    /// Faces in `frame`, highest confidence first, after NMS.
    pub fn detect(&mut self, frame: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(DetectorError::EmptyFrame);
        }

        let (input, lb) = letterbox(frame, INPUT_SIZE);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (slots, &stride) in self.slots.iter().zip(STRIDES.iter()) {
            let raw = StrideOutputs {
                scores: tensor_slice(&outputs[slots.score], "score", stride)?,
                bboxes: tensor_slice(&outputs[slots.bbox], "bbox", stride)?,
                kps: tensor_slice(&outputs[slots.kps], "kps", stride)?,
            };
            candidates.extend(decode_stride(&raw, stride, INPUT_SIZE, &lb, SCORE_THRESHOLD));
        }

        let faces = nms(candidates, NMS_IOU);
        tracing::trace!(faces = faces.len(), "scrfd pass done");
        Ok(faces)
    }
}

fn tensor_slice<'a>(value: &'a DynValue, kind: &str, stride: usize) -> Result<&'a [f32], DetectorError> {
    value
        .try_extract_tensor::<f32>()
        .map(|(_, data)| data)
        .map_err(|e| DetectorError::BadOutput(format!("{kind}_{stride}: {e}")))
}

/// Scale `frame` to fit a `size` square, centre it, and pack it as NCHW.
/// Padding stays at 0.0, the normalized value of the mean pixel.
fn letterbox(frame: &RgbImage, size: usize) -> (Array4<f32>, Letterbox) {
    let (width, height) = (frame.width() as f32, frame.height() as f32);
    let scale = (size as f32 / width).min(size as f32 / height);

    let fit_w = ((width * scale).round() as u32).clamp(1, size as u32);
    let fit_h = ((height * scale).round() as u32).clamp(1, size as u32);
    let pad_x = (size as u32 - fit_w) as f32 / 2.0;
    let pad_y = (size as u32 - fit_h) as f32 / 2.0;

    let resized = imageops::resize(frame, fit_w, fit_h, FilterType::Triangle);
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    onnx::pack_rgb(
        &mut tensor,
        &resized,
        pad_x.floor() as usize,
        pad_y.floor() as usize,
        PIXEL_MEAN,
        PIXEL_STD,
    );

    (tensor, Letterbox { scale, pad_x, pad_y })
}

/// Map output names like `score_8` / `bbox_16` / `kps_32` to session
/// positions. Exports with generic names use the conventional layout: scores
/// at 0..3, boxes at 3..6, keypoints at 6..9.
fn stride_slots(names: &[String]) -> [StrideSlots; 3] {
    let position = |kind: &str, stride: usize| {
        let wanted = format!("{kind}_{stride}");
        names.iter().position(|n| *n == wanted)
    };
    let named = |stride: usize| {
        Some(StrideSlots {
            score: position("score", stride)?,
            bbox: position("bbox", stride)?,
            kps: position("kps", stride)?,
        })
    };

    if let (Some(s8), Some(s16), Some(s32)) = (named(8), named(16), named(32)) {
        return [s8, s16, s32];
    }

    tracing::info!(?names, "scrfd outputs unnamed; assuming positional layout");
    std::array::from_fn(|i| StrideSlots { score: i, bbox: i + 3, kps: i + 6 })
}

/// Raw output slices for one stride.
struct StrideOutputs<'a> {
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

/// Boxes above `threshold` for one stride, in frame coordinates.
///
/// Box outputs are distances (left, top, right, bottom) from the anchor
/// centre and keypoints are offsets from it, both in units of the stride.
fn decode_stride(
    raw: &StrideOutputs<'_>,
    stride: usize,
    input_size: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<BoundingBox> {
    let cells = input_size / stride;
    let step = stride as f32;

    (0..cells * cells * ANCHORS_PER_CELL)
        .filter_map(|anchor| {
            let score = *raw.scores.get(anchor)?;
            if score <= threshold {
                return None;
            }

            let cell = anchor / ANCHORS_PER_CELL;
            let cx = (cell % cells) as f32 * step;
            let cy = (cell / cells) as f32 * step;

            let d = raw.bboxes.get(anchor * 4..anchor * 4 + 4)?;
            let (x1, y1) = letterbox.to_frame(cx - d[0] * step, cy - d[1] * step);
            let (x2, y2) = letterbox.to_frame(cx + d[2] * step, cy + d[3] * step);

            let landmarks = raw.kps.get(anchor * 10..anchor * 10 + 10).map(|k| {
                std::array::from_fn(|i| letterbox.to_frame(cx + k[2 * i] * step, cy + k[2 * i + 1] * step))
            });

            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
                landmarks,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression; survivors ordered by confidence.
fn nms(mut candidates: Vec<BoundingBox>, max_iou: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if kept.iter().all(|k| k.iou(&candidate) <= max_iou) {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(x: f32, y: f32, side: f32, confidence: f32) -> BoundingBox {
        BoundingBox { x, y, width: side, height: side, confidence, landmarks: None }
    }

    #[test]
    fn test_nms_keeps_best_of_overlapping() {
        let kept = nms(
            vec![
                candidate(300.0, 300.0, 40.0, 0.6),
                candidate(4.0, 4.0, 100.0, 0.8),
                candidate(0.0, 0.0, 100.0, 0.95),
            ],
            NMS_IOU,
        );
        let confidences: Vec<f32> = kept.iter().map(|b| b.confidence).collect();
        assert_eq!(confidences, vec![0.95, 0.6]);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(Vec::new(), NMS_IOU).is_empty());
    }

    #[test]
    fn test_letterbox_portrait_frame() {
        // 240x480 frame: scale 4/3, 320x640 content, 160 px side bars.
        let frame = RgbImage::from_pixel(240, 480, image::Rgb([0, 255, 128]));
        let (tensor, lb) = letterbox(&frame, INPUT_SIZE);

        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert!((lb.scale - 4.0 / 3.0).abs() < 1e-6);
        assert_eq!((lb.pad_x, lb.pad_y), (160.0, 0.0));

        assert_eq!(tensor[[0, 1, 320, 20]], 0.0);
        assert!((tensor[[0, 0, 320, 320]] + PIXEL_MEAN / PIXEL_STD).abs() < 1e-3);
        assert!((tensor[[0, 1, 320, 320]] - (255.0 - PIXEL_MEAN) / PIXEL_STD).abs() < 1e-3);
    }

    #[test]
    fn test_decode_stride_unmaps_letterbox() {
        let cells = INPUT_SIZE / 16;
        let anchors = cells * cells * ANCHORS_PER_CELL;
        let mut scores = vec![0.1f32; anchors];
        // Second anchor of cell (1, 1): centre (16, 16).
        let hit = (cells + 1) * ANCHORS_PER_CELL + 1;
        scores[hit] = 0.8;
        let bboxes = vec![0.5f32; anchors * 4];
        let kps = vec![0.0f32; anchors * 10];

        let lb = Letterbox { scale: 0.5, pad_x: 0.0, pad_y: 8.0 };
        let raw = StrideOutputs { scores: &scores, bboxes: &bboxes, kps: &kps };
        let faces = decode_stride(&raw, 16, INPUT_SIZE, &lb, SCORE_THRESHOLD);

        assert_eq!(faces.len(), 1);
        let f = &faces[0];
        // Input box (8, 8)-(24, 24) maps to frame (16, 0)-(48, 32).
        assert!((f.x - 16.0).abs() < 1e-4);
        assert!(f.y.abs() < 1e-4);
        assert!((f.width - 32.0).abs() < 1e-4);
        assert!((f.height - 32.0).abs() < 1e-4);
        assert_eq!(f.landmarks.unwrap()[0], (32.0, 16.0));
    }

    #[test]
    fn test_stride_slots_by_name() {
        let names: Vec<String> = [
            "kps_8", "score_8", "bbox_8",
            "kps_16", "score_16", "bbox_16",
            "kps_32", "score_32", "bbox_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let slots = stride_slots(&names);
        assert_eq!(slots[0], StrideSlots { score: 1, bbox: 2, kps: 0 });
        assert_eq!(slots[2], StrideSlots { score: 7, bbox: 8, kps: 6 });
    }

    #[test]
    fn test_stride_slots_positional() {
        let names: Vec<String> = (0..9).map(|i| format!("out{i}")).collect();
        let slots = stride_slots(&names);
        assert_eq!(slots[1], StrideSlots { score: 1, bbox: 4, kps: 7 });
    }

    #[test]
    fn test_load_missing_model() {
        let err = FaceDetector::load("/nonexistent/det_10g.onnx").err().unwrap();
        assert!(matches!(err, DetectorError::ModelNotFound(_)));
    }
}
