//! ArcFace embeddings via ONNX Runtime (w600k_r50, 512 dimensions).

use crate::alignment::{self, ALIGNED_SIZE};
use crate::onnx;
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// ArcFace normalizes symmetrically: `(p - 127.5) / 127.5`.
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 127.5;
const EMBEDDING_DIM: usize = 512;
const MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("recognizer model not found at {}", .0.display())]
    ModelNotFound(PathBuf),
    #[error("unexpected recognizer output: {0}")]
    BadOutput(String),
    #[error("detected face carries no landmarks to align on")]
    NoLandmarks,
    #[error("onnx runtime: {0}")]
    Ort(#[from] ort::Error),
}

pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    pub fn load(model_path: impl AsRef<Path>) -> Result<Self, RecognizerError> {
        let path = model_path.as_ref();
        if !path.is_file() {
            return Err(RecognizerError::ModelNotFound(path.to_path_buf()));
        }
        Ok(Self { session: onnx::open_session(path, "arcface")? })
    }

    /// Align `face` on its landmarks and return its unit-length embedding.
    pub fn extract(&mut self, frame: &RgbImage, face: &BoundingBox) -> Result<Embedding, RecognizerError> {
        let landmarks = face.landmarks.as_ref().ok_or(RecognizerError::NoLandmarks)?;
        let input = to_tensor(&alignment::align_face(frame, landmarks));

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::BadOutput(e.to_string()))?;

        if raw.len() != EMBEDDING_DIM {
            return Err(RecognizerError::BadOutput(format!(
                "embedding has {} values, expected {EMBEDDING_DIM}",
                raw.len()
            )));
        }

        Ok(Embedding {
            values: unit_length(raw),
            model_version: Some(MODEL_VERSION.to_string()),
        })
    }
}

fn to_tensor(aligned: &RgbImage) -> Array4<f32> {
    let side = ALIGNED_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
    onnx::pack_rgb(&mut tensor, aligned, 0, 0, PIXEL_MEAN, PIXEL_STD);
    tensor
}

/// Scale to unit L2 norm. A zero vector is returned unchanged.
fn unit_length(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return raw.to_vec();
    }
    raw.iter().map(|v| v / norm).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_to_tensor_symmetric_range() {
        let aligned = RgbImage::from_pixel(ALIGNED_SIZE, ALIGNED_SIZE, Rgb([255, 0, 51]));
        let tensor = to_tensor(&aligned);
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
        assert!((tensor[[0, 0, 111, 0]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 0, 111]] + 1.0).abs() < 1e-6);
        assert!((tensor[[0, 2, 56, 56]] + 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_unit_length() {
        let v = unit_length(&[0.0, 6.0, 8.0]);
        assert_eq!(v.len(), 3);
        assert!((v[1] - 0.6).abs() < 1e-6);
        assert!((v[2] - 0.8).abs() < 1e-6);
        assert_eq!(unit_length(&[0.0; 4]), vec![0.0; 4]);
    }

    #[test]
    fn test_load_missing_model() {
        assert!(matches!(
            FaceRecognizer::load("/nonexistent/w600k_r50.onnx"),
            Err(RecognizerError::ModelNotFound(_))
        ));
    }
}
