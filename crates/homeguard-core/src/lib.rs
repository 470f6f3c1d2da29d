//! homeguard-core: face detection, recognition and intrusion decisions.
//!
//! Uses SCRFD for face detection and ArcFace for face embeddings, both
//! running via ONNX Runtime, then matches embeddings against the
//! registered-face gallery by Euclidean distance.

pub mod alignment;
pub mod annotate;
pub mod detector;
pub mod gallery;
pub mod intrusion;
mod onnx;
pub mod recognizer;
pub mod types;

pub use detector::FaceDetector;
pub use gallery::{GalleryCache, GalleryStore, Registration};
pub use intrusion::{classify, FaceStatus, FaceVerdict, FrameAssessment, IntrusionDebouncer};
pub use recognizer::FaceRecognizer;
pub use types::{BoundingBox, Embedding, MatchResult, Matcher, NearestNeighborMatcher, RegisteredFace};
