use homeguard_core::detector::DetectorError;
use homeguard_core::recognizer::RecognizerError;
use homeguard_core::{BoundingBox, Embedding, FaceDetector, FaceRecognizer};
use image::RgbImage;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// One detected face with its embedding.
#[derive(Debug, Clone)]
pub struct AnalyzedFace {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// Messages sent from HTTP handlers to the engine thread.
pub(crate) enum EngineRequest {
    Analyze {
        frame: Arc<RgbImage>,
        reply: oneshot::Sender<Result<Vec<AnalyzedFace>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    #[cfg(test)]
    pub(crate) fn from_sender(tx: mpsc::Sender<EngineRequest>) -> Self {
        Self { tx }
    }

    /// Detect every face in `frame` and embed it. Faces come back in
    /// detector order (highest confidence first).
    pub async fn analyze(&self, frame: Arc<RgbImage>) -> Result<Vec<AnalyzedFace>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Analyze {
                frame,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Loads both ONNX models synchronously so startup fails fast when either
/// is missing, then serves requests one at a time.
pub fn spawn_engine(scrfd_path: &str, arcface_path: &str) -> Result<EngineHandle, EngineError> {
    let mut detector = FaceDetector::load(scrfd_path)?;
    tracing::info!(path = scrfd_path, "SCRFD detector loaded");

    let mut recognizer = FaceRecognizer::load(arcface_path)?;
    tracing::info!(path = arcface_path, "ArcFace recognizer loaded");

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(8);

    std::thread::Builder::new()
        .name("homeguard-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Analyze { frame, reply } => {
                        let result = run_analyze(&mut detector, &mut recognizer, &frame);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}

fn run_analyze(
    detector: &mut FaceDetector,
    recognizer: &mut FaceRecognizer,
    frame: &RgbImage,
) -> Result<Vec<AnalyzedFace>, EngineError> {
    let faces = detector.detect(frame)?;
    tracing::debug!(faces = faces.len(), width = frame.width(), height = frame.height(), "analyze: detected");

    faces
        .into_iter()
        .map(|bbox| {
            let embedding = recognizer.extract(frame, &bbox)?;
            Ok(AnalyzedFace { bbox, embedding })
        })
        .collect()
}
