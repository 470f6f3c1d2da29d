//! Client frame decoding and the latest-frame slot used for recording.

use bytes::Bytes;
use image::RgbImage;
use tokio::sync::watch;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("empty frame upload")]
    Empty,
    #[error("undecodable frame: {0}")]
    Decode(#[from] image::ImageError),
}

/// Decode an uploaded frame (JPEG, PNG, ... as sent by the browser) to RGB.
pub fn decode_frame(data: &[u8]) -> Result<RgbImage, FrameError> {
    if data.is_empty() {
        return Err(FrameError::Empty);
    }
    Ok(image::load_from_memory(data)?.to_rgb8())
}

/// Single-slot holder of the most recent encoded frame. Last writer wins.
///
/// Clones share the same slot.
#[derive(Clone)]
pub struct LatestFrame {
    tx: watch::Sender<Option<Bytes>>,
}

impl Default for LatestFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl LatestFrame {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    pub fn store(&self, frame: Bytes) {
        self.tx.send_replace(Some(frame));
    }

    /// The current frame, if any has been stored.
    pub fn get(&self) -> Option<Bytes> {
        self.tx.borrow().clone()
    }
}
