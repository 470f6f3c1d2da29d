//! homeguard-media: frame handling, intrusion recording and retention.
//!
//! Decodes frames posted by the browser client, keeps the most recent one
//! for the recorder, writes short AVI clips through `ffmpeg`, and expires
//! old files.

pub mod frame;
pub mod recorder;
pub mod retention;

pub use frame::{decode_frame, FrameError, LatestFrame};
pub use recorder::{Recorder, RecorderError};
pub use retention::{cleanup_old_files, CleanupSummary};
