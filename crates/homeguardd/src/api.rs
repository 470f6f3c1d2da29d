//! JSON API: face registration, per-frame detection and recording frames.

use crate::error::{ApiError, ApiResult};
use crate::{pages, AppState};
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::response::Html;
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use homeguard_core::annotate::{annotate, encode_jpeg};
use homeguard_core::gallery::GalleryError;
use homeguard_core::{
    classify, BoundingBox, FaceVerdict, Matcher, NearestNeighborMatcher, RegisteredFace,
};
use homeguard_media::{decode_frame, RecorderError};
use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Pixels added around every detected face box.
pub const FACE_PADDING: u32 = 20;

/// Side of the stored registration crop.
pub const CROP_SIZE: u32 = 160;

const JPEG_QUALITY: u8 = 95;

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub message: String,
    pub total_variations: u32,
    pub person_directory: String,
}

#[derive(Debug, Serialize)]
pub struct DetectResponse {
    pub status: &'static str,
    pub message: String,
    pub results: Vec<FaceVerdict>,
    pub annotated_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recording_started: Option<bool>,
}

impl DetectResponse {
    fn skipped(status: &'static str, message: &str) -> Self {
        Self {
            status,
            message: message.to_string(),
            results: Vec::new(),
            annotated_image: None,
            recording_started: None,
        }
    }
}

/// Multipart upload split into one file field and the remaining text fields.
#[derive(Default)]
struct Upload {
    file: Option<Bytes>,
    fields: HashMap<String, String>,
}

impl Upload {
    fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str).filter(|v| !v.is_empty())
    }
}

async fn read_upload(mut multipart: Multipart, file_field: &str) -> ApiResult<Upload> {
    let bad = |e: axum::extract::multipart::MultipartError| {
        ApiError::bad_request(format!("Invalid multipart body: {e}"))
    };

    let mut upload = Upload::default();
    while let Some(field) = multipart.next_field().await.map_err(bad)? {
        let name = field.name().unwrap_or_default().to_string();
        if name == file_field {
            let data = field.bytes().await.map_err(bad)?;
            if !data.is_empty() {
                upload.file = Some(data);
            }
        } else {
            let value = field.text().await.map_err(bad)?;
            upload.fields.insert(name, value);
        }
    }
    Ok(upload)
}

/// Padded face crop scaled to `CROP_SIZE` square, or `None` for a box with
/// no area inside the frame.
fn face_crop(frame: &RgbImage, bbox: &BoundingBox) -> Option<RgbImage> {
    let (x1, y1, x2, y2) = bbox.to_corners(FACE_PADDING, frame.width(), frame.height());
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    let crop = imageops::crop_imm(frame, x1, y1, x2 - x1, y2 - y1).to_image();
    Some(imageops::resize(&crop, CROP_SIZE, CROP_SIZE, FilterType::Triangle))
}

pub async fn index() -> Html<&'static str> {
    pages::index()
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "models_loaded": true,
        "recording": state.recorder.is_recording(),
    }))
}

pub async fn register(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<RegisterResponse>> {
    let upload = read_upload(multipart, "image").await?;
    let Some(data) = upload.file.as_ref() else {
        return Err(ApiError::bad_request("No image provided"));
    };
    let name = upload.field("name").unwrap_or("unknown").to_string();
    let failed = |e: &dyn std::fmt::Display| ApiError::internal(format!("Registration failed: {e}"));

    let frame = Arc::new(decode_frame(data).map_err(|e| failed(&e))?);
    let faces = state.engine.analyze(frame.clone()).await.map_err(|e| failed(&e))?;

    let Some(face) = faces.into_iter().next() else {
        return Err(ApiError::bad_request("No face detected"));
    };
    let Some(crop) = face_crop(&frame, &face.bbox) else {
        return Err(ApiError::bad_request("No face detected"));
    };

    let gallery = state.gallery.clone();
    let person = name.clone();
    let registration = tokio::task::spawn_blocking(move || {
        let mut cache = gallery.lock().unwrap_or_else(|e| e.into_inner());
        let registration = cache.store().register(&person, &face.embedding, &crop);
        cache.invalidate();
        registration
    })
    .await
    .map_err(|e| failed(&e))?
    .map_err(|e| failed(&e))?;

    Ok(Json(RegisterResponse {
        message: format!(
            "Face variation {} registered successfully for {}",
            registration.variation, registration.person
        ),
        total_variations: registration.variation,
        person_directory: registration.directory.to_string_lossy().into_owned(),
    }))
}

pub async fn detect(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<DetectResponse>> {
    let upload = read_upload(multipart, "image").await?;
    let Some(data) = upload.file.as_ref() else {
        return Err(ApiError::bad_request("No image provided"));
    };

    if upload.field("mode").unwrap_or("run") != "run" {
        state.reset_debouncer();
        return Ok(Json(DetectResponse::skipped(
            "success",
            "Detection disabled in register mode.",
        )));
    }

    let failed = |e: &dyn std::fmt::Display| ApiError::internal(format!("Detection failed: {e}"));

    let frame = Arc::new(decode_frame(data).map_err(|e| failed(&e))?);
    let faces = state.engine.analyze(frame.clone()).await.map_err(|e| failed(&e))?;
    if faces.is_empty() {
        state.reset_debouncer();
        return Ok(Json(DetectResponse::skipped("error", "No faces detected")));
    }

    let gallery = state.gallery.clone();
    let registered = tokio::task::spawn_blocking(move || -> Result<Vec<RegisteredFace>, GalleryError> {
        let mut cache = gallery.lock().unwrap_or_else(|e| e.into_inner());
        let faces = cache.faces()?.to_vec();
        Ok(faces)
    })
    .await
    .map_err(|e| failed(&e))?
    .map_err(|e| failed(&e))?;

    if registered.is_empty() {
        state.reset_debouncer();
        return Ok(Json(DetectResponse::skipped("error", "No registered faces found")));
    }

    let threshold = state.config.match_distance;
    let (width, height) = frame.dimensions();
    let assessment = classify(faces.iter().map(|face| {
        let bbox = face.bbox.to_corners(FACE_PADDING, width, height);
        let result = NearestNeighborMatcher.compare(&face.embedding, &registered, threshold);
        tracing::debug!(distance = result.distance, person = ?result.person, "face compared");
        (bbox, result)
    }));

    let triggered = {
        let mut debouncer = state.debouncer.lock().unwrap_or_else(|e| e.into_inner());
        debouncer.observe(assessment.has_intrusion())
    };

    if triggered {
        tracing::warn!(intrusions = assessment.intrusion_count, "intrusion confirmed; alerting");
        spawn_intrusion_response(&state);
    }

    let verdicts = assessment.verdicts.clone();
    let font = state.font.clone();
    let snapshot_path = triggered.then(|| intrusion_snapshot_path(&state));
    let encoded = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, image::ImageError> {
        let annotated = annotate(&frame, &verdicts, font.as_deref());
        if let Some(path) = snapshot_path {
            save_snapshot(&annotated, &path);
        }
        encode_jpeg(&annotated, JPEG_QUALITY)
    })
    .await
    .map_err(|e| failed(&e))?
    .map_err(|e| failed(&e))?;

    Ok(Json(DetectResponse {
        status: "success",
        message: assessment.summary(),
        results: assessment.verdicts,
        annotated_image: Some(BASE64.encode(encoded)),
        recording_started: Some(triggered),
    }))
}

/// Keep the newest client frame for the recorder. Always succeeds.
pub async fn record_frame(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Json<Value> {
    match multipart {
        Ok(multipart) => match read_upload(multipart, "frame").await {
            Ok(Upload { file: Some(frame), .. }) => state.latest_frame.store(frame),
            Ok(_) => tracing::debug!("record_frame without a frame"),
            Err(e) => tracing::debug!(error = %e, "record_frame upload unreadable"),
        },
        Err(e) => tracing::debug!(error = %e, "record_frame rejected body"),
    }
    Json(json!({ "status": "success" }))
}

fn intrusion_snapshot_path(state: &AppState) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    state
        .config
        .detected_faces_dir()
        .join(format!("intrusion_{stamp}.jpg"))
}

fn save_snapshot(img: &RgbImage, path: &std::path::Path) {
    if let Some(dir) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(dir) {
            tracing::error!(error = %e, dir = %dir.display(), "cannot create snapshot directory");
            return;
        }
    }
    match img.save(path) {
        Ok(()) => tracing::info!(path = %path.display(), "intrusion snapshot saved"),
        Err(e) => tracing::error!(error = %e, path = %path.display(), "intrusion snapshot not saved"),
    }
}

/// Place the alert call and start a recording, both in the background.
fn spawn_intrusion_response(state: &AppState) {
    let alerter = state.alerter.clone();
    tokio::spawn(async move {
        if let Err(e) = alerter.place_call().await {
            tracing::error!(error = %e, "intruder call failed");
        }
    });

    let recorder = state.recorder.clone();
    let latest = state.latest_frame.clone();
    tokio::spawn(async move {
        match recorder.record(&latest).await {
            Ok(Some(path)) => tracing::info!(path = %path.display(), "intrusion recording finished"),
            Ok(None) => {}
            Err(RecorderError::Busy) => tracing::info!("recording already in progress; trigger skipped"),
            Err(e) => tracing::error!(error = %e, "intrusion recording failed"),
        }
    });
}
