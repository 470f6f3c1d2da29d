//! homeguardd: browser-driven intrusion detection server.
//!
//! The browser posts camera frames; the server detects and recognizes faces,
//! flags unregistered ones and, after a run of intrusion frames, places an
//! alert call and records a short video.

pub mod alert;
pub mod api;
pub mod auth;
pub mod config;
pub mod consent;
pub mod engine;
pub mod error;
pub mod pages;

use ab_glyph::FontVec;
use alert::CallAlerter;
use anyhow::Context;
use auth::LoginFlag;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use config::Config;
use consent::ConsentStore;
use engine::EngineHandle;
use homeguard_core::{GalleryCache, GalleryStore, IntrusionDebouncer};
use homeguard_media::{LatestFrame, Recorder};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tower_http::trace::TraceLayer;

/// Upload cap for frames and registration images.
const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: EngineHandle,
    pub gallery: Arc<Mutex<GalleryCache>>,
    pub debouncer: Arc<Mutex<IntrusionDebouncer>>,
    pub consent: ConsentStore,
    pub login: LoginFlag,
    pub latest_frame: LatestFrame,
    pub recorder: Recorder,
    pub alerter: CallAlerter,
    pub font: Option<Arc<FontVec>>,
}

impl AppState {
    /// Build the state, creating the data directories it writes to.
    pub fn new(config: Config, engine: EngineHandle) -> anyhow::Result<Self> {
        for dir in [
            config.registered_faces_dir(),
            config.detected_faces_dir(),
            config.videos_dir(),
        ] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }

        let store = GalleryStore::open(config.registered_faces_dir())?;
        let consent = ConsentStore::open(config.consents_csv(), config.signatures_dir())?;
        let font = config.font_path.as_deref().and_then(load_font).map(Arc::new);
        let recorder = Recorder::new(config.videos_dir(), config.record_duration, config.record_fps);
        let alerter = CallAlerter::new(config.alert.clone())?;

        Ok(Self {
            engine,
            gallery: Arc::new(Mutex::new(GalleryCache::new(store, config.gallery_ttl))),
            debouncer: Arc::new(Mutex::new(IntrusionDebouncer::new(config.intrusion_frames))),
            consent,
            login: LoginFlag::new(config.login_flag_path()),
            latest_frame: LatestFrame::new(),
            recorder,
            alerter,
            font,
            config: Arc::new(config),
        })
    }

    /// Break the consecutive-intrusion run.
    pub fn reset_debouncer(&self) {
        self.debouncer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .reset();
    }
}

fn load_font(path: &Path) -> Option<FontVec> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "label font unreadable; drawing boxes only");
            return None;
        }
    };
    match FontVec::try_from_vec(data) {
        Ok(font) => Some(font),
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "label font invalid; drawing boxes only");
            None
        }
    }
}

/// All routes. Pages redirect to `/login` and API routes answer 401 while
/// nobody is logged in.
pub fn create_router(state: AppState) -> Router {
    let gated_pages = Router::new()
        .route("/", get(api::index))
        .route("/consent", get(consent::consent_form).post(consent::consent_submit))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_login_page,
        ));

    let gated_api = Router::new()
        .route("/register", post(api::register))
        .route("/detect", post(api::detect))
        .route("/record_frame", post(api::record_frame))
        .route("/get_consent_names", get(consent::consent_names))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_login_api,
        ));

    Router::new()
        .route("/login", get(auth::login_form).post(auth::login_submit))
        .route("/logout", post(auth::logout))
        .route("/health", get(api::health))
        .route("/static/index.js", get(pages::index_js))
        .merge(gated_pages)
        .merge(gated_api)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use axum::response::Response;
    use serde_json::Value;
    use tempfile::TempDir;

    const BOUNDARY: &str = "homeguard-test-boundary";

    pub(crate) struct TestApp {
        pub router: Router,
        pub state: AppState,
        _dir: TempDir,
    }

    pub(crate) async fn app_with(engine: EngineHandle, configure: impl FnOnce(&mut Config)) -> TestApp {
        let dir = TempDir::new().unwrap();
        let mut config = Config::with_data_dir(dir.path());
        configure(&mut config);
        let state = AppState::new(config, engine).unwrap();
        TestApp {
            router: create_router(state.clone()),
            state,
            _dir: dir,
        }
    }

    pub(crate) async fn logged_in_app(engine: EngineHandle, configure: impl FnOnce(&mut Config)) -> TestApp {
        let app = app_with(engine, configure).await;
        app.state.login.set().await.unwrap();
        app
    }

    pub(crate) enum Part<'a> {
        Text(&'a str, &'a str),
        File(&'a str, &'a [u8]),
    }

    pub(crate) fn multipart_request(uri: &str, parts: &[Part<'_>]) -> Request<Body> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match part {
                Part::Text(name, value) => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                            .as_bytes(),
                    );
                }
                Part::File(name, data) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{name}\"; filename=\"frame.jpg\"\r\n\
                             Content-Type: image/jpeg\r\n\r\n"
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(data);
                    body.extend_from_slice(b"\r\n");
                }
            }
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::post(uri)
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    pub(crate) fn form_request(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    pub(crate) fn get_request(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    pub(crate) async fn body_text(res: Response) -> String {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    pub(crate) async fn body_json(res: Response) -> Value {
        serde_json::from_str(&body_text(res).await).unwrap()
    }
}
