use std::path::PathBuf;
use std::time::Duration;

/// Euclidean distance below which a face counts as registered.
///
/// ArcFace embeddings are L2-normalized, so a distance of 1.0 corresponds to
/// a cosine similarity of 0.5.
pub const DEFAULT_MATCH_DISTANCE: f32 = 1.0;

/// Twilio call settings.
#[derive(Debug, Clone, Default)]
pub struct AlertConfig {
    /// Log instead of calling.
    pub dev_mode: bool,
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    pub from_number: Option<String>,
    pub to_number: Option<String>,
    /// Twilio REST base URL (overridable for tests).
    pub api_base: String,
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Socket address to listen on (default: 0.0.0.0:5050).
    pub listen_addr: String,
    /// Root for galleries, recordings, consents and the login flag.
    pub data_dir: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    pub match_distance: f32,
    /// Consecutive intrusion frames before alerting.
    pub intrusion_frames: u32,
    pub gallery_ttl: Duration,
    pub record_duration: Duration,
    pub record_fps: u32,
    pub retention: Duration,
    /// TrueType/OpenType font for frame labels; boxes only when unset.
    pub font_path: Option<PathBuf>,
    pub username: String,
    /// Hex SHA-256 of the admin password.
    pub password_hash: String,
    pub alert: AlertConfig,
}

impl Config {
    /// Load configuration from `HOMEGUARD_*` (and a few legacy) environment
    /// variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("HOMEGUARD_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let model_dir = std::env::var("HOMEGUARD_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models"));

        Self {
            listen_addr: std::env::var("HOMEGUARD_LISTEN_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:5050".to_string()),
            data_dir,
            model_dir,
            match_distance: env_f32("HOMEGUARD_MATCH_DISTANCE", DEFAULT_MATCH_DISTANCE),
            intrusion_frames: env_u32("HOMEGUARD_INTRUSION_FRAMES", 10),
            gallery_ttl: Duration::from_secs(env_u64("HOMEGUARD_GALLERY_TTL_SECS", 300)),
            record_duration: Duration::from_secs(env_u64("HOMEGUARD_RECORD_SECS", 11)),
            record_fps: env_u32("HOMEGUARD_RECORD_FPS", 10),
            retention: Duration::from_secs(env_u64("HOMEGUARD_RETENTION_DAYS", 30) * 24 * 60 * 60),
            font_path: std::env::var("HOMEGUARD_FONT_PATH").ok().map(PathBuf::from),
            username: std::env::var("APP_USERNAME").unwrap_or_else(|_| "admin".to_string()),
            password_hash: std::env::var("APP_PASSWORD_HASH")
                .unwrap_or_else(|_| crate::auth::hash_password("123")),
            alert: AlertConfig::from_env(),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join("det_10g.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join("w600k_r50.onnx")
            .to_string_lossy()
            .into_owned()
    }

    pub fn registered_faces_dir(&self) -> PathBuf {
        self.data_dir.join("registered_faces")
    }

    pub fn detected_faces_dir(&self) -> PathBuf {
        self.data_dir.join("detected_faces")
    }

    pub fn videos_dir(&self) -> PathBuf {
        self.data_dir.join("videos")
    }

    pub fn signatures_dir(&self) -> PathBuf {
        self.data_dir.join("signatures")
    }

    pub fn consents_csv(&self) -> PathBuf {
        self.data_dir.join("consents.csv")
    }

    pub fn login_flag_path(&self) -> PathBuf {
        self.data_dir.join("temp_flags").join(".logged_in")
    }

    /// Defaults rooted at `data_dir`, without reading the environment.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            listen_addr: "127.0.0.1:0".to_string(),
            model_dir: data_dir.join("models"),
            data_dir,
            match_distance: DEFAULT_MATCH_DISTANCE,
            intrusion_frames: 10,
            gallery_ttl: Duration::from_secs(300),
            record_duration: Duration::from_secs(11),
            record_fps: 10,
            retention: Duration::from_secs(30 * 24 * 60 * 60),
            font_path: None,
            username: "admin".to_string(),
            password_hash: crate::auth::hash_password("123"),
            alert: AlertConfig {
                dev_mode: true,
                api_base: TWILIO_API_BASE.to_string(),
                ..AlertConfig::default()
            },
        }
    }
}

const TWILIO_API_BASE: &str = "https://api.twilio.com";

impl AlertConfig {
    pub fn from_env() -> Self {
        Self {
            dev_mode: std::env::var("DEV_MODE")
                .map(|v| v == "True" || v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            account_sid: env_opt("TWILIO_ACCOUNT_SID"),
            auth_token: env_opt("TWILIO_AUTH_TOKEN"),
            from_number: env_opt("TWILIO_FROM_NUMBER"),
            to_number: env_opt("ALERT_TO_NUMBER"),
            api_base: std::env::var("TWILIO_API_BASE").unwrap_or_else(|_| TWILIO_API_BASE.to_string()),
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
