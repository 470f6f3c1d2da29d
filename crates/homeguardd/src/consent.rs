//! Consent records stored in a CSV file, with signature images beside it.

use crate::pages;
use crate::AppState;
use axum::extract::State;
use axum::response::{IntoResponse, Redirect, Response};
use axum::{Form, Json};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

const HEADERS: [&str; 5] = ["first_name", "last_name", "id_number", "consent", "signature_file"];

#[derive(Error, Debug)]
pub enum ConsentError {
    #[error("This ID already exists. Duplicate entries are not allowed.")]
    DuplicateId,
    #[error("Name already exists. Duplicate entries are not allowed.")]
    DuplicateName,
    #[error("First name, last name and ID number are required.")]
    MissingField,
    #[error("Invalid signature image: {0}")]
    Signature(String),
    #[error("consent store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("consent csv: {0}")]
    Csv(#[from] csv::Error),
}

impl ConsentError {
    /// Errors the submitter can fix by editing the form.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            ConsentError::DuplicateId
                | ConsentError::DuplicateName
                | ConsentError::MissingField
                | ConsentError::Signature(_)
        )
    }
}

/// One row of `consents.csv`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentRecord {
    pub first_name: String,
    pub last_name: String,
    pub id_number: String,
    pub consent: String,
    #[serde(default)]
    pub signature_file: String,
}

/// Submitted consent form.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsentForm {
    pub first_name: String,
    pub last_name: String,
    pub id_number: String,
    pub consent: Option<String>,
    /// `data:image/png;base64,...` from the signature canvas.
    pub signature: Option<String>,
}

/// CSV-backed consent store. Clones share one write lock.
#[derive(Debug, Clone)]
pub struct ConsentStore {
    csv_path: PathBuf,
    signatures_dir: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl ConsentStore {
    /// Open the store, writing the header row if the CSV does not exist yet.
    pub fn open(csv_path: impl Into<PathBuf>, signatures_dir: impl Into<PathBuf>) -> Result<Self, ConsentError> {
        let csv_path = csv_path.into();
        let signatures_dir = signatures_dir.into();
        std::fs::create_dir_all(&signatures_dir)?;
        if let Some(parent) = csv_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if !csv_path.exists() {
            let mut w = csv::Writer::from_path(&csv_path)?;
            w.write_record(HEADERS)?;
            w.flush()?;
        }
        Ok(Self { csv_path, signatures_dir, lock: Arc::new(Mutex::new(())) })
    }

    pub fn records(&self) -> Result<Vec<ConsentRecord>, ConsentError> {
        let mut reader = csv::Reader::from_path(&self.csv_path)?;
        reader
            .deserialize()
            .collect::<Result<Vec<ConsentRecord>, _>>()
            .map_err(ConsentError::from)
    }

    /// `"first last"` for every record, in file order.
    pub fn names(&self) -> Result<Vec<String>, ConsentError> {
        Ok(self
            .records()?
            .into_iter()
            .map(|r| format!("{} {}", r.first_name, r.last_name))
            .collect())
    }

    /// Validate, save the signature and append the record.
    pub fn submit(&self, form: ConsentForm) -> Result<ConsentRecord, ConsentError> {
        let first_name = form.first_name.trim().to_string();
        let last_name = form.last_name.trim().to_string();
        let id_number = form.id_number.trim().to_string();
        if first_name.is_empty() || last_name.is_empty() || id_number.is_empty() {
            return Err(ConsentError::MissingField);
        }

        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        for row in self.records()? {
            if row.id_number.trim() == id_number {
                return Err(ConsentError::DuplicateId);
            }
            if row.first_name.trim().to_lowercase() == first_name.to_lowercase()
                && row.last_name.trim().to_lowercase() == last_name.to_lowercase()
            {
                return Err(ConsentError::DuplicateName);
            }
        }

        let signature_file = match form.signature.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(data_url) => self.save_signature(&first_name, &last_name, data_url)?,
            None => String::new(),
        };

        let record = ConsentRecord {
            first_name,
            last_name,
            id_number,
            consent: form.consent.unwrap_or_else(|| "No".to_string()),
            signature_file,
        };

        let file = OpenOptions::new().append(true).open(&self.csv_path)?;
        let mut w = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        w.serialize(&record)?;
        w.flush()?;

        tracing::info!(id = %record.id_number, "consent recorded");
        Ok(record)
    }

    fn save_signature(&self, first: &str, last: &str, data_url: &str) -> Result<String, ConsentError> {
        let (_, encoded) = data_url
            .split_once(',')
            .ok_or_else(|| ConsentError::Signature("expected a data URL".into()))?;
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| ConsentError::Signature(e.to_string()))?;

        let unix = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        let name = format!("{}_{}_{unix}.png", file_component(first), file_component(last));
        let path = self.signatures_dir.join(name);
        std::fs::write(&path, bytes)?;
        Ok(display_path(&path))
    }
}

/// Keep names usable as a single path component.
fn file_component(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

fn display_path(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

pub async fn consent_form() -> Response {
    pages::consent(None).into_response()
}

pub async fn consent_submit(State(state): State<AppState>, Form(form): Form<ConsentForm>) -> Response {
    let store = state.consent.clone();
    let result = tokio::task::spawn_blocking(move || store.submit(form)).await;

    match result {
        Ok(Ok(_)) => Redirect::to("/").into_response(),
        Ok(Err(e)) if e.is_user_error() => pages::consent(Some(&e.to_string())).into_response(),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "consent submission failed");
            pages::consent(Some("Could not save the consent form. Please try again.")).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "consent task panicked");
            pages::consent(Some("Could not save the consent form. Please try again.")).into_response()
        }
    }
}

/// JSON list of consenting names; any failure yields an empty list.
pub async fn consent_names(State(state): State<AppState>) -> Json<Vec<String>> {
    let store = state.consent.clone();
    let names = tokio::task::spawn_blocking(move || store.names())
        .await
        .map_err(|e| e.to_string())
        .and_then(|r| r.map_err(|e| e.to_string()));

    match names {
        Ok(names) => Json(names),
        Err(e) => {
            tracing::warn!(error = %e, "failed to read consent names");
            Json(Vec::new())
        }
    }
}
