//! Login flag gate.
//!
//! A successful login writes a flag file; pages and API routes check it.
//! The flag is global to the install, not per browser session.

use crate::error::ApiError;
use crate::pages;
use crate::AppState;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use axum::Form;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::PathBuf;

const FLAG_VALUE: &str = "true";

/// Lowercase hex SHA-256 of `password`.
pub fn hash_password(password: &str) -> String {
    format!("{:x}", Sha256::digest(password.as_bytes()))
}

/// Check submitted credentials against the configured ones.
pub fn credentials_match(username: &str, password: &str, valid_username: &str, valid_hash: &str) -> bool {
    username == valid_username && hash_password(password).eq_ignore_ascii_case(valid_hash.trim())
}

/// File-backed "someone is logged in" flag.
#[derive(Debug, Clone)]
pub struct LoginFlag {
    path: PathBuf,
}

impl LoginFlag {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn is_logged_in(&self) -> bool {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content.trim() == FLAG_VALUE,
            Err(_) => false,
        }
    }

    pub async fn set(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, FLAG_VALUE).await
    }

    pub async fn clear(&self) -> std::io::Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

#[derive(Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

pub async fn login_form() -> Response {
    pages::login(None).into_response()
}

pub async fn login_submit(State(state): State<AppState>, Form(form): Form<LoginForm>) -> Response {
    let config = &state.config;
    if !credentials_match(&form.username, &form.password, &config.username, &config.password_hash) {
        tracing::warn!(username = %form.username, "login rejected");
        return pages::login(Some("Invalid credentials")).into_response();
    }

    if let Err(e) = state.login.set().await {
        tracing::error!(error = %e, "failed to write login flag");
        return ApiError::internal(format!("Login failed: {e}")).into_response();
    }

    tracing::info!(username = %form.username, "login accepted");
    Redirect::to("/consent").into_response()
}

pub async fn logout(State(state): State<AppState>) -> Response {
    if let Err(e) = state.login.clear().await {
        tracing::warn!(error = %e, "failed to clear login flag");
    }
    Redirect::to("/login").into_response()
}

/// Page gate: redirect to the login form when nobody is logged in.
pub async fn require_login_page(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if state.login.is_logged_in().await {
        next.run(req).await
    } else {
        Redirect::to("/login").into_response()
    }
}

/// API gate: answer 401 when nobody is logged in.
pub async fn require_login_api(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if state.login.is_logged_in().await {
        next.run(req).await
    } else {
        ApiError::Unauthorized("Login required".into()).into_response()
    }
}
