//! Outbound phone-call alert through the Twilio REST API.

use crate::config::AlertConfig;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

const TWIML: &str = "<Response><Pause length=\"3\" /><Say voice=\"alice\">Hello. You have an intruder on your premises. Check camera one.</Say></Response>";

#[derive(Error, Debug)]
pub enum AlertError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("twilio rejected call ({status}): {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Deserialize)]
struct CallCreated {
    sid: String,
}

/// Places the intruder call. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CallAlerter {
    client: reqwest::Client,
    config: AlertConfig,
}

impl CallAlerter {
    pub fn new(config: AlertConfig) -> Result<Self, AlertError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self { client, config })
    }

    /// Place the call and return its SID.
    ///
    /// Returns `Ok(None)` without calling when dev mode is on or when any
    /// Twilio credential or phone number is missing.
    pub async fn place_call(&self) -> Result<Option<String>, AlertError> {
        let cfg = &self.config;
        if cfg.dev_mode {
            tracing::info!("DEV_MODE: intruder call would have been initiated");
            return Ok(None);
        }

        let (Some(sid), Some(token), Some(from), Some(to)) = (
            cfg.account_sid.as_deref(),
            cfg.auth_token.as_deref(),
            cfg.from_number.as_deref(),
            cfg.to_number.as_deref(),
        ) else {
            tracing::warn!("Twilio credentials incomplete; intruder call not placed");
            return Ok(None);
        };

        let url = format!(
            "{}/2010-04-01/Accounts/{sid}/Calls.json",
            cfg.api_base.trim_end_matches('/')
        );
        let resp = self
            .client
            .post(&url)
            .basic_auth(sid, Some(token))
            .form(&[("To", to), ("From", from), ("Twiml", TWIML)])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AlertError::Rejected { status: status.as_u16(), body });
        }

        let created: CallCreated = resp.json().await?;
        tracing::info!(call_sid = %created.sid, "intruder call placed");
        Ok(Some(created.sid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn live_config(api_base: String) -> AlertConfig {
        AlertConfig {
            dev_mode: false,
            account_sid: Some("AC123".into()),
            auth_token: Some("token".into()),
            from_number: Some("+15550001111".into()),
            to_number: Some("+15550002222".into()),
            api_base,
        }
    }

    #[tokio::test]
    async fn test_dev_mode_skips_call() {
        let mut cfg = live_config("http://127.0.0.1:9".into());
        cfg.dev_mode = true;
        let alerter = CallAlerter::new(cfg).unwrap();
        assert_eq!(alerter.place_call().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_credentials_skip_call() {
        let mut cfg = live_config("http://127.0.0.1:9".into());
        cfg.auth_token = None;
        let alerter = CallAlerter::new(cfg).unwrap();
        assert_eq!(alerter.place_call().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_call_posts_twiml_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2010-04-01/Accounts/AC123/Calls.json"))
            .and(header_exists("authorization"))
            .and(body_string_contains("To=%2B15550002222"))
            .and(body_string_contains("Twiml=%3CResponse%3E"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"sid": "CA999"})))
            .expect(1)
            .mount(&server)
            .await;

        let alerter = CallAlerter::new(live_config(server.uri())).unwrap();
        assert_eq!(alerter.place_call().await.unwrap(), Some("CA999".to_string()));
    }

    #[tokio::test]
    async fn test_rejected_call_surfaces_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad auth"))
            .mount(&server)
            .await;

        let alerter = CallAlerter::new(live_config(server.uri())).unwrap();
        match alerter.place_call().await {
            Err(AlertError::Rejected { status, body }) => {
                assert_eq!(status, 401);
                assert_eq!(body, "bad auth");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }
}
