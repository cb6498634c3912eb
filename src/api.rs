use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use log::debug;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;

const DEFAULT_BASE_URL: &str = "https://cloud.minim-security.com";

/// Errors from the Minim cloud, tagged by kind so callers can tell a
/// rejected token apart from a flaky network or a garbled body.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("transient cloud error: {0}")]
    Transient(String),
    #[error("malformed cloud response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Malformed(err.to_string())
        } else {
            ApiError::Transient(err.to_string())
        }
    }
}

fn status_error(status: StatusCode, context: &str) -> ApiError {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        ApiError::Auth(format!("{context} rejected with status {status}"))
    } else {
        ApiError::Transient(format!("{context} failed with status {status}"))
    }
}

#[derive(Deserialize, Debug)]
struct AuthResponse {
    #[serde(rename = "Token")]
    token: String,
    #[serde(rename = "ExpiresIn")]
    expires_in: u64,
}

#[derive(Debug)]
struct Session {
    token: String,
    expires_at: u64, // Epoch time when the token expires
}

/// Latest snapshot of all devices on the account, keyed by device identifier.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct MinimResult {
    #[serde(rename = "Data", default)]
    data: HashMap<String, MinimDeviceData>,
}

impl MinimResult {
    pub fn device(&self, device_id: &str) -> Option<&MinimDeviceData> {
        self.data.get(device_id)
    }

    pub fn devices(&self) -> impl Iterator<Item = (&str, &MinimDeviceData)> {
        self.data.iter().map(|(id, device)| (id.as_str(), device))
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct MinimDeviceData {
    #[serde(rename = "Name", default)]
    pub name: String,
    /// Comma-separated list of the scenario codes currently active on the
    /// device, in the order the cloud reports them.
    #[serde(rename = "ActiveScenarios", default)]
    pub active_scenarios: String,
    #[serde(rename = "Connected", default)]
    pub connected: bool,
    #[serde(rename = "Firmware", default)]
    pub firmware: String,
}

fn get_current_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Client for the Minim alarm cloud.
///
/// Holds the account credentials and the current bearer token; every request
/// goes through [`ensure_session`](Self::ensure_session) which logs in again
/// when the token is missing or past its expiry. One instance is shared by
/// the poll coordinator and every entity.
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
    username: String,
    password: String,
    client_id: String,
    session: Mutex<Option<Session>>,
}

impl ApiClient {
    pub fn new(username: &str, password: &str, client_id: &str) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, username, password, client_id)
    }

    // Base URL is overridable so tests can point at a local mock server.
    pub fn with_base_url(base_url: &str, username: &str, password: &str, client_id: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            username: username.to_string(),
            password: password.to_string(),
            client_id: client_id.to_string(),
            session: Mutex::new(None),
        }
    }

    /// Authenticate with the stored credentials, replacing any existing
    /// session. Called once at startup and again whenever the cloud rejects
    /// the current token.
    pub async fn login(&self) -> Result<(), ApiError> {
        let session = self.do_login().await?;
        *self.session.lock().await = Some(session);
        Ok(())
    }

    async fn do_login(&self) -> Result<Session, ApiError> {
        let url = format!("{}/api/auth/login", self.base_url);
        let body = json!({
            "Username": self.username,
            "Password": self.password,
            "ClientId": self.client_id,
        });

        let response = self.http.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(status_error(response.status(), "login"));
        }

        let auth: AuthResponse = response.json().await?;
        debug!("logged in to Minim cloud, token valid for {}s", auth.expires_in);
        Ok(Session {
            token: auth.token,
            expires_at: get_current_epoch() + auth.expires_in,
        })
    }

    async fn ensure_session(&self) -> Result<String, ApiError> {
        let mut session = self.session.lock().await;
        match session.as_ref() {
            Some(s) if get_current_epoch() < s.expires_at => Ok(s.token.clone()),
            _ => {
                let fresh = self.do_login().await?;
                let token = fresh.token.clone();
                *session = Some(fresh);
                Ok(token)
            }
        }
    }

    /// Ask the cloud to refresh its server-side snapshot of the device.
    /// The response body carries nothing of interest.
    pub async fn poll(&self, device_id: &str) -> Result<(), ApiError> {
        let token = self.ensure_session().await?;
        let url = format!("{}/api/devices/{}/poll", self.base_url, device_id);

        let response = self.http.get(&url).bearer_auth(token).send().await?;
        if !response.status().is_success() {
            return Err(status_error(response.status(), "poll"));
        }
        Ok(())
    }

    /// Fetch the extended device snapshot. The cloud wraps the per-device map
    /// in a request/response envelope; only the data map is decoded here.
    pub async fn fetch_state(&self, device_id: &str) -> Result<MinimResult, ApiError> {
        let token = self.ensure_session().await?;
        let url = format!("{}/api/devices/{}/extended", self.base_url, device_id);

        let response = self.http.get(&url).bearer_auth(token).send().await?;
        if !response.status().is_success() {
            return Err(status_error(response.status(), "state fetch"));
        }

        let result: MinimResult = response.json().await?;
        Ok(result)
    }

    /// Activate one vendor scenario on the device. The cloud acknowledges the
    /// request without reporting whether the panel accepted it; the next poll
    /// shows the outcome.
    pub async fn activate_scenario(&self, device_id: &str, scenario: u32) -> Result<(), ApiError> {
        let token = self.ensure_session().await?;
        let url = format!(
            "{}/api/devices/{}/scenarios/{}/activate",
            self.base_url, device_id, scenario
        );

        let response = self.http.post(&url).bearer_auth(token).send().await?;
        if !response.status().is_success() {
            return Err(status_error(response.status(), "scenario activation"));
        }
        Ok(())
    }
}
