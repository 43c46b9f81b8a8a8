//! Credential storage and OAuth exchange boundaries.
//!
//! Token acquisition UX (browser, redirect capture) lives outside the engine;
//! what the connectors need is a place to load and persist a durable
//! [`Credential`] per connector id, and an [`OauthExchange`] that can turn an
//! authorization code into one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::SyncError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
}

/// Durable storage of one credential per connector id.
pub trait CredentialStore: Send + Sync {
    fn load(&self, connector_id: &str) -> Result<Option<Credential>, SyncError>;
    fn save(&self, connector_id: &str, credential: &Credential) -> Result<(), SyncError>;
}

/// One JSON file per connector id under a configured directory.
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, connector_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", connector_id))
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self, connector_id: &str) -> Result<Option<Credential>, SyncError> {
        let path = self.path_for(connector_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|e| SyncError::Auth(format!("failed to read {}: {}", path.display(), e)))?;
        let credential = serde_json::from_str(&content)
            .map_err(|e| SyncError::Auth(format!("malformed credential file: {}", e)))?;
        Ok(Some(credential))
    }

    fn save(&self, connector_id: &str, credential: &Credential) -> Result<(), SyncError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| SyncError::Auth(format!("failed to create credential dir: {}", e)))?;
        let path = self.path_for(connector_id);
        let content = serde_json::to_string_pretty(credential)
            .map_err(|e| SyncError::Auth(e.to_string()))?;
        std::fs::write(&path, content)
            .map_err(|e| SyncError::Auth(format!("failed to write {}: {}", path.display(), e)))?;
        Ok(())
    }
}

/// Authorization-code exchange for one OAuth provider.
#[async_trait]
pub trait OauthExchange: Send + Sync {
    /// URL the user must visit to authorize the connector. Completion
    /// arrives out-of-band via `auth_callback`.
    fn authorize_url(&self, connector_id: &str) -> String;

    /// Exchange an authorization code for a durable credential.
    async fn exchange(&self, connector_id: &str, code: &str) -> Result<Credential, SyncError>;

    /// Resolve the authenticated identity behind a credential.
    async fn user_identity(&self, credential: &Credential) -> Result<String, SyncError>;
}

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

const DRIVE_SCOPES: &str = "https://www.googleapis.com/auth/drive.metadata.readonly \
https://www.googleapis.com/auth/drive.readonly \
https://www.googleapis.com/auth/userinfo.email";

/// Google OAuth implementation shared by the Drive connector.
pub struct GoogleOauth {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    redirect_base: String,
}

impl GoogleOauth {
    pub fn new(client_id: &str, client_secret: &str, redirect_base: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            redirect_base: redirect_base.trim_end_matches('/').to_string(),
        }
    }

    fn redirect_uri(&self, connector_id: &str) -> String {
        format!("{}/connectors/{}/callback", self.redirect_base, connector_id)
    }
}

#[async_trait]
impl OauthExchange for GoogleOauth {
    fn authorize_url(&self, connector_id: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&access_type=offline&scope={}&state={}",
            GOOGLE_AUTH_URL,
            self.client_id,
            self.redirect_uri(connector_id),
            DRIVE_SCOPES.replace(' ', "%20"),
            connector_id,
        )
    }

    async fn exchange(&self, connector_id: &str, code: &str) -> Result<Credential, SyncError> {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", &self.redirect_uri(connector_id)),
        ];

        let resp = self
            .client
            .post(GOOGLE_TOKEN_URL)
            .form(&params)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SyncError::Auth(format!(
                "token exchange failed ({}): {}",
                status, body
            )));
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            #[serde(default)]
            refresh_token: Option<String>,
            #[serde(default)]
            expires_in: Option<i64>,
        }

        let token: TokenResponse = resp.json().await?;
        Ok(Credential {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expiry: token
                .expires_in
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
        })
    }

    async fn user_identity(&self, credential: &Credential) -> Result<String, SyncError> {
        let resp = self
            .client
            .get(format!("{}?alt=json", GOOGLE_USERINFO_URL))
            .bearer_auth(&credential.access_token)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SyncError::Auth(format!(
                "failed to get user info: status {}",
                status
            )));
        }

        #[derive(Deserialize)]
        struct UserInfo {
            email: String,
        }

        let info: UserInfo = resp.json().await?;
        Ok(info.email)
    }
}
