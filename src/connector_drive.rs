//! Google Drive connector.
//!
//! Enumerates files changed since the last sync through the Drive REST API,
//! exports their content, and emits chunks. Enumeration is paged; each page
//! fans out to one task per file (parallelism is therefore bounded by the
//! page size) and joins before the next page is fetched. Transient API
//! failures retry the same page through the shared backoff policy.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::GoogleDriveConfig;
use crate::connector::Connector;
use crate::credentials::{CredentialStore, GoogleOauth, OauthExchange};
use crate::error::SyncError;
use crate::models::{Chunk, ConnectorState, ConnectorType, Document};
use crate::retry::{retry, RetryPolicy};
use crate::store::VectorStore;
use crate::text::split_into_chunks;

const DRIVE_FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";

const MIME_GOOGLE_DOC: &str = "application/vnd.google-apps.document";
const MIME_GOOGLE_SHEET: &str = "application/vnd.google-apps.spreadsheet";
const MIME_GOOGLE_SLIDES: &str = "application/vnd.google-apps.presentation";

/// One file as returned by the Drive files listing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub web_view_link: Option<String>,
    #[serde(default)]
    pub created_time: Option<String>,
    #[serde(default)]
    pub modified_time: Option<String>,
    #[serde(default)]
    pub mime_type: String,
}

/// One page of the changed-files enumeration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePage {
    #[serde(default)]
    pub files: Vec<DriveFile>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Source API boundary for Google Drive.
#[async_trait]
pub trait DriveApi: Send + Sync {
    /// List files modified after `since` (all files when `None`), one page
    /// at a time.
    async fn list_changed(
        &self,
        since: Option<DateTime<Utc>>,
        page_token: Option<&str>,
    ) -> Result<FilePage, SyncError>;

    /// Export a file's content as text. `Ok(None)` means the file's type is
    /// not supported and should be skipped.
    async fn export(&self, file: &DriveFile) -> Result<Option<String>, SyncError>;
}

/// Drive REST implementation of [`DriveApi`], authenticated with the bearer
/// token from the credential store.
pub struct HttpDriveApi {
    client: reqwest::Client,
    credentials: Arc<dyn CredentialStore>,
    connector_id: String,
    page_size: usize,
}

impl HttpDriveApi {
    pub fn new(
        connector_id: &str,
        credentials: Arc<dyn CredentialStore>,
        page_size: usize,
    ) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SyncError::Config(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            credentials,
            connector_id: connector_id.to_string(),
            page_size,
        })
    }

    fn access_token(&self) -> Result<String, SyncError> {
        let credential = self
            .credentials
            .load(&self.connector_id)?
            .ok_or_else(|| SyncError::Auth("no credential for connector".into()))?;
        Ok(credential.access_token)
    }

    async fn get_text(&self, url: &str, query: &[(&str, String)]) -> Result<String, SyncError> {
        let token = self.access_token()?;
        let resp = self
            .client
            .get(url)
            .query(query)
            .bearer_auth(token)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SyncError::http(Some(status.as_u16()), body));
        }
        Ok(resp.text().await?)
    }
}

#[async_trait]
impl DriveApi for HttpDriveApi {
    async fn list_changed(
        &self,
        since: Option<DateTime<Utc>>,
        page_token: Option<&str>,
    ) -> Result<FilePage, SyncError> {
        let mut query: Vec<(&str, String)> = vec![
            ("pageSize", self.page_size.to_string()),
            (
                "fields",
                "nextPageToken, files(id, name, webViewLink, createdTime, modifiedTime, mimeType)"
                    .to_string(),
            ),
            ("orderBy", "modifiedTime desc".to_string()),
        ];
        if let Some(since) = since {
            query.push(("q", format!("modifiedTime > '{}'", since.to_rfc3339())));
        }
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }

        let body = self.get_text(DRIVE_FILES_URL, &query).await?;
        serde_json::from_str(&body)
            .map_err(|e| SyncError::connector(format!("malformed file listing: {}", e)))
    }

    async fn export(&self, file: &DriveFile) -> Result<Option<String>, SyncError> {
        let content = match file.mime_type.as_str() {
            MIME_GOOGLE_DOC | MIME_GOOGLE_SLIDES => {
                let url = format!("{}/{}/export", DRIVE_FILES_URL, file.id);
                self.get_text(&url, &[("mimeType", "text/plain".to_string())])
                    .await?
            }
            MIME_GOOGLE_SHEET => {
                let url = format!("{}/{}/export", DRIVE_FILES_URL, file.id);
                self.get_text(&url, &[("mimeType", "text/csv".to_string())])
                    .await?
            }
            mime if mime.starts_with("text/") || mime == "application/json" => {
                let url = format!("{}/{}", DRIVE_FILES_URL, file.id);
                self.get_text(&url, &[("alt", "media".to_string())]).await?
            }
            mime => {
                debug!("Unsupported MIME type {}, skipping {}", mime, file.name);
                return Ok(None);
            }
        };
        Ok(Some(content))
    }
}

pub struct DriveConnector {
    id: String,
    display_name: String,
    api: Arc<dyn DriveApi>,
    oauth: Arc<dyn OauthExchange>,
    credentials: Arc<dyn CredentialStore>,
    store: Arc<dyn VectorStore>,
    policy: RetryPolicy,
}

impl DriveConnector {
    pub fn new(
        connector_id: &str,
        config: &GoogleDriveConfig,
        credentials: Arc<dyn CredentialStore>,
        store: Arc<dyn VectorStore>,
    ) -> Result<Self, SyncError> {
        let api = Arc::new(HttpDriveApi::new(
            connector_id,
            credentials.clone(),
            config.page_size,
        )?);
        let oauth = Arc::new(GoogleOauth::new(
            &config.client_id,
            &config.client_secret,
            &config.redirect_base,
        ));
        Ok(Self::with_parts(
            connector_id,
            &config.display_name,
            api,
            oauth,
            credentials,
            store,
        ))
    }

    pub fn with_parts(
        connector_id: &str,
        display_name: &str,
        api: Arc<dyn DriveApi>,
        oauth: Arc<dyn OauthExchange>,
        credentials: Arc<dyn CredentialStore>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            id: connector_id.to_string(),
            display_name: display_name.to_string(),
            api,
            oauth,
            credentials,
            store,
            policy: RetryPolicy::default(),
        }
    }

    /// Export, document, and emit one file's chunks. Item-level failures are
    /// logged and skipped; they never abort the sync.
    async fn process_file(
        api: Arc<dyn DriveApi>,
        store: Arc<dyn VectorStore>,
        policy: RetryPolicy,
        connector_id: String,
        file: DriveFile,
        cancel: CancellationToken,
        chunks: mpsc::Sender<Chunk>,
    ) {
        let content = match retry(policy, &cancel, "drive export", || api.export(&file)).await {
            Ok(Some(content)) => content,
            Ok(None) => return,
            Err(SyncError::Cancelled) => return,
            Err(err) => {
                warn!(
                    "Unable to export file {} of mimetype {}: {}",
                    file.name, file.mime_type, err
                );
                return;
            }
        };

        let created_at = parse_drive_time(file.created_time.as_deref());
        let updated_at = parse_drive_time(file.modified_time.as_deref());

        let document = Document {
            unique_id: file.id.clone(),
            name: file.name.clone(),
            source_url: file.web_view_link.clone().unwrap_or_default(),
            connector_id: connector_id.clone(),
            connector_type: ConnectorType::GoogleDrive,
            created_at,
            updated_at,
        };

        // A resynced document supersedes its old chunks. Failure here just
        // leaves stale chunks behind.
        if let Err(err) = store
            .delete_document_chunks(&document.unique_id, &connector_id)
            .await
        {
            warn!(
                "Unable to delete chunks for document {}: {}",
                document.unique_id, err
            );
        }

        for chunk in split_into_chunks(&document, &content) {
            tokio::select! {
                _ = cancel.cancelled() => return,
                sent = chunks.send(chunk) => {
                    if sent.is_err() {
                        // Consumer is gone; stop producing.
                        return;
                    }
                }
            }
        }
    }
}

fn parse_drive_time(value: Option<&str>) -> DateTime<Utc> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

#[async_trait]
impl Connector for DriveConnector {
    fn id(&self) -> &str {
        &self.id
    }

    fn connector_type(&self) -> ConnectorType {
        ConnectorType::GoogleDrive
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    async fn init(&self) -> Result<(), SyncError> {
        let has_credential = self.credentials.load(&self.id)?.is_some();

        match self.store.get_connector_state(&self.id).await {
            Ok(mut state) => {
                if state.auth_valid && !has_credential {
                    state.auth_valid = false;
                    self.store.update_connector_state(&state).await?;
                }
                Ok(())
            }
            Err(_) => {
                let mut state =
                    ConnectorState::new(&self.id, ConnectorType::GoogleDrive, &self.display_name);
                state.auth_valid = has_credential;
                self.store.update_connector_state(&state).await
            }
        }
    }

    async fn auth_setup(&self) -> Result<(), SyncError> {
        if self.credentials.load(&self.id)?.is_some() {
            debug!("Credential already present for {}, auth setup is a no-op", self.id);
            return Ok(());
        }
        // Completion arrives asynchronously via auth_callback.
        info!(
            "Authorization required for {}. Visit:\n{}",
            self.id,
            self.oauth.authorize_url(&self.id)
        );
        Ok(())
    }

    async fn auth_callback(&self, code: &str) -> Result<(), SyncError> {
        let credential = self.oauth.exchange(&self.id, code).await?;
        self.credentials.save(&self.id, &credential)?;

        let email = self.oauth.user_identity(&credential).await?;
        info!("Authorized {} as {}", self.id, email);

        let mut state = self.status().await?;
        state.user = Some(email);
        state.auth_valid = true;
        self.update_state(&state).await
    }

    async fn status(&self) -> Result<ConnectorState, SyncError> {
        self.store.get_connector_state(&self.id).await
    }

    async fn update_state(&self, state: &ConnectorState) -> Result<(), SyncError> {
        self.store.update_connector_state(state).await
    }

    async fn sync(
        &self,
        cancel: CancellationToken,
        since: Option<DateTime<Utc>>,
        chunks: mpsc::Sender<Chunk>,
    ) -> Result<(), SyncError> {
        let mut page_token: Option<String> = None;

        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            // Transient listing failures retry the same page; the backoff
            // observes the token so cancellation is not delayed.
            let page = match retry(self.policy, &cancel, "drive list", || {
                self.api.list_changed(since, page_token.as_deref())
            })
            .await
            {
                Ok(page) => page,
                Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                Err(err) => {
                    return Err(SyncError::connector(format!("unable to list files: {}", err)))
                }
            };

            let mut tasks = JoinSet::new();
            for file in page.files {
                tasks.spawn(Self::process_file(
                    self.api.clone(),
                    self.store.clone(),
                    self.policy,
                    self.id.clone(),
                    file,
                    cancel.clone(),
                    chunks.clone(),
                ));
            }
            // Join the page before fetching the next one; this bounds
            // concurrent outbound requests to the page size.
            while let Some(joined) = tasks.join_next().await {
                if let Err(err) = joined {
                    warn!("File task panicked: {}", err);
                }
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Credential;
    use crate::store::memory::MemoryStore;
    use std::sync::Mutex;

    struct StaticCredentials {
        credential: Option<Credential>,
    }

    impl CredentialStore for StaticCredentials {
        fn load(&self, _connector_id: &str) -> Result<Option<Credential>, SyncError> {
            Ok(self.credential.clone())
        }
        fn save(&self, _connector_id: &str, _credential: &Credential) -> Result<(), SyncError> {
            Ok(())
        }
    }

    struct StaticOauth;

    #[async_trait]
    impl OauthExchange for StaticOauth {
        fn authorize_url(&self, connector_id: &str) -> String {
            format!("https://auth.example/{}", connector_id)
        }
        async fn exchange(&self, _id: &str, _code: &str) -> Result<Credential, SyncError> {
            Ok(Credential {
                access_token: "token".into(),
                refresh_token: None,
                expiry: None,
            })
        }
        async fn user_identity(&self, _credential: &Credential) -> Result<String, SyncError> {
            Ok("user@example.com".into())
        }
    }

    /// Serves scripted pages; `fail_exports` makes those file ids error.
    struct ScriptedApi {
        pages: Vec<FilePage>,
        fail_exports: Vec<String>,
        list_calls: Mutex<u32>,
    }

    #[async_trait]
    impl DriveApi for ScriptedApi {
        async fn list_changed(
            &self,
            _since: Option<DateTime<Utc>>,
            page_token: Option<&str>,
        ) -> Result<FilePage, SyncError> {
            *self.list_calls.lock().unwrap() += 1;
            let index = page_token.map(|t| t.parse::<usize>().unwrap()).unwrap_or(0);
            Ok(self.pages[index].clone())
        }

        async fn export(&self, file: &DriveFile) -> Result<Option<String>, SyncError> {
            if self.fail_exports.contains(&file.id) {
                return Err(SyncError::http(Some(400), "corrupt file"));
            }
            Ok(Some(format!("content of {}", file.id)))
        }
    }

    fn drive_file(id: &str) -> DriveFile {
        DriveFile {
            id: id.to_string(),
            name: format!("{}.txt", id),
            web_view_link: Some(format!("https://drive.example/{}", id)),
            created_time: Some("2024-05-01T10:00:00Z".to_string()),
            modified_time: Some("2024-05-02T10:00:00Z".to_string()),
            mime_type: "text/plain".to_string(),
        }
    }

    fn connector(api: Arc<dyn DriveApi>, store: Arc<MemoryStore>) -> DriveConnector {
        DriveConnector::with_parts(
            "gd-1",
            "Drive",
            api,
            Arc::new(StaticOauth),
            Arc::new(StaticCredentials { credential: None }),
            store,
        )
    }

    #[tokio::test]
    async fn test_sync_walks_all_pages() {
        let api = Arc::new(ScriptedApi {
            pages: vec![
                FilePage {
                    files: vec![drive_file("a"), drive_file("b")],
                    next_page_token: Some("1".to_string()),
                },
                FilePage {
                    files: vec![drive_file("c")],
                    next_page_token: None,
                },
            ],
            fail_exports: vec![],
            list_calls: Mutex::new(0),
        });
        let store = Arc::new(MemoryStore::new());
        let conn = connector(api.clone(), store);

        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        conn.sync(cancel, None, tx).await.unwrap();

        let mut ids = Vec::new();
        while let Some(chunk) = rx.recv().await {
            ids.push(chunk.document_id);
        }
        ids.sort();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(*api.list_calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_item_failure_skips_only_that_file() {
        let api = Arc::new(ScriptedApi {
            pages: vec![FilePage {
                files: vec![drive_file("good"), drive_file("bad"), drive_file("fine")],
                next_page_token: None,
            }],
            fail_exports: vec!["bad".to_string()],
            list_calls: Mutex::new(0),
        });
        let store = Arc::new(MemoryStore::new());
        let conn = connector(api, store);

        let (tx, mut rx) = mpsc::channel(16);
        conn.sync(CancellationToken::new(), None, tx).await.unwrap();

        let mut ids = Vec::new();
        while let Some(chunk) = rx.recv().await {
            ids.push(chunk.document_id);
        }
        ids.sort();
        assert_eq!(ids, vec!["fine", "good"]);
    }

    #[tokio::test]
    async fn test_cancelled_sync_emits_nothing() {
        let api = Arc::new(ScriptedApi {
            pages: vec![FilePage {
                files: vec![drive_file("a")],
                next_page_token: None,
            }],
            fail_exports: vec![],
            list_calls: Mutex::new(0),
        });
        let store = Arc::new(MemoryStore::new());
        let conn = connector(api, store);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let (tx, mut rx) = mpsc::channel(16);
        let result = conn.sync(cancel, None, tx).await;

        assert!(matches!(result, Err(SyncError::Cancelled)));
        assert!(rx.recv().await.is_none());
    }

    /// Listing that never succeeds with a retryable failure.
    struct RateLimitedApi;

    #[async_trait]
    impl DriveApi for RateLimitedApi {
        async fn list_changed(
            &self,
            _since: Option<DateTime<Utc>>,
            _page_token: Option<&str>,
        ) -> Result<FilePage, SyncError> {
            Err(SyncError::http(Some(503), "unavailable"))
        }

        async fn export(&self, _file: &DriveFile) -> Result<Option<String>, SyncError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_listing_backoff() {
        let store = Arc::new(MemoryStore::new());
        let mut conn = connector(Arc::new(RateLimitedApi), store);
        // A schedule that would otherwise sleep for a minute per retry.
        conn.policy = RetryPolicy {
            initial: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
            max_retries: 10,
        };

        let cancel = CancellationToken::new();
        {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                cancel.cancel();
            });
        }

        let (tx, _rx) = mpsc::channel(4);
        let started = std::time::Instant::now();
        let result = conn.sync(cancel, None, tx).await;

        assert!(matches!(result, Err(SyncError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_parse_drive_time_fallback() {
        let parsed = parse_drive_time(Some("2024-05-01T10:00:00Z"));
        assert_eq!(parsed.to_rfc3339(), "2024-05-01T10:00:00+00:00");
        // Garbage falls back to now rather than failing the item.
        let fallback = parse_drive_time(Some("not a time"));
        assert!(fallback <= Utc::now());
    }
}
