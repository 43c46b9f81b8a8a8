use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub syncer: SyncerConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    pub store: StoreConfig,
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub connectors: ConnectorsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncerConfig {
    #[serde(default = "default_check_period_secs")]
    pub check_period_secs: u64,
    #[serde(default = "default_stale_threshold_secs")]
    pub stale_threshold_secs: u64,
}

impl Default for SyncerConfig {
    fn default() -> Self {
        Self {
            check_period_secs: default_check_period_secs(),
            stale_threshold_secs: default_stale_threshold_secs(),
        }
    }
}

impl SyncerConfig {
    pub fn check_period(&self) -> Duration {
        Duration::from_secs(self.check_period_secs)
    }

    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_threshold_secs)
    }
}

fn default_check_period_secs() -> u64 {
    60
}
fn default_stale_threshold_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// `"memory"` for a process-local index, `"weaviate"` for the embedded
    /// Weaviate instance.
    pub backend: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CredentialsConfig {
    /// Directory holding one JSON credential file per connector id.
    pub dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConnectorsConfig {
    pub googledrive: Option<GoogleDriveConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GoogleDriveConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Base URL the OAuth redirect is registered under
    /// (e.g. `http://127.0.0.1:8081`).
    #[serde(default = "default_redirect_base")]
    pub redirect_base: String,
    #[serde(default = "default_drive_display_name")]
    pub display_name: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_redirect_base() -> String {
    "http://127.0.0.1:8081".to_string()
}
fn default_drive_display_name() -> String {
    "Google Drive".to_string()
}
fn default_page_size() -> usize {
    10
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.syncer.check_period_secs == 0 {
        anyhow::bail!("syncer.check_period_secs must be > 0");
    }
    if config.syncer.stale_threshold_secs == 0 {
        anyhow::bail!("syncer.stale_threshold_secs must be > 0");
    }

    match config.store.backend.as_str() {
        "memory" => {}
        "weaviate" => {
            if config.store.url.is_none() {
                anyhow::bail!("store.url must be set when backend is 'weaviate'");
            }
        }
        other => anyhow::bail!(
            "Unknown store backend: '{}'. Must be memory or weaviate.",
            other
        ),
    }

    if config.embedding.is_enabled() && config.embedding.model.is_none() {
        anyhow::bail!(
            "embedding.model must be specified when provider is '{}'",
            config.embedding.provider
        );
    }

    match config.embedding.provider.as_str() {
        "disabled" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or ollama.",
            other
        ),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("syncdex.toml");
        std::fs::write(&path, content).unwrap();
        (tmp, path)
    }

    #[test]
    fn test_minimal_config() {
        let (_tmp, path) = write_config(
            r#"
[store]
backend = "memory"

[credentials]
dir = "/tmp/creds"
"#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.syncer.check_period_secs, 60);
        assert_eq!(config.syncer.stale_threshold_secs, 60);
        assert!(!config.embedding.is_enabled());
        assert!(config.connectors.googledrive.is_none());
    }

    #[test]
    fn test_weaviate_requires_url() {
        let (_tmp, path) = write_config(
            r#"
[store]
backend = "weaviate"

[credentials]
dir = "/tmp/creds"
"#,
        );
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_enabled_embedding_requires_model() {
        let (_tmp, path) = write_config(
            r#"
[store]
backend = "memory"

[credentials]
dir = "/tmp/creds"

[embedding]
provider = "ollama"
"#,
        );
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_drive_connector_defaults() {
        let (_tmp, path) = write_config(
            r#"
[store]
backend = "memory"

[credentials]
dir = "/tmp/creds"

[connectors.googledrive]
client_id = "id"
client_secret = "secret"
"#,
        );
        let config = load_config(&path).unwrap();
        let drive = config.connectors.googledrive.unwrap();
        assert_eq!(drive.page_size, 10);
        assert_eq!(drive.display_name, "Google Drive");
    }
}
