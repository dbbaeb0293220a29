use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::{
    catalog::DEFAULT_PAGE_SIZE,
    storage::{self, StorageManager},
};

pub const CONFIG_FILE: &str = "config.yaml";

const INDEX_QUEUE_MAX_RETRIES: u8 = 3;
const INDEX_QUEUE_MAX_RETRIES_LIMIT: u8 = 16;
const INDEX_QUEUE_BASE_BACKOFF_MS: u64 = 500;
const INDEX_REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    #[default]
    Local,
    Http,
}

/// Where index deltas and queries go.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default)]
    pub kind: IndexKind,

    /// Base url of the remote index, required for `kind: http`
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "index_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            kind: IndexKind::Local,
            url: None,
            username: None,
            password: None,
            request_timeout_secs: INDEX_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl IndexConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn basic_auth(&self) -> Option<(String, Option<String>)> {
        self.username
            .clone()
            .map(|username| (username, self.password.clone()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexQueueConfig {
    #[serde(default = "index_queue_max_retries")]
    pub max_retries: u8,

    /// Backoff before retry n is `base * 2^(n-1)` plus up to `base` jitter
    #[serde(default = "index_queue_base_backoff_ms")]
    pub base_backoff_ms: u64,
}

impl Default for IndexQueueConfig {
    fn default() -> Self {
        Self {
            max_retries: INDEX_QUEUE_MAX_RETRIES,
            base_backoff_ms: INDEX_QUEUE_BASE_BACKOFF_MS,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

fn index_request_timeout_secs() -> u64 {
    INDEX_REQUEST_TIMEOUT_SECS
}

fn index_queue_max_retries() -> u8 {
    INDEX_QUEUE_MAX_RETRIES
}

fn index_queue_base_backoff_ms() -> u64 {
    INDEX_QUEUE_BASE_BACKOFF_MS
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub index_queue: IndexQueueConfig,
    #[serde(default)]
    pub search: SearchConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: String,
}

impl Config {
    fn validate(&self) -> anyhow::Result<()> {
        if self.index.kind == IndexKind::Http
            && self.index.url.as_deref().unwrap_or("").trim().is_empty()
        {
            bail!("index.url is required when index.kind is http");
        }

        if self.index.request_timeout_secs == 0 {
            bail!("index.request_timeout_secs must be greater than 0");
        }

        if self.search.default_page_size == 0 {
            bail!("search.default_page_size must be greater than 0");
        }

        if self.index_queue.max_retries > INDEX_QUEUE_MAX_RETRIES_LIMIT {
            bail!("index_queue.max_retries must be at most {INDEX_QUEUE_MAX_RETRIES_LIMIT}");
        }

        Ok(())
    }

    pub fn load_with(base_path: &str) -> anyhow::Result<Self> {
        let store = storage::BackendLocal::new(base_path)
            .with_context(|| format!("failed to open data directory {base_path}"))?;

        // create new if does not exist
        if !store.exists(CONFIG_FILE) {
            store.write(CONFIG_FILE, serde_yml::to_string(&Self::default())?.as_bytes())?;
        }

        let config_str = String::from_utf8(store.read(CONFIG_FILE)?)
            .context("config file is not valid utf8")?;
        let mut config: Self = serde_yml::from_str(&config_str).context("config is malformed")?;

        config.base_path = base_path.to_string();
        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let store = storage::BackendLocal::new(&self.base_path)?;

        let config_str = serde_yml::to_string(&self)?;
        store.write(CONFIG_FILE, config_str.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(tmp: &tempfile::TempDir) -> String {
        tmp.path().to_string_lossy().to_string()
    }

    #[test]
    fn test_defaults_written_on_first_load() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::load_with(&base(&tmp)).unwrap();

        assert_eq!(config.index.kind, IndexKind::Local);
        assert_eq!(config.index_queue, IndexQueueConfig::default());
        assert_eq!(config.search.default_page_size, 20);
        assert!(tmp.path().join(CONFIG_FILE).exists());
    }

    #[test]
    fn test_partial_config_is_upgraded() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join(CONFIG_FILE),
            "index:\n  kind: http\n  url: http://index:7700\n",
        )
        .unwrap();

        let config = Config::load_with(&base(&tmp)).unwrap();
        assert_eq!(config.index.kind, IndexKind::Http);
        assert_eq!(config.index.request_timeout_secs, 10);

        let saved = std::fs::read_to_string(tmp.path().join(CONFIG_FILE)).unwrap();
        assert!(saved.contains("index_queue"));
    }

    #[test]
    fn test_http_without_url_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE), "index:\n  kind: http\n").unwrap();

        let err = Config::load_with(&base(&tmp)).unwrap_err();
        assert!(err.to_string().contains("index.url"));
    }

    #[test]
    fn test_too_many_retries_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join(CONFIG_FILE),
            "index_queue:\n  max_retries: 200\n",
        )
        .unwrap();

        let err = Config::load_with(&base(&tmp)).unwrap_err();
        assert!(err.to_string().contains("max_retries"));
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join(CONFIG_FILE),
            "search:\n  default_page_size: 0\n",
        )
        .unwrap();

        assert!(Config::load_with(&base(&tmp)).is_err());
    }

    #[test]
    fn test_basic_auth() {
        let mut index = IndexConfig::default();
        assert_eq!(index.basic_auth(), None);

        index.username = Some("kiosk".into());
        assert_eq!(index.basic_auth(), Some(("kiosk".into(), None)));
    }
}
