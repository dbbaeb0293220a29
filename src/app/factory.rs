use crate::{
    app::{local::AppLocal, task_runner::DeadLetters},
    catalog::{BackendCsv, CatalogStore},
    config::{Config, IndexConfig, IndexKind},
    index::{HttpIndex, IndexService, LocalIndex},
    storage,
};
use anyhow::{Context, Result};
use homedir::my_home;
use std::{path::PathBuf, sync::Arc};

/// Application factory for creating and configuring application components
pub struct AppFactory;

impl AppFactory {
    /// Create a local application instance
    pub fn create_local_app(paths: &AppPaths) -> Result<AppLocal> {
        let config = Config::load_with(&paths.base_path)?;

        let store: Arc<dyn CatalogStore> = Arc::new(
            BackendCsv::load(&paths.data_path).context("failed to load catalog")?,
        );
        let index = Self::create_index(&config.index, store.clone())?;

        let storage_mgr = storage::BackendLocal::new(&paths.data_path)
            .context("failed to open queue storage")?;
        let dead_letters = DeadLetters::new(Arc::new(storage_mgr));

        Ok(AppLocal::new(config, store, index, dead_letters))
    }

    /// Build the index service named by the config. The local index lives in
    /// memory, so it is rebuilt from the store right away.
    pub fn create_index(
        config: &IndexConfig,
        store: Arc<dyn CatalogStore>,
    ) -> Result<Arc<dyn IndexService>> {
        match config.kind {
            IndexKind::Local => {
                let index = LocalIndex::with_source(store);
                index
                    .resynchronize()
                    .context("failed to build local index")?;
                Ok(Arc::new(index))
            }
            IndexKind::Http => {
                let url = config
                    .url
                    .as_deref()
                    .context("index.url not set for http index")?;
                log::info!("Using remote index: {url}");

                let index = HttpIndex::new(url, config.basic_auth(), config.request_timeout())?;
                Ok(Arc::new(index))
            }
        }
    }

    /// Get application paths with validation
    pub fn get_paths() -> Result<AppPaths> {
        let paths = AppPaths::new(&Self::get_base_path()?);

        // Ensure base directory exists
        std::fs::create_dir_all(&paths.data_path)
            .context("Failed to create application base directory")?;

        Ok(paths)
    }

    /// `$KIOSK_BASE_PATH`, else `~/.local/share/kiosk-search`
    fn get_base_path() -> Result<String> {
        if let Ok(base_path) = std::env::var("KIOSK_BASE_PATH") {
            return Ok(base_path);
        }

        let home = my_home()
            .context("Could not determine home directory")?
            .context("Home directory path is empty")?;
        Ok(format!("{}/.local/share/kiosk-search", home.to_string_lossy()))
    }
}

/// Application paths structure
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub base_path: String,
    pub data_path: PathBuf,
}

impl AppPaths {
    pub fn new(base_path: &str) -> Self {
        Self {
            base_path: base_path.to_string(),
            data_path: PathBuf::from(base_path),
        }
    }
}
