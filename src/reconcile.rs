//! Drift detection between the catalog store and the external index.
//!
//! After an index-backed query the item count is sampled from the store. When
//! the index result looks short for that sample a full resync is requested,
//! and the caller waits for it only up to `RESYNC_TIMEOUT`.

use std::{
    sync::{mpsc, Arc},
    time::Duration,
};

use serde::Serialize;

use crate::{
    catalog::{CatalogError, CatalogStore, Item},
    index::{IndexError, IndexService},
};

/// Items counted from the store before giving up.
pub const SAMPLE_SIZE: usize = 4;
/// Below this many items the index must return exactly the sample.
pub const SAMPLE_FLOOR: usize = 4;
/// Ids kept from an index query.
pub const INDEX_PAGE_SIZE: usize = 4;
pub const RESYNC_TIMEOUT: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum Freshness {
    /// No drift detected.
    Consistent,
    /// Drift detected and the index finished rebuilding in time.
    Resynchronized,
    /// A rebuild is running and results may be stale.
    SyncInProgress,
    ResyncFailed(String),
}

/// Whether `returned` index hits look wrong for a store sample of `sample`.
pub fn is_drift(sample: usize, returned: usize) -> bool {
    if sample < SAMPLE_FLOOR {
        returned != sample
    } else {
        returned != INDEX_PAGE_SIZE
    }
}

pub struct ReconciliationGuard {
    store: Arc<dyn CatalogStore>,
    index: Arc<dyn IndexService>,
    timeout: Duration,
}

impl ReconciliationGuard {
    pub fn new(store: Arc<dyn CatalogStore>, index: Arc<dyn IndexService>) -> Self {
        Self {
            store,
            index,
            timeout: RESYNC_TIMEOUT,
        }
    }

    #[cfg(test)]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check the results of an index-backed query for drift and resync on
    /// drift. The results themselves are never altered.
    pub fn ensure_index_fresh(
        &self,
        query: &str,
        results: &[Item],
    ) -> Result<Freshness, CatalogError> {
        let sample = self.store.count_items(SAMPLE_SIZE)?;

        if !is_drift(sample, results.len()) {
            return Ok(Freshness::Consistent);
        }

        log::warn!(
            "index drift on {query:?}: store sample {sample}, index returned {}",
            results.len()
        );
        Ok(self.trigger_resync())
    }

    /// Start a full rebuild and wait for it at most `timeout`. On timeout
    /// the rebuild keeps running in the background.
    pub fn trigger_resync(&self) -> Freshness {
        let (done_tx, done_rx) = mpsc::channel();
        let index = self.index.clone();

        std::thread::spawn(move || {
            let _span = tracing::info_span!("index_resync").entered();
            let result = index.resynchronize();
            match &result {
                Ok(()) => log::info!("index resynchronized"),
                Err(IndexError::AlreadyInProgress) => {
                    log::debug!("index resync already running")
                }
                Err(err) => log::error!("index resync failed: {err}"),
            }
            // the caller may have stopped waiting
            let _ = done_tx.send(result);
        });

        match done_rx.recv_timeout(self.timeout) {
            Ok(Ok(())) => Freshness::Resynchronized,
            Ok(Err(IndexError::AlreadyInProgress)) => Freshness::SyncInProgress,
            Ok(Err(err)) => Freshness::ResyncFailed(err.to_string()),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                log::warn!(
                    "index resync still running after {}ms, not waiting",
                    self.timeout.as_millis()
                );
                Freshness::SyncInProgress
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Freshness::ResyncFailed("resync task ended without a result".to_string())
            }
        }
    }
}
