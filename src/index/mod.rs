//! External search index the catalog is mirrored into.
//!
//! The index is content-addressed: documents are keyed by their text, not by
//! the item id, which is why every change to an item's searchable text is
//! expressed as a delete of the old text followed by an add of the new one.
//!
//! - `local`: in-process index with lexical ranking
//! - `http`: client for a remotely hosted index

mod http;
mod local;

use serde::{Deserialize, Serialize};

use crate::catalog::CatalogError;

pub use http::HttpIndex;
pub use local::LocalIndex;

/// Errors reported by an index service.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("index service unavailable: {0}")]
    Unavailable(String),

    #[error("index service rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("index resynchronization already in progress")]
    AlreadyInProgress,

    #[error("http error: {0:?}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
}

impl IndexError {
    /// Whether trying the same call again later could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            IndexError::Unavailable(_) => true,
            IndexError::Rejected { status, .. } => *status >= 500,
            IndexError::Http(err) => {
                err.is_timeout()
                    || err.is_connect()
                    || err.status().map(|s| s.is_server_error()).unwrap_or(false)
            }
            IndexError::AlreadyInProgress
            | IndexError::Serialization(_)
            | IndexError::Catalog(_) => false,
        }
    }
}

pub trait IndexService: Send + Sync {
    /// Upsert the document `text` for `item_id`.
    fn add_document(&self, text: &str, item_id: u64) -> Result<(), IndexError>;

    /// Remove the document keyed by `text`. Absent keys are not an error.
    fn delete_document(&self, text: &str) -> Result<(), IndexError>;

    /// Best matching item ids for `text`, best first.
    fn query_ids(&self, text: &str) -> Result<Vec<u64>, IndexError>;

    /// Rebuild the whole index from the catalog store.
    /// Fails with `AlreadyInProgress` while another rebuild runs.
    fn resynchronize(&self) -> Result<(), IndexError>;
}

/// One change to apply to the index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexDelta {
    Add { text: String, item_id: u64 },
    Delete { text: String },
}

impl IndexDelta {
    pub fn apply(&self, index: &dyn IndexService) -> Result<(), IndexError> {
        match self {
            IndexDelta::Add { text, item_id } => index.add_document(text, *item_id),
            IndexDelta::Delete { text } => index.delete_document(text),
        }
    }

    /// Deltas that move an item's document from `old` to `new` text.
    ///
    /// `None` on either side means the item did not exist before or does not
    /// exist after. Unchanged text produces nothing.
    pub fn transition(item_id: u64, old: Option<String>, new: Option<String>) -> Vec<IndexDelta> {
        match (old, new) {
            (Some(old), Some(new)) if old == new => vec![],
            (Some(old), Some(new)) => vec![
                IndexDelta::Delete { text: old },
                IndexDelta::Add { text: new, item_id },
            ],
            (Some(old), None) => vec![IndexDelta::Delete { text: old }],
            (None, Some(new)) => vec![IndexDelta::Add { text: new, item_id }],
            (None, None) => vec![],
        }
    }
}
