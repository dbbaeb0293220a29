
use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use crate::{
    app::{local::AppLocal, task_runner::DeadLetters},
    catalog::{BackendCsv, CatalogStore},
    config::{Config, IndexQueueConfig},
    index::{IndexDelta, IndexError, IndexService},
    storage,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncBehavior {
    Succeed,
    InProgress,
    Fail,
    Slow(Duration),
}

/// In-memory index that records every call it receives.
pub struct FakeIndex {
    documents: Mutex<Vec<(String, u64)>>,
    pub calls: Mutex<Vec<IndexDelta>>,
    pub resync_calls: AtomicUsize,
    resync: Mutex<ResyncBehavior>,
    query_answer: Mutex<Option<Vec<u64>>>,
    down: AtomicBool,
}

impl FakeIndex {
    pub fn new() -> Self {
        Self {
            documents: Mutex::new(vec![]),
            calls: Mutex::new(vec![]),
            resync_calls: AtomicUsize::new(0),
            resync: Mutex::new(ResyncBehavior::Succeed),
            query_answer: Mutex::new(None),
            down: AtomicBool::new(false),
        }
    }

    pub fn set_resync(&self, behavior: ResyncBehavior) {
        *self.resync.lock().unwrap() = behavior;
    }

    /// Make `query_ids` answer with exactly `ids`.
    pub fn answer(&self, ids: Vec<u64>) {
        *self.query_answer.lock().unwrap() = Some(ids);
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<IndexDelta> {
        self.calls.lock().unwrap().clone()
    }

    /// Texts currently held for `item_id`.
    pub fn text_of(&self, item_id: u64) -> Vec<String> {
        self.documents
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, id)| *id == item_id)
            .map(|(text, _)| text.clone())
            .collect()
    }

    fn check_up(&self) -> Result<(), IndexError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(IndexError::Rejected {
                status: 400,
                message: "index is down".into(),
            });
        }
        Ok(())
    }
}

impl IndexService for FakeIndex {
    fn add_document(&self, text: &str, item_id: u64) -> Result<(), IndexError> {
        self.check_up()?;
        self.calls.lock().unwrap().push(IndexDelta::Add {
            text: text.to_string(),
            item_id,
        });

        let mut documents = self.documents.lock().unwrap();
        documents.retain(|(existing, _)| existing != text);
        documents.push((text.to_string(), item_id));
        Ok(())
    }

    fn delete_document(&self, text: &str) -> Result<(), IndexError> {
        self.check_up()?;
        self.calls.lock().unwrap().push(IndexDelta::Delete {
            text: text.to_string(),
        });

        self.documents
            .lock()
            .unwrap()
            .retain(|(existing, _)| existing != text);
        Ok(())
    }

    fn query_ids(&self, text: &str) -> Result<Vec<u64>, IndexError> {
        if let Some(ids) = self.query_answer.lock().unwrap().clone() {
            return Ok(ids);
        }

        let needle = text.to_lowercase();
        Ok(self
            .documents
            .lock()
            .unwrap()
            .iter()
            .filter(|(doc, _)| doc.to_lowercase().contains(&needle))
            .map(|(_, id)| *id)
            .collect())
    }

    fn resynchronize(&self) -> Result<(), IndexError> {
        self.resync_calls.fetch_add(1, Ordering::SeqCst);

        let behavior = *self.resync.lock().unwrap();
        match behavior {
            ResyncBehavior::Succeed => Ok(()),
            ResyncBehavior::InProgress => Err(IndexError::AlreadyInProgress),
            ResyncBehavior::Fail => Err(IndexError::Unavailable("rebuild crashed".into())),
            ResyncBehavior::Slow(duration) => {
                std::thread::sleep(duration);
                Ok(())
            }
        }
    }
}

/// Creates an isolated AppLocal backed by a fresh temp directory and a
/// recording fake index. Each test gets its own directory so parallel tests
/// never collide.
pub fn create_app() -> (AppLocal, Arc<FakeIndex>, Arc<BackendCsv>, tempfile::TempDir) {
    let tmp = tempfile::tempdir().expect("failed to create temp dir");

    let store = Arc::new(BackendCsv::load(tmp.path()).expect("failed to create catalog"));
    let index = Arc::new(FakeIndex::new());
    let storage_mgr =
        storage::BackendLocal::new(tmp.path()).expect("failed to create storage");

    let mut config = Config::default();
    config.index_queue = IndexQueueConfig {
        max_retries: 1,
        base_backoff_ms: 1,
    };

    let app = AppLocal::new(
        config,
        store.clone() as Arc<dyn CatalogStore>,
        index.clone() as Arc<dyn IndexService>,
        DeadLetters::new(Arc::new(storage_mgr)),
    );

    (app, index, store, tmp)
}
