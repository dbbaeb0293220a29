use serde::Serialize;

use crate::{
    app::task_runner::{IndexQueueStats, TaskDump},
    catalog::{Category, DetachedCategory, Item, ItemCreate, ItemUpdate, Pagination},
    reconcile::Freshness,
    search::SearchResultSet,
};

use super::errors::AppError;

/// Everything the catalog exposes to its callers. Every mutation keeps the
/// external index in step with the store.
pub trait AppBackend: Send + Sync {
    fn create_item(&self, create: ItemCreate) -> Result<Item, AppError>;
    fn update_item(&self, id: u64, update: ItemUpdate) -> Result<Item, AppError>;
    fn delete_item(&self, id: u64) -> Result<Item, AppError>;

    fn create_category(&self, title: String) -> Result<Category, AppError>;
    fn rename_category(&self, id: u64, title: String) -> Result<Category, AppError>;
    fn delete_category(&self, id: u64) -> Result<DetachedCategory, AppError>;

    fn add_item_to_category(&self, item_id: u64, category_id: u64) -> Result<Item, AppError>;
    fn remove_item_from_category(&self, item_id: u64) -> Result<Item, AppError>;
    fn add_category_to_category(&self, child_id: u64, parent_id: u64)
        -> Result<Category, AppError>;
    fn remove_category_from_category(&self, child_id: u64) -> Result<Category, AppError>;

    fn item(&self, id: u64) -> Result<Item, AppError>;
    fn categories(&self) -> Result<Vec<Category>, AppError>;
    fn total(&self) -> Result<usize, AppError>;

    fn search_by_title(
        &self,
        query: &str,
        pagination: &Pagination,
    ) -> Result<SearchResultSet, AppError>;
    fn search_by_title_and_category(
        &self,
        query: &str,
        category_id: u64,
        pagination: &Pagination,
    ) -> Result<SearchResultSet, AppError>;

    /// Query the external index, then check it for drift.
    fn search_index(&self, query: &str) -> Result<IndexSearch, AppError>;
    fn ensure_index_fresh(&self, query: &str, results: &[Item]) -> Result<Freshness, AppError>;
    fn resync(&self) -> Freshness;

    fn replay_failed(&self) -> usize;
    fn failed_deltas(&self) -> Vec<TaskDump>;
    fn queue_stats(&self) -> IndexQueueStats;
}

/// Result of an index-backed query. `items` are returned even when stale.
#[derive(Debug, Clone, Serialize)]
pub struct IndexSearch {
    pub items: Vec<Item>,
    pub freshness: Freshness,
}
