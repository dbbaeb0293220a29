//! Catalog entities and the relational store they live in.
//!
//! - `tree`: arena of items and categories plus the structural invariants
//! - `formatter`: canonical searchable text of an item
//! - `store`: CSV-backed store with unit-of-work transactions

mod errors;
pub mod formatter;
mod store;
mod tree;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{collections::HashSet, hash::Hash};

pub use errors::CatalogError;
pub use formatter::searchable_text;
pub use store::BackendCsv;
pub use tree::{CatalogTables, DetachedCategory, IdSequence};

pub const DEFAULT_PAGE_SIZE: usize = 20;

#[derive(Debug, Clone, Eq, Default, Serialize, Deserialize)]
pub struct Item {
    pub id: u64,

    pub title: String,
    pub description: String,
    pub keywords: Vec<String>,

    /// Owning category. Resolved through `CatalogTables`, never owned.
    pub category_id: Option<u64>,

    /// Hex sha256 of the description.
    pub description_hash: String,
}

impl Hash for Item {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl PartialEq for Item {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

#[derive(Debug, Clone, Eq, Default, Serialize, Deserialize)]
pub struct Category {
    pub id: u64,
    pub title: String,
    pub parent_id: Option<u64>,

    /// Child categories in attachment order.
    pub children: Vec<u64>,
    /// Member items in attachment order.
    pub items: Vec<u64>,
}

impl PartialEq for Category {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ItemCreate {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ItemUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub append_keywords: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove_keywords: Option<Vec<String>>,
}

impl ItemUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.keywords.is_none()
            && self.append_keywords.is_none()
            && self.remove_keywords.is_none()
    }
}

/// Zero-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: usize,
    pub size: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 0,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Pagination {
    pub fn new(page: usize, size: usize) -> Self {
        Self { page, size }
    }
}

/// One page of a store query plus the metadata of the query that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub content: Vec<T>,
    pub page: usize,
    pub size: usize,
    pub total_elements: usize,
    pub total_pages: usize,
}

impl<T> Page<T> {
    pub fn empty(pagination: &Pagination) -> Self {
        Self {
            content: vec![],
            page: pagination.page,
            size: pagination.size,
            total_elements: 0,
            total_pages: 0,
        }
    }

    /// Slice an already ordered list of matches into the requested page.
    pub fn from_matches(matches: Vec<T>, pagination: &Pagination) -> Self {
        let total_elements = matches.len();
        let total_pages = if pagination.size == 0 {
            0
        } else {
            total_elements.div_ceil(pagination.size)
        };

        let content = matches
            .into_iter()
            .skip(pagination.page.saturating_mul(pagination.size))
            .take(pagination.size)
            .collect();

        Self {
            content,
            page: pagination.page,
            size: pagination.size,
            total_elements,
            total_pages,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// The relational store. Every mutation goes through `transaction`, which
/// commits only when the unit of work returns `Ok`.
pub trait CatalogStore: Send + Sync {
    fn item(&self, id: u64) -> Result<Option<Item>, CatalogError>;
    fn category(&self, id: u64) -> Result<Option<Category>, CatalogError>;
    fn items(&self) -> Result<Vec<Item>, CatalogError>;
    fn categories(&self) -> Result<Vec<Category>, CatalogError>;

    /// Number of items, counting no further than `cap`.
    fn count_items(&self, cap: usize) -> Result<usize, CatalogError>;

    /// Items matching `filter`, in store order, sliced to `pagination`.
    fn find_items(
        &self,
        filter: &dyn Fn(&Item) -> bool,
        pagination: &Pagination,
    ) -> Result<Page<Item>, CatalogError>;

    fn snapshot(&self) -> Result<CatalogTables, CatalogError>;

    fn transaction(
        &self,
        work: &mut dyn FnMut(&mut CatalogTables) -> Result<(), CatalogError>,
    ) -> Result<(), CatalogError>;
}

/// Run `work` as a single transaction and hand back what it produced.
pub fn unit_of_work<T>(
    store: &dyn CatalogStore,
    work: impl FnOnce(&mut CatalogTables) -> Result<T, CatalogError>,
) -> Result<T, CatalogError> {
    let mut work = Some(work);
    let mut output = None;

    store.transaction(&mut |tables| {
        let work = work
            .take()
            .ok_or_else(|| CatalogError::Storage(anyhow!("unit of work ran twice")))?;
        output = Some(work(tables)?);
        Ok(())
    })?;

    output.ok_or_else(|| CatalogError::Storage(anyhow!("unit of work produced nothing")))
}

pub fn description_hash(description: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(description.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Trim, drop empties and dedup keywords, keeping first-seen order.
pub fn normalize_keywords(keywords: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    keywords
        .into_iter()
        .map(|keyword| keyword.trim().to_string())
        .filter(|keyword| !keyword.is_empty())
        .filter(|keyword| seen.insert(keyword.clone()))
        .collect()
}
