//! Fuzzy title search against the catalog store.
//!
//! Tiers run in order and the first non-empty page wins:
//! numeric-aware (only when the query has integers), exact (only when it has
//! none), near, typo-tolerant.

mod distance;
mod tiers;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use crate::catalog::{CatalogError, CatalogStore, Item, Page, Pagination};

pub use distance::levenshtein;
pub use tiers::{extract_numbers, Tier, TitleQuery, NEAR_DISTANCE, TYPO_DISTANCE};

pub type SearchResultSet = Page<Item>;

pub struct FuzzySearchEngine {
    store: Arc<dyn CatalogStore>,
}

impl FuzzySearchEngine {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    pub fn search_by_title(
        &self,
        query: &str,
        pagination: &Pagination,
    ) -> Result<SearchResultSet, CatalogError> {
        self.cascade(query, None, pagination)
    }

    /// Same cascade, restricted to members of `category_id`.
    pub fn search_by_title_and_category(
        &self,
        query: &str,
        category_id: u64,
        pagination: &Pagination,
    ) -> Result<SearchResultSet, CatalogError> {
        if self.store.category(category_id)?.is_none() {
            return Err(CatalogError::CategoryNotFound(category_id));
        }
        self.cascade(query, Some(category_id), pagination)
    }

    fn cascade(
        &self,
        query: &str,
        scope: Option<u64>,
        pagination: &Pagination,
    ) -> Result<SearchResultSet, CatalogError> {
        if pagination.size == 0 {
            return Err(CatalogError::IllegalArgument(
                "page size must be greater than 0".to_string(),
            ));
        }

        if query.trim().is_empty() {
            return Ok(Page::empty(pagination));
        }

        let query = TitleQuery::new(query);

        if query.numbers.is_empty() {
            let page = self.run_tier(Tier::Exact, &query, scope, pagination)?;
            if !page.is_empty() {
                log::debug!("{:?}: exact match", query.lower);
                return Ok(page);
            }
        } else {
            let page = self.numeric_union(&query, scope, pagination)?;
            if !page.is_empty() {
                log::debug!("{:?}: numeric match on {:?}", query.lower, query.numbers);
                return Ok(page);
            }
        }

        for tier in [Tier::Near, Tier::Typo] {
            let page = self.run_tier(tier, &query, scope, pagination)?;
            if !page.is_empty() {
                log::debug!("{:?}: {tier:?} match", query.lower);
                return Ok(page);
            }
        }

        Ok(Page::empty(pagination))
    }

    fn run_tier(
        &self,
        tier: Tier,
        query: &TitleQuery,
        scope: Option<u64>,
        pagination: &Pagination,
    ) -> Result<SearchResultSet, CatalogError> {
        let filter = |item: &Item| {
            scope.map_or(true, |category_id| item.category_id == Some(category_id))
                && tier.matches(&item.title, query)
        };
        self.store.find_items(&filter, pagination)
    }

    /// One page per number. The first non-empty page keeps its metadata and
    /// later pages only add items not seen yet.
    fn numeric_union(
        &self,
        query: &TitleQuery,
        scope: Option<u64>,
        pagination: &Pagination,
    ) -> Result<SearchResultSet, CatalogError> {
        let mut union: Option<SearchResultSet> = None;

        for &number in &query.numbers {
            let page = self.run_tier(Tier::Numeric(number), query, scope, pagination)?;
            if page.is_empty() {
                continue;
            }

            match union.as_mut() {
                None => union = Some(page),
                Some(acc) => {
                    for item in page.content {
                        if !acc.content.contains(&item) {
                            acc.content.push(item);
                        }
                    }
                }
            }
        }

        Ok(union.unwrap_or_else(|| Page::empty(pagination)))
    }
}
