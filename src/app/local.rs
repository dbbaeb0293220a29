use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use crate::{
    catalog::{
        unit_of_work, CatalogError, CatalogStore, CatalogTables, Category, DetachedCategory, Item,
        ItemCreate, ItemUpdate, Pagination,
    },
    config::Config,
    index::{IndexDelta, IndexService},
    reconcile::{Freshness, ReconciliationGuard, INDEX_PAGE_SIZE},
    search::{FuzzySearchEngine, SearchResultSet},
};

use super::{
    backend::*,
    errors::AppError,
    task_runner::{DeadLetters, IndexQueue, IndexQueueStats, TaskDump},
};

pub struct AppLocal {
    store: Arc<dyn CatalogStore>,
    index: Arc<dyn IndexService>,
    queue: IndexQueue,
    engine: FuzzySearchEngine,
    guard: ReconciliationGuard,
    config: Config,
}

impl AppLocal {
    pub fn new(
        config: Config,
        store: Arc<dyn CatalogStore>,
        index: Arc<dyn IndexService>,
        dead_letters: DeadLetters,
    ) -> Self {
        let queue = IndexQueue::start(index.clone(), config.index_queue.clone(), dead_letters);

        Self {
            engine: FuzzySearchEngine::new(store.clone()),
            guard: ReconciliationGuard::new(store.clone(), index.clone()),
            store,
            index,
            queue,
            config,
        }
    }

    #[cfg(test)]
    pub fn with_guard(mut self, guard: ReconciliationGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Wait until every index delta enqueued so far has been handled.
    pub fn flush(&self) {
        self.queue.flush();
    }

    /// Drain the index queue and stop its worker.
    pub fn shutdown(&self) {
        self.queue.shutdown();
    }

    /// Run `work` as one unit of work and mirror its effect into the index.
    ///
    /// `affected` names the items whose searchable text `work` may change. It
    /// is evaluated before and after `work`, the old and new texts are diffed
    /// per item, and the resulting deltas are enqueued only once the unit of
    /// work has committed.
    fn coordinated<T>(
        &self,
        affected: impl Fn(&CatalogTables) -> Vec<u64>,
        work: impl FnOnce(&mut CatalogTables) -> Result<T, CatalogError>,
    ) -> Result<T, AppError> {
        let (output, deltas) = unit_of_work(self.store.as_ref(), |tables| {
            let before: BTreeMap<u64, String> = affected(tables)
                .into_iter()
                .filter_map(|id| tables.searchable_text(id).ok().map(|text| (id, text)))
                .collect();
            let mut ids: Vec<u64> = before.keys().copied().collect();

            let output = work(tables)?;

            for id in affected(tables) {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }

            let deltas: Vec<IndexDelta> = ids
                .into_iter()
                .flat_map(|id| {
                    IndexDelta::transition(
                        id,
                        before.get(&id).cloned(),
                        tables.searchable_text(id).ok(),
                    )
                })
                .collect();

            Ok((output, deltas))
        })?;

        if !deltas.is_empty() {
            log::debug!("enqueueing {} index deltas", deltas.len());
        }
        for delta in deltas {
            self.queue.enqueue(delta);
        }

        Ok(output)
    }
}

fn members(tables: &CatalogTables, category_id: u64) -> Vec<u64> {
    tables
        .category(category_id)
        .map(|category| category.items.clone())
        .unwrap_or_default()
}

impl AppBackend for AppLocal {
    fn create_item(&self, create: ItemCreate) -> Result<Item, AppError> {
        if create.title.trim().is_empty() {
            return Err(CatalogError::IllegalArgument("item title is empty".to_string()).into());
        }

        let (item, text) = unit_of_work(self.store.as_ref(), |tables| {
            let item = tables.create_item(create);
            let text = tables.searchable_text(item.id)?;
            Ok((item, text))
        })?;

        self.queue.enqueue(IndexDelta::Add {
            text,
            item_id: item.id,
        });

        Ok(item)
    }

    fn update_item(&self, id: u64, update: ItemUpdate) -> Result<Item, AppError> {
        if update.is_empty() {
            return Err(CatalogError::IllegalArgument("nothing to update".to_string()).into());
        }
        if update.title.as_deref().is_some_and(|title| title.trim().is_empty()) {
            return Err(CatalogError::IllegalArgument("item title is empty".to_string()).into());
        }

        self.coordinated(|_| vec![id], |tables| tables.update_item(id, update))
    }

    fn delete_item(&self, id: u64) -> Result<Item, AppError> {
        self.coordinated(|_| vec![id], |tables| tables.delete_item(id))
    }

    fn create_category(&self, title: String) -> Result<Category, AppError> {
        if title.trim().is_empty() {
            return Err(
                CatalogError::IllegalArgument("category title is empty".to_string()).into(),
            );
        }

        Ok(unit_of_work(self.store.as_ref(), |tables| {
            Ok(tables.create_category(title))
        })?)
    }

    fn rename_category(&self, id: u64, title: String) -> Result<Category, AppError> {
        if title.trim().is_empty() {
            return Err(
                CatalogError::IllegalArgument("category title is empty".to_string()).into(),
            );
        }

        self.coordinated(
            |tables| members(tables, id),
            |tables| tables.rename_category(id, title),
        )
    }

    fn delete_category(&self, id: u64) -> Result<DetachedCategory, AppError> {
        self.coordinated(
            |tables| members(tables, id),
            |tables| tables.delete_category(id),
        )
    }

    fn add_item_to_category(&self, item_id: u64, category_id: u64) -> Result<Item, AppError> {
        self.coordinated(
            |_| vec![item_id],
            |tables| {
                tables.add_item_to_category(item_id, category_id)?;
                tables.item(item_id).cloned()
            },
        )
    }

    fn remove_item_from_category(&self, item_id: u64) -> Result<Item, AppError> {
        self.coordinated(
            |_| vec![item_id],
            |tables| {
                tables.remove_item_from_category(item_id)?;
                tables.item(item_id).cloned()
            },
        )
    }

    /// Category links never change an item's text, so there is nothing to
    /// mirror.
    fn add_category_to_category(
        &self,
        child_id: u64,
        parent_id: u64,
    ) -> Result<Category, AppError> {
        Ok(unit_of_work(self.store.as_ref(), |tables| {
            tables.add_category_to_category(child_id, parent_id)?;
            tables.category(child_id).cloned()
        })?)
    }

    fn remove_category_from_category(&self, child_id: u64) -> Result<Category, AppError> {
        Ok(unit_of_work(self.store.as_ref(), |tables| {
            tables.remove_category_from_category(child_id)?;
            tables.category(child_id).cloned()
        })?)
    }

    fn item(&self, id: u64) -> Result<Item, AppError> {
        Ok(self
            .store
            .item(id)?
            .ok_or(CatalogError::ItemNotFound(id))?)
    }

    fn categories(&self) -> Result<Vec<Category>, AppError> {
        Ok(self.store.categories()?)
    }

    fn total(&self) -> Result<usize, AppError> {
        Ok(self.store.count_items(usize::MAX)?)
    }

    fn search_by_title(
        &self,
        query: &str,
        pagination: &Pagination,
    ) -> Result<SearchResultSet, AppError> {
        Ok(self.engine.search_by_title(query, pagination)?)
    }

    fn search_by_title_and_category(
        &self,
        query: &str,
        category_id: u64,
        pagination: &Pagination,
    ) -> Result<SearchResultSet, AppError> {
        Ok(self
            .engine
            .search_by_title_and_category(query, category_id, pagination)?)
    }

    fn search_index(&self, query: &str) -> Result<IndexSearch, AppError> {
        let ids = self.index.query_ids(query)?;

        let mut items = Vec::with_capacity(INDEX_PAGE_SIZE);
        for id in ids.into_iter().take(INDEX_PAGE_SIZE) {
            match self.store.item(id)? {
                Some(item) => items.push(item),
                None => log::warn!("index returned unknown item {id} for {query:?}"),
            }
        }

        let freshness = self.guard.ensure_index_fresh(query, &items)?;
        Ok(IndexSearch { items, freshness })
    }

    fn ensure_index_fresh(&self, query: &str, results: &[Item]) -> Result<Freshness, AppError> {
        Ok(self.guard.ensure_index_fresh(query, results)?)
    }

    fn resync(&self) -> Freshness {
        self.guard.trigger_resync()
    }

    /// Parked deltas are checked against the current catalog first. An add
    /// survives only while it still matches the item's text, a delete only
    /// while no item formats to that text.
    fn replay_failed(&self) -> usize {
        let tables = match self.store.snapshot() {
            Ok(tables) => tables,
            Err(err) => {
                log::error!("couldnt read catalog, keeping parked index changes: {err}");
                return 0;
            }
        };
        let current: HashSet<String> = tables
            .searchable_documents()
            .into_iter()
            .map(|(_, text)| text)
            .collect();

        self.queue.replay_failed(|delta| match delta {
            IndexDelta::Add { text, item_id } => tables
                .searchable_text(*item_id)
                .is_ok_and(|current_text| current_text == *text),
            IndexDelta::Delete { text } => !current.contains(text),
        })
    }

    fn failed_deltas(&self) -> Vec<TaskDump> {
        self.queue.failed()
    }

    fn queue_stats(&self) -> IndexQueueStats {
        self.queue.stats()
    }
}
