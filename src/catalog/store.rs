use anyhow::{anyhow, Context};
use std::{
    collections::BTreeMap,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
    time::Instant,
};

use super::{
    CatalogError, CatalogStore, CatalogTables, Category, IdSequence, Item, Page, Pagination,
};
use crate::storage::{self, StorageManager};

const ITEM_HEADERS: [&str; 5] = ["id", "title", "description", "keywords", "description_hash"];
const CATEGORY_HEADERS: [&str; 4] = ["id", "title", "children", "items"];

pub const ITEMS_FILE: &str = "items.csv";
pub const CATEGORIES_FILE: &str = "categories.csv";
pub const SEQUENCE_FILE: &str = "sequence.json";

/// Catalog tables kept in memory and persisted as two CSV files.
///
/// Only the forward lists (`children`, `items`) of a category are written;
/// back-references are rebuilt on load so the files hold a single source of
/// truth for the tree. The id sequence lives in `sequence.json`.
#[derive(Debug, Clone)]
pub struct BackendCsv {
    tables: Arc<RwLock<CatalogTables>>,
    items_path: PathBuf,
    categories_path: PathBuf,
    meta: storage::BackendLocal,
}

fn poisoned<T>(err: std::sync::PoisonError<T>) -> CatalogError {
    CatalogError::Storage(anyhow!("catalog lock poisoned: {err}"))
}

fn ensure_file(path: &Path, headers: &[&str]) -> anyhow::Result<()> {
    if let Err(err) = std::fs::metadata(path) {
        match err.kind() {
            ErrorKind::NotFound => {
                log::info!("Creating new table at {}", path.display());
                let mut csv_wrt = csv::Writer::from_path(path)?;
                csv_wrt.write_record(headers)?;
                csv_wrt.flush()?;
            }
            _ => Err(err)?,
        }
    }

    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    path.with_extension("csv-tmp")
}

fn parse_id_list(raw: &str) -> anyhow::Result<Vec<u64>> {
    if raw.is_empty() {
        return Ok(vec![]);
    }
    Ok(serde_json::from_str(raw)?)
}

impl BackendCsv {
    pub fn load(base_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(base_dir)
            .with_context(|| format!("couldnt create {}", base_dir.display()))?;

        let items_path = base_dir.join(ITEMS_FILE);
        let categories_path = base_dir.join(CATEGORIES_FILE);
        ensure_file(&items_path, &ITEM_HEADERS)?;
        ensure_file(&categories_path, &CATEGORY_HEADERS)?;

        let now = Instant::now();

        let mut items = BTreeMap::new();
        let mut csv_reader = csv::Reader::from_path(&items_path)?;
        for record in csv_reader.records() {
            let record = record?;
            let id = record
                .get(0)
                .ok_or(anyhow!("couldnt get item id"))?
                .parse::<u64>()?;
            let title = record
                .get(1)
                .ok_or(anyhow!("couldnt get item title"))?
                .to_string();
            let description = record
                .get(2)
                .ok_or(anyhow!("couldnt get item description"))?
                .to_string();
            let keywords: Vec<String> = serde_json::from_str(
                record.get(3).ok_or(anyhow!("couldnt get item keywords"))?,
            )
            .with_context(|| format!("item {id} has malformed keywords"))?;
            let description_hash = record
                .get(4)
                .ok_or(anyhow!("couldnt get item description hash"))?
                .to_string();

            items.insert(
                id,
                Item {
                    id,
                    title,
                    description,
                    keywords,
                    category_id: None,
                    description_hash,
                },
            );
        }

        let mut categories = BTreeMap::new();
        let mut csv_reader = csv::Reader::from_path(&categories_path)?;
        for record in csv_reader.records() {
            let record = record?;
            let id = record
                .get(0)
                .ok_or(anyhow!("couldnt get category id"))?
                .parse::<u64>()?;
            let title = record
                .get(1)
                .ok_or(anyhow!("couldnt get category title"))?
                .to_string();
            let children = parse_id_list(
                record
                    .get(2)
                    .ok_or(anyhow!("couldnt get category children"))?,
            )?;
            let category_items =
                parse_id_list(record.get(3).ok_or(anyhow!("couldnt get category items"))?)?;

            categories.insert(
                id,
                Category {
                    id,
                    title,
                    parent_id: None,
                    children,
                    items: category_items,
                },
            );
        }

        let meta = storage::BackendLocal::new(base_dir)?;
        let sequence = if meta.exists(SEQUENCE_FILE) {
            serde_json::from_slice(&meta.read(SEQUENCE_FILE)?)
                .context("failed to parse id sequence")?
        } else {
            IdSequence::default()
        };

        let mut tables = CatalogTables {
            items,
            categories,
            sequence,
        };
        tables
            .link()
            .map_err(|err| anyhow!("catalog files are inconsistent: {err}"))?;

        log::debug!(
            "took {}ms to read catalog",
            now.elapsed().as_micros() as f64 / 1000.0
        );

        Ok(BackendCsv {
            tables: Arc::new(RwLock::new(tables)),
            items_path,
            categories_path,
            meta,
        })
    }

    fn write_table<const N: usize>(
        temp_path: &Path,
        headers: [&str; N],
        rows: impl Iterator<Item = anyhow::Result<[String; N]>>,
    ) -> anyhow::Result<()> {
        let mut csv_wrt = csv::Writer::from_path(temp_path)?;
        csv_wrt.write_record(headers)?;
        for row in rows {
            csv_wrt.write_record(row?)?;
        }
        csv_wrt.flush()?;
        Ok(())
    }

    /// Both tables are written to temp files before either replaces its
    /// file, so a failed write leaves the committed files untouched.
    pub fn save(&self, tables: &CatalogTables) -> anyhow::Result<()> {
        let items_tmp = temp_path(&self.items_path);
        let categories_tmp = temp_path(&self.categories_path);

        if let Err(err) = self.write_temp_tables(tables, &items_tmp, &categories_tmp) {
            for path in [&items_tmp, &categories_tmp] {
                if path.is_file() {
                    let _ = std::fs::remove_file(path);
                }
            }
            return Err(err);
        }

        std::fs::rename(&items_tmp, &self.items_path).context("couldnt replace items")?;
        std::fs::rename(&categories_tmp, &self.categories_path)
            .context("couldnt replace categories")?;

        Ok(())
    }

    fn write_temp_tables(
        &self,
        tables: &CatalogTables,
        items_tmp: &Path,
        categories_tmp: &Path,
    ) -> anyhow::Result<()> {
        Self::write_table(
            items_tmp,
            ITEM_HEADERS,
            tables.items().map(|item| -> anyhow::Result<[String; 5]> {
                Ok([
                    item.id.to_string(),
                    item.title.clone(),
                    item.description.clone(),
                    serde_json::to_string(&item.keywords)?,
                    item.description_hash.clone(),
                ])
            }),
        )
        .context("couldnt write items")?;

        Self::write_table(
            categories_tmp,
            CATEGORY_HEADERS,
            tables.categories().map(|category| -> anyhow::Result<[String; 4]> {
                Ok([
                    category.id.to_string(),
                    category.title.clone(),
                    serde_json::to_string(&category.children)?,
                    serde_json::to_string(&category.items)?,
                ])
            }),
        )
        .context("couldnt write categories")?;

        // a sequence ahead of the tables only leaves gaps in the ids
        let sequence = serde_json::to_vec(&tables.sequence())?;
        self.meta
            .write(SEQUENCE_FILE, &sequence)
            .context("couldnt write id sequence")?;

        Ok(())
    }
}

impl CatalogStore for BackendCsv {
    fn item(&self, id: u64) -> Result<Option<Item>, CatalogError> {
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables.item(id).ok().cloned())
    }

    fn category(&self, id: u64) -> Result<Option<Category>, CatalogError> {
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables.category(id).ok().cloned())
    }

    fn items(&self) -> Result<Vec<Item>, CatalogError> {
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables.items().cloned().collect())
    }

    fn categories(&self) -> Result<Vec<Category>, CatalogError> {
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables.categories().cloned().collect())
    }

    fn count_items(&self, cap: usize) -> Result<usize, CatalogError> {
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables.items().take(cap).count())
    }

    fn find_items(
        &self,
        filter: &dyn Fn(&Item) -> bool,
        pagination: &Pagination,
    ) -> Result<Page<Item>, CatalogError> {
        let tables = self.tables.read().map_err(poisoned)?;
        let matches = tables.items().filter(|item| filter(item)).cloned().collect();
        Ok(Page::from_matches(matches, pagination))
    }

    fn snapshot(&self) -> Result<CatalogTables, CatalogError> {
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables.clone())
    }

    fn transaction(
        &self,
        work: &mut dyn FnMut(&mut CatalogTables) -> Result<(), CatalogError>,
    ) -> Result<(), CatalogError> {
        let mut tables = self.tables.write().map_err(poisoned)?;

        // the unit of work runs on a draft, so a failure discards everything
        let mut draft = tables.clone();
        work(&mut draft)?;

        self.save(&draft)?;
        *tables = draft;

        Ok(())
    }
}
