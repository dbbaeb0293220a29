use std::sync::Arc;

use tempfile::TempDir;

use super::*;
use crate::catalog::{unit_of_work, BackendCsv, ItemCreate};

fn catalog(titles: &[&str]) -> (Arc<BackendCsv>, TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(BackendCsv::load(tmp.path()).unwrap());

    unit_of_work(store.as_ref(), |tables| {
        for title in titles {
            tables.create_item(ItemCreate {
                title: title.to_string(),
                ..Default::default()
            });
        }
        Ok(())
    })
    .unwrap();

    (store, tmp)
}

fn titles(page: &SearchResultSet) -> Vec<&str> {
    page.content.iter().map(|item| item.title.as_str()).collect()
}

#[test]
fn test_exact_tier_wins_over_near() {
    let (store, _tmp) = catalog(&["Printer Setups", "Printer Setup", "Scanner"]);
    let engine = FuzzySearchEngine::new(store);

    let page = engine
        .search_by_title("printer setup", &Pagination::default())
        .unwrap();
    assert_eq!(titles(&page), vec!["Printer Setup"]);
    assert_eq!(page.total_elements, 1);
}

#[test]
fn test_near_tier_keeps_store_order() {
    let (store, _tmp) = catalog(&["Printer Setups", "Printer Setup", "Scanner"]);
    let engine = FuzzySearchEngine::new(store);

    let page = engine
        .search_by_title("printr setup", &Pagination::default())
        .unwrap();
    assert_eq!(titles(&page), vec!["Printer Setups", "Printer Setup"]);
}

#[test]
fn test_typo_tier_matches_substring() {
    let (store, _tmp) = catalog(&["Printer Setup", "Scanner"]);
    let engine = FuzzySearchEngine::new(store);

    let page = engine
        .search_by_title("SETUP", &Pagination::default())
        .unwrap();
    assert_eq!(titles(&page), vec!["Printer Setup"]);
}

#[test]
fn test_numeric_tier_filters_by_number() {
    let (store, _tmp) = catalog(&["Wifi5 setup", "Wifi 5G setup", "Printer 5", "Router"]);
    let engine = FuzzySearchEngine::new(store);

    let page = engine
        .search_by_title("Wifi 5", &Pagination::default())
        .unwrap();
    assert_eq!(titles(&page), vec!["Wifi5 setup", "Wifi 5G setup"]);
    assert_eq!(page.total_elements, 2);
}

#[test]
fn test_numeric_pages_are_unioned_without_duplicates() {
    let (store, _tmp) = catalog(&["Room 12", "Room 14", "Room 12 and 14"]);
    let engine = FuzzySearchEngine::new(store);

    let page = engine
        .search_by_title("room 12 14", &Pagination::default())
        .unwrap();
    assert_eq!(titles(&page), vec!["Room 12", "Room 12 and 14", "Room 14"]);
    // metadata of the first non-empty page
    assert_eq!(page.total_elements, 2);
}

#[test]
fn test_numeric_query_skips_exact_tier() {
    // an exact tier would answer with "Room 9" alone
    let (store, _tmp) = catalog(&["Room 9", "Room 9B", "Room 8"]);
    let engine = FuzzySearchEngine::new(store);

    let page = engine
        .search_by_title("room 9", &Pagination::default())
        .unwrap();
    assert_eq!(titles(&page), vec!["Room 9", "Room 9B"]);
}

#[test]
fn test_empty_numeric_tier_falls_through_to_near() {
    let (store, _tmp) = catalog(&["Room 7", "Room 8"]);
    let engine = FuzzySearchEngine::new(store);

    let page = engine
        .search_by_title("Room 9", &Pagination::default())
        .unwrap();
    assert_eq!(titles(&page), vec!["Room 7", "Room 8"]);
}

#[test]
fn test_exhausted_cascade_is_empty() {
    let (store, _tmp) = catalog(&["Printer Setup"]);
    let engine = FuzzySearchEngine::new(store);

    let page = engine
        .search_by_title("completely unrelated query", &Pagination::default())
        .unwrap();
    assert!(page.is_empty());
    assert_eq!(page.total_elements, 0);
}

#[test]
fn test_blank_query_is_empty() {
    let (store, _tmp) = catalog(&["a"]);
    let engine = FuzzySearchEngine::new(store);

    assert!(engine
        .search_by_title("   ", &Pagination::default())
        .unwrap()
        .is_empty());
}

#[test]
fn test_zero_page_size_rejected() {
    let (store, _tmp) = catalog(&["Printer"]);
    let engine = FuzzySearchEngine::new(store);

    assert!(matches!(
        engine.search_by_title("printer", &Pagination::new(0, 0)),
        Err(CatalogError::IllegalArgument(_))
    ));
}

#[test]
fn test_pagination_within_tier() {
    let (store, _tmp) = catalog(&["Printer", "printer", "PRINTER"]);
    let engine = FuzzySearchEngine::new(store);

    let page = engine
        .search_by_title("printer", &Pagination::new(1, 2))
        .unwrap();
    assert_eq!(titles(&page), vec!["PRINTER"]);
    assert_eq!(page.total_elements, 3);
    assert_eq!(page.total_pages, 2);
}

#[test]
fn test_category_scope() {
    let (store, _tmp) = catalog(&["Printer", "Printer"]);
    let category_id = unit_of_work(store.as_ref(), |tables| {
        let category = tables.create_category("Office".into());
        tables.add_item_to_category(1, category.id)?;
        Ok(category.id)
    })
    .unwrap();
    let engine = FuzzySearchEngine::new(store);

    let page = engine
        .search_by_title_and_category("printer", category_id, &Pagination::default())
        .unwrap();
    assert_eq!(page.content.len(), 1);
    assert_eq!(page.content[0].id, 1);

    assert!(matches!(
        engine.search_by_title_and_category("printer", 99, &Pagination::default()),
        Err(CatalogError::CategoryNotFound(99))
    ));
}
