//! In-process index service.
//!
//! Documents are held in insertion order and keyed by their text. Queries are
//! ranked lexically: an exact text match first, then by number of distinct
//! query terms present, then by total term occurrences.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, RwLock,
};

use super::{IndexError, IndexService};
use crate::catalog::CatalogStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDocument {
    pub text: String,
    pub item_id: u64,
}

pub struct LocalIndex {
    documents: RwLock<Vec<IndexDocument>>,
    /// Store the index is rebuilt from on `resynchronize`.
    source: Option<Arc<dyn CatalogStore>>,
    resyncing: AtomicBool,
}

/// Clears the resync flag when the rebuild ends, however it ends.
struct ResyncGuard<'a>(&'a AtomicBool);

impl Drop for ResyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn poisoned<T>(err: std::sync::PoisonError<T>) -> IndexError {
    IndexError::Unavailable(format!("index lock poisoned: {err}"))
}

/// Lowercase terms; drops one-char terms and common stop words.
fn tokenize(text: &str) -> Vec<String> {
    const STOP_WORDS: &[&str] = &[
        "a", "an", "the", "is", "are", "was", "were", "be", "been", "being", "in", "on", "at",
        "to", "for", "of", "with", "by", "from", "as", "and", "or", "but", "not", "no", "so",
        "if", "then",
    ];

    let mut terms: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .map(|s| s.to_lowercase())
        .filter(|s| s.chars().count() > 1 && !STOP_WORDS.contains(&s.as_str()))
        .collect();
    terms.dedup();
    terms
}

/// (distinct terms matched, total occurrences)
fn score(terms: &[String], text: &str) -> (usize, usize) {
    let text_lower = text.to_lowercase();
    terms.iter().fold((0, 0), |(matched, hits), term| {
        match text_lower.matches(term.as_str()).count() {
            0 => (matched, hits),
            n => (matched + 1, hits + n),
        }
    })
}

impl LocalIndex {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(Vec::new()),
            source: None,
            resyncing: AtomicBool::new(false),
        }
    }

    pub fn with_source(source: Arc<dyn CatalogStore>) -> Self {
        Self {
            source: Some(source),
            ..Self::new()
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.documents.read().map(|docs| docs.len()).unwrap_or(0)
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub fn documents(&self) -> Vec<IndexDocument> {
        self.documents
            .read()
            .map(|docs| docs.clone())
            .unwrap_or_default()
    }

    fn begin_resync(&self) -> Result<ResyncGuard<'_>, IndexError> {
        self.resyncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| IndexError::AlreadyInProgress)?;
        Ok(ResyncGuard(&self.resyncing))
    }
}

impl Default for LocalIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexService for LocalIndex {
    fn add_document(&self, text: &str, item_id: u64) -> Result<(), IndexError> {
        let mut documents = self.documents.write().map_err(poisoned)?;

        match documents.iter_mut().find(|doc| doc.text == text) {
            Some(doc) => doc.item_id = item_id,
            None => documents.push(IndexDocument {
                text: text.to_string(),
                item_id,
            }),
        }

        Ok(())
    }

    fn delete_document(&self, text: &str) -> Result<(), IndexError> {
        let mut documents = self.documents.write().map_err(poisoned)?;
        documents.retain(|doc| doc.text != text);
        Ok(())
    }

    fn query_ids(&self, text: &str) -> Result<Vec<u64>, IndexError> {
        let documents = self.documents.read().map_err(poisoned)?;
        let terms = tokenize(text);

        let mut ranked: Vec<(bool, usize, usize, u64)> = documents
            .iter()
            .filter_map(|doc| {
                let exact = doc.text == text;
                let (matched, hits) = score(&terms, &doc.text);
                if exact || matched > 0 {
                    Some((exact, matched, hits, doc.item_id))
                } else {
                    None
                }
            })
            .collect();

        // stable: ties keep insertion order
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)).then(b.2.cmp(&a.2)));

        let mut ids = Vec::with_capacity(ranked.len());
        for (_, _, _, id) in ranked {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }

        Ok(ids)
    }

    fn resynchronize(&self) -> Result<(), IndexError> {
        let _guard = self.begin_resync()?;

        let source = self
            .source
            .as_ref()
            .ok_or_else(|| IndexError::Unavailable("no catalog source to rebuild from".into()))?;

        let rebuilt: Vec<IndexDocument> = source
            .snapshot()?
            .searchable_documents()
            .into_iter()
            .map(|(item_id, text)| IndexDocument { text, item_id })
            .collect();

        log::info!("local index rebuilt with {} documents", rebuilt.len());
        *self.documents.write().map_err(poisoned)? = rebuilt;

        Ok(())
    }
}
