//! Arena of catalog entities and the invariants every structural change keeps:
//!
//! - an item belongs to at most one category, and only to a leaf category
//! - a category holds either child categories or items, never both
//! - parent links form a forest
//!
//! Every operation validates before it touches anything, so a failed call
//! leaves the tables as they were.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{
    description_hash, formatter::searchable_text, normalize_keywords, CatalogError, Category,
    Item, ItemCreate, ItemUpdate,
};

#[derive(Debug, Clone, Default)]
pub struct CatalogTables {
    pub(super) items: BTreeMap<u64, Item>,
    pub(super) categories: BTreeMap<u64, Category>,
    pub(super) sequence: IdSequence,
}

/// Next free ids. Only ever moves forward, so a deleted id is never handed
/// out again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdSequence {
    pub next_item_id: u64,
    pub next_category_id: u64,
}

/// What deleting a category did to its neighbours.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetachedCategory {
    pub category: u64,
    pub detached_items: Vec<u64>,
    pub promoted_children: Vec<u64>,
    pub new_parent: Option<u64>,
}

impl CatalogTables {
    pub fn item(&self, id: u64) -> Result<&Item, CatalogError> {
        self.items.get(&id).ok_or(CatalogError::ItemNotFound(id))
    }

    pub fn category(&self, id: u64) -> Result<&Category, CatalogError> {
        self.categories
            .get(&id)
            .ok_or(CatalogError::CategoryNotFound(id))
    }

    fn item_mut(&mut self, id: u64) -> Result<&mut Item, CatalogError> {
        self.items.get_mut(&id).ok_or(CatalogError::ItemNotFound(id))
    }

    fn category_mut(&mut self, id: u64) -> Result<&mut Category, CatalogError> {
        self.categories
            .get_mut(&id)
            .ok_or(CatalogError::CategoryNotFound(id))
    }

    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }

    pub fn categories(&self) -> impl Iterator<Item = &Category> {
        self.categories.values()
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn sequence(&self) -> IdSequence {
        self.sequence
    }

    fn next_item_id(&mut self) -> u64 {
        let after_last = self.items.keys().next_back().map_or(0, |id| id + 1);
        let id = self.sequence.next_item_id.max(after_last);
        self.sequence.next_item_id = id + 1;
        id
    }

    fn next_category_id(&mut self) -> u64 {
        let after_last = self.categories.keys().next_back().map_or(0, |id| id + 1);
        let id = self.sequence.next_category_id.max(after_last);
        self.sequence.next_category_id = id + 1;
        id
    }

    pub fn create_item(&mut self, create: ItemCreate) -> Item {
        let description = create.description.unwrap_or_default();
        let item = Item {
            id: self.next_item_id(),
            title: create.title,
            description_hash: description_hash(&description),
            description,
            keywords: normalize_keywords(create.keywords.unwrap_or_default()),
            category_id: None,
        };

        self.items.insert(item.id, item.clone());
        item
    }

    pub fn create_category(&mut self, title: String) -> Category {
        let category = Category {
            id: self.next_category_id(),
            title,
            ..Default::default()
        };

        self.categories.insert(category.id, category.clone());
        category
    }

    pub fn update_item(&mut self, id: u64, update: ItemUpdate) -> Result<Item, CatalogError> {
        let item = self.item_mut(id)?;

        if let Some(title) = update.title {
            item.title = title;
        }
        if let Some(description) = update.description {
            let hash = description_hash(&description);
            if hash != item.description_hash {
                log::debug!("item {id}: description changed");
            }
            item.description = description;
            item.description_hash = hash;
        }

        if let Some(keywords) = update.keywords {
            item.keywords = normalize_keywords(keywords);
        }
        if let Some(remove) = update.remove_keywords {
            item.keywords.retain(|keyword| !remove.iter().any(|r| r == keyword));
        }
        if let Some(mut append) = update.append_keywords {
            let mut keywords = std::mem::take(&mut item.keywords);
            keywords.append(&mut append);
            item.keywords = normalize_keywords(keywords);
        }

        Ok(item.clone())
    }

    pub fn rename_category(&mut self, id: u64, title: String) -> Result<Category, CatalogError> {
        let category = self.category_mut(id)?;
        category.title = title;
        Ok(category.clone())
    }

    pub fn delete_item(&mut self, id: u64) -> Result<Item, CatalogError> {
        let item = self.items.remove(&id).ok_or(CatalogError::ItemNotFound(id))?;

        if let Some(category_id) = item.category_id {
            if let Some(category) = self.categories.get_mut(&category_id) {
                category.items.retain(|member| *member != id);
            }
        }

        Ok(item)
    }

    pub fn add_item_to_category(
        &mut self,
        item_id: u64,
        category_id: u64,
    ) -> Result<(), CatalogError> {
        let category = self.category(category_id)?;
        if !category.children.is_empty() {
            return Err(CatalogError::Placement(format!(
                "category {category_id} has child categories and cannot hold items"
            )));
        }

        let item = self.item(item_id)?;
        if let Some(current) = item.category_id {
            return Err(CatalogError::Placement(format!(
                "item {item_id} already belongs to category {current}"
            )));
        }

        self.item_mut(item_id)?.category_id = Some(category_id);
        self.category_mut(category_id)?.items.push(item_id);

        Ok(())
    }

    /// Returns the category the item was removed from.
    pub fn remove_item_from_category(&mut self, item_id: u64) -> Result<u64, CatalogError> {
        let category_id = self.item(item_id)?.category_id.ok_or_else(|| {
            CatalogError::Placement(format!("item {item_id} does not belong to any category"))
        })?;

        self.item_mut(item_id)?.category_id = None;
        if let Some(category) = self.categories.get_mut(&category_id) {
            category.items.retain(|member| *member != item_id);
        }

        Ok(category_id)
    }

    pub fn add_category_to_category(
        &mut self,
        child_id: u64,
        parent_id: u64,
    ) -> Result<(), CatalogError> {
        if child_id == parent_id {
            return Err(CatalogError::IllegalArgument(format!(
                "category {child_id} cannot be its own parent"
            )));
        }

        let parent = self.category(parent_id)?;
        if !parent.items.is_empty() {
            return Err(CatalogError::Placement(format!(
                "category {parent_id} holds items and cannot hold categories"
            )));
        }

        let child = self.category(child_id)?;
        if let Some(current) = child.parent_id {
            return Err(CatalogError::Placement(format!(
                "category {child_id} already has parent {current}"
            )));
        }

        if self.is_ancestor(child_id, parent_id) {
            return Err(CatalogError::Placement(format!(
                "category {parent_id} is a descendant of {child_id}"
            )));
        }

        self.category_mut(child_id)?.parent_id = Some(parent_id);
        self.category_mut(parent_id)?.children.push(child_id);

        Ok(())
    }

    /// Returns the former parent.
    pub fn remove_category_from_category(&mut self, child_id: u64) -> Result<u64, CatalogError> {
        let parent_id = self.category(child_id)?.parent_id.ok_or_else(|| {
            CatalogError::Placement(format!("category {child_id} has no parent"))
        })?;

        self.category_mut(child_id)?.parent_id = None;
        if let Some(parent) = self.categories.get_mut(&parent_id) {
            parent.children.retain(|child| *child != child_id);
        }

        Ok(parent_id)
    }

    /// Detach the items, hand the children to the grandparent (or the root)
    /// and drop the category.
    pub fn delete_category(&mut self, id: u64) -> Result<DetachedCategory, CatalogError> {
        let category = self
            .categories
            .remove(&id)
            .ok_or(CatalogError::CategoryNotFound(id))?;

        for item_id in &category.items {
            if let Some(item) = self.items.get_mut(item_id) {
                item.category_id = None;
            }
        }

        for child_id in &category.children {
            if let Some(child) = self.categories.get_mut(child_id) {
                child.parent_id = category.parent_id;
            }
        }

        if let Some(parent_id) = category.parent_id {
            if let Some(parent) = self.categories.get_mut(&parent_id) {
                // children take the deleted node's slot
                match parent.children.iter().position(|child| *child == id) {
                    Some(slot) => {
                        parent
                            .children
                            .splice(slot..=slot, category.children.iter().copied());
                    }
                    None => parent.children.extend(category.children.iter().copied()),
                }
            }
        }

        Ok(DetachedCategory {
            category: id,
            detached_items: category.items,
            promoted_children: category.children,
            new_parent: category.parent_id,
        })
    }

    /// True when `ancestor` sits on the parent chain of `id` (or is `id`).
    pub fn is_ancestor(&self, ancestor: u64, id: u64) -> bool {
        let mut cursor = Some(id);
        let mut hops = 0;

        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            hops += 1;
            if hops > self.categories.len() {
                return false;
            }
            cursor = self.categories.get(&current).and_then(|c| c.parent_id);
        }

        false
    }

    pub fn category_title(&self, item: &Item) -> Option<&str> {
        item.category_id
            .and_then(|id| self.categories.get(&id))
            .map(|category| category.title.as_str())
    }

    /// Searchable text of an item as the tables stand now.
    pub fn searchable_text(&self, item_id: u64) -> Result<String, CatalogError> {
        let item = self.item(item_id)?;
        Ok(searchable_text(item, self.category_title(item)))
    }

    /// `(item id, searchable text)` for every item, in store order.
    pub fn searchable_documents(&self) -> Vec<(u64, String)> {
        self.items
            .values()
            .map(|item| (item.id, searchable_text(item, self.category_title(item))))
            .collect()
    }

    /// Rebuild the back-references from the forward lists after a load.
    pub(super) fn link(&mut self) -> Result<(), CatalogError> {
        let links: Vec<(u64, Vec<u64>, Vec<u64>)> = self
            .categories
            .values()
            .map(|c| (c.id, c.children.clone(), c.items.clone()))
            .collect();

        for (category_id, children, items) in links {
            if !children.is_empty() && !items.is_empty() {
                return Err(CatalogError::Storage(anyhow::anyhow!(
                    "category {category_id} holds both categories and items"
                )));
            }
            for child_id in children {
                let child = self.category_mut(child_id)?;
                if child.parent_id.is_some() {
                    return Err(CatalogError::Storage(anyhow::anyhow!(
                        "category {child_id} listed under more than one parent"
                    )));
                }
                child.parent_id = Some(category_id);
            }
            for item_id in items {
                let item = self.item_mut(item_id)?;
                if item.category_id.is_some() {
                    return Err(CatalogError::Storage(anyhow::anyhow!(
                        "item {item_id} listed under more than one category"
                    )));
                }
                item.category_id = Some(category_id);
            }
        }

        Ok(())
    }
}
