//! Class filter for a model's label catalog.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// One detectable class as reported by `GET /model-classes/{model}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelClass {
    pub id: u32,
    pub name: String,
}

/// The current catalog and which of its ids are selected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassSelection {
    catalog: Vec<ModelClass>,
    selected: BTreeSet<u32>,
}

impl ClassSelection {
    /// Replace the catalog. The selection starts empty.
    pub fn set_catalog(&mut self, catalog: Vec<ModelClass>) {
        self.catalog = catalog;
        self.selected.clear();
    }

    #[must_use]
    pub fn catalog(&self) -> &[ModelClass] {
        &self.catalog
    }

    pub fn select_all(&mut self) {
        self.selected = self.catalog.iter().map(|c| c.id).collect();
    }

    pub fn deselect_all(&mut self) {
        self.selected.clear();
    }

    /// Include or exclude `id`. Returns `true` if the selection changed.
    pub fn toggle(&mut self, id: u32, included: bool) -> bool {
        if included {
            self.selected.insert(id)
        } else {
            self.selected.remove(&id)
        }
    }

    #[must_use]
    pub fn is_selected(&self, id: u32) -> bool {
        self.selected.contains(&id)
    }

    /// Selected ids in ascending order.
    #[must_use]
    pub fn selected_ids(&self) -> Vec<u32> {
        self.selected.iter().copied().collect()
    }

    /// Resolve a class by numeric id or case-insensitive name.
    #[must_use]
    pub fn resolve(&self, token: &str) -> Option<u32> {
        let token = token.trim();
        if let Ok(id) = token.parse::<u32>() {
            return (self.catalog.is_empty() || self.catalog.iter().any(|c| c.id == id))
                .then_some(id);
        }
        self.catalog
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(token))
            .map(|c| c.id)
    }
}
