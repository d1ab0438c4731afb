//! Definition Registry: catalog of known query definitions
//!
//! The primary provider replaces the catalog wholesale; secondary providers
//! only add definitions whose id is not already known. A failed fetch keeps
//! the last good catalog and records the error.

use crate::model::QueryDefinition;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};

/// Registry of query definitions, indexed by id and kept in catalog order
#[derive(Debug, Clone, Default)]
pub struct DefinitionRegistry {
    /// Map from definition id to definition
    by_id: HashMap<String, QueryDefinition>,
    /// Ids in the order the provider returned them
    order: Vec<String>,
    loading: bool,
    error: Option<String>,
    last_fetched: Option<DateTime<Utc>>,
}

impl DefinitionRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a fetch as in progress
    pub fn begin_fetch(&mut self) {
        self.loading = true;
        self.error = None;
    }

    /// Record a failed fetch, keeping the current catalog
    pub fn fetch_failed(&mut self, message: impl Into<String>) {
        self.loading = false;
        self.error = Some(message.into());
    }

    /// Rebuild the catalog from a full provider listing
    pub fn replace_all(&mut self, definitions: Vec<QueryDefinition>, fetched_at: DateTime<Utc>) {
        let mut by_id = HashMap::with_capacity(definitions.len());
        let mut order = Vec::with_capacity(definitions.len());

        for def in definitions {
            // Later duplicates win but keep the first position
            if !by_id.contains_key(&def.id) {
                order.push(def.id.clone());
            }
            by_id.insert(def.id.clone(), def);
        }

        self.by_id = by_id;
        self.order = order;
        self.loading = false;
        self.error = None;
        self.last_fetched = Some(fetched_at);
    }

    /// Add definitions not already present. Returns how many were added.
    pub fn merge_in(&mut self, definitions: Vec<QueryDefinition>) -> usize {
        let mut added = 0;
        for def in definitions {
            if self.by_id.contains_key(&def.id) {
                continue;
            }
            self.order.push(def.id.clone());
            self.by_id.insert(def.id.clone(), def);
            added += 1;
        }
        self.loading = false;
        added
    }

    pub fn get(&self, id: &str) -> Option<&QueryDefinition> {
        self.by_id.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// All definitions in catalog order
    pub fn all(&self) -> impl Iterator<Item = &QueryDefinition> {
        self.order.iter().filter_map(|id| self.by_id.get(id))
    }

    pub fn ids(&self) -> &[String] {
        &self.order
    }

    /// Distinct, sorted categories
    pub fn categories(&self) -> Vec<&str> {
        self.by_id
            .values()
            .map(|d| d.category.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Distinct, sorted data source tags
    pub fn data_sources(&self) -> Vec<&str> {
        self.by_id
            .values()
            .map(|d| d.data_source.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn last_fetched(&self) -> Option<DateTime<Utc>> {
        self.last_fetched
    }
}
