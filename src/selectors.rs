//! Derived view selectors
//!
//! Pure projections over the registry, tracker and cache driven by
//! UI-supplied preferences. Nothing here mutates state.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::execution::{CacheStore, Execution, ExecutionTracker};
use crate::model::QueryDefinition;
use crate::registry::DefinitionRegistry;

/// Field the definition list is sorted by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Name,
    Category,
    DataSource,
    Id,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// UI preferences applied to the definition list
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewPreferences {
    #[serde(default)]
    pub search_text: String,
    /// Exact data source tag; `None` keeps every source
    #[serde(default)]
    pub data_source: Option<String>,
    #[serde(default)]
    pub sort_by: SortKey,
    #[serde(default)]
    pub sort_order: SortOrder,
}

fn matches_search(def: &QueryDefinition, needle: &str) -> bool {
    needle.is_empty()
        || def.name.to_lowercase().contains(needle)
        || def.description.to_lowercase().contains(needle)
        || def.id.to_lowercase().contains(needle)
}

fn compare(a: &QueryDefinition, b: &QueryDefinition, key: SortKey) -> Ordering {
    let primary = match key {
        SortKey::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        SortKey::Category => a.category.to_lowercase().cmp(&b.category.to_lowercase()),
        SortKey::DataSource => a.data_source.cmp(&b.data_source),
        SortKey::Id => a.id.cmp(&b.id),
    };
    primary
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        .then_with(|| a.id.cmp(&b.id))
}

/// Search, filter by data source, then sort
pub fn filtered_definitions<'a>(
    registry: &'a DefinitionRegistry,
    prefs: &ViewPreferences,
) -> Vec<&'a QueryDefinition> {
    let needle = prefs.search_text.trim().to_lowercase();

    let mut defs: Vec<&QueryDefinition> = registry
        .all()
        .filter(|d| matches_search(d, &needle))
        .filter(|d| {
            prefs
                .data_source
                .as_deref()
                .is_none_or(|source| d.data_source == source)
        })
        .collect();

    defs.sort_by(|a, b| {
        let ord = compare(a, b, prefs.sort_by);
        match prefs.sort_order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        }
    });
    defs
}

/// Definitions grouped by category, each group in catalog order
pub fn definitions_by_category(
    registry: &DefinitionRegistry,
) -> BTreeMap<&str, Vec<&QueryDefinition>> {
    let mut groups: BTreeMap<&str, Vec<&QueryDefinition>> = BTreeMap::new();
    for def in registry.all() {
        groups.entry(def.category.as_str()).or_default().push(def);
    }
    groups
}

/// Most recent finished executions
pub fn recent_executions(tracker: &ExecutionTracker, limit: usize) -> Vec<&Execution> {
    tracker.history().take(limit).collect()
}

/// Entry count per cached query id
pub fn cache_summary(cache: &CacheStore) -> BTreeMap<&str, usize> {
    cache
        .query_ids()
        .map(|id| (id, cache.entries(id).len()))
        .collect()
}
