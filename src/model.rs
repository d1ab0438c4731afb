//! Core data model
//!
//! Fixed entities shared by every component: query definitions, parameters,
//! normalized results, ad-hoc drafts and validation outcomes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Query id recorded for executions of ad-hoc (builder) specifications.
pub const AD_HOC_QUERY_ID: &str = "adhoc";

/// Invocation parameters. Ordered so equality ignores insertion order.
pub type Parameters = BTreeMap<String, serde_json::Value>;

/// Declared type of a query parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    #[default]
    String,
    Number,
    Boolean,
    Date,
    Select,
}

/// One entry of a definition's parameter schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSchema {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default, rename = "type")]
    pub param_type: ParameterType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
}

impl ParameterSchema {
    /// Label shown to users, falling back to the parameter name
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}

/// A named, reusable query template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub data_source: String,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub parameters: Option<Vec<ParameterSchema>>,
    #[serde(default)]
    pub category: String,
}

impl QueryDefinition {
    /// Parameters filled from the schema defaults, for a first invocation
    pub fn default_parameters(&self) -> Parameters {
        self.parameters
            .iter()
            .flatten()
            .filter_map(|p| p.default.clone().map(|v| (p.name.clone(), v)))
            .collect()
    }

    /// Names of required parameters missing from `params`
    pub fn missing_required(&self, params: &Parameters) -> Vec<String> {
        self.parameters
            .iter()
            .flatten()
            .filter(|p| p.required && !params.contains_key(&p.name))
            .map(|p| p.name.clone())
            .collect()
    }
}

/// Normalized execution payload
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub rows: Vec<serde_json::Value>,
    #[serde(default)]
    pub total_count: Option<u64>,
    #[serde(default)]
    pub execution_time_ms: Option<u64>,
    /// Remaining top-level fields of the service response
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl QueryResult {
    pub fn from_rows(rows: Vec<serde_json::Value>) -> Self {
        QueryResult {
            rows,
            ..Default::default()
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Ad-hoc query draft assembled in the builder
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySpec {
    pub data_source: String,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub select: Vec<String>,
    #[serde(default)]
    pub order_by: Option<String>,
    #[serde(default)]
    pub top: Option<u32>,
    #[serde(default)]
    pub parameters: Parameters,
}

/// Outcome of validating a definition or draft
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Options forwarded to the execution service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteOptions {
    /// Consult and populate the result cache
    pub use_cache: bool,
    /// TTL for the cached result; config default when absent
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        ExecuteOptions {
            use_cache: true,
            cache_ttl_secs: None,
            timeout_ms: None,
        }
    }
}
