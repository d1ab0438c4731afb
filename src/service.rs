//! Query execution service boundary
//!
//! [`QueryService`] is the remote collaborator performing executions,
//! validation and catalog/monitoring fetches. Responses are raw JSON and are
//! normalized by the core. [`FileQueryService`] serves a catalog and canned
//! results from a JSON file for offline use.
//!
//! ## Catalog file
//!
//! ```json
//! {
//!   "definitions": [{"id": "active-users", "name": "Active users", "dataSource": "graph"}],
//!   "graphDefinitions": [],
//!   "results": {"active-users": [{"user": "ana"}]}
//! }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ServiceError;
use crate::model::{ExecuteOptions, Parameters, QueryDefinition, QuerySpec};

/// Narrowing applied by the service to definition listings
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionFilter {
    #[serde(default)]
    pub data_source: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

impl DefinitionFilter {
    pub fn matches(&self, def: &QueryDefinition) -> bool {
        self.data_source
            .as_deref()
            .is_none_or(|s| def.data_source == s)
            && self.category.as_deref().is_none_or(|c| def.category == c)
    }
}

/// Remote query execution service
#[async_trait]
pub trait QueryService: Send + Sync {
    async fn execute(
        &self,
        query_id: &str,
        parameters: &Parameters,
        options: &ExecuteOptions,
    ) -> Result<Value, ServiceError>;

    /// Run an ad-hoc specification
    async fn build(&self, spec: &QuerySpec) -> Result<Value, ServiceError>;

    async fn validate(&self, spec: &QuerySpec, parameters: &Parameters)
        -> Result<Value, ServiceError>;

    async fn get_health(&self) -> Result<Value, ServiceError>;

    async fn get_stats(&self, query_id: &str) -> Result<Value, ServiceError>;

    async fn get_metrics(&self) -> Result<Value, ServiceError>;

    async fn get_definitions(&self, filter: &DefinitionFilter) -> Result<Value, ServiceError>;

    /// Definitions from the secondary (graph) provider
    async fn get_graph_definitions(&self, filter: &DefinitionFilter)
        -> Result<Value, ServiceError>;

    /// Clear the service-side cache for one query or everything
    async fn clear_cache(&self, query_id: Option<&str>) -> Result<Value, ServiceError>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogFile {
    #[serde(default)]
    definitions: Vec<QueryDefinition>,
    #[serde(default)]
    graph_definitions: Vec<QueryDefinition>,
    #[serde(default)]
    results: HashMap<String, Vec<Value>>,
}

/// Collaborator backed by a JSON catalog file, re-read on every call
#[derive(Debug, Clone)]
pub struct FileQueryService {
    path: PathBuf,
}

impl FileQueryService {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileQueryService { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<CatalogFile, ServiceError> {
        let text = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            ServiceError::new(format!("Failed to read {}: {e}", self.path.display()))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            ServiceError::new(format!("Invalid catalog {}: {e}", self.path.display()))
        })
    }

    fn unsupported(operation: &str) -> ServiceError {
        ServiceError::new(format!("{operation} is not supported by the file service"))
    }
}

fn listing(defs: Vec<QueryDefinition>, filter: &DefinitionFilter) -> Result<Value, ServiceError> {
    let defs: Vec<QueryDefinition> = defs.into_iter().filter(|d| filter.matches(d)).collect();
    serde_json::to_value(defs).map_err(|e| ServiceError::new(e.to_string()))
}

#[async_trait]
impl QueryService for FileQueryService {
    async fn execute(
        &self,
        query_id: &str,
        _parameters: &Parameters,
        _options: &ExecuteOptions,
    ) -> Result<Value, ServiceError> {
        let mut catalog = self.load().await?;
        let rows = catalog
            .results
            .remove(query_id)
            .ok_or_else(|| ServiceError::new(format!("No results recorded for '{query_id}'")))?;
        let total = rows.len();
        Ok(json!({ "rows": rows, "totalCount": total }))
    }

    async fn build(&self, _spec: &QuerySpec) -> Result<Value, ServiceError> {
        Err(Self::unsupported("Ad-hoc execution"))
    }

    async fn validate(
        &self,
        _spec: &QuerySpec,
        _parameters: &Parameters,
    ) -> Result<Value, ServiceError> {
        Err(Self::unsupported("Validation"))
    }

    async fn get_health(&self) -> Result<Value, ServiceError> {
        let status = if self.load().await.is_ok() {
            "healthy"
        } else {
            "unhealthy"
        };
        Ok(json!({ "status": status, "source": self.path.display().to_string() }))
    }

    async fn get_stats(&self, _query_id: &str) -> Result<Value, ServiceError> {
        Err(Self::unsupported("Query statistics"))
    }

    async fn get_metrics(&self) -> Result<Value, ServiceError> {
        let catalog = self.load().await?;
        Ok(json!({
            "definitions": catalog.definitions.len(),
            "graphDefinitions": catalog.graph_definitions.len(),
            "recordedResults": catalog.results.len(),
        }))
    }

    async fn get_definitions(&self, filter: &DefinitionFilter) -> Result<Value, ServiceError> {
        listing(self.load().await?.definitions, filter)
    }

    async fn get_graph_definitions(
        &self,
        filter: &DefinitionFilter,
    ) -> Result<Value, ServiceError> {
        listing(self.load().await?.graph_definitions, filter)
    }

    async fn clear_cache(&self, _query_id: Option<&str>) -> Result<Value, ServiceError> {
        Ok(json!({ "cleared": true, "entriesCleared": 0 }))
    }
}
