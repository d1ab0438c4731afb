//! Metrics and health snapshots
//!
//! Last-fetched aggregate metrics, per-query statistics and backend health.
//! Every slot is overwritten wholesale by a successful fetch; a failed fetch
//! keeps the previous value and records the error. Freshness is left to the
//! caller, which can read [`Snapshot::age`].

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Backend health classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
    #[default]
    Unknown,
}

/// Normalized health report
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: HealthState,
    /// Remaining fields of the report
    #[serde(default)]
    pub details: serde_json::Value,
}

/// Timestamped, full-overwrite slot
#[derive(Debug, Clone)]
pub struct Snapshot<T> {
    value: Option<T>,
    updated_at: Option<DateTime<Utc>>,
    loading: bool,
    error: Option<String>,
}

impl<T> Default for Snapshot<T> {
    fn default() -> Self {
        Snapshot {
            value: None,
            updated_at: None,
            loading: false,
            error: None,
        }
    }
}

impl<T> Snapshot<T> {
    pub fn begin_fetch(&mut self) {
        self.loading = true;
    }

    pub fn record(&mut self, value: T, at: DateTime<Utc>) {
        self.value = Some(value);
        self.updated_at = Some(at);
        self.loading = false;
        self.error = None;
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.loading = false;
        self.error = Some(message.into());
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// When the value was last overwritten
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Age of the current value at `now`
    pub fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.updated_at.map(|at| now - at)
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// All monitoring slots
#[derive(Debug, Clone, Default)]
pub struct Monitor {
    metrics: Snapshot<serde_json::Value>,
    health: Snapshot<HealthStatus>,
    query_stats: HashMap<String, Snapshot<serde_json::Value>>,
}

impl Monitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metrics(&self) -> &Snapshot<serde_json::Value> {
        &self.metrics
    }

    pub fn metrics_mut(&mut self) -> &mut Snapshot<serde_json::Value> {
        &mut self.metrics
    }

    pub fn health(&self) -> &Snapshot<HealthStatus> {
        &self.health
    }

    pub fn health_mut(&mut self) -> &mut Snapshot<HealthStatus> {
        &mut self.health
    }

    pub fn query_stats(&self, query_id: &str) -> Option<&Snapshot<serde_json::Value>> {
        self.query_stats.get(query_id)
    }

    /// Statistics slot for a query, created on first use
    pub fn query_stats_mut(&mut self, query_id: &str) -> &mut Snapshot<serde_json::Value> {
        self.query_stats.entry(query_id.to_string()).or_default()
    }

    /// Query ids with a statistics slot
    pub fn stats_query_ids(&self) -> impl Iterator<Item = &str> {
        self.query_stats.keys().map(String::as_str)
    }
}
