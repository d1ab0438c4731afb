//! End-to-end flows through `QueryCore` with a scripted in-memory service.
//!
//! Tests for:
//! - Cache hits, staleness and eviction as seen by callers
//! - Execution lifecycle, history and per-query errors
//! - Definition refresh failure keeping the previous catalog
//! - In-flight de-duplication of identical calls
//! - Cancellation and timeouts
//! - Builder validation and preview

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use querydesk::{
    Config, CoreError, DefinitionFilter, ExecuteOptions, ExecutionError, ExecutionStatus,
    HealthState, ManualClock, Parameters, QueryCore, QueryResult, QueryService, QuerySpec,
    ResultSource, ServiceError, SortKey, SortOrder, ViewPreferences, AD_HOC_QUERY_ID,
};
use serde_json::{json, Value};
use tokio::sync::Semaphore;

// ============================================================================
// Test Helpers
// ============================================================================

/// Service answering from scripted responses.
///
/// Executions succeed with one row echoing the query id unless a response is
/// scripted for that id. When a gate is set, each execution and build waits
/// for a permit before answering.
#[derive(Default)]
struct ScriptedService {
    executes: AtomicUsize,
    builds: AtomicUsize,
    responses: Mutex<HashMap<String, Result<Value, ServiceError>>>,
    definitions: Mutex<VecDeque<Result<Value, ServiceError>>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl ScriptedService {
    fn respond(&self, query_id: &str, response: Result<Value, ServiceError>) {
        self.responses.lock().insert(query_id.to_string(), response);
    }

    fn push_definitions(&self, response: Result<Value, ServiceError>) {
        self.definitions.lock().push_back(response);
    }

    fn close_gate(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock() = Some(gate.clone());
        gate
    }

    fn executes(&self) -> usize {
        self.executes.load(Ordering::SeqCst)
    }

    async fn pass_gate(&self) -> Result<(), ServiceError> {
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|_| ServiceError::new("gate closed"))?;
        }
        Ok(())
    }
}

#[async_trait]
impl QueryService for ScriptedService {
    async fn execute(
        &self,
        query_id: &str,
        parameters: &Parameters,
        _options: &ExecuteOptions,
    ) -> Result<Value, ServiceError> {
        self.executes.fetch_add(1, Ordering::SeqCst);
        self.pass_gate().await?;

        let scripted = self.responses.lock().get(query_id).cloned();
        scripted.unwrap_or_else(|| Ok(json!([{ "query": query_id, "params": parameters }])))
    }

    async fn build(&self, spec: &QuerySpec) -> Result<Value, ServiceError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        self.pass_gate().await?;
        if spec.data_source == "offline" {
            return Err(ServiceError::new("data source offline"));
        }
        Ok(json!({ "data": [{ "source": spec.data_source }], "count": 1 }))
    }

    async fn validate(&self, spec: &QuerySpec, _: &Parameters) -> Result<Value, ServiceError> {
        if spec.filter.is_some() {
            Ok(json!({ "isValid": true, "warnings": ["filter is not indexed"] }))
        } else {
            Ok(json!({ "isValid": false, "errors": [{ "message": "filter required" }] }))
        }
    }

    async fn get_health(&self) -> Result<Value, ServiceError> {
        Ok(json!({ "status": "degraded", "uptime": 12 }))
    }

    async fn get_stats(&self, query_id: &str) -> Result<Value, ServiceError> {
        if query_id == "unknown" {
            return Err(ServiceError::new("no statistics for unknown"));
        }
        Ok(json!({ "executions": 3 }))
    }

    async fn get_metrics(&self) -> Result<Value, ServiceError> {
        Ok(json!({ "totalExecutions": 10 }))
    }

    async fn get_definitions(&self, _: &DefinitionFilter) -> Result<Value, ServiceError> {
        self.definitions
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(json!([])))
    }

    async fn get_graph_definitions(&self, _: &DefinitionFilter) -> Result<Value, ServiceError> {
        Ok(json!({ "value": [
            { "id": "g1", "name": "Graph users", "dataSource": "graph", "category": "people" }
        ]}))
    }

    async fn clear_cache(&self, _: Option<&str>) -> Result<Value, ServiceError> {
        Ok(json!({ "cleared": true, "entriesCleared": 4 }))
    }
}

fn create_core(config: Config) -> (QueryCore<ScriptedService>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::at_epoch());
    let core = QueryCore::with_clock(config, ScriptedService::default(), clock.clone());
    (core, clock)
}

fn default_core() -> (QueryCore<ScriptedService>, Arc<ManualClock>) {
    create_core(Config::default())
}

fn params(pairs: &[(&str, Value)]) -> Parameters {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

/// Poll until `done` holds; the remote call runs on its own task
async fn wait_until(done: impl Fn() -> bool) {
    for _ in 0..500 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not reached");
}

fn catalog() -> Value {
    json!([
        { "id": "q-users", "name": "Users", "dataSource": "sql", "category": "people" },
        { "id": "q-assets", "name": "Assets", "dataSource": "graph", "category": "inventory" },
        { "id": "q-admins", "name": "admins", "dataSource": "sql", "category": "people" }
    ])
}

// ============================================================================
// Cache Through The Core
// ============================================================================

#[tokio::test]
async fn test_repeat_call_served_from_cache() {
    let (core, _clock) = default_core();
    let p = params(&[("a", json!(1))]);

    let first = core.execute_query("q1", &p, ExecuteOptions::default()).await.unwrap();
    let second = core.execute_query("q1", &p, ExecuteOptions::default()).await.unwrap();

    assert_eq!(first.source, ResultSource::Remote);
    assert!(first.execution_id.is_some());
    assert_eq!(second.source, ResultSource::Cache);
    assert!(second.execution_id.is_none());
    assert_eq!(second.result, first.result);
    assert_eq!(core.service().executes(), 1);
    // Cache hits are not tracked as executions
    assert_eq!(core.state().executions.history().count(), 1);
}

#[tokio::test]
async fn test_stale_entry_triggers_new_call() {
    let (core, clock) = default_core();
    let p = Parameters::new();
    let options = ExecuteOptions {
        cache_ttl_secs: Some(300),
        ..Default::default()
    };

    core.execute_query("q1", &p, options.clone()).await.unwrap();
    clock.advance_secs(301);
    let again = core.execute_query("q1", &p, options).await.unwrap();

    assert_eq!(again.source, ResultSource::Remote);
    assert_eq!(core.service().executes(), 2);
    assert_eq!(core.state().cache.len(), 1);
}

#[tokio::test]
async fn test_bypass_cache_option() {
    let (core, _clock) = default_core();
    let p = Parameters::new();
    let no_cache = ExecuteOptions {
        use_cache: false,
        ..Default::default()
    };

    core.execute_query("q1", &p, no_cache.clone()).await.unwrap();
    core.execute_query("q1", &p, no_cache).await.unwrap();

    assert_eq!(core.service().executes(), 2);
    assert!(core.state().cache.is_empty());
}

#[tokio::test]
async fn test_disabled_cache_in_config() {
    let mut config = Config::default();
    config.cache.enabled = false;
    let (core, _clock) = create_core(config);

    core.execute_query("q1", &Parameters::new(), ExecuteOptions::default()).await.unwrap();
    core.execute_query("q1", &Parameters::new(), ExecuteOptions::default()).await.unwrap();

    assert_eq!(core.service().executes(), 2);
}

#[tokio::test]
async fn test_configured_size_bound_evicts_oldest() {
    let mut config = Config::default();
    config.cache.max_entries = 2;
    let (core, clock) = create_core(config);
    let p = Parameters::new();

    for q in ["q1", "q2", "q3"] {
        core.execute_query(q, &p, ExecuteOptions::default()).await.unwrap();
        clock.advance_secs(1);
    }

    let state = core.state();
    assert_eq!(state.cache.len(), 2);
    assert!(state.cache.entries("q1").is_empty());
    assert_eq!(state.cache.stats().evictions, 1);
}

#[tokio::test]
async fn test_clear_cache_local_and_remote() {
    let (core, _clock) = default_core();
    core.execute_query("q1", &Parameters::new(), ExecuteOptions::default()).await.unwrap();
    core.execute_query("q2", &Parameters::new(), ExecuteOptions::default()).await.unwrap();

    let summary = core.clear_cache(Some("q1")).await.unwrap();
    assert_eq!(summary.local_entries_cleared, 1);
    assert!(summary.remote.cleared);
    assert_eq!(summary.remote.entries_cleared, 4);
    assert_eq!(core.state().cache.len(), 1);

    let summary = core.clear_cache(None).await.unwrap();
    assert_eq!(summary.local_entries_cleared, 1);
    assert!(core.state().cache.is_empty());
}

// ============================================================================
// Execution Lifecycle
// ============================================================================

#[tokio::test]
async fn test_completed_execution_moves_to_history() {
    let (core, _clock) = default_core();
    let outcome = core
        .execute_query("q1", &Parameters::new(), ExecuteOptions::default())
        .await
        .unwrap();
    let id = outcome.execution_id.unwrap();

    let state = core.state();
    assert!(state.executions.active_ids().is_empty());
    assert_eq!(state.executions.history_ids().iter().collect::<Vec<_>>(), vec![&id]);

    let execution = state.executions.get(&id).unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert!(execution.end_time.is_some());
    assert_eq!(execution.result.as_ref(), Some(&outcome.result));
}

#[tokio::test]
async fn test_failure_sets_error_and_next_begin_clears_it() {
    let (core, _clock) = default_core();
    core.service().respond("q1", Err(ServiceError::new("timeout talking to warehouse")));

    let err = core
        .execute_query("q1", &Parameters::new(), ExecuteOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "timeout talking to warehouse");
    assert_eq!(
        core.state().executions.last_error("q1"),
        Some("timeout talking to warehouse")
    );
    assert!(core.state().cache.is_empty());

    core.service().respond("q1", Ok(json!({ "rows": [] })));
    core.execute_query("q1", &Parameters::new(), ExecuteOptions::default())
        .await
        .unwrap();
    assert_eq!(core.state().executions.last_error("q1"), None);
}

#[tokio::test]
async fn test_malformed_result_fails_with_generic_message() {
    let (core, _clock) = default_core();
    core.service().respond("q1", Ok(json!("surprise")));

    let err = core
        .execute_query("q1", &Parameters::new(), ExecuteOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::MalformedResponse(_)));
    assert_eq!(
        core.state().executions.last_error("q1"),
        Some("Unexpected response from query service")
    );
}

#[tokio::test]
async fn test_history_capped_to_most_recent() {
    let mut config = Config::default();
    config.executions.history_limit = 3;
    config.cache.enabled = false;
    let (core, _clock) = create_core(config);

    let mut ids = Vec::new();
    for i in 0..5 {
        let p = params(&[("i", json!(i))]);
        let outcome = core.execute_query("q1", &p, ExecuteOptions::default()).await.unwrap();
        ids.push(outcome.execution_id.unwrap());
    }

    let state = core.state();
    let history: Vec<&String> = state.executions.history_ids().iter().collect();
    assert_eq!(history, vec![&ids[4], &ids[3], &ids[2]]);
    assert!(state.executions.get(&ids[0]).is_none());
}

#[tokio::test]
async fn test_ad_hoc_execution_tracked_not_cached() {
    let (core, _clock) = default_core();
    let spec = QuerySpec {
        data_source: "sql".to_string(),
        ..Default::default()
    };

    let outcome = core.execute_ad_hoc(&spec).await.unwrap();
    assert_eq!(outcome.result.total_count, Some(1));

    let state = core.state();
    let execution = state.executions.get(outcome.execution_id.as_ref().unwrap()).unwrap();
    assert_eq!(execution.query_id, AD_HOC_QUERY_ID);
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert!(state.cache.is_empty());
}

#[tokio::test]
async fn test_ad_hoc_failure_recorded() {
    let (core, _clock) = default_core();
    let spec = QuerySpec {
        data_source: "offline".to_string(),
        ..Default::default()
    };

    assert!(core.execute_ad_hoc(&spec).await.is_err());
    assert_eq!(
        core.state().executions.last_error(AD_HOC_QUERY_ID),
        Some("data source offline")
    );
}

// ============================================================================
// Concurrency: De-duplication, Cancellation, Timeouts
// ============================================================================

#[tokio::test]
async fn test_identical_concurrent_calls_share_one_remote_call() {
    let (core, _clock) = default_core();
    let gate = core.service().close_gate();
    let p = params(&[("region", json!("eu"))]);

    let (a, b, ()) = tokio::join!(
        core.execute_query("q1", &p, ExecuteOptions::default()),
        core.execute_query("q1", &p, ExecuteOptions::default()),
        async {
            wait_until(|| core.service().executes() == 1).await;
            assert_eq!(core.in_flight_count(), 1);
            assert_eq!(core.state().executions.active().count(), 1);
            gate.add_permits(1);
        }
    );

    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.result, b.result);
    assert_eq!(a.source, ResultSource::Remote);
    assert_eq!(b.source, ResultSource::Shared);
    assert_eq!(core.service().executes(), 1);
    assert_eq!(core.in_flight_count(), 0);
    assert_eq!(core.state().executions.history().count(), 1);
}

#[tokio::test]
async fn test_different_parameters_are_not_shared() {
    let (core, _clock) = default_core();
    let gate = core.service().close_gate();
    let p1 = params(&[("a", json!(1))]);
    let p2 = params(&[("a", json!(2))]);

    let (a, b, ()) = tokio::join!(
        core.execute_query("q1", &p1, ExecuteOptions::default()),
        core.execute_query("q1", &p2, ExecuteOptions::default()),
        async {
            wait_until(|| core.service().executes() == 2).await;
            assert_eq!(core.in_flight_count(), 2);
            gate.add_permits(2);
        }
    );

    assert_eq!(a.unwrap().source, ResultSource::Remote);
    assert_eq!(b.unwrap().source, ResultSource::Remote);
    assert_eq!(core.service().executes(), 2);
}

#[tokio::test]
async fn test_cancel_pending_execution() {
    let (core, _clock) = default_core();
    let _gate = core.service().close_gate();
    let p = Parameters::new();

    let (outcome, cancelled_id) = tokio::join!(
        core.execute_query("q1", &p, ExecuteOptions::default()),
        async {
            wait_until(|| core.service().executes() == 1).await;
            let id = core.state().executions.active_ids()[0].clone();
            assert_eq!(
                core.state().executions.get(&id).unwrap().status,
                ExecutionStatus::Running
            );
            core.cancel_execution(&id).unwrap();
            id
        }
    );

    assert_eq!(outcome.unwrap_err(), CoreError::Cancelled(cancelled_id.clone()));

    let state = core.state();
    let execution = state.executions.get(&cancelled_id).unwrap();
    assert_eq!(execution.status, ExecutionStatus::Cancelled);
    assert!(execution.cancel_handle().is_cancelled());
    assert!(state.cache.is_empty());
    assert_eq!(core.in_flight_count(), 0);
}

#[tokio::test]
async fn test_dropped_caller_still_settles_execution() {
    let (core, _clock) = default_core();
    let gate = core.service().close_gate();
    let p = Parameters::new();

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        core.execute_query("q1", &p, ExecuteOptions::default()),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(core.in_flight_count(), 1);

    gate.add_permits(10);
    wait_until(|| core.in_flight_count() == 0).await;
    wait_until(|| core.state().executions.active().count() == 0).await;

    let state = core.state();
    assert_eq!(state.executions.history().count(), 1);
    assert_eq!(
        state.executions.history().next().unwrap().status,
        ExecutionStatus::Completed
    );
    assert_eq!(state.cache.len(), 1);
}

#[tokio::test]
async fn test_fresh_call_after_cancelling_abandoned_execution() {
    let (core, _clock) = default_core();
    let gate = core.service().close_gate();
    let p = Parameters::new();

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        core.execute_query("q1", &p, ExecuteOptions::default()),
    )
    .await;
    assert!(abandoned.is_err());

    let id = core.state().executions.active_ids()[0].clone();
    core.cancel_execution(&id).unwrap();
    assert_eq!(core.in_flight_count(), 0);

    gate.add_permits(10);
    let fresh = core
        .execute_query("q1", &p, ExecuteOptions::default())
        .await
        .unwrap();
    assert_eq!(fresh.source, ResultSource::Remote);
    assert_ne!(fresh.execution_id.as_ref(), Some(&id));
    assert_eq!(core.service().executes(), 2);
    assert_eq!(
        core.state().executions.get(&id).unwrap().status,
        ExecutionStatus::Cancelled
    );
}

#[tokio::test]
async fn test_externally_completed_execution_is_not_reported_cancelled() {
    let (core, _clock) = default_core();
    let gate = core.service().close_gate();
    let p = Parameters::new();

    let (outcome, ()) = tokio::join!(
        core.execute_query("q1", &p, ExecuteOptions::default()),
        async {
            wait_until(|| core.service().executes() == 1).await;
            let done = core
                .state_mut()
                .executions
                .complete("q1", &p, QueryResult::default());
            assert!(done.is_some());
            gate.add_permits(1);
        }
    );

    let err = outcome.unwrap_err();
    assert!(matches!(
        err,
        CoreError::Execution(ExecutionError::InvalidTransition {
            from: ExecutionStatus::Completed,
            ..
        })
    ));
    assert!(core.state().cache.is_empty());
}

#[tokio::test]
async fn test_cancel_finished_execution_rejected() {
    let (core, _clock) = default_core();
    let outcome = core
        .execute_query("q1", &Parameters::new(), ExecuteOptions::default())
        .await
        .unwrap();

    let err = core.cancel_execution(&outcome.execution_id.unwrap()).unwrap_err();
    assert!(matches!(err, CoreError::Execution(_)));
    assert!(core.cancel_execution("no-such-id").is_err());
}

#[tokio::test]
async fn test_timeout_fails_execution() {
    let (core, _clock) = default_core();
    let _gate = core.service().close_gate();
    let options = ExecuteOptions {
        timeout_ms: Some(20),
        ..Default::default()
    };

    let err = core
        .execute_query("slow", &Parameters::new(), options)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("timeout"));

    let state = core.state();
    assert!(state.executions.last_error("slow").is_some());
    assert_eq!(
        state.executions.history().next().unwrap().status,
        ExecutionStatus::Failed
    );
}

#[tokio::test]
async fn test_ad_hoc_uses_configured_timeout() {
    let mut config = Config::default();
    config.service.request_timeout_ms = 20;
    let (core, _clock) = create_core(config);
    let _gate = core.service().close_gate();
    let spec = QuerySpec {
        data_source: "sql".to_string(),
        ..Default::default()
    };

    let err = core.execute_ad_hoc(&spec).await.unwrap_err();
    assert!(err.to_string().contains("timeout"));

    let state = core.state();
    assert!(state.executions.active_ids().is_empty());
    assert!(state.executions.last_error(AD_HOC_QUERY_ID).is_some());
    assert_eq!(
        state.executions.history().next().unwrap().status,
        ExecutionStatus::Failed
    );
}

// ============================================================================
// Definitions
// ============================================================================

#[tokio::test]
async fn test_failed_refresh_keeps_previous_catalog() {
    let (core, _clock) = default_core();
    core.service().push_definitions(Ok(catalog()));
    core.service()
        .push_definitions(Err(ServiceError::new("catalog unavailable")));

    assert_eq!(core.refresh_definitions(&DefinitionFilter::default()).await.unwrap(), 3);
    assert!(core.refresh_definitions(&DefinitionFilter::default()).await.is_err());

    let state = core.state();
    assert_eq!(state.definitions.len(), 3);
    assert_eq!(state.definitions.error(), Some("catalog unavailable"));
    assert!(!state.definitions.is_loading());
    assert!(state.definitions.last_fetched().is_some());
}

#[tokio::test]
async fn test_refresh_replaces_wholesale() {
    let (core, _clock) = default_core();
    core.service().push_definitions(Ok(catalog()));
    core.service().push_definitions(Ok(json!({ "definitions": [
        { "id": "q-new", "name": "New", "dataSource": "sql" }
    ]})));

    core.refresh_definitions(&DefinitionFilter::default()).await.unwrap();
    core.refresh_definitions(&DefinitionFilter::default()).await.unwrap();

    let state = core.state();
    assert_eq!(state.definitions.ids(), ["q-new".to_string()]);
    assert_eq!(state.definitions.error(), None);
}

#[tokio::test]
async fn test_graph_definitions_merged_in() {
    let (core, _clock) = default_core();
    core.service().push_definitions(Ok(catalog()));

    core.refresh_definitions(&DefinitionFilter::default()).await.unwrap();
    core.load_graph_definitions(&DefinitionFilter::default()).await.unwrap();

    let state = core.state();
    assert_eq!(state.definitions.len(), 4);
    assert!(state.definitions.contains("g1"));
    assert!(state.definitions.contains("q-users"));
}

#[tokio::test]
async fn test_filtered_definitions_view() {
    let (core, _clock) = default_core();
    core.service().push_definitions(Ok(catalog()));
    core.refresh_definitions(&DefinitionFilter::default()).await.unwrap();

    let prefs = ViewPreferences {
        data_source: Some("sql".to_string()),
        ..Default::default()
    };
    let names: Vec<String> = core
        .filtered_definitions(&prefs)
        .into_iter()
        .map(|d| d.name)
        .collect();
    assert_eq!(names, vec!["admins", "Users"]);

    let prefs = ViewPreferences {
        search_text: "ASSET".to_string(),
        sort_by: SortKey::Category,
        sort_order: SortOrder::Desc,
        ..Default::default()
    };
    assert_eq!(core.filtered_definitions(&prefs).len(), 1);
}

// ============================================================================
// Monitoring
// ============================================================================

#[tokio::test]
async fn test_health_and_metrics_snapshots() {
    let (core, _clock) = default_core();

    let health = core.check_health().await.unwrap();
    assert_eq!(health.status, HealthState::Degraded);
    core.refresh_metrics().await.unwrap();

    let state = core.state();
    assert_eq!(
        state.monitor.health().value().map(|h| h.status),
        Some(HealthState::Degraded)
    );
    assert_eq!(
        state.monitor.metrics().value(),
        Some(&json!({ "totalExecutions": 10 }))
    );
    assert!(!state.monitor.metrics().is_loading());
}

#[tokio::test]
async fn test_query_stats_failure_is_per_query() {
    let (core, _clock) = default_core();

    core.refresh_query_stats("q1").await.unwrap();
    assert!(core.refresh_query_stats("unknown").await.is_err());

    let state = core.state();
    let q1 = state.monitor.query_stats("q1").unwrap();
    assert_eq!(q1.value(), Some(&json!({ "executions": 3 })));
    assert_eq!(q1.error(), None);
    let unknown = state.monitor.query_stats("unknown").unwrap();
    assert_eq!(unknown.error(), Some("no statistics for unknown"));
}

// ============================================================================
// Builder
// ============================================================================

#[tokio::test]
async fn test_validate_and_preview_draft() {
    let (core, _clock) = default_core();
    core.set_draft(QuerySpec {
        data_source: "sql".to_string(),
        filter: Some("age gt 30".to_string()),
        ..Default::default()
    });

    let validation = core.validate_draft().await.unwrap();
    assert!(validation.is_valid);
    assert_eq!(validation.warnings, vec!["filter is not indexed"]);

    let preview = core.test_draft().await.unwrap();
    assert_eq!(preview.row_count(), 1);
    assert_eq!(core.service().builds.load(Ordering::SeqCst), 1);

    let state = core.state();
    assert_eq!(state.builder.validation_result(), Some(&validation));
    assert_eq!(state.builder.preview(), Some(&preview));
    assert!(!state.builder.is_validating());
    assert!(!state.builder.is_testing());
    // Previews are neither tracked nor cached
    assert!(state.executions.is_empty());
    assert!(state.cache.is_empty());
}

#[tokio::test]
async fn test_invalid_draft_reports_errors() {
    let (core, _clock) = default_core();
    core.set_draft(QuerySpec {
        data_source: "sql".to_string(),
        ..Default::default()
    });

    let validation = core.validate_draft().await.unwrap();
    assert!(!validation.is_valid);
    assert_eq!(validation.errors, vec!["filter required"]);
}

#[tokio::test]
async fn test_preview_failure_sets_builder_error() {
    let (core, _clock) = default_core();
    core.set_draft(QuerySpec {
        data_source: "offline".to_string(),
        ..Default::default()
    });

    assert!(core.test_draft().await.is_err());
    let state = core.state();
    assert_eq!(state.builder.error(), Some("data source offline"));
    assert!(!state.builder.is_testing());
}
