//! Query engine: the injectable state root
//!
//! `QueryCore` owns every piece of client-side query state and the handle to
//! the remote [`QueryService`]. Each async entry point performs at most one
//! remote call and resolves it into exactly one synchronous state transition.
//! Locks are short and never held across an `.await`.
//!
//! ## Execution flow
//!
//! ```text
//! execute_query(q, params)
//!     ├── cache hit ─────────────────────────► cached result
//!     ├── same call in flight ──► await it ──► shared result
//!     └── begin() ──► spawn(service.execute) ──┬──► complete + cache put
//!                              ▲               ├──► fail (errors[q])
//!                    cancel_execution(id) ─────┴──► cancelled
//! ```
//!
//! The remote call runs on its own task, so the execution settles even when
//! every caller awaiting it has been dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::Serialize;

use crate::builder::BuilderState;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{CoreError, CoreResult, ServiceError};
use crate::execution::{
    cache_key, CacheStore, CancelHandle, Execution, ExecutionId, ExecutionStatus, ExecutionTracker,
    TimeoutError,
};
use crate::model::{
    ExecuteOptions, Parameters, QueryDefinition, QueryResult, QuerySpec, ValidationResult,
    AD_HOC_QUERY_ID,
};
use crate::monitor::{HealthStatus, Monitor};
use crate::normalize::{self, ClearCacheReport};
use crate::registry::DefinitionRegistry;
use crate::selectors::{self, ViewPreferences};
use crate::service::{DefinitionFilter, QueryService};

/// All client-side query state
pub struct CoreState {
    pub cache: CacheStore,
    pub executions: ExecutionTracker,
    pub definitions: DefinitionRegistry,
    pub builder: BuilderState,
    pub monitor: Monitor,
}

impl CoreState {
    pub fn new(config: &Config, clock: Arc<dyn Clock>) -> Self {
        CoreState {
            cache: CacheStore::new(config.cache.max_entries, clock.clone()),
            executions: ExecutionTracker::new(config.executions.history_limit, clock),
            definitions: DefinitionRegistry::new(),
            builder: BuilderState::new(),
            monitor: Monitor::new(),
        }
    }
}

/// Where an execution result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    /// Served from the result cache without a remote call
    Cache,
    /// Produced by a remote call this caller initiated
    Remote,
    /// Produced by an identical call already in flight
    Shared,
}

/// Result of [`QueryCore::execute_query`]
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutcome {
    pub result: QueryResult,
    pub source: ResultSource,
    /// Tracked execution, when this caller started one
    pub execution_id: Option<ExecutionId>,
}

/// Combined local and remote cache clear
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheClearSummary {
    pub local_entries_cleared: usize,
    pub remote: ClearCacheReport,
}

type InFlight = Shared<BoxFuture<'static, CoreResult<QueryResult>>>;

/// In-flight calls by cache key, tagged with the owning execution
type InFlightMap = HashMap<String, (ExecutionId, InFlight)>;

enum Flight {
    Join(InFlight),
    Lead(ExecutionId, InFlight),
}

/// Application-root state object
pub struct QueryCore<S> {
    state: Arc<RwLock<CoreState>>,
    service: Arc<S>,
    clock: Arc<dyn Clock>,
    config: Config,
    in_flight: Arc<Mutex<InFlightMap>>,
}

impl<S: QueryService + 'static> QueryCore<S> {
    /// Create a core using the system clock
    pub fn new(config: Config, service: S) -> Self {
        Self::with_clock(config, service, Arc::new(SystemClock))
    }

    pub fn with_clock(config: Config, service: S, clock: Arc<dyn Clock>) -> Self {
        QueryCore {
            state: Arc::new(RwLock::new(CoreState::new(&config, clock.clone()))),
            service: Arc::new(service),
            clock,
            config,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Read access to the state tree
    pub fn state(&self) -> RwLockReadGuard<'_, CoreState> {
        self.state.read()
    }

    /// Write access for callers driving transitions themselves
    pub fn state_mut(&self) -> RwLockWriteGuard<'_, CoreState> {
        self.state.write()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Number of distinct calls currently awaiting the service
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Execute a catalog query, consulting the cache and in-flight calls first
    pub async fn execute_query(
        &self,
        query_id: &str,
        parameters: &Parameters,
        options: ExecuteOptions,
    ) -> CoreResult<QueryOutcome> {
        let use_cache = options.use_cache && self.config.cache.enabled;

        if use_cache {
            let cached = self.state.read().cache.lookup(query_id, parameters).cloned();
            if let Some(result) = cached {
                tracing::debug!(query_id, "cache_hit");
                return Ok(QueryOutcome {
                    result,
                    source: ResultSource::Cache,
                    execution_id: None,
                });
            }
        }

        let key = cache_key(query_id, parameters);
        let flight = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(&key) {
                Some((_, pending)) => Flight::Join(pending.clone()),
                None => {
                    let (id, call) =
                        self.start_call(query_id, parameters, options, use_cache, &key);
                    in_flight.insert(key.clone(), (id.clone(), call.clone()));
                    Flight::Lead(id, call)
                }
            }
        };

        match flight {
            Flight::Join(pending) => {
                tracing::debug!(query_id, cache_key = %key, "joined_in_flight_execution");
                Ok(QueryOutcome {
                    result: pending.await?,
                    source: ResultSource::Shared,
                    execution_id: None,
                })
            }
            Flight::Lead(id, call) => Ok(QueryOutcome {
                result: call.await?,
                source: ResultSource::Remote,
                execution_id: Some(id),
            }),
        }
    }

    /// Timeout for a remote execution call; zero disables it
    fn request_timeout(&self, override_ms: Option<u64>) -> Option<Duration> {
        override_ms
            .or(Some(self.config.service.request_timeout_ms))
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Begin a tracked execution and spawn its remote call.
    ///
    /// Called with the in-flight lock held; the task removes its own entry
    /// once settled.
    fn start_call(
        &self,
        query_id: &str,
        parameters: &Parameters,
        options: ExecuteOptions,
        use_cache: bool,
        key: &str,
    ) -> (ExecutionId, InFlight) {
        let (id, cancel) = self.begin_tracked(query_id, parameters);

        let timeout = self.request_timeout(options.timeout_ms);
        let cache_ttl = use_cache
            .then(|| options.cache_ttl_secs.unwrap_or(self.config.cache.default_ttl_secs));

        let service = Arc::clone(&self.service);
        let state = Arc::clone(&self.state);
        let in_flight = Arc::clone(&self.in_flight);
        let (qid, params, exec_id, flight_key) =
            (query_id.to_string(), parameters.clone(), id.clone(), key.to_string());

        let task = tokio::spawn(async move {
            // Fails only when cancelled before the task started
            let _ = state.write().executions.mark_running(&exec_id);

            let remote = async {
                let response =
                    with_timeout(timeout, service.execute(&qid, &params, &options)).await?;
                normalize::query_result(response)
            };

            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(CoreError::Cancelled(exec_id.clone())),
                res = remote => res,
            };

            release_flight(&in_flight, &flight_key, &exec_id);
            let mut guard = state.write();
            settle(&mut guard, &exec_id, &qid, &params, cache_ttl, outcome)
        });

        let call = async move {
            task.await.unwrap_or_else(|err| {
                Err(ServiceError::new(format!("Execution task failed: {err}")).into())
            })
        }
        .boxed()
        .shared();

        (id, call)
    }

    fn begin_tracked(
        &self,
        query_id: &str,
        parameters: &Parameters,
    ) -> (ExecutionId, CancelHandle) {
        let mut state = self.state.write();
        let id = state.executions.begin(query_id, parameters);
        let cancel = state
            .executions
            .get(&id)
            .map(Execution::cancel_handle)
            .unwrap_or_default();
        (id, cancel)
    }

    /// Run an ad-hoc specification as a tracked, uncached execution
    pub async fn execute_ad_hoc(&self, spec: &QuerySpec) -> CoreResult<QueryOutcome> {
        let (id, cancel) = self.begin_tracked(AD_HOC_QUERY_ID, &spec.parameters);
        let _ = self.state.write().executions.mark_running(&id);
        let timeout = self.request_timeout(None);

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(CoreError::Cancelled(id.clone())),
            res = with_timeout(timeout, self.service.build(spec)) => res.and_then(normalize::query_result),
        };

        let mut state = self.state.write();
        let result = settle(&mut state, &id, AD_HOC_QUERY_ID, &spec.parameters, None, outcome)?;
        Ok(QueryOutcome {
            result,
            source: ResultSource::Remote,
            execution_id: Some(id),
        })
    }

    /// Cancel a live execution; its in-flight call resolves as cancelled
    pub fn cancel_execution(&self, id: &str) -> CoreResult<()> {
        let key = {
            let mut state = self.state.write();
            let key = state
                .executions
                .get(id)
                .map(|e| cache_key(&e.query_id, &e.parameters));
            state.executions.cancel_execution(id)?;
            key
        };
        // New callers start a fresh call instead of joining the cancelled one
        if let Some(key) = key {
            release_flight(&self.in_flight, &key, id);
        }
        tracing::info!(execution_id = %id, "execution_cancelled");
        Ok(())
    }

    /// Replace the catalog from the primary provider
    pub async fn refresh_definitions(&self, filter: &DefinitionFilter) -> CoreResult<usize> {
        self.state.write().definitions.begin_fetch();

        let fetched = self
            .service
            .get_definitions(filter)
            .await
            .map_err(CoreError::from)
            .and_then(normalize::definitions);

        let mut state = self.state.write();
        match fetched {
            Ok(defs) => {
                let count = defs.len();
                state.definitions.replace_all(defs, self.clock.now());
                tracing::debug!(count, "definitions_replaced");
                Ok(count)
            }
            Err(err) => {
                tracing::warn!(error = %err, "definitions_fetch_failed");
                state.definitions.fetch_failed(err.to_string());
                Err(err)
            }
        }
    }

    /// Merge definitions from the secondary (graph) provider
    pub async fn load_graph_definitions(&self, filter: &DefinitionFilter) -> CoreResult<usize> {
        self.state.write().definitions.begin_fetch();

        let fetched = self
            .service
            .get_graph_definitions(filter)
            .await
            .map_err(CoreError::from)
            .and_then(normalize::definitions);

        let mut state = self.state.write();
        match fetched {
            Ok(defs) => Ok(state.definitions.merge_in(defs)),
            Err(err) => {
                tracing::warn!(error = %err, "graph_definitions_fetch_failed");
                state.definitions.fetch_failed(err.to_string());
                Err(err)
            }
        }
    }

    pub async fn refresh_metrics(&self) -> CoreResult<()> {
        self.state.write().monitor.metrics_mut().begin_fetch();

        let fetched = self
            .service
            .get_metrics()
            .await
            .map_err(CoreError::from)
            .and_then(normalize::statistics);

        let mut state = self.state.write();
        let slot = state.monitor.metrics_mut();
        match fetched {
            Ok(metrics) => {
                slot.record(metrics, self.clock.now());
                Ok(())
            }
            Err(err) => {
                tracing::warn!(error = %err, "metrics_fetch_failed");
                slot.record_error(err.to_string());
                Err(err)
            }
        }
    }

    pub async fn refresh_query_stats(&self, query_id: &str) -> CoreResult<()> {
        self.state.write().monitor.query_stats_mut(query_id).begin_fetch();

        let fetched = self
            .service
            .get_stats(query_id)
            .await
            .map_err(CoreError::from)
            .and_then(normalize::statistics);

        let mut state = self.state.write();
        let slot = state.monitor.query_stats_mut(query_id);
        match fetched {
            Ok(stats) => {
                slot.record(stats, self.clock.now());
                Ok(())
            }
            Err(err) => {
                tracing::warn!(query_id, error = %err, "query_stats_fetch_failed");
                slot.record_error(err.to_string());
                Err(err)
            }
        }
    }

    pub async fn check_health(&self) -> CoreResult<HealthStatus> {
        self.state.write().monitor.health_mut().begin_fetch();

        let fetched = self
            .service
            .get_health()
            .await
            .map_err(CoreError::from)
            .and_then(normalize::health);

        let mut state = self.state.write();
        let slot = state.monitor.health_mut();
        match fetched {
            Ok(health) => {
                slot.record(health.clone(), self.clock.now());
                Ok(health)
            }
            Err(err) => {
                tracing::warn!(error = %err, "health_check_failed");
                slot.record_error(err.to_string());
                Err(err)
            }
        }
    }

    /// Replace the builder draft
    pub fn set_draft(&self, spec: QuerySpec) {
        self.state.write().builder.set_draft(spec);
    }

    /// Validate the current draft with the service
    pub async fn validate_draft(&self) -> CoreResult<ValidationResult> {
        let draft = {
            let mut state = self.state.write();
            let draft = state.builder.draft().cloned().ok_or(CoreError::NoDraft("validate"))?;
            state.builder.record_validation_pending();
            draft
        };

        let validated = self
            .service
            .validate(&draft, &draft.parameters)
            .await
            .map_err(CoreError::from)
            .and_then(normalize::validation);

        let mut state = self.state.write();
        match validated {
            Ok(result) => {
                state.builder.record_validation_result(result.clone());
                Ok(result)
            }
            Err(err) => {
                state.builder.record_validation_error(err.to_string());
                Err(err)
            }
        }
    }

    /// Run the current draft for a preview without tracking or caching it
    pub async fn test_draft(&self) -> CoreResult<QueryResult> {
        let draft = {
            let mut state = self.state.write();
            let draft = state.builder.draft().cloned().ok_or(CoreError::NoDraft("test"))?;
            state.builder.record_test_pending();
            draft
        };

        let built = self
            .service
            .build(&draft)
            .await
            .map_err(CoreError::from)
            .and_then(normalize::query_result);

        let mut state = self.state.write();
        match built {
            Ok(result) => {
                state.builder.record_preview(result.clone());
                Ok(result)
            }
            Err(err) => {
                state.builder.record_test_error(err.to_string());
                Err(err)
            }
        }
    }

    /// Clear local entries, then ask the service to clear its own cache
    pub async fn clear_cache(&self, query_id: Option<&str>) -> CoreResult<CacheClearSummary> {
        let local_entries_cleared = self.state.write().cache.clear(query_id);
        tracing::info!(query_id = query_id.unwrap_or("*"), local_entries_cleared, "cache_cleared");

        let remote = self
            .service
            .clear_cache(query_id)
            .await
            .map_err(CoreError::from)
            .and_then(normalize::clear_report)?;

        Ok(CacheClearSummary {
            local_entries_cleared,
            remote,
        })
    }

    /// Definitions matching the view preferences
    pub fn filtered_definitions(&self, prefs: &ViewPreferences) -> Vec<QueryDefinition> {
        let state = self.state.read();
        selectors::filtered_definitions(&state.definitions, prefs)
            .into_iter()
            .cloned()
            .collect()
    }
}

/// Drop the in-flight entry for `key` if it still belongs to execution `id`
fn release_flight(in_flight: &Mutex<InFlightMap>, key: &str, id: &str) {
    let mut map = in_flight.lock();
    if map.get(key).is_some_and(|(owner, _)| owner == id) {
        map.remove(key);
    }
}

async fn with_timeout<F>(timeout: Option<Duration>, call: F) -> CoreResult<serde_json::Value>
where
    F: std::future::Future<Output = Result<serde_json::Value, ServiceError>>,
{
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(res) => res.map_err(CoreError::from),
            Err(_) => Err(ServiceError::new(TimeoutError { timeout: limit }.to_string()).into()),
        },
        None => call.await.map_err(CoreError::from),
    }
}

/// Apply the single terminal transition for a resolved call
fn settle(
    state: &mut CoreState,
    id: &str,
    query_id: &str,
    parameters: &Parameters,
    cache_ttl: Option<u64>,
    outcome: CoreResult<QueryResult>,
) -> CoreResult<QueryResult> {
    match outcome {
        Ok(result) => {
            if let Err(err) = state.executions.complete_execution(id, result.clone()) {
                // A concurrent cancel wins; the late result is discarded
                let cancelled = state
                    .executions
                    .get(id)
                    .is_some_and(|e| e.status == ExecutionStatus::Cancelled);
                return Err(if cancelled {
                    CoreError::Cancelled(id.to_string())
                } else {
                    err.into()
                });
            }
            if let Some(ttl) = cache_ttl {
                state.cache.put(query_id, parameters, result.clone(), ttl);
            }
            Ok(result)
        }
        Err(err @ CoreError::Cancelled(_)) => Err(err),
        Err(err) => {
            tracing::warn!(execution_id = %id, query_id, error = %err, "execution_failed");
            // Already terminal only if cancelled concurrently
            let _ = state.executions.fail_execution(id, err.to_string());
            Err(err)
        }
    }
}
