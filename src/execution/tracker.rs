//! Execution Tracker
//!
//! Tracks every query invocation from initiation to a terminal outcome.
//!
//! ## Lifecycle
//!
//! ```text
//! begin() ──► Pending ──► Running ──┬──► Completed
//!                │                   ├──► Failed
//!                └───────────────────┴──► Cancelled
//! ```
//!
//! Live executions sit in the active set. A terminal transition moves the id
//! to the front of the history list; when history exceeds its limit the
//! oldest id and its record are discarded.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::cancel::CancelHandle;
use super::{ExecutionError, ExecutionResult};
use crate::clock::Clock;
use crate::model::{Parameters, QueryResult};

/// Unique execution identifier (UUID v4)
pub type ExecutionId = String;

/// Lifecycle state of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    pub fn is_live(self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Pending => write!(f, "pending"),
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Completed => write!(f, "completed"),
            ExecutionStatus::Failed => write!(f, "failed"),
            ExecutionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One concrete invocation of a query
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: ExecutionId,
    pub query_id: String,
    pub parameters: Parameters,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub result: Option<QueryResult>,
    pub error: Option<String>,
    #[serde(skip)]
    cancel: CancelHandle,
}

impl Execution {
    /// Wall time between start and end, once finished
    pub fn duration_ms(&self) -> Option<i64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds())
    }

    /// Handle that signals cancellation of this execution
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }
}

/// Terminal outcome applied by a transition
enum Outcome {
    Completed(QueryResult),
    Failed(String),
    Cancelled,
}

impl Outcome {
    fn status(&self) -> ExecutionStatus {
        match self {
            Outcome::Completed(_) => ExecutionStatus::Completed,
            Outcome::Failed(_) => ExecutionStatus::Failed,
            Outcome::Cancelled => ExecutionStatus::Cancelled,
        }
    }
}

/// Active/history partitioned execution records
pub struct ExecutionTracker {
    executions: HashMap<ExecutionId, Execution>,
    /// Live ids in initiation order
    active: Vec<ExecutionId>,
    /// Finished ids, most recent first
    history: VecDeque<ExecutionId>,
    history_limit: usize,
    /// Last failure message per query id
    errors: HashMap<String, String>,
    clock: Arc<dyn Clock>,
}

impl ExecutionTracker {
    pub fn new(history_limit: usize, clock: Arc<dyn Clock>) -> Self {
        ExecutionTracker {
            executions: HashMap::new(),
            active: Vec::new(),
            history: VecDeque::new(),
            history_limit,
            errors: HashMap::new(),
            clock,
        }
    }

    /// Record a new pending execution and return its id
    pub fn begin(&mut self, query_id: &str, parameters: &Parameters) -> ExecutionId {
        let id = uuid::Uuid::new_v4().to_string();
        let execution = Execution {
            id: id.clone(),
            query_id: query_id.to_string(),
            parameters: parameters.clone(),
            status: ExecutionStatus::Pending,
            start_time: self.clock.now(),
            end_time: None,
            result: None,
            error: None,
            cancel: CancelHandle::new(),
        };

        self.errors.remove(query_id);
        self.executions.insert(id.clone(), execution);
        self.active.push(id.clone());
        tracing::debug!(execution_id = %id, query_id, "execution_begun");
        id
    }

    /// Move a pending execution to running
    pub fn mark_running(&mut self, id: &str) -> ExecutionResult<()> {
        let execution = self
            .executions
            .get_mut(id)
            .ok_or_else(|| ExecutionError::UnknownExecution(id.to_string()))?;

        if execution.status != ExecutionStatus::Pending {
            return Err(ExecutionError::InvalidTransition {
                id: id.to_string(),
                from: execution.status,
                to: ExecutionStatus::Running,
            });
        }
        execution.status = ExecutionStatus::Running;
        Ok(())
    }

    /// Complete the execution with this id
    pub fn complete_execution(&mut self, id: &str, result: QueryResult) -> ExecutionResult<()> {
        self.finish(id, Outcome::Completed(result))
    }

    /// Fail the execution with this id
    pub fn fail_execution(&mut self, id: &str, error: impl Into<String>) -> ExecutionResult<()> {
        self.finish(id, Outcome::Failed(error.into()))
    }

    /// Cancel the execution with this id and signal its handle
    pub fn cancel_execution(&mut self, id: &str) -> ExecutionResult<()> {
        self.finish(id, Outcome::Cancelled)
    }

    /// Complete the most recent live execution matching (query id, parameters)
    pub fn complete(
        &mut self,
        query_id: &str,
        parameters: &Parameters,
        result: QueryResult,
    ) -> Option<ExecutionId> {
        let id = self.find_live(query_id, parameters)?;
        self.finish(&id, Outcome::Completed(result)).ok()?;
        Some(id)
    }

    /// Fail the most recent live execution matching (query id, parameters)
    pub fn fail(
        &mut self,
        query_id: &str,
        parameters: &Parameters,
        error: impl Into<String>,
    ) -> Option<ExecutionId> {
        let id = self.find_live(query_id, parameters)?;
        self.finish(&id, Outcome::Failed(error.into())).ok()?;
        Some(id)
    }

    fn find_live(&self, query_id: &str, parameters: &Parameters) -> Option<ExecutionId> {
        self.active
            .iter()
            .rev()
            .filter_map(|id| self.executions.get(id))
            .find(|e| e.status.is_live() && e.query_id == query_id && &e.parameters == parameters)
            .map(|e| e.id.clone())
    }

    fn finish(&mut self, id: &str, outcome: Outcome) -> ExecutionResult<()> {
        let now = self.clock.now();
        let execution = self
            .executions
            .get_mut(id)
            .ok_or_else(|| ExecutionError::UnknownExecution(id.to_string()))?;

        let to = outcome.status();
        if execution.status.is_terminal() {
            return Err(ExecutionError::InvalidTransition {
                id: id.to_string(),
                from: execution.status,
                to,
            });
        }

        execution.status = to;
        execution.end_time = Some(now);
        match outcome {
            Outcome::Completed(result) => execution.result = Some(result),
            Outcome::Failed(message) => {
                self.errors
                    .insert(execution.query_id.clone(), message.clone());
                execution.error = Some(message);
            }
            Outcome::Cancelled => execution.cancel.cancel(),
        }
        tracing::debug!(execution_id = %id, query_id = %execution.query_id, status = %to, "execution_finished");

        self.active.retain(|active_id| active_id != id);
        self.history.push_front(id.to_string());
        while self.history.len() > self.history_limit {
            if let Some(dropped) = self.history.pop_back() {
                self.executions.remove(&dropped);
            }
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Execution> {
        self.executions.get(id)
    }

    /// Live executions in initiation order
    pub fn active(&self) -> impl Iterator<Item = &Execution> {
        self.active.iter().filter_map(|id| self.executions.get(id))
    }

    /// Finished executions, most recent first
    pub fn history(&self) -> impl Iterator<Item = &Execution> {
        self.history.iter().filter_map(|id| self.executions.get(id))
    }

    pub fn active_ids(&self) -> &[ExecutionId] {
        &self.active
    }

    pub fn history_ids(&self) -> &VecDeque<ExecutionId> {
        &self.history
    }

    /// Every retained execution of one query, live ones first
    pub fn executions_for<'a>(&'a self, query_id: &'a str) -> impl Iterator<Item = &'a Execution> {
        self.active().chain(self.history()).filter(move |e| e.query_id == query_id)
    }

    /// Last failure message recorded for a query
    pub fn last_error(&self, query_id: &str) -> Option<&str> {
        self.errors.get(query_id).map(String::as_str)
    }

    pub fn errors(&self) -> &HashMap<String, String> {
        &self.errors
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    /// Number of retained execution records
    pub fn len(&self) -> usize {
        self.executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }
}
