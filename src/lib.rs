//! # QueryDesk
//!
//! Client-side query execution core for interactive reporting tools.
//!
//! ## Components
//!
//! ```text
//! QueryCore (injectable state root)
//!     ├── CacheStore          results per (query, parameters), TTL + size budget
//!     ├── ExecutionTracker    pending → running → completed | failed | cancelled
//!     ├── DefinitionRegistry  catalog, replaced wholesale or merged in
//!     ├── BuilderState        ad-hoc draft + validation/preview outcome
//!     ├── Monitor             metrics, per-query stats, health snapshots
//!     └── QueryService        remote collaborator (trait)
//! ```
//!
//! Selectors in [`selectors`] derive filtered and sorted views without
//! touching state.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use querydesk::{Config, ExecuteOptions, Parameters, QueryCore};
//!
//! let core = QueryCore::new(Config::load()?, my_service);
//! core.refresh_definitions(&Default::default()).await?;
//!
//! let outcome = core
//!     .execute_query("active-users", &Parameters::new(), ExecuteOptions::default())
//!     .await?;
//! println!("{} rows from {:?}", outcome.result.row_count(), outcome.source);
//! ```

pub mod builder;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod model;
pub mod monitor;
pub mod normalize;
pub mod registry;
pub mod selectors;
pub mod service;

pub use crate::builder::{BuilderState, ValidationPhase};
pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::config::Config;
pub use crate::engine::{CacheClearSummary, CoreState, QueryCore, QueryOutcome, ResultSource};
pub use crate::error::{CoreError, CoreResult, ServiceError};
pub use crate::execution::{
    cache_key, CacheEntry, CacheStats, CacheStore, CancelHandle, Execution, ExecutionError,
    ExecutionId, ExecutionStatus, ExecutionTracker,
};
pub use crate::model::{
    ExecuteOptions, ParameterSchema, ParameterType, Parameters, QueryDefinition, QueryResult,
    QuerySpec, ValidationResult, AD_HOC_QUERY_ID,
};
pub use crate::monitor::{HealthState, HealthStatus, Monitor, Snapshot};
pub use crate::registry::DefinitionRegistry;
pub use crate::selectors::{SortKey, SortOrder, ViewPreferences};
pub use crate::service::{DefinitionFilter, FileQueryService, QueryService};
