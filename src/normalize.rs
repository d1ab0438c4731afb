//! Response normalization
//!
//! The query service answers with loosely shaped JSON. Every response is
//! converted here into the fixed model types; anything that cannot be
//! converted becomes [`CoreError::MalformedResponse`], which surfaces with a
//! generic message.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, CoreResult};
use crate::model::{QueryDefinition, QueryResult, ValidationResult};
use crate::monitor::{HealthState, HealthStatus};

const ROW_FIELDS: &[&str] = &["rows", "data", "results", "value"];
const COUNT_FIELDS: &[&str] = &["totalCount", "total_count", "count", "@odata.count"];
const TIME_FIELDS: &[&str] = &["executionTimeMs", "executionTime", "execution_time_ms"];
const DEFINITION_FIELDS: &[&str] = &["definitions", "queries", "data", "value"];

/// Outcome of a remote cache clear
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearCacheReport {
    pub cleared: bool,
    pub entries_cleared: u64,
}

fn malformed(what: &str) -> CoreError {
    CoreError::MalformedResponse(what.to_string())
}

/// Remove the first present field among `names`
fn take_first(map: &mut Map<String, Value>, names: &[&str]) -> Option<Value> {
    names.iter().find_map(|name| map.remove(*name))
}

/// Execution or preview payload
pub fn query_result(response: Value) -> CoreResult<QueryResult> {
    match response {
        Value::Array(rows) => Ok(QueryResult::from_rows(rows)),
        Value::Object(mut map) => {
            let rows = match take_first(&mut map, ROW_FIELDS) {
                Some(Value::Array(rows)) => rows,
                Some(Value::Null) | None if map.is_empty() => Vec::new(),
                _ => return Err(malformed("result has no row array")),
            };
            let total_count = take_first(&mut map, COUNT_FIELDS).and_then(|v| v.as_u64());
            let execution_time_ms = take_first(&mut map, TIME_FIELDS).and_then(|v| v.as_u64());
            Ok(QueryResult {
                rows,
                total_count,
                execution_time_ms,
                metadata: map,
            })
        }
        _ => Err(malformed("result is neither an array nor an object")),
    }
}

/// Definition listing, either a bare array or wrapped in an object
pub fn definitions(response: Value) -> CoreResult<Vec<QueryDefinition>> {
    let list = match response {
        Value::Array(items) => items,
        Value::Object(mut map) => match take_first(&mut map, DEFINITION_FIELDS) {
            Some(Value::Array(items)) => items,
            _ => return Err(malformed("definition listing has no array")),
        },
        _ => return Err(malformed("definition listing is not a collection")),
    };

    list.into_iter()
        .map(|item| {
            serde_json::from_value::<QueryDefinition>(item)
                .map_err(|e| CoreError::MalformedResponse(e.to_string()))
        })
        .collect()
}

fn string_list(value: Option<Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => s,
                Value::Object(mut obj) => match obj.remove("message") {
                    Some(Value::String(s)) => s,
                    _ => Value::Object(obj).to_string(),
                },
                other => other.to_string(),
            })
            .collect(),
        Some(Value::String(s)) => vec![s],
        _ => Vec::new(),
    }
}

/// Validation outcome
pub fn validation(response: Value) -> CoreResult<ValidationResult> {
    let Value::Object(mut map) = response else {
        return Err(malformed("validation result is not an object"));
    };
    let is_valid = match take_first(&mut map, &["isValid", "is_valid", "valid"]) {
        Some(Value::Bool(b)) => b,
        _ => return Err(malformed("validation result has no validity flag")),
    };
    Ok(ValidationResult {
        is_valid,
        errors: string_list(map.remove("errors")),
        warnings: string_list(map.remove("warnings")),
    })
}

fn health_state(status: &str) -> HealthState {
    match status.to_ascii_lowercase().as_str() {
        "healthy" | "ok" | "up" | "pass" => HealthState::Healthy,
        "degraded" | "warn" | "warning" => HealthState::Degraded,
        "unhealthy" | "down" | "error" | "fail" => HealthState::Unhealthy,
        _ => HealthState::Unknown,
    }
}

/// Health report; the whole object is kept as details
pub fn health(response: Value) -> CoreResult<HealthStatus> {
    let Value::Object(map) = response else {
        return Err(malformed("health report is not an object"));
    };
    let status = match map.get("status") {
        Some(Value::String(s)) => health_state(s),
        Some(Value::Bool(true)) => HealthState::Healthy,
        Some(Value::Bool(false)) => HealthState::Unhealthy,
        _ => HealthState::Unknown,
    };
    Ok(HealthStatus {
        status,
        details: Value::Object(map),
    })
}

/// Aggregate metrics or per-query statistics; opaque but must be an object
pub fn statistics(response: Value) -> CoreResult<Value> {
    match response {
        Value::Object(_) => Ok(response),
        _ => Err(malformed("statistics are not an object")),
    }
}

/// Remote cache clear acknowledgement
pub fn clear_report(response: Value) -> CoreResult<ClearCacheReport> {
    let Value::Object(mut map) = response else {
        return Err(malformed("cache clear report is not an object"));
    };
    let entries_cleared = take_first(&mut map, &["entriesCleared", "entries_cleared"])
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let cleared = match map.remove("cleared") {
        Some(Value::Bool(b)) => b,
        _ => entries_cleared > 0,
    };
    Ok(ClearCacheReport {
        cleared,
        entries_cleared,
    })
}
