//! Per-minion results and pass/fail validation.
//!
//! salt-api answers with `{"return": [...]}`. For minion-targeted clients
//! each element maps minion id -> return value (one element for `local`,
//! one element per minion for `local_batch`). Runner and hook replies are
//! not per-minion; each element becomes one pseudo-result.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{Result, SaltError};

pub const NO_RESPONSE: &str = "Minion did not return. [No response]";

/// How deep into a return value we look for failed state results.
const STATE_SCAN_DEPTH: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinionResult {
    pub minion_id: String,
    pub retcode: i64,
    pub return_value: Value,
}

impl MinionResult {
    /// Build a result, deriving the retcode from the shape of `return_value`.
    pub fn from_return(minion_id: impl Into<String>, return_value: Value) -> Self {
        let retcode = derive_retcode(&return_value);
        Self {
            minion_id: minion_id.into(),
            retcode,
            return_value,
        }
    }

    pub fn no_response(minion_id: impl Into<String>) -> Self {
        Self {
            minion_id: minion_id.into(),
            retcode: 1,
            return_value: Value::String(NO_RESPONSE.into()),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.retcode == 0
    }
}

/// Final verdict of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionOutcome {
    /// The `return` array exactly as received.
    pub raw: Value,
    pub results: Vec<MinionResult>,
    pub success: bool,
    pub error_detail: Option<String>,
}

impl ExecutionOutcome {
    pub fn failed_minions(&self) -> impl Iterator<Item = &MinionResult> {
        self.results.iter().filter(|r| !r.succeeded())
    }

    /// Convert a failed outcome into `SaltError::Validation`.
    pub fn into_result(self) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(SaltError::Validation(
                self.error_detail
                    .unwrap_or_else(|| "validation failed".to_string()),
            ))
        }
    }
}

/// Flatten a `return` array into per-minion results.
pub fn collect_minion_results(client: Option<&str>, returns: &[Value]) -> Vec<MinionResult> {
    let per_minion = matches!(
        client,
        Some("local") | Some("local_batch") | Some("local_subset") | Some("local_async")
    );
    let label = client.unwrap_or("hook");
    let mut results = Vec::new();
    for (idx, item) in returns.iter().enumerate() {
        match item {
            Value::Object(map) if per_minion => {
                for (minion, value) in map {
                    results.push(MinionResult::from_return(minion.clone(), value.clone()));
                }
            }
            other => {
                let id = if returns.len() == 1 {
                    label.to_string()
                } else {
                    format!("{label}[{idx}]")
                };
                results.push(MinionResult::from_return(id, other.clone()));
            }
        }
    }
    results
}

/// Succeeds iff there is at least one result and every retcode is 0.
pub fn validate(results: Vec<MinionResult>, raw: Value) -> ExecutionOutcome {
    let success = !results.is_empty() && results.iter().all(MinionResult::succeeded);
    let error_detail = if success {
        None
    } else if results.is_empty() {
        Some(format!(
            "no minions matched the target or none responded; response: {raw}"
        ))
    } else {
        let failed: Vec<String> = results
            .iter()
            .filter(|r| !r.succeeded())
            .map(|r| format!("{} (retcode {})", r.minion_id, r.retcode))
            .collect();
        Some(format!(
            "one or more minions did not return code 0: {}; response: {raw}",
            failed.join(", ")
        ))
    };
    ExecutionOutcome {
        raw,
        results,
        success,
        error_detail,
    }
}

/// Best-effort exit code for a Salt return value.
///
/// An explicit `retcode` wins. Otherwise `false`, error strings, hook
/// `{"success": false}` and state maps holding a `"result": false` entry
/// count as failures.
pub fn derive_retcode(value: &Value) -> i64 {
    match value {
        Value::Bool(false) => 1,
        Value::String(s) if is_error_string(s) => 1,
        Value::Object(map) => {
            if let Some(code) = map.get("retcode").and_then(Value::as_i64) {
                return code;
            }
            if map.get("success") == Some(&Value::Bool(false)) {
                return 1;
            }
            if has_failed_state(value, STATE_SCAN_DEPTH) {
                1
            } else {
                0
            }
        }
        _ => 0,
    }
}

fn is_error_string(s: &str) -> bool {
    let s = s.trim_start();
    s.starts_with("ERROR") || s.starts_with("Minion did not return")
}

fn has_failed_state(value: &Value, depth: usize) -> bool {
    let Value::Object(map) = value else {
        return false;
    };
    if map.get("result") == Some(&Value::Bool(false)) {
        return true;
    }
    if depth == 0 {
        return false;
    }
    map.values()
        .any(|child| child.is_object() && has_failed_state(child, depth - 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minion(id: &str, retcode: i64) -> MinionResult {
        MinionResult {
            minion_id: id.into(),
            retcode,
            return_value: json!("ok"),
        }
    }

    #[test]
    fn empty_results_fail() {
        let outcome = validate(Vec::new(), json!([]));
        assert!(!outcome.success);
        assert!(outcome.error_detail.unwrap().contains("no minions"));
    }

    #[test]
    fn all_zero_succeeds() {
        let outcome = validate(vec![minion("a", 0), minion("b", 0)], json!([]));
        assert!(outcome.success);
        assert!(outcome.error_detail.is_none());
        assert!(outcome.into_result().is_ok());
    }

    #[test]
    fn one_nonzero_fails_and_is_named() {
        let outcome = validate(vec![minion("a", 0), minion("web2", 1)], json!([{"web2": false}]));
        assert!(!outcome.success);
        let detail = outcome.error_detail.clone().unwrap();
        assert!(detail.contains("web2 (retcode 1)"));
        assert!(!detail.contains("a (retcode"));
        assert!(detail.contains(r#"{"web2":false}"#));
        assert_eq!(outcome.failed_minions().count(), 1);
        assert!(matches!(outcome.into_result(), Err(SaltError::Validation(_))));
    }

    #[test]
    fn collect_local_returns() {
        let returns = vec![json!({"web1": "hello", "web2": false})];
        let results = collect_minion_results(Some("local"), &returns);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].minion_id, "web1");
        assert_eq!(results[0].retcode, 0);
        assert_eq!(results[1].retcode, 1);
    }

    #[test]
    fn collect_batch_returns_one_per_element() {
        let returns = vec![json!({"a": true}), json!({"b": {"retcode": 2, "ret": "x"}})];
        let results = collect_minion_results(Some("local_batch"), &returns);
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].minion_id, "b");
        assert_eq!(results[1].retcode, 2);
    }

    #[test]
    fn collect_runner_envelope() {
        let returns = vec![json!({"outputter": "highstate", "retcode": 0, "data": {}})];
        let results = collect_minion_results(Some("runner"), &returns);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].minion_id, "runner");
        assert!(results[0].succeeded());
    }

    #[test]
    fn state_failure_detected() {
        let ret = json!({
            "file_|-conf_|-/etc/app.conf_|-managed": {"result": true, "comment": "ok"},
            "service_|-app_|-app_|-running": {"result": false, "comment": "failed"}
        });
        assert_eq!(derive_retcode(&ret), 1);

        let orchestrate = json!({"data": {"master": {"salt_|-deploy": {"result": false}}}});
        assert_eq!(derive_retcode(&orchestrate), 1);
    }

    #[test]
    fn error_strings_and_hooks() {
        assert_eq!(derive_retcode(&json!("ERROR: state.apply is not available")), 1);
        assert_eq!(derive_retcode(&json!(NO_RESPONSE)), 1);
        assert_eq!(derive_retcode(&json!("all good")), 0);
        assert_eq!(derive_retcode(&json!({"success": false})), 1);
        assert_eq!(derive_retcode(&json!({"success": true})), 0);
        assert_eq!(derive_retcode(&json!(["a", "b"])), 0);
    }
}
