use serde::Serialize;
use serde_json::{Map, Value};

use super::args::{parse_arguments, parse_keywords};
use super::error::{Result, SaltError};
use super::mode::ExecutionMode;

/// Where a request is POSTed, relative to the salt-api base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `/` (or `/minions` for blocking local jobs).
    Run,
    /// `/hook/<tag>`
    Hook(String),
}

/// A fully assembled salt-api request body. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionRequest {
    #[serde(flatten)]
    body: Map<String, Value>,
    #[serde(skip)]
    endpoint: Endpoint,
}

impl ExecutionRequest {
    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn client(&self) -> Option<&str> {
        self.body.get("client").and_then(Value::as_str)
    }

    pub fn function(&self) -> Option<&str> {
        self.body.get("fun").and_then(Value::as_str)
    }

    /// Human label for what the job targets: `tgt`, else the function or hook tag.
    pub fn target_label(&self) -> String {
        if let Some(tgt) = self.body.get("tgt").and_then(Value::as_str) {
            return tgt.to_string();
        }
        match &self.endpoint {
            Endpoint::Hook(tag) => format!("hook/{tag}"),
            Endpoint::Run => self.function().unwrap_or("<none>").to_string(),
        }
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.body.clone())
    }
}

/// Build the request document for `mode`.
///
/// `arg` and `kwarg` are only present when the argument string produced
/// something for them. For hooks the argument string is the event payload
/// (`key=value` pairs) and no function is sent.
pub fn build_request(
    mode: &ExecutionMode,
    function: &str,
    arguments: &str,
) -> Result<ExecutionRequest> {
    mode.validate()?;

    if let ExecutionMode::Hook { tag } = mode {
        let body = parse_keywords(arguments)?;
        return Ok(ExecutionRequest {
            body,
            endpoint: Endpoint::Hook(tag.trim().trim_matches('/').to_string()),
        });
    }

    let function = function.trim();
    if function.is_empty() {
        return Err(SaltError::config(format!(
            "{} mode requires a function",
            mode.name()
        )));
    }

    let mut body = Map::new();
    if let Some(client) = mode.client() {
        body.insert("client".into(), Value::String(client.into()));
    }
    if let Some(target) = mode.target() {
        body.insert("tgt".into(), Value::String(target.expression.trim().to_string()));
        body.insert(
            "expr_form".into(),
            Value::String(target.target_type.as_str().into()),
        );
    }
    body.insert("fun".into(), Value::String(function.to_string()));

    let parsed = parse_arguments(arguments)?;
    if !parsed.positional.is_empty() {
        body.insert(
            "arg".into(),
            Value::Array(parsed.positional.into_iter().map(Value::String).collect()),
        );
    }
    if !parsed.keyword.is_empty() {
        body.insert("kwarg".into(), Value::Object(parsed.keyword));
    }

    mode.apply_fields(&mut body)?;

    Ok(ExecutionRequest {
        body,
        endpoint: Endpoint::Run,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::salt::mode::{Target, TargetType};
    use serde_json::json;

    fn local(tgt: &str) -> ExecutionMode {
        ExecutionMode::Local {
            target: Target::new(tgt, TargetType::Glob),
        }
    }

    #[test]
    fn local_request_matches_pipeline_example() {
        let req = build_request(
            &local("testTarget"),
            "cmd.run",
            r#""ls -la" test=True pillar='{"key": "value"}'"#,
        )
        .unwrap();
        let expected = json!({
            "client": "local",
            "tgt": "testTarget",
            "expr_form": "glob",
            "fun": "cmd.run",
            "arg": ["ls -la"],
            "kwarg": {"test": "True", "pillar": {"key": "value"}}
        });
        assert_eq!(req.to_json(), expected);
        assert_eq!(
            serde_json::to_string(&req).unwrap(),
            serde_json::to_string(&expected).unwrap(),
            "field order is stable"
        );
    }

    #[test]
    fn no_arguments_means_no_arg_fields() {
        let req = build_request(&local("*"), "test.ping", "").unwrap();
        assert!(!req.body().contains_key("arg"));
        assert!(!req.body().contains_key("kwarg"));
    }

    #[test]
    fn only_keywords_omits_arg() {
        let req = build_request(&local("*"), "state.apply", "test=True").unwrap();
        assert!(!req.body().contains_key("arg"));
        assert_eq!(req.body()["kwarg"], json!({"test": "True"}));
    }

    #[test]
    fn local_batch_always_has_batch() {
        let mode = ExecutionMode::LocalBatch {
            target: Target::new("web*", TargetType::Glob),
            batch_size: "25%".into(),
            batch_wait: Some("5".into()),
        };
        let req = build_request(&mode, "state.apply", "").unwrap();
        assert_eq!(req.client(), Some("local_batch"));
        assert_eq!(req.body()["batch"], json!("25%"));
        assert_eq!(req.body()["batch_wait"], json!("5"));

        let mode = ExecutionMode::LocalBatch {
            target: Target::new("web*", TargetType::List),
            batch_size: "2".into(),
            batch_wait: None,
        };
        let req = build_request(&mode, "test.ping", "").unwrap();
        assert_eq!(req.body()["batch"], json!("2"));
        assert_eq!(req.body()["expr_form"], json!("list"));
        assert!(!req.body().contains_key("batch_wait"));
    }

    #[test]
    fn runner_never_targets_minions() {
        let mode = ExecutionMode::Runner {
            mods: Some("orch.deploy".into()),
            pillar: Some(r#"version=1.2 extra='{"a": [1, 2]}'"#.into()),
        };
        let req = build_request(&mode, "state.orchestrate", "").unwrap();
        assert_eq!(req.client(), Some("runner"));
        assert!(!req.body().contains_key("tgt"));
        assert!(!req.body().contains_key("expr_form"));
        assert_eq!(req.body()["mods"], json!("orch.deploy"));
        assert_eq!(
            req.body()["pillar"],
            json!({"version": "1.2", "extra": {"a": [1, 2]}})
        );
        assert_eq!(req.target_label(), "state.orchestrate");
    }

    #[test]
    fn kwarg_values_survive_reparse() {
        let nested = json!({"z": 1, "a": {"deep": [true, null, "x"]}, "m": 2.5});
        let arg = format!("cfg='{}'", nested);
        let req = build_request(&local("*"), "test.arg", &arg).unwrap();
        let text = serde_json::to_string(&req).unwrap();
        let reparsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(reparsed["kwarg"]["cfg"], nested);
        let keys: Vec<&String> = reparsed["kwarg"]["cfg"].as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn missing_function_rejected() {
        let err = build_request(&local("*"), "  ", "").unwrap_err();
        assert!(matches!(err, SaltError::Configuration(_)));
    }

    #[test]
    fn hook_builds_payload_without_client() {
        let mode = ExecutionMode::Hook {
            tag: "/deploy/done/".into(),
        };
        let req = build_request(&mode, "", r#"build=42 meta='{"ok": true}'"#).unwrap();
        assert_eq!(req.endpoint(), &Endpoint::Hook("deploy/done".into()));
        assert_eq!(req.client(), None);
        assert_eq!(req.to_json(), json!({"build": "42", "meta": {"ok": true}}));
        assert_eq!(req.target_label(), "hook/deploy/done");
    }
}
