//! Execution engine: invokes planned tools against the data provider, with
//! best-effort argument binding and per-tool failure isolation.

use crate::chart::{ChartObject, JsonMap};
use crate::error::Result;
use crate::normalizer::{normalize, Normalized};
use crate::tools::{Tool, ToolRegistry};
use polars::prelude::DataFrame;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

/// Default for pagination-style parameters (`n`, `k`) when a tool declares
/// them and the caller did not supply a value.
const DEFAULT_PAGE_SIZE: u64 = 10;
const PAGINATION_PARAMS: [&str; 2] = ["n", "k"];

/// One entry per tool invocation that did not yield a normalizable result.
#[derive(Debug, Clone, Serialize)]
pub struct DebugEntry {
    pub tool: String,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_type: Option<String>,
}

impl DebugEntry {
    fn new(tool: &str, error: impl Into<String>) -> Self {
        Self {
            tool: tool.to_string(),
            error: error.into(),
            raw_type: None,
        }
    }
}

/// Ordered results plus the parallel failure log of one `run` call.
#[derive(Debug, Default)]
pub struct RunOutcome {
    pub results: Vec<ChartObject>,
    pub debug: Vec<DebugEntry>,
}

pub struct ExecutionEngine {
    registry: Arc<ToolRegistry>,
}

impl ExecutionEngine {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// Run each named tool in order. Tool-level failures are recorded and
    /// never abort the batch or escape to the caller.
    pub fn run<F>(&self, tool_names: &[String], data_provider: F, tool_args: &JsonMap) -> RunOutcome
    where
        F: Fn(&str) -> Result<DataFrame>,
    {
        let mut outcome = RunOutcome::default();

        for name in tool_names {
            let Some(tool) = self.registry.get(name) else {
                outcome.debug.push(DebugEntry::new(name, "not_found"));
                continue;
            };

            let df = match data_provider(name) {
                Ok(df) => df,
                Err(e) => {
                    outcome
                        .debug
                        .push(DebugEntry::new(name, format!("dataframe_load_failed: {}", e)));
                    continue;
                }
            };

            let bound = bind_args(tool, tool_args);
            debug!("Invoking tool '{}' with args {:?}", name, bound);

            let raw = match (tool.func)(&df, &bound) {
                Ok(value) => value,
                Err(e) => {
                    outcome
                        .debug
                        .push(DebugEntry::new(name, format!("exception: {}", e)));
                    continue;
                }
            };

            match normalize(&raw) {
                Normalized::One(chart) => outcome.results.push(chart),
                Normalized::Many(charts) if !charts.is_empty() => {
                    outcome.results.extend(charts);
                }
                _ => {
                    warn!("Tool '{}' returned an unrecognized shape", name);
                    outcome.debug.push(DebugEntry {
                        tool: name.clone(),
                        error: "unexpected_return_type".to_string(),
                        raw_type: Some(raw.kind().to_string()),
                    });
                }
            }
        }

        outcome
    }
}

/// Bind caller arguments against the tool's declared parameter schema:
/// unknown keys are dropped, pagination params default to 10, and declared
/// defaults fill anything still unbound.
fn bind_args(tool: &Tool, tool_args: &JsonMap) -> JsonMap {
    let mut bound = JsonMap::new();
    for param in &tool.params {
        if let Some(value) = tool_args.get(&param.name) {
            bound.insert(param.name.clone(), value.clone());
        } else if PAGINATION_PARAMS.contains(&param.name.as_str()) {
            bound.insert(param.name.clone(), json!(DEFAULT_PAGE_SIZE));
        } else if let Some(default) = &param.default {
            bound.insert(param.name.clone(), default.clone());
        }
    }
    bound
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BiError;
    use crate::normalizer::ToolValue;
    use crate::tools::{Tool, ToolMetadata, ToolParam};
    use polars::prelude::*;
    use serde_json::Value;

    fn ok_tool(_df: &DataFrame, _args: &JsonMap) -> Result<ToolValue> {
        Ok(ToolValue::Chart(ChartObject::empty()))
    }

    fn failing_tool(_df: &DataFrame, _args: &JsonMap) -> Result<ToolValue> {
        Err(BiError::Execution("boom".to_string()))
    }

    fn silent_tool(_df: &DataFrame, _args: &JsonMap) -> Result<ToolValue> {
        Ok(ToolValue::Null)
    }

    fn echo_args_tool(_df: &DataFrame, args: &JsonMap) -> Result<ToolValue> {
        let mut chart = ChartObject::empty();
        chart.layout = args.clone();
        Ok(ToolValue::Chart(chart))
    }

    fn test_registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(Tool {
            name: "ok".to_string(),
            doc: String::new(),
            metadata: ToolMetadata::default(),
            params: Vec::new(),
            func: ok_tool,
        });
        registry.register(Tool {
            name: "failing".to_string(),
            doc: String::new(),
            metadata: ToolMetadata::default(),
            params: Vec::new(),
            func: failing_tool,
        });
        registry.register(Tool {
            name: "silent".to_string(),
            doc: String::new(),
            metadata: ToolMetadata::default(),
            params: Vec::new(),
            func: silent_tool,
        });
        registry.register(Tool {
            name: "echo".to_string(),
            doc: String::new(),
            metadata: ToolMetadata::default(),
            params: vec![
                ToolParam::new("n"),
                ToolParam::new("regions"),
                ToolParam::with_default("mode", Value::String("fast".to_string())),
            ],
            func: echo_args_tool,
        });
        Arc::new(registry)
    }

    fn provider(_tool: &str) -> Result<DataFrame> {
        Ok(df!["x" => [1]].unwrap())
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_unknown_tool_records_not_found() {
        let engine = ExecutionEngine::new(test_registry());
        let outcome = engine.run(&names(&["missing"]), provider, &JsonMap::new());

        assert!(outcome.results.is_empty());
        assert_eq!(outcome.debug.len(), 1);
        assert_eq!(outcome.debug[0].tool, "missing");
        assert_eq!(outcome.debug[0].error, "not_found");
    }

    #[test]
    fn test_data_provider_failure_is_tool_local() {
        let engine = ExecutionEngine::new(test_registry());
        let failing_provider =
            |_tool: &str| -> Result<DataFrame> { Err(BiError::Data("no dataset".to_string())) };
        let outcome = engine.run(&names(&["ok"]), failing_provider, &JsonMap::new());

        assert!(outcome.results.is_empty());
        assert!(outcome.debug[0]
            .error
            .starts_with("dataframe_load_failed:"));
    }

    #[test]
    fn test_tool_exception_does_not_abort_batch() {
        let engine = ExecutionEngine::new(test_registry());
        let outcome = engine.run(&names(&["failing", "ok"]), provider, &JsonMap::new());

        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.debug.len(), 1);
        assert!(outcome.debug[0].error.starts_with("exception:"));
        assert!(outcome.debug[0].error.contains("boom"));
    }

    #[test]
    fn test_unexpected_return_type() {
        let engine = ExecutionEngine::new(test_registry());
        let outcome = engine.run(&names(&["silent"]), provider, &JsonMap::new());

        assert!(outcome.results.is_empty());
        assert_eq!(outcome.debug[0].error, "unexpected_return_type");
        assert_eq!(outcome.debug[0].raw_type.as_deref(), Some("null"));
    }

    #[test]
    fn test_argument_binding() {
        let engine = ExecutionEngine::new(test_registry());
        let mut args = JsonMap::new();
        args.insert("regions".to_string(), json!(["East"]));
        args.insert("unrelated".to_string(), json!(true));

        let outcome = engine.run(&names(&["echo"]), provider, &args);
        let bound = &outcome.results[0].layout;

        // Declared keys only; n injected; declared default applied.
        assert_eq!(bound.get("regions"), Some(&json!(["East"])));
        assert_eq!(bound.get("n"), Some(&json!(10)));
        assert_eq!(bound.get("mode"), Some(&json!("fast")));
        assert!(!bound.contains_key("unrelated"));
    }

    #[test]
    fn test_order_preserved() {
        let engine = ExecutionEngine::new(test_registry());
        let outcome = engine.run(
            &names(&["ok", "missing", "echo", "failing"]),
            provider,
            &JsonMap::new(),
        );

        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.debug.len(), 2);
        assert_eq!(outcome.debug[0].tool, "missing");
        assert_eq!(outcome.debug[1].tool, "failing");
    }
}
