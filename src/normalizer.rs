//! Result normalization: reduce the finite set of raw tool return shapes to
//! the canonical chart object.

use crate::chart::{frame_to_table_chart, ChartExport, ChartObject, JsonMap};
use polars::prelude::DataFrame;
use serde_json::Value;
use std::fmt;
use std::path::Path;

const WRAPPER_KEYS: [&str; 4] = ["figure", "plot", "payload", "plotly"];

/// Every shape a tool is allowed to return. One variant per producer
/// convention; `normalize` is the single consumer.
pub enum ToolValue {
    /// Already canonical.
    Chart(ChartObject),
    /// Several canonical charts from one invocation.
    Charts(Vec<ChartObject>),
    /// JSON mapping: pass-through, wrapper-keyed, `results`, or `traces`.
    Map(JsonMap),
    /// Object exposing a zero-argument chart export.
    Exporter(Box<dyn ChartExport>),
    /// 2-tuple, typically (traces, layout).
    Pair(Box<ToolValue>, Box<ToolValue>),
    /// Untyped JSON list.
    Values(Vec<Value>),
    /// JSON text or a path to a `.json` file.
    Text(String),
    /// Tabular fallback, rendered as a table chart.
    Frame(DataFrame),
    /// Nothing; also models the absent half of a pair.
    Null,
}

impl ToolValue {
    pub fn kind(&self) -> &'static str {
        match self {
            ToolValue::Chart(_) => "chart",
            ToolValue::Charts(_) => "chart_list",
            ToolValue::Map(_) => "map",
            ToolValue::Exporter(_) => "exporter",
            ToolValue::Pair(_, _) => "pair",
            ToolValue::Values(_) => "list",
            ToolValue::Text(_) => "text",
            ToolValue::Frame(_) => "frame",
            ToolValue::Null => "null",
        }
    }
}

impl fmt::Debug for ToolValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ToolValue::{}", self.kind())
    }
}

/// Outcome of normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    One(ChartObject),
    Many(Vec<ChartObject>),
    Unmatched,
}

impl Normalized {
    pub fn is_unmatched(&self) -> bool {
        matches!(self, Normalized::Unmatched)
    }
}

/// Reduce a raw tool return value to canonical chart objects, or signal "no
/// match". First matching rule wins; a rule that fails falls through to the
/// next. Recursion depth is bounded by the wrapper nesting of the input.
pub fn normalize(value: &ToolValue) -> Normalized {
    match value {
        ToolValue::Chart(chart) => Normalized::One(chart.clone()),
        ToolValue::Charts(charts) => Normalized::Many(charts.clone()),
        ToolValue::Exporter(exporter) => match exporter.to_chart_json() {
            Ok(chart) => Normalized::One(chart),
            Err(_) => Normalized::Unmatched,
        },
        ToolValue::Map(map) => option_to_normalized(normalize_map(map)),
        ToolValue::Pair(first, second) => normalize_pair(first, second),
        ToolValue::Values(items) => option_to_normalized(normalize_list(items)),
        ToolValue::Text(text) => option_to_normalized(normalize_text(text)),
        ToolValue::Frame(df) => Normalized::One(frame_to_table_chart(df, "Table")),
        ToolValue::Null => Normalized::Unmatched,
    }
}

fn option_to_normalized(chart: Option<ChartObject>) -> Normalized {
    match chart {
        Some(chart) => Normalized::One(chart),
        None => Normalized::Unmatched,
    }
}

fn normalize_map(map: &JsonMap) -> Option<ChartObject> {
    // Pass-through figure mappings.
    if map.contains_key("data") {
        if let Some(chart) = ChartObject::from_value(&Value::Object(map.clone())) {
            return Some(chart);
        }
    }

    // Common wrapper keys.
    for key in WRAPPER_KEYS {
        if let Some(inner) = map.get(key) {
            if let Some(chart) = normalize_json(inner) {
                return Some(chart);
            }
        }
    }

    if let Some(Value::Array(items)) = map.get("results") {
        if let Some(chart) = items.iter().find_map(normalize_json) {
            return Some(chart);
        }
    }

    if let Some(Value::Array(traces)) = map.get("traces") {
        let layout = map
            .get("layout")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        return Some(ChartObject::new(traces.clone(), layout));
    }

    None
}

fn normalize_pair(first: &ToolValue, second: &ToolValue) -> Normalized {
    if let ToolValue::Values(items) = first {
        match second {
            ToolValue::Map(layout) => {
                return Normalized::One(ChartObject::new(items.clone(), layout.clone()));
            }
            ToolValue::Null => {
                return Normalized::One(ChartObject::new(items.clone(), JsonMap::new()));
            }
            _ => {}
        }
    }

    let normalized = normalize(first);
    if !normalized.is_unmatched() {
        return normalized;
    }
    normalize(second)
}

fn normalize_list(items: &[Value]) -> Option<ChartObject> {
    if items.is_empty() {
        return Some(ChartObject::empty());
    }

    if let Some(obj) = items[0].as_object() {
        if obj.contains_key("data") {
            if let Some(chart) = ChartObject::from_value(&items[0]) {
                return Some(chart);
            }
        }
        // List of trace mappings: the whole list is the data.
        return Some(ChartObject::new(items.to_vec(), JsonMap::new()));
    }

    items.iter().find_map(normalize_json)
}

fn normalize_text(text: &str) -> Option<ChartObject> {
    if text.to_lowercase().ends_with(".json") && Path::new(text).exists() {
        if let Ok(raw) = std::fs::read_to_string(text) {
            if let Ok(parsed) = serde_json::from_str::<Value>(&raw) {
                if let Some(chart) = ChartObject::from_value(&parsed) {
                    return Some(chart);
                }
            }
        }
    }

    let parsed: Value = serde_json::from_str(text).ok()?;
    if let Some(chart) = ChartObject::from_value(&parsed) {
        return Some(chart);
    }
    if let Some(Value::Array(items)) = parsed.get("results") {
        return items.iter().find_map(normalize_json);
    }
    None
}

fn normalize_json(value: &Value) -> Option<ChartObject> {
    match value {
        Value::Object(map) => normalize_map(map),
        Value::Array(items) => normalize_list(items),
        Value::String(text) => normalize_text(text),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::Figure;
    use crate::error::{BiError, Result};
    use serde_json::json;

    fn map_of(v: Value) -> JsonMap {
        v.as_object().unwrap().clone()
    }

    fn chart_of(v: Value) -> ChartObject {
        ChartObject::from_value(&v).unwrap()
    }

    #[test]
    fn test_pass_through_identity() {
        let chart = chart_of(json!({"data": [], "layout": {}}));
        let normalized = normalize(&ToolValue::Chart(chart.clone()));
        assert_eq!(normalized, Normalized::One(chart));
    }

    #[test]
    fn test_map_with_data_preserves_extra_keys() {
        let value = json!({"data": [{"type": "bar"}], "layout": {"title": "T"}, "meta": 7});
        let normalized = normalize(&ToolValue::Map(map_of(value.clone())));
        match normalized {
            Normalized::One(chart) => assert_eq!(chart.to_value(), value),
            other => panic!("expected One, got {:?}", other),
        }
    }

    #[test]
    fn test_idempotence() {
        let value = json!({"data": [{"type": "bar"}], "layout": {"title": "T"}});
        let first = match normalize(&ToolValue::Map(map_of(value))) {
            Normalized::One(chart) => chart,
            other => panic!("expected One, got {:?}", other),
        };
        let second = normalize(&ToolValue::Chart(first.clone()));
        assert_eq!(second, Normalized::One(first));
    }

    #[test]
    fn test_exporter() {
        let mut fig = Figure::new();
        fig.add_trace(json!({"type": "bar"}));
        let normalized = normalize(&ToolValue::Exporter(Box::new(fig)));
        match normalized {
            Normalized::One(chart) => assert_eq!(chart.data.len(), 1),
            other => panic!("expected One, got {:?}", other),
        }
    }

    struct BrokenExporter;

    impl ChartExport for BrokenExporter {
        fn to_chart_json(&self) -> Result<ChartObject> {
            Err(BiError::Execution("export failed".to_string()))
        }
    }

    #[test]
    fn test_failing_exporter_is_unmatched() {
        let normalized = normalize(&ToolValue::Exporter(Box::new(BrokenExporter)));
        assert!(normalized.is_unmatched());
    }

    #[test]
    fn test_wrapper_keys() {
        let wrapped = map_of(json!({"figure": {"data": [{"type": "bar"}]}}));
        assert!(!normalize(&ToolValue::Map(wrapped)).is_unmatched());

        let as_string = map_of(json!({"payload": "{\"data\": [], \"layout\": {}}"}));
        assert!(!normalize(&ToolValue::Map(as_string)).is_unmatched());

        let junk = map_of(json!({"plot": 42}));
        assert!(normalize(&ToolValue::Map(junk)).is_unmatched());
    }

    #[test]
    fn test_results_key_takes_first_valid() {
        let value = map_of(json!({"results": [17, {"data": [{"type": "bar"}]}]}));
        match normalize(&ToolValue::Map(value)) {
            Normalized::One(chart) => assert_eq!(chart.data.len(), 1),
            other => panic!("expected One, got {:?}", other),
        }
    }

    #[test]
    fn test_traces_key() {
        let value = map_of(json!({"traces": [{"type": "bar"}], "layout": {"title": "T"}}));
        match normalize(&ToolValue::Map(value)) {
            Normalized::One(chart) => {
                assert_eq!(chart.data, vec![json!({"type": "bar"})]);
                assert_eq!(chart.layout.get("title"), Some(&json!("T")));
            }
            other => panic!("expected One, got {:?}", other),
        }
    }

    #[test]
    fn test_pair_of_traces_and_layout() {
        let traces = vec![json!({"type": "bar"})];
        let layout = map_of(json!({"title": "T"}));
        let pair = ToolValue::Pair(
            Box::new(ToolValue::Values(traces.clone())),
            Box::new(ToolValue::Map(layout.clone())),
        );
        assert_eq!(
            normalize(&pair),
            Normalized::One(ChartObject::new(traces.clone(), layout))
        );

        let absent = ToolValue::Pair(
            Box::new(ToolValue::Values(traces.clone())),
            Box::new(ToolValue::Null),
        );
        assert_eq!(
            normalize(&absent),
            Normalized::One(ChartObject::new(traces, JsonMap::new()))
        );
    }

    #[test]
    fn test_pair_falls_back_to_elementwise() {
        let chart = json!({"data": [{"type": "bar"}]});
        let pair = ToolValue::Pair(
            Box::new(ToolValue::Null),
            Box::new(ToolValue::Map(map_of(chart))),
        );
        assert!(!normalize(&pair).is_unmatched());
    }

    #[test]
    fn test_empty_list() {
        assert_eq!(
            normalize(&ToolValue::Values(Vec::new())),
            Normalized::One(ChartObject::empty())
        );
    }

    #[test]
    fn test_list_first_element_rules() {
        // First element already a figure mapping: return it alone.
        let items = vec![json!({"data": [], "layout": {}}), json!({"ignored": true})];
        match normalize(&ToolValue::Values(items)) {
            Normalized::One(chart) => assert!(chart.data.is_empty()),
            other => panic!("expected One, got {:?}", other),
        }

        // List of plain trace mappings: wrap the whole list.
        let traces = vec![json!({"type": "bar"}), json!({"type": "scatter"})];
        match normalize(&ToolValue::Values(traces.clone())) {
            Normalized::One(chart) => assert_eq!(chart.data, traces),
            other => panic!("expected One, got {:?}", other),
        }

        // Otherwise recurse element-wise.
        let nested = vec![json!(1), json!("{\"data\": [], \"layout\": {}}")];
        assert!(!normalize(&ToolValue::Values(nested)).is_unmatched());
    }

    #[test]
    fn test_text_json_and_file_path() {
        let inline = ToolValue::Text("{\"data\": [], \"layout\": {}}".to_string());
        assert!(!normalize(&inline).is_unmatched());

        let with_results =
            ToolValue::Text("{\"results\": [{\"data\": [], \"layout\": {}}]}".to_string());
        assert!(!normalize(&with_results).is_unmatched());

        let path = std::env::temp_dir().join("normalizer_test_chart.json");
        std::fs::write(&path, "{\"data\": [{\"type\": \"bar\"}], \"layout\": {}}").unwrap();
        let from_file = ToolValue::Text(path.to_string_lossy().to_string());
        assert!(!normalize(&from_file).is_unmatched());
        std::fs::remove_file(&path).ok();

        let garbage = ToolValue::Text("not json at all".to_string());
        assert!(normalize(&garbage).is_unmatched());
    }

    #[test]
    fn test_frame_fallback() {
        let df = polars::prelude::df!["a" => [1, 2], "b" => ["x", "y"]].unwrap();
        match normalize(&ToolValue::Frame(df)) {
            Normalized::One(chart) => {
                assert_eq!(chart.data[0]["type"], json!("table"));
                assert_eq!(chart.layout.get("title"), Some(&json!("Table")));
            }
            other => panic!("expected One, got {:?}", other),
        }
    }

    #[test]
    fn test_no_match() {
        assert!(normalize(&ToolValue::Null).is_unmatched());
        assert!(normalize(&ToolValue::Map(JsonMap::new())).is_unmatched());
    }
}
