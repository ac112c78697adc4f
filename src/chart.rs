//! Canonical chart payload shared between the tools and the presentation layer.

use crate::error::Result;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub type JsonMap = serde_json::Map<String, Value>;

/// The one shape the frontend understands: an ordered list of traces plus a
/// layout mapping. Anything without a `data` key is not a chart object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartObject {
    pub data: Vec<Value>,

    #[serde(default)]
    pub layout: JsonMap,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<JsonMap>,

    /// Producer-specific keys are carried through untouched.
    #[serde(flatten)]
    pub extra: JsonMap,
}

impl ChartObject {
    pub fn new(data: Vec<Value>, layout: JsonMap) -> Self {
        Self {
            data,
            layout,
            config: None,
            extra: JsonMap::new(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), JsonMap::new())
    }

    /// Parse a JSON value as a chart object. Requires a `data` key holding an
    /// array; `layout` defaults to an empty mapping.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        if !obj.get("data").map(Value::is_array).unwrap_or(false) {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Zero-argument chart-export capability, for producers that hold a figure
/// object rather than its serialized form.
pub trait ChartExport: Send + Sync {
    fn to_chart_json(&self) -> Result<ChartObject>;
}

/// Incremental figure builder used by the analytics tools.
#[derive(Debug, Clone, Default)]
pub struct Figure {
    traces: Vec<Value>,
    layout: JsonMap,
}

impl Figure {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_trace(&mut self, trace: Value) -> &mut Self {
        self.traces.push(trace);
        self
    }

    /// Merge the top-level keys of `patch` into the layout.
    pub fn update_layout(&mut self, patch: Value) -> &mut Self {
        if let Value::Object(map) = patch {
            for (k, v) in map {
                self.layout.insert(k, v);
            }
        }
        self
    }

    pub fn export(&self) -> ChartObject {
        ChartObject::new(self.traces.clone(), self.layout.clone())
    }
}

impl ChartExport for Figure {
    fn to_chart_json(&self) -> Result<ChartObject> {
        Ok(self.export())
    }
}

/// Render a DataFrame as a single-trace "table" chart.
pub fn frame_to_table_chart(df: &DataFrame, title: &str) -> ChartObject {
    let headers: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();
    let cells: Vec<Vec<Value>> = df.get_columns().iter().map(series_to_values).collect();

    let mut fig = Figure::new();
    fig.add_trace(json!({
        "type": "table",
        "header": {"values": headers},
        "cells": {"values": cells},
    }));
    fig.update_layout(json!({"title": title, "height": 600}));
    fig.export()
}

/// Convert a Series to JSON values, one per row.
pub fn series_to_values(series: &Series) -> Vec<Value> {
    (0..series.len())
        .map(|i| match series.get(i) {
            Ok(av) => any_value_to_json(av),
            Err(_) => Value::Null,
        })
        .collect()
}

pub fn any_value_to_json(av: AnyValue) -> Value {
    match av {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::Bool(b),
        AnyValue::String(s) => Value::String(s.to_string()),
        AnyValue::StringOwned(s) => Value::String(s.to_string()),
        AnyValue::Int8(v) => json!(v),
        AnyValue::Int16(v) => json!(v),
        AnyValue::Int32(v) => json!(v),
        AnyValue::Int64(v) => json!(v),
        AnyValue::UInt8(v) => json!(v),
        AnyValue::UInt16(v) => json!(v),
        AnyValue::UInt32(v) => json!(v),
        AnyValue::UInt64(v) => json!(v),
        AnyValue::Float32(v) => float_to_json(v as f64),
        AnyValue::Float64(v) => float_to_json(v),
        other => Value::String(other.to_string()),
    }
}

fn float_to_json(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_value_requires_data_array() {
        let ok = json!({"data": [], "layout": {}});
        assert!(ChartObject::from_value(&ok).is_some());

        let missing = json!({"layout": {}});
        assert!(ChartObject::from_value(&missing).is_none());

        let not_array = json!({"data": "oops"});
        assert!(ChartObject::from_value(&not_array).is_none());
    }

    #[test]
    fn test_layout_defaults_to_empty() {
        let chart = ChartObject::from_value(&json!({"data": [{"type": "bar"}]})).unwrap();
        assert!(chart.layout.is_empty());
    }

    #[test]
    fn test_figure_export_round_trip() {
        let mut fig = Figure::new();
        fig.add_trace(json!({"type": "bar", "x": [1, 2], "y": [3, 4]}));
        fig.update_layout(json!({"title": "Demo"}));

        let chart = fig.export();
        assert_eq!(chart.data.len(), 1);
        assert_eq!(chart.layout.get("title"), Some(&json!("Demo")));
    }

    #[test]
    fn test_frame_to_table_chart() {
        let df = df!["region" => ["East", "West"], "revenue" => [10.0, 20.0]].unwrap();
        let chart = frame_to_table_chart(&df, "Table");

        assert_eq!(chart.data.len(), 1);
        assert_eq!(
            chart.data[0]["header"]["values"],
            json!(["region", "revenue"])
        );
        assert_eq!(chart.data[0]["cells"]["values"][1], json!([10.0, 20.0]));
        assert_eq!(chart.layout.get("title"), Some(&json!("Table")));
    }
}
