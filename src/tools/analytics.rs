//! The analytics tool functions. Each takes the filtered sales frame plus its
//! bound arguments and returns a chart-shaped payload.

use crate::chart::{Figure, JsonMap};
use crate::error::{BiError, Result};
use crate::normalizer::ToolValue;
use polars::prelude::*;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};

// ---------- KPI indicators ----------

pub fn total_revenue(df: &DataFrame, args: &JsonMap) -> Result<ToolValue> {
    let revenue_col = arg_str(args, "revenue_col", "revenue");
    require_columns(df, &[&revenue_col])?;
    let value = df.column(&revenue_col)?.sum::<f64>()?;

    let mut fig = Figure::new();
    fig.add_trace(json!({
        "type": "indicator",
        "mode": "number",
        "value": value,
        "title": {"text": "Total Revenue"},
        "number": {"prefix": "$", "valueformat": ",.2f"},
    }));
    fig.update_layout(json!({"height": 140, "margin": {"t": 10, "b": 10, "l": 10, "r": 10}}));
    Ok(ToolValue::Chart(fig.export()))
}

pub fn total_orders(df: &DataFrame, args: &JsonMap) -> Result<ToolValue> {
    let order_col = arg_str(args, "order_id_col", "order_id");
    require_columns(df, &[&order_col])?;
    let value = count_distinct(df.column(&order_col)?)?;

    let mut fig = Figure::new();
    fig.add_trace(json!({
        "type": "indicator",
        "mode": "number",
        "value": value,
        "title": {"text": "Total Orders"},
        "number": {"valueformat": ","},
    }));
    fig.update_layout(indicator_layout());
    Ok(ToolValue::Chart(fig.export()))
}

pub fn avg_aov(df: &DataFrame, args: &JsonMap) -> Result<ToolValue> {
    let aov_col = arg_str(args, "aov_col", "aov");

    let value = if has_column(df, &aov_col) && df.column(&aov_col)?.mean().is_some() {
        df.column(&aov_col)?.mean().unwrap_or(0.0)
    } else if has_column(df, "revenue") {
        let revenue = df.column("revenue")?.sum::<f64>()?;
        let orders = if has_column(df, "order_id") {
            count_distinct(df.column("order_id")?)?
        } else {
            df.height()
        };
        if orders > 0 {
            revenue / orders as f64
        } else {
            0.0
        }
    } else {
        return Err(BiError::Execution(
            "Missing columns 'aov' or 'revenue'".to_string(),
        ));
    };

    let mut fig = Figure::new();
    fig.add_trace(json!({
        "type": "indicator",
        "mode": "number",
        "value": value,
        "title": {"text": "Avg AOV"},
        "number": {"prefix": "$", "valueformat": ",.2f"},
    }));
    fig.update_layout(indicator_layout());
    Ok(ToolValue::Chart(fig.export()))
}

pub fn conversion_rate(df: &DataFrame, _args: &JsonMap) -> Result<ToolValue> {
    require_columns(df, &["opportunity_id", "stage"])?;
    let opps = df.column("opportunity_id")?.str()?;
    let stages = df.column("stage")?.str()?;

    let mut total: HashSet<&str> = HashSet::new();
    let mut closed: HashSet<&str> = HashSet::new();
    for i in 0..opps.len() {
        let Some(opp) = opps.get(i) else { continue };
        total.insert(opp);
        if let Some(stage) = stages.get(i) {
            let stage = stage.to_lowercase();
            if stage.contains("closed") || stage.contains("won") {
                closed.insert(opp);
            }
        }
    }
    let rate = if total.is_empty() {
        0.0
    } else {
        closed.len() as f64 / total.len() as f64
    };

    let mut fig = Figure::new();
    fig.add_trace(json!({
        "type": "indicator",
        "mode": "gauge+number",
        "value": rate * 100.0,
        "title": {"text": "Conversion Rate (%)"},
        "gauge": {"axis": {"range": [0, 100]}},
    }));
    fig.update_layout(json!({"height": 180, "margin": {"t": 8, "b": 8, "l": 8, "r": 8}}));
    Ok(ToolValue::Chart(fig.export()))
}

pub fn new_customers_count(df: &DataFrame, _args: &JsonMap) -> Result<ToolValue> {
    let (new, _returning) = customer_split(df)?;
    Ok(ToolValue::Chart(count_indicator(
        "New Customers (unique)",
        new,
    )))
}

pub fn returning_customers_count(df: &DataFrame, _args: &JsonMap) -> Result<ToolValue> {
    let (_new, returning) = customer_split(df)?;
    Ok(ToolValue::Chart(count_indicator(
        "Returning Customers (unique)",
        returning,
    )))
}

/// Split unique customers into (new, returning) by their first-seen flag.
fn customer_split(df: &DataFrame) -> Result<(usize, usize)> {
    require_columns(df, &["customer_id"])?;
    let customers = df.column("customer_id")?.str()?;
    let flags = if has_column(df, "is_returning") {
        Some(df.column("is_returning")?.f64()?.clone())
    } else {
        None
    };

    let mut seen: HashMap<String, f64> = HashMap::new();
    for i in 0..customers.len() {
        let Some(id) = customers.get(i) else { continue };
        let flag = flags
            .as_ref()
            .and_then(|f| f.get(i))
            .unwrap_or(0.0);
        seen.entry(id.to_string()).or_insert(flag);
    }
    let returning = seen.values().filter(|f| **f > 0.0).count();
    Ok((seen.len() - returning, returning))
}

// ---------- Time series ----------

pub fn sales_over_time(df: &DataFrame, args: &JsonMap) -> Result<ToolValue> {
    require_columns(df, &["order_date", "revenue"])?;
    let resample = arg_str(args, "resample", "month");
    let bucket = if resample == "day" {
        "order_date"
    } else {
        "order_month"
    };
    require_columns(df, &[bucket])?;

    let grouped = df
        .clone()
        .lazy()
        .filter(col(bucket).is_not_null())
        .group_by([col(bucket)])
        .agg([col("revenue").sum().alias("revenue")])
        .sort_by_exprs(vec![col(bucket)], SortMultipleOptions::default())
        .collect()?;

    let x = str_column(&grouped, bucket)?;
    let y = f64_column(&grouped, "revenue")?;

    let mut fig = Figure::new();
    fig.add_trace(json!({
        "type": "scatter",
        "mode": "lines",
        "name": "Revenue",
        "x": x,
        "y": y,
        "line": {"shape": "spline", "smoothing": 0.3},
    }));
    fig.update_layout(json!({
        "title": "Sales Over Time",
        "xaxis_title": "Date",
        "yaxis_title": "Revenue",
        "template": "plotly_white",
        "height": 480,
    }));
    // Returned as the figure itself; normalization calls the export.
    Ok(ToolValue::Exporter(Box::new(fig)))
}

pub fn aov_over_time(df: &DataFrame, _args: &JsonMap) -> Result<ToolValue> {
    require_columns(df, &["order_month", "aov"])?;

    let grouped = df
        .clone()
        .lazy()
        .filter(col("order_month").is_not_null().and(col("aov").is_not_null()))
        .group_by([col("order_month")])
        .agg([col("aov").mean().alias("aov")])
        .sort_by_exprs(vec![col("order_month")], SortMultipleOptions::default())
        .collect()?;

    let x = str_column(&grouped, "order_month")?;
    let y = f64_column(&grouped, "aov")?;

    let mut fig = Figure::new();
    fig.add_trace(json!({
        "type": "scatter",
        "mode": "lines+markers",
        "name": "AOV",
        "x": x,
        "y": y,
        "line": {"shape": "spline", "smoothing": 0.3},
    }));
    fig.update_layout(json!({
        "title": "AOV Over Time",
        "xaxis_title": "Date",
        "yaxis_title": "AOV",
        "template": "plotly_white",
        "height": 420,
    }));
    Ok(ToolValue::Chart(fig.export()))
}

// ---------- Products ----------

pub fn top_products_by_revenue(df: &DataFrame, args: &JsonMap) -> Result<ToolValue> {
    require_columns(df, &["product_name", "revenue"])?;
    let n = arg_usize(args, "n", 20);

    let grouped = group_sum(df, "product_name", "revenue")?.head(Some(n));
    let mut names = str_column(&grouped, "product_name")?;
    let mut revenues = f64_column(&grouped, "revenue")?;
    // Largest at the top of the horizontal bar.
    names.reverse();
    revenues.reverse();
    let labels: Vec<String> = revenues.iter().map(|v| money(*v)).collect();

    let mut fig = Figure::new();
    fig.add_trace(json!({
        "type": "bar",
        "orientation": "h",
        "x": revenues,
        "y": names,
        "text": labels,
        "textposition": "auto",
    }));
    fig.update_layout(json!({
        "title": format!("Top {} Products by Revenue", n),
        "xaxis_title": "Revenue",
        "yaxis_title": "Product",
        "template": "plotly_white",
        "height": 480,
    }));
    Ok(ToolValue::Chart(fig.export()))
}

pub fn pareto_product_revenue(df: &DataFrame, args: &JsonMap) -> Result<ToolValue> {
    require_columns(df, &["product_name", "revenue"])?;
    let n = arg_usize(args, "n", 50);

    let grouped = group_sum(df, "product_name", "revenue")?;
    let names = str_column(&grouped, "product_name")?;
    let revenues = f64_column(&grouped, "revenue")?;
    let total: f64 = revenues.iter().sum();

    let mut cumulative = Vec::with_capacity(revenues.len());
    let mut running = 0.0;
    for v in &revenues {
        running += v;
        cumulative.push(if total > 0.0 {
            running / total * 100.0
        } else {
            0.0
        });
    }

    let take = n.min(names.len());
    let traces = vec![
        json!({
            "type": "bar",
            "name": "Revenue",
            "x": &names[..take],
            "y": &revenues[..take],
        }),
        json!({
            "type": "scatter",
            "mode": "lines+markers",
            "name": "Cumulative %",
            "yaxis": "y2",
            "x": &names[..take],
            "y": &cumulative[..take],
        }),
    ];
    let layout = json!({
        "title": "Pareto: Product Revenue vs Cumulative %",
        "xaxis": {"tickangle": -45},
        "yaxis": {"title": "Revenue"},
        "yaxis2": {"title": "Cumulative %", "overlaying": "y", "side": "right", "range": [0, 110]},
        "template": "plotly_white",
        "height": 520,
    });

    Ok(ToolValue::Pair(
        Box::new(ToolValue::Values(traces)),
        Box::new(ToolValue::Map(layout.as_object().cloned().unwrap_or_default())),
    ))
}

pub fn units_vs_revenue_agg(df: &DataFrame, _args: &JsonMap) -> Result<ToolValue> {
    require_columns(df, &["product_name", "units", "revenue"])?;

    let grouped = df
        .clone()
        .lazy()
        .filter(col("product_name").is_not_null())
        .group_by([col("product_name")])
        .agg([
            col("units").sum().alias("units"),
            col("revenue").sum().alias("revenue"),
        ])
        .collect()?;

    let names = str_column(&grouped, "product_name")?;
    let units = f64_column(&grouped, "units")?;
    let revenues = f64_column(&grouped, "revenue")?;
    let max_revenue = revenues.iter().cloned().fold(0.0_f64, f64::max);
    let sizes: Vec<f64> = revenues
        .iter()
        .map(|v| {
            if max_revenue > 0.0 {
                (v / max_revenue * 40.0).clamp(5.0, 60.0)
            } else {
                5.0
            }
        })
        .collect();

    let mut wrapper = JsonMap::new();
    wrapper.insert(
        "traces".to_string(),
        json!([{
            "type": "scatter",
            "mode": "markers",
            "x": units,
            "y": revenues,
            "text": names,
            "marker": {"size": sizes},
        }]),
    );
    wrapper.insert(
        "layout".to_string(),
        json!({
            "title": "Units vs Revenue (bubble)",
            "xaxis_title": "Units",
            "yaxis_title": "Revenue",
            "template": "plotly_white",
            "height": 480,
        }),
    );
    Ok(ToolValue::Map(wrapper))
}

// ---------- Geography ----------

pub fn revenue_by_region(df: &DataFrame, _args: &JsonMap) -> Result<ToolValue> {
    require_columns(df, &["region", "revenue"])?;
    bar_from_group_sum(df, "region", "Revenue by Region", "Region", None)
}

pub fn revenue_by_country_top(df: &DataFrame, args: &JsonMap) -> Result<ToolValue> {
    require_columns(df, &["country", "revenue"])?;
    let n = arg_usize(args, "n", 50);
    bar_from_group_sum(df, "country", "Top Countries by Revenue", "Country", Some(n))
}

// ---------- People ----------

pub fn top_salespeople(df: &DataFrame, args: &JsonMap) -> Result<ToolValue> {
    require_columns(df, &["salesperson", "revenue"])?;
    let k = arg_usize(args, "k", 10);

    let grouped = group_sum(df, "salesperson", "revenue")?.head(Some(k));
    let mut names = str_column(&grouped, "salesperson")?;
    let mut revenues = f64_column(&grouped, "revenue")?;
    names.reverse();
    revenues.reverse();
    let labels: Vec<String> = revenues.iter().map(|v| money(*v)).collect();

    let mut fig = Figure::new();
    fig.add_trace(json!({
        "type": "bar",
        "orientation": "h",
        "x": revenues,
        "y": names,
        "text": labels,
        "textposition": "auto",
    }));
    fig.update_layout(json!({
        "title": format!("Top {} Salespeople by Revenue", k),
        "xaxis_title": "Revenue",
        "yaxis_title": "Salesperson",
        "template": "plotly_white",
        "height": 480,
    }));
    Ok(ToolValue::Chart(fig.export()))
}

pub fn leaderboard(df: &DataFrame, _args: &JsonMap) -> Result<ToolValue> {
    require_columns(df, &["salesperson", "revenue", "order_id"])?;

    let grouped = df
        .clone()
        .lazy()
        .filter(col("salesperson").is_not_null())
        .group_by([col("salesperson")])
        .agg([
            col("revenue").sum().alias("total_revenue"),
            col("order_id").n_unique().alias("total_orders"),
        ])
        .sort_by_exprs(
            vec![col("total_revenue")],
            SortMultipleOptions::default().with_order_descending(true),
        )
        .collect()?;

    let names = str_column(&grouped, "salesperson")?;
    let revenues: Vec<String> = f64_column(&grouped, "total_revenue")?
        .iter()
        .map(|v| money(*v))
        .collect();
    let orders = grouped.column("total_orders")?.cast(&DataType::Int64)?;
    let orders: Vec<i64> = orders
        .i64()?
        .into_iter()
        .map(|v| v.unwrap_or(0))
        .collect();

    let mut fig = Figure::new();
    fig.add_trace(json!({
        "type": "table",
        "header": {"values": ["salesperson", "total_revenue", "total_orders"]},
        "cells": {"values": [names, revenues, orders]},
    }));
    fig.update_layout(json!({"title": "Leaderboard", "height": 600}));
    Ok(ToolValue::Chart(fig.export()))
}

// ---------- Distributions ----------

pub fn sales_cycle_histogram(df: &DataFrame, args: &JsonMap) -> Result<ToolValue> {
    require_columns(df, &["sales_cycle_days"])?;
    let nbins = arg_usize(args, "nbins", 40);

    let values: Vec<f64> = df
        .column("sales_cycle_days")?
        .f64()?
        .into_iter()
        .flatten()
        .collect();
    if values.is_empty() {
        return Err(BiError::Execution("No sales_cycle_days data".to_string()));
    }

    let mut fig = Figure::new();
    fig.add_trace(json!({
        "type": "histogram",
        "x": values,
        "nbinsx": nbins,
    }));
    fig.update_layout(json!({
        "title": "Sales Cycle Days Distribution",
        "xaxis_title": "Days",
        "yaxis_title": "Count",
        "template": "plotly_white",
        "height": 420,
    }));
    Ok(ToolValue::Chart(fig.export()))
}

// ---------- Pipeline ----------

pub fn opportunity_funnel(df: &DataFrame, _args: &JsonMap) -> Result<ToolValue> {
    require_columns(df, &["stage", "opportunity_id"])?;
    let stages = df.column("stage")?.str()?;
    let opps = df.column("opportunity_id")?.str()?;

    let mut per_stage: HashMap<String, HashSet<&str>> = HashMap::new();
    for i in 0..stages.len() {
        let (Some(stage), Some(opp)) = (stages.get(i), opps.get(i)) else {
            continue;
        };
        per_stage.entry(stage.to_string()).or_default().insert(opp);
    }
    if per_stage.is_empty() {
        return Err(BiError::Execution("No opportunity stage data".to_string()));
    }

    let mut counts: Vec<(String, usize)> = per_stage
        .into_iter()
        .map(|(stage, opps)| (stage, opps.len()))
        .collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    let stages: Vec<&String> = counts.iter().map(|(s, _)| s).collect();
    let values: Vec<usize> = counts.iter().map(|(_, c)| *c).collect();

    let mut fig = Figure::new();
    fig.add_trace(json!({
        "type": "funnel",
        "y": stages,
        "x": values,
        "textinfo": "value+percent initial",
    }));
    fig.update_layout(json!({
        "title": "Opportunity Funnel",
        "template": "plotly_white",
        "height": 420,
    }));
    Ok(ToolValue::Chart(fig.export()))
}

pub fn pipeline_table(df: &DataFrame, _args: &JsonMap) -> Result<ToolValue> {
    require_columns(df, &["opportunity_id"])?;

    let agg = df
        .clone()
        .lazy()
        .filter(col("opportunity_id").is_not_null())
        .group_by([col("opportunity_id")])
        .agg([
            col("stage").last().alias("stage"),
            col("lead_date").min().alias("lead_date"),
            col("close_date").min().alias("close_date"),
            col("revenue").sum().alias("revenue"),
        ])
        .sort_by_exprs(vec![col("opportunity_id")], SortMultipleOptions::default())
        .collect()?;

    // Tabular return; the normalizer renders it as a table chart.
    Ok(ToolValue::Frame(agg))
}

// ---------- Helpers ----------

fn indicator_layout() -> Value {
    json!({"height": 120, "margin": {"t": 8, "b": 8, "l": 8, "r": 8}})
}

fn count_indicator(title: &str, value: usize) -> crate::chart::ChartObject {
    let mut fig = Figure::new();
    fig.add_trace(json!({
        "type": "indicator",
        "mode": "number",
        "value": value,
        "title": {"text": title},
        "number": {"valueformat": ","},
    }));
    fig.update_layout(indicator_layout());
    fig.export()
}

fn bar_from_group_sum(
    df: &DataFrame,
    by: &str,
    title: &str,
    axis_title: &str,
    limit: Option<usize>,
) -> Result<ToolValue> {
    let mut grouped = group_sum(df, by, "revenue")?;
    if let Some(limit) = limit {
        grouped = grouped.head(Some(limit));
    }
    let names = str_column(&grouped, by)?;
    let revenues = f64_column(&grouped, "revenue")?;
    let labels: Vec<String> = revenues.iter().map(|v| money(*v)).collect();

    let mut fig = Figure::new();
    fig.add_trace(json!({
        "type": "bar",
        "x": names,
        "y": revenues,
        "text": labels,
        "textposition": "auto",
    }));
    fig.update_layout(json!({
        "title": title,
        "xaxis_title": axis_title,
        "yaxis_title": "Revenue",
        "xaxis": {"tickangle": -45},
        "template": "plotly_white",
        "height": 420,
    }));
    Ok(ToolValue::Chart(fig.export()))
}

fn group_sum(df: &DataFrame, by: &str, value: &str) -> Result<DataFrame> {
    Ok(df
        .clone()
        .lazy()
        .filter(col(by).is_not_null())
        .group_by([col(by)])
        .agg([col(value).sum().alias(value)])
        .sort_by_exprs(
            vec![col(value)],
            SortMultipleOptions::default().with_order_descending(true),
        )
        .collect()?)
}

fn require_columns(df: &DataFrame, columns: &[&str]) -> Result<()> {
    for column in columns {
        if !has_column(df, column) {
            return Err(BiError::Execution(format!("Missing column '{}'", column)));
        }
    }
    Ok(())
}

fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_names().iter().any(|c| *c == name)
}

/// Distinct non-null values in a column.
fn count_distinct(series: &Series) -> Result<usize> {
    let mut unique = series.n_unique()?;
    if series.null_count() > 0 {
        unique -= 1;
    }
    Ok(unique)
}

fn str_column(df: &DataFrame, name: &str) -> Result<Vec<String>> {
    let ca = df.column(name)?.str()?;
    Ok((0..ca.len())
        .map(|i| ca.get(i).unwrap_or("Unknown").to_string())
        .collect())
}

fn f64_column(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let series = df.column(name)?.cast(&DataType::Float64)?;
    Ok(series
        .f64()?
        .into_iter()
        .map(|v| v.unwrap_or(0.0))
        .collect())
}

fn arg_str(args: &JsonMap, key: &str, default: &str) -> String {
    args.get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

fn arg_usize(args: &JsonMap, key: &str, default: usize) -> usize {
    args.get(key)
        .and_then(Value::as_u64)
        .map(|v| v as usize)
        .unwrap_or(default)
}

fn money(value: f64) -> String {
    let rounded = value.round() as i64;
    let digits = rounded.abs().to_string();
    let mut grouped = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    if rounded < 0 {
        format!("$-{}", grouped)
    } else {
        format!("${}", grouped)
    }
}
