//! Data provider: loads the sales CSV, normalizes it, and applies filters.
//!
//! Dates are kept as ISO `YYYY-MM-DD` strings throughout; range filtering and
//! the returning-customer derivation rely on their lexicographic order.

use crate::config::Config;
use crate::error::{BiError, Result};
use crate::filters::QueryFilters;
use chrono::NaiveDate;
use polars::prelude::*;
use std::path::Path;
use tracing::{debug, info};

/// Columns the analytics tools may reference. Missing ones are created as
/// all-null so tool-level checks stay uniform.
const EXPECTED_COLUMNS: [&str; 19] = [
    "order_date",
    "first_purchase_date",
    "lead_date",
    "close_date",
    "order_id",
    "customer_id",
    "opportunity_id",
    "product_name",
    "category",
    "salesperson",
    "region",
    "country",
    "city",
    "channel",
    "stage",
    "units",
    "revenue",
    "aov",
    "sales_cycle_days",
];

const NUMERIC_COLUMNS: [&str; 5] = ["units", "revenue", "aov", "sales_cycle_days", "is_returning"];

/// Load the configured dataset for one tool invocation.
///
/// Every tool currently shares the same filtered sales frame; `tool_name` is
/// only used for logging.
pub fn load_dataframe_for_tool(
    config: &Config,
    tool_name: &str,
    filters: &QueryFilters,
) -> Result<DataFrame> {
    debug!("Loading dataframe for tool '{}'", tool_name);
    load_frame(config, filters).map_err(|e| {
        BiError::Data(format!(
            "Failed to load dataframe for tool {}: {}",
            tool_name, e
        ))
    })
}

/// Load, preprocess, and filter the configured CSV.
pub fn load_frame(config: &Config, filters: &QueryFilters) -> Result<DataFrame> {
    let df = read_csv(&config.data_path)?;
    let df = preprocess(df)?;
    apply_filters(df, filters)
}

fn read_csv(path: &Path) -> Result<DataFrame> {
    if !path.exists() {
        return Err(BiError::Data(format!(
            "Dataset not found: {}",
            path.display()
        )));
    }
    let df = LazyCsvReader::new(path)
        .with_has_header(true)
        .finish()
        .map_err(|e| BiError::Data(format!("Failed to read CSV {}: {}", path.display(), e)))?
        .collect()?;
    info!(
        "Loaded dataset: {} rows, {} columns",
        df.height(),
        df.width()
    );
    Ok(df)
}

/// Normalize column names, guarantee expected columns, coerce numerics, and
/// derive the helper columns the tools rely on.
pub fn preprocess(mut df: DataFrame) -> Result<DataFrame> {
    let names: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|c| c.trim().to_lowercase())
        .collect();
    df.set_column_names(&names)?;

    for name in EXPECTED_COLUMNS {
        ensure_column(&mut df, name)?;
    }
    ensure_column(&mut df, "is_returning")?;

    let mut df = df
        .lazy()
        .with_columns(
            NUMERIC_COLUMNS
                .iter()
                .map(|c| col(c).cast(DataType::Float64))
                .collect::<Vec<_>>(),
        )
        .collect()?;

    if all_null(&df, "aov")? {
        df = df
            .lazy()
            .with_columns([when(col("units").gt(lit(0.0)))
                .then(col("revenue") / col("units"))
                .otherwise(lit(Null {}))
                .alias("aov")])
            .collect()?;
    }

    if all_null(&df, "sales_cycle_days")? {
        let days: Vec<Option<f64>> = {
            let lead = df.column("lead_date")?.str()?;
            let close = df.column("close_date")?.str()?;
            (0..lead.len())
                .map(|i| {
                    let lead_day = lead.get(i).and_then(parse_iso_date);
                    let close_day = close.get(i).and_then(parse_iso_date);
                    match (lead_day, close_day) {
                        (Some(l), Some(c)) => Some((c - l).num_days() as f64),
                        _ => None,
                    }
                })
                .collect()
        };
        df.with_column(Series::new("sales_cycle_days", days))?;
    }

    if all_null(&df, "is_returning")? {
        df = df
            .lazy()
            .with_columns([when(
                col("first_purchase_date")
                    .is_not_null()
                    .and(col("order_date").is_not_null())
                    .and(col("first_purchase_date").lt(col("order_date"))),
            )
            .then(lit(1.0))
            .otherwise(lit(0.0))
            .alias("is_returning")])
            .collect()?;
    }

    let months: Vec<Option<String>> = {
        let dates = df.column("order_date")?.str()?;
        (0..dates.len())
            .map(|i| {
                dates
                    .get(i)
                    .and_then(|d| d.get(..7))
                    .map(str::to_string)
            })
            .collect()
    };
    df.with_column(Series::new("order_month", months))?;

    Ok(df)
}

/// Filter by date range and the optional region/rep/category lists. The
/// `"All"` sentinel (or an empty list) leaves a dimension unrestricted.
pub fn apply_filters(df: DataFrame, filters: &QueryFilters) -> Result<DataFrame> {
    let mut lazy = df.lazy();

    if let Some(from) = filters.date_from {
        lazy = lazy.filter(col("order_date").gt_eq(lit(from.format("%Y-%m-%d").to_string())));
    }
    if let Some(to) = filters.date_to {
        lazy = lazy.filter(col("order_date").lt_eq(lit(to.format("%Y-%m-%d").to_string())));
    }
    if QueryFilters::restricts(&filters.regions) {
        lazy = lazy.filter(membership_expr("region", &filters.regions));
    }
    if QueryFilters::restricts(&filters.reps) {
        lazy = lazy.filter(membership_expr("salesperson", &filters.reps));
    }
    if QueryFilters::restricts(&filters.categories) {
        lazy = lazy.filter(membership_expr("category", &filters.categories));
    }

    Ok(lazy.collect()?)
}

fn membership_expr(column: &str, values: &[String]) -> Expr {
    values
        .iter()
        .map(|v| col(column).eq(lit(v.clone())))
        .reduce(|a, b| a.or(b))
        .unwrap_or_else(|| lit(false))
}

fn ensure_column(df: &mut DataFrame, name: &str) -> Result<()> {
    if df.get_column_names().iter().any(|c| *c == name) {
        return Ok(());
    }
    let series = Series::full_null(name, df.height(), &DataType::String);
    df.with_column(series)?;
    Ok(())
}

fn all_null(df: &DataFrame, name: &str) -> Result<bool> {
    let column = df.column(name)?;
    Ok(column.null_count() == column.len())
}

fn parse_iso_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> DataFrame {
        df![
            "order_date" => ["2025-01-05", "2025-02-10", "2025-03-15"],
            "first_purchase_date" => ["2024-12-01", "2025-02-10", "2025-01-01"],
            "order_id" => ["O1", "O2", "O3"],
            "customer_id" => ["C1", "C2", "C1"],
            "product_name" => ["Widget", "Gadget", "Widget"],
            "category" => ["Hardware", "Hardware", "Software"],
            "salesperson" => ["Dana", "Lee", "Dana"],
            "region" => ["East", "West", "East"],
            "units" => [2.0, 1.0, 4.0],
            "revenue" => [200.0, 150.0, 400.0],
        ]
        .unwrap()
    }

    #[test]
    fn test_preprocess_derives_helper_columns() {
        let df = preprocess(sample_frame()).unwrap();

        let aov = df.column("aov").unwrap().f64().unwrap();
        assert_eq!(aov.get(0), Some(100.0));

        let months = df.column("order_month").unwrap().str().unwrap();
        assert_eq!(months.get(1), Some("2025-02"));

        let returning = df.column("is_returning").unwrap().f64().unwrap();
        assert_eq!(returning.get(0), Some(1.0));
        assert_eq!(returning.get(1), Some(0.0));
    }

    #[test]
    fn test_preprocess_creates_missing_columns() {
        let df = preprocess(sample_frame()).unwrap();
        assert!(df.get_column_names().contains(&"stage"));
        assert!(df.get_column_names().contains(&"opportunity_id"));
        assert_eq!(df.column("stage").unwrap().null_count(), df.height());
    }

    #[test]
    fn test_apply_filters_date_range_and_region() {
        let df = preprocess(sample_frame()).unwrap();
        let filters = QueryFilters {
            date_from: NaiveDate::from_ymd_opt(2025, 1, 1),
            date_to: NaiveDate::from_ymd_opt(2025, 2, 28),
            regions: vec!["East".to_string()],
            ..Default::default()
        };

        let filtered = apply_filters(df, &filters).unwrap();
        assert_eq!(filtered.height(), 1);
        let ids = filtered.column("order_id").unwrap().str().unwrap();
        assert_eq!(ids.get(0), Some("O1"));
    }

    #[test]
    fn test_apply_filters_all_sentinel() {
        let df = preprocess(sample_frame()).unwrap();
        let filters = QueryFilters {
            regions: vec!["All".to_string()],
            ..Default::default()
        };
        let filtered = apply_filters(df, &filters).unwrap();
        assert_eq!(filtered.height(), 3);
    }
}
