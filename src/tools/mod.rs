//! Tool registry: an explicit registration table mapping stable names to
//! analytics functions plus their static metadata and argument schemas.

pub mod analytics;

use crate::chart::JsonMap;
use crate::error::Result;
use crate::normalizer::ToolValue;
use polars::prelude::DataFrame;
use serde::Serialize;
use serde_json::{json, Value};

pub type ToolFn = fn(&DataFrame, &JsonMap) -> Result<ToolValue>;

/// Static metadata declared at registration time.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolMetadata {
    /// Phrases a user might say to mean this tool.
    pub intent: Vec<String>,
    /// Declared output kind ("indicator", "bar", "table", "timeseries", ...).
    pub returns: String,
    /// Columns the tool needs present in its input frame.
    pub requires: Vec<String>,
}

/// One accepted named argument and its optional default. Checked at
/// registration time so binding is a plain lookup, never reflection.
#[derive(Debug, Clone)]
pub struct ToolParam {
    pub name: String,
    pub default: Option<Value>,
}

impl ToolParam {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            default: None,
        }
    }

    pub fn with_default(name: &str, default: Value) -> Self {
        Self {
            name: name.to_string(),
            default: Some(default),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Tool {
    pub name: String,
    pub doc: String,
    pub metadata: ToolMetadata,
    pub params: Vec<ToolParam>,
    pub func: ToolFn,
}

/// Catalog entry exposed to the classifier prompt and the tools endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    pub name: String,
    pub doc: String,
    pub intent: Vec<String>,
    pub returns: String,
    pub requires: Vec<String>,
}

/// Ordered, immutable-after-construction table of callable analytics tools.
pub struct ToolRegistry {
    tools: Vec<Tool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    pub fn register(&mut self, tool: Tool) {
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tool> {
        self.tools.iter()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Catalog snapshot. Docs are truncated to 300 chars; absent metadata
    /// surfaces as empty lists/strings.
    pub fn catalog(&self) -> Vec<CatalogEntry> {
        self.tools
            .iter()
            .map(|t| CatalogEntry {
                name: t.name.clone(),
                doc: t.doc.chars().take(300).collect(),
                intent: t.metadata.intent.clone(),
                returns: t.metadata.returns.clone(),
                requires: t.metadata.requires.clone(),
            })
            .collect()
    }

    /// The built-in analytics tool set. New tool = one new entry here.
    pub fn builtin() -> Self {
        let mut registry = Self::new();

        registry.register(Tool {
            name: "total_revenue".to_string(),
            doc: "Total revenue KPI. Sums the revenue column over the filtered dataset and renders a number indicator.".to_string(),
            metadata: meta(
                &["total revenue", "overall revenue", "how much did we sell"],
                "indicator",
                &["revenue"],
            ),
            params: vec![ToolParam::with_default("revenue_col", json!("revenue"))],
            func: analytics::total_revenue,
        });

        registry.register(Tool {
            name: "total_orders".to_string(),
            doc: "Count of distinct orders in the filtered dataset, rendered as a number indicator.".to_string(),
            metadata: meta(
                &["total orders", "order count", "how many orders"],
                "indicator",
                &["order_id"],
            ),
            params: vec![ToolParam::with_default("order_id_col", json!("order_id"))],
            func: analytics::total_orders,
        });

        registry.register(Tool {
            name: "avg_aov".to_string(),
            doc: "Average order value (AOV) indicator. Uses the aov column when present, otherwise revenue divided by distinct orders.".to_string(),
            metadata: meta(
                &["average order value", "aov", "basket size"],
                "indicator",
                &["revenue"],
            ),
            params: vec![ToolParam::with_default("aov_col", json!("aov"))],
            func: analytics::avg_aov,
        });

        registry.register(Tool {
            name: "conversion_rate".to_string(),
            doc: "Share of opportunities in a closed or won stage, rendered as a gauge.".to_string(),
            metadata: meta(
                &["conversion rate", "win rate", "close rate"],
                "indicator",
                &["opportunity_id", "stage"],
            ),
            params: Vec::new(),
            func: analytics::conversion_rate,
        });

        registry.register(Tool {
            name: "new_customers_count".to_string(),
            doc: "Number of unique customers whose first purchase falls inside the filtered window.".to_string(),
            metadata: meta(
                &["new customers", "first time buyers"],
                "indicator",
                &["customer_id", "is_returning"],
            ),
            params: Vec::new(),
            func: analytics::new_customers_count,
        });

        registry.register(Tool {
            name: "returning_customers_count".to_string(),
            doc: "Number of unique returning (repeat) customers in the filtered window.".to_string(),
            metadata: meta(
                &["returning customers", "repeat customers"],
                "indicator",
                &["customer_id", "is_returning"],
            ),
            params: Vec::new(),
            func: analytics::returning_customers_count,
        });

        registry.register(Tool {
            name: "sales_over_time".to_string(),
            doc: "Revenue trend over time. Aggregates revenue per month (or per day) and renders a line chart.".to_string(),
            metadata: meta(
                &["sales over time", "revenue trend", "monthly sales", "sales trend"],
                "timeseries",
                &["order_date", "revenue"],
            ),
            params: vec![ToolParam::with_default("resample", json!("month"))],
            func: analytics::sales_over_time,
        });

        registry.register(Tool {
            name: "aov_over_time".to_string(),
            doc: "Average order value trend per month, rendered as a line chart.".to_string(),
            metadata: meta(
                &["aov over time", "aov trend", "order value trend"],
                "timeseries",
                &["order_date", "aov"],
            ),
            params: Vec::new(),
            func: analytics::aov_over_time,
        });

        registry.register(Tool {
            name: "top_products_by_revenue".to_string(),
            doc: "Top products ranked by total revenue, rendered as a horizontal bar chart.".to_string(),
            metadata: meta(
                &["top products", "best selling products", "product ranking"],
                "bar",
                &["product_name", "revenue"],
            ),
            params: vec![ToolParam::new("n")],
            func: analytics::top_products_by_revenue,
        });

        registry.register(Tool {
            name: "pareto_product_revenue".to_string(),
            doc: "Pareto view of product revenue: per-product bars with a cumulative percentage line.".to_string(),
            metadata: meta(
                &["pareto", "cumulative revenue share", "80 20 products"],
                "bar",
                &["product_name", "revenue"],
            ),
            params: vec![ToolParam::new("n")],
            func: analytics::pareto_product_revenue,
        });

        registry.register(Tool {
            name: "units_vs_revenue_agg".to_string(),
            doc: "Units versus revenue per product as a bubble scatter, sized by revenue.".to_string(),
            metadata: meta(
                &["units vs revenue", "volume vs value"],
                "scatter",
                &["product_name", "units", "revenue"],
            ),
            params: Vec::new(),
            func: analytics::units_vs_revenue_agg,
        });

        registry.register(Tool {
            name: "revenue_by_region".to_string(),
            doc: "Total revenue per region, rendered as a bar chart.".to_string(),
            metadata: meta(
                &["revenue by region", "regional sales", "sales by region"],
                "bar",
                &["region", "revenue"],
            ),
            params: Vec::new(),
            func: analytics::revenue_by_region,
        });

        registry.register(Tool {
            name: "revenue_by_country_top".to_string(),
            doc: "Top countries by total revenue, rendered as a bar chart.".to_string(),
            metadata: meta(
                &["revenue by country", "top countries"],
                "bar",
                &["country", "revenue"],
            ),
            params: vec![ToolParam::new("n")],
            func: analytics::revenue_by_country_top,
        });

        registry.register(Tool {
            name: "top_salespeople".to_string(),
            doc: "Top salespeople ranked by total revenue, rendered as a horizontal bar chart.".to_string(),
            metadata: meta(
                &["top salespeople", "top reps", "best sellers"],
                "bar",
                &["salesperson", "revenue"],
            ),
            params: vec![ToolParam::new("k")],
            func: analytics::top_salespeople,
        });

        registry.register(Tool {
            name: "leaderboard".to_string(),
            doc: "Salesperson leaderboard table with total revenue and distinct order counts.".to_string(),
            metadata: meta(
                &["leaderboard", "rep ranking", "who sold the most"],
                "table",
                &["salesperson", "revenue", "order_id"],
            ),
            params: Vec::new(),
            func: analytics::leaderboard,
        });

        registry.register(Tool {
            name: "sales_cycle_histogram".to_string(),
            doc: "Distribution of sales cycle length in days, rendered as a histogram.".to_string(),
            metadata: meta(
                &["sales cycle", "cycle length distribution", "days to close"],
                "histogram",
                &["sales_cycle_days"],
            ),
            params: vec![ToolParam::with_default("nbins", json!(40))],
            func: analytics::sales_cycle_histogram,
        });

        registry.register(Tool {
            name: "opportunity_funnel".to_string(),
            doc: "Opportunity counts per pipeline stage, rendered as a funnel.".to_string(),
            metadata: meta(
                &["opportunity funnel", "pipeline funnel", "stage breakdown"],
                "funnel",
                &["stage", "opportunity_id"],
            ),
            params: Vec::new(),
            func: analytics::opportunity_funnel,
        });

        registry.register(Tool {
            name: "pipeline_table".to_string(),
            doc: "Per-opportunity pipeline table: latest stage, lead and close dates, and revenue.".to_string(),
            metadata: meta(
                &["pipeline table", "open opportunities", "deal list"],
                "table",
                &["opportunity_id"],
            ),
            params: Vec::new(),
            func: analytics::pipeline_table,
        });

        registry
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn meta(intent: &[&str], returns: &str, requires: &[&str]) -> ToolMetadata {
    ToolMetadata {
        intent: intent.iter().map(|s| s.to_string()).collect(),
        returns: returns.to_string(),
        requires: requires.iter().map(|s| s.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        let registry = ToolRegistry::builtin();
        assert!(registry.get("total_revenue").is_some());
        assert!(registry.get("no_such_tool").is_none());
        assert!(!registry.is_empty());
    }

    #[test]
    fn test_catalog_matches_registration_order() {
        let registry = ToolRegistry::builtin();
        let catalog = registry.catalog();
        assert_eq!(catalog.len(), registry.len());
        assert_eq!(catalog[0].name, "total_revenue");
        assert!(catalog.iter().all(|e| e.doc.chars().count() <= 300));
    }

    #[test]
    fn test_catalog_tolerates_missing_metadata() {
        fn noop(
            _df: &DataFrame,
            _args: &JsonMap,
        ) -> crate::error::Result<crate::normalizer::ToolValue> {
            Ok(crate::normalizer::ToolValue::Null)
        }

        let mut registry = ToolRegistry::new();
        registry.register(Tool {
            name: "bare".to_string(),
            doc: String::new(),
            metadata: ToolMetadata::default(),
            params: Vec::new(),
            func: noop,
        });

        let catalog = registry.catalog();
        assert_eq!(catalog[0].name, "bare");
        assert!(catalog[0].intent.is_empty());
        assert!(catalog[0].returns.is_empty());
    }
}
