//! Query orchestration facade: classify, merge filters, execute, and shape
//! the caller-facing response.

use crate::chart::{ChartObject, JsonMap};
use crate::classifier::{IntentClassifier, Plan};
use crate::config::Config;
use crate::engine::{DebugEntry, ExecutionEngine, RunOutcome};
use crate::error::{BiError, Result};
use crate::filters::{self, QueryFilters};
use crate::loader;
use crate::ranker::RelevanceRanker;
use crate::tools::{CatalogEntry, ToolRegistry};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Fixed guidance returned when no tool produced a usable result.
pub const GUARDRAIL_MESSAGE: &str = "I couldn't match that request to the available analytics. \
Supported filters: date_from, date_to, regions, reps, categories. \
Try asking e.g. \"Total revenue for 2025-01-01 to 2025-03-31\", \"Top products by revenue\", \
\"Monthly sales trend\", or \"Revenue by region\".";

const GENERIC_ERROR_MESSAGE: &str = "Something went wrong while answering that question.";

/// Maximum canned charts served from the mock directory.
const MOCK_CHART_LIMIT: usize = 2;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum QueryResponse {
    Success {
        results: Vec<ChartObject>,
        #[serde(skip_serializing_if = "Option::is_none")]
        debug: Option<Vec<DebugEntry>>,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        debug: Option<Vec<DebugEntry>>,
    },
}

impl QueryResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, QueryResponse::Success { .. })
    }

    pub fn results(&self) -> &[ChartObject] {
        match self {
            QueryResponse::Success { results, .. } => results,
            QueryResponse::Error { .. } => &[],
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            QueryResponse::Success { .. } => None,
            QueryResponse::Error { message, .. } => Some(message),
        }
    }
}

pub struct Orchestrator {
    config: Config,
    registry: Arc<ToolRegistry>,
    ranker: RelevanceRanker,
    classifier: IntentClassifier,
    engine: ExecutionEngine,
}

impl Orchestrator {
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(ToolRegistry::builtin());
        let ranker = RelevanceRanker::new(&registry);
        let classifier = IntentClassifier::new(&config);
        let engine = ExecutionEngine::new(Arc::clone(&registry));
        Self {
            config,
            registry,
            ranker,
            classifier,
            engine,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> Vec<CatalogEntry> {
        self.registry.catalog()
    }

    /// Classification only; no execution.
    pub async fn plan(&self, query: &str) -> Plan {
        self.classifier
            .classify(query, &self.catalog(), &self.ranker)
            .await
    }

    /// Full orchestration for one natural-language query. Never returns an
    /// error to the caller; unexpected failures become a generic message.
    pub async fn handle(&self, query: &str, caller_filters: &JsonMap) -> QueryResponse {
        match self.try_handle(query, caller_filters).await {
            Ok(response) => response,
            Err(e) => {
                error!("Query orchestration failed: {}", e);
                QueryResponse::Error {
                    message: GENERIC_ERROR_MESSAGE.to_string(),
                    debug: None,
                }
            }
        }
    }

    async fn try_handle(&self, query: &str, caller_filters: &JsonMap) -> Result<QueryResponse> {
        info!("Handling query: {}", query);
        let plan = self.plan(query).await;
        info!("Plan selected tools: {:?}", plan.tool_names);

        // Plan-derived filters form the base; explicit caller filters win.
        let base = filters::restrict_to_allowed(&plan.tool_args);
        let merged = filters::merge(&base, caller_filters);
        let parsed = match QueryFilters::validate(&merged) {
            Ok(parsed) => parsed,
            Err(BiError::Filter(message)) => {
                return Ok(QueryResponse::Error {
                    message,
                    debug: None,
                });
            }
            Err(e) => return Err(e),
        };

        let outcome = self.engine.run(
            &plan.tool_names,
            |tool| loader::load_dataframe_for_tool(&self.config, tool, &parsed),
            &plan.tool_args,
        );
        for entry in &outcome.debug {
            warn!("Tool '{}' failed: {}", entry.tool, entry.error);
        }

        Ok(self.shape_response(outcome))
    }

    /// Run one named tool directly, bypassing classification. Debug entries
    /// are always included; this path exists for debugging.
    pub fn force_run(&self, tool: &str, args: &JsonMap, caller_filters: &JsonMap) -> QueryResponse {
        let parsed = match QueryFilters::validate(caller_filters) {
            Ok(parsed) => parsed,
            Err(e) => {
                return QueryResponse::Error {
                    message: e.to_string(),
                    debug: None,
                };
            }
        };

        let outcome = self.engine.run(
            &[tool.to_string()],
            |tool| loader::load_dataframe_for_tool(&self.config, tool, &parsed),
            args,
        );
        if outcome.results.is_empty() {
            QueryResponse::Error {
                message: "No results".to_string(),
                debug: Some(outcome.debug),
            }
        } else {
            QueryResponse::Success {
                results: outcome.results,
                debug: Some(outcome.debug),
            }
        }
    }

    /// Row/column counts of the loaded frame, for quick inspection.
    pub fn diagnostics(&self) -> Value {
        match loader::load_frame(&self.config, &QueryFilters::default()) {
            Ok(df) => json!({
                "rows": df.height(),
                "columns": df.get_column_names(),
            }),
            Err(e) => json!({"error": format!("diagnostics_failed: {}", e)}),
        }
    }

    fn shape_response(&self, outcome: RunOutcome) -> QueryResponse {
        let debug = if self.config.debug {
            Some(outcome.debug)
        } else {
            None
        };

        if !outcome.results.is_empty() {
            return QueryResponse::Success {
                results: outcome.results,
                debug,
            };
        }

        if let Some(results) = self.load_mock_charts() {
            info!("Serving {} mock chart(s)", results.len());
            return QueryResponse::Success { results, debug };
        }

        QueryResponse::Error {
            message: GUARDRAIL_MESSAGE.to_string(),
            debug,
        }
    }

    fn load_mock_charts(&self) -> Option<Vec<ChartObject>> {
        let dir = self.config.mock_dir.as_ref()?;
        let entries = std::fs::read_dir(dir).ok()?;

        let mut paths: Vec<_> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|ext| ext == "json").unwrap_or(false))
            .collect();
        paths.sort();

        let charts: Vec<ChartObject> = paths
            .iter()
            .take(MOCK_CHART_LIMIT)
            .filter_map(|path| {
                let raw = std::fs::read_to_string(path).ok()?;
                let value: Value = serde_json::from_str(&raw).ok()?;
                ChartObject::from_value(&value)
            })
            .collect();

        if charts.is_empty() {
            None
        } else {
            Some(charts)
        }
    }
}
