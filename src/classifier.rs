//! Intent classification: map free text to a plan of tools and arguments,
//! via the generative model when configured, otherwise the relevance ranker.

use crate::chart::JsonMap;
use crate::config::Config;
use crate::error::Result;
use crate::llm::{GenerativeProvider, LlmClient};
use crate::ranker::RelevanceRanker;
use crate::tools::CatalogEntry;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// How many ranked tools the fallback path picks.
const FALLBACK_PICKS: usize = 2;

/// The classifier's structured output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default = "default_response_type")]
    pub response_type: String,

    #[serde(default)]
    pub tool_names: Vec<String>,

    #[serde(default)]
    pub tool_args: JsonMap,

    /// Any other model-supplied keys, passed through verbatim.
    #[serde(flatten)]
    pub extra: JsonMap,
}

fn default_response_type() -> String {
    "chart".to_string()
}

impl Plan {
    fn fallback(tool_names: Vec<String>) -> Self {
        Self {
            response_type: default_response_type(),
            tool_names,
            tool_args: JsonMap::new(),
            extra: JsonMap::new(),
        }
    }
}

pub struct IntentClassifier {
    provider: Option<Box<dyn GenerativeProvider>>,
    today: NaiveDate,
}

impl IntentClassifier {
    pub fn new(config: &Config) -> Self {
        let provider: Option<Box<dyn GenerativeProvider>> = if config.llm_ready() {
            Some(Box::new(LlmClient::new(config)))
        } else {
            None
        };
        Self {
            provider,
            today: config.today,
        }
    }

    /// Test seam: classify with an explicit provider.
    pub fn with_provider(provider: Box<dyn GenerativeProvider>, today: NaiveDate) -> Self {
        Self {
            provider: Some(provider),
            today,
        }
    }

    /// Produce a plan for the query. The LLM attempt is made only when a
    /// provider is configured; any failure there degrades silently to the
    /// ranker. An empty ranker result stays empty; no arbitrary default
    /// tool is substituted.
    pub async fn classify(
        &self,
        query: &str,
        catalog: &[CatalogEntry],
        ranker: &RelevanceRanker,
    ) -> Plan {
        if let Some(provider) = &self.provider {
            match self.classify_with_llm(provider.as_ref(), query, catalog).await {
                Ok(Some(plan)) => return plan,
                Ok(None) => debug!("LLM produced no usable plan, falling back to ranker"),
                Err(e) => warn!("LLM classification failed: {}", e),
            }
        }

        let picks: Vec<String> = ranker
            .rank(query)
            .into_iter()
            .take(FALLBACK_PICKS)
            .map(|(name, _)| name)
            .collect();
        Plan::fallback(picks)
    }

    async fn classify_with_llm(
        &self,
        provider: &dyn GenerativeProvider,
        query: &str,
        catalog: &[CatalogEntry],
    ) -> Result<Option<Plan>> {
        let prompt = self.build_prompt(query, catalog)?;
        let text = provider.generate(&prompt).await?;

        let Some(value) = safe_json(&text) else {
            return Ok(None);
        };
        if !value.is_object() {
            return Ok(None);
        }
        let Ok(plan) = serde_json::from_value::<Plan>(value) else {
            return Ok(None);
        };
        if plan.tool_names.is_empty() {
            return Ok(None);
        }
        Ok(Some(plan))
    }

    fn build_prompt(&self, query: &str, catalog: &[CatalogEntry]) -> Result<String> {
        let tools_json = serde_json::to_string(catalog)?;
        Ok(format!(
            r#"You are a BI tool router. Today is {today}. Choose 1-2 best tools from TOOLS and minimal args for the user's request. Resolve relative dates against today's date.
TOOLS:
{tools_json}
Allowed tool_args keys: date_from, date_to, regions, reps, categories. Dates use YYYY-MM-DD; regions, reps and categories are lists of strings; "All" or an empty list means no restriction.
Return ONLY JSON like: {{"response_type":"chart","tool_names":["name1"],"tool_args":{{}}}}
User: {query}"#,
            today = self.today,
            tools_json = tools_json,
            query = query
        ))
    }
}

/// Strict JSON parse; on failure, retry on the first-`{`-to-last-`}`
/// substring.
fn safe_json(text: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str(text) {
        return Some(value);
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BiError;
    use crate::tools::ToolRegistry;
    use async_trait::async_trait;
    use serde_json::json;

    struct ScriptedProvider(String);

    #[async_trait]
    impl GenerativeProvider for ScriptedProvider {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl GenerativeProvider for FailingProvider {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            Err(BiError::Llm("provider unavailable".to_string()))
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    fn classify_with(provider: Box<dyn GenerativeProvider>, query: &str) -> Plan {
        let registry = ToolRegistry::builtin();
        let ranker = RelevanceRanker::new(&registry);
        let classifier = IntentClassifier::with_provider(provider, today());
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        runtime.block_on(classifier.classify(query, &registry.catalog(), &ranker))
    }

    #[test]
    fn test_llm_plan_passes_args_through() {
        let response = json!({
            "response_type": "chart",
            "tool_names": ["total_revenue"],
            "tool_args": {"date_from": "2025-01-01", "date_to": "2025-03-31"},
            "reasoning": "revenue question"
        })
        .to_string();

        let plan = classify_with(Box::new(ScriptedProvider(response)), "total revenue q1");
        assert_eq!(plan.tool_names, vec!["total_revenue".to_string()]);
        assert_eq!(plan.tool_args.get("date_from"), Some(&json!("2025-01-01")));
        assert_eq!(plan.extra.get("reasoning"), Some(&json!("revenue question")));
    }

    #[test]
    fn test_fenced_json_is_recovered() {
        let response = "```json\n{\"tool_names\": [\"revenue_by_region\"], \"tool_args\": {}}\n```";
        let plan = classify_with(
            Box::new(ScriptedProvider(response.to_string())),
            "sales by region",
        );
        assert_eq!(plan.tool_names, vec!["revenue_by_region".to_string()]);
    }

    #[test]
    fn test_malformed_output_falls_back_to_ranker() {
        let plan = classify_with(
            Box::new(ScriptedProvider("the best tool is obvious".to_string())),
            "total revenue",
        );
        assert!(!plan.tool_names.is_empty());
        assert_eq!(plan.tool_names[0], "total_revenue");
        assert!(plan.tool_args.is_empty());
    }

    #[test]
    fn test_empty_tool_names_falls_back() {
        let response = json!({"tool_names": [], "tool_args": {"regions": ["East"]}}).to_string();
        let plan = classify_with(Box::new(ScriptedProvider(response)), "revenue by region");
        assert_eq!(plan.tool_names[0], "revenue_by_region");
        // Fallback never synthesizes tool args.
        assert!(plan.tool_args.is_empty());
    }

    #[test]
    fn test_provider_error_falls_back() {
        let plan = classify_with(Box::new(FailingProvider), "monthly sales trend");
        assert_eq!(plan.tool_names[0], "sales_over_time");
    }

    #[test]
    fn test_no_match_yields_empty_plan() {
        let plan = classify_with(Box::new(FailingProvider), "xyzzy plugh qwertyuiop");
        assert!(plan.tool_names.is_empty());
        assert_eq!(plan.response_type, "chart");
    }

    #[test]
    fn test_fallback_takes_top_two() {
        let plan = classify_with(Box::new(FailingProvider), "total revenue by region");
        assert_eq!(plan.tool_names.len(), 2);
    }

    #[test]
    fn test_safe_json_substring() {
        assert!(safe_json("{\"a\": 1}").is_some());
        assert!(safe_json("prefix {\"a\": 1} suffix").is_some());
        assert!(safe_json("no braces here").is_none());
        assert!(safe_json("} backwards {").is_none());
    }
}
