//! Runtime configuration, read once at startup and passed by reference.

use chrono::NaiveDate;
use std::path::PathBuf;

/// Configuration for the orchestrator and its collaborators.
///
/// Built exactly once (CLI/server startup) so availability decisions such as
/// "is the LLM configured" are fixed for the process lifetime.
#[derive(Debug, Clone)]
pub struct Config {
    /// API key for the generative-model provider. `None` disables the LLM
    /// path entirely; the classifier then always uses the ranker fallback.
    pub api_key: Option<String>,

    /// Model name for the chat-completions call.
    pub model: String,

    /// Base URL of the OpenAI-compatible endpoint.
    pub base_url: String,

    /// Anchor date for resolving relative dates in queries ("last quarter").
    pub today: NaiveDate,

    /// Include per-tool debug entries in API responses.
    pub debug: bool,

    /// Path to the sales dataset CSV.
    pub data_path: PathBuf,

    /// Optional directory of canned chart JSON files served when a query
    /// produced no results.
    pub mock_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the environment (and `.env` if present).
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());

        Self {
            api_key,
            model: std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            base_url: std::env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            today: chrono::Local::now().date_naive(),
            debug: std::env::var("DEBUG_ORCH").map(|v| v == "1").unwrap_or(false),
            data_path: std::env::var("DATA_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/demo_sales.csv")),
            mock_dir: std::env::var("MOCK_CHART_DIR").ok().map(PathBuf::from),
        }
    }

    /// True when the generative-model path is usable.
    pub fn llm_ready(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn with_data_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_path = path.into();
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            today: chrono::Local::now().date_naive(),
            debug: false,
            data_path: PathBuf::from("data/demo_sales.csv"),
            mock_dir: None,
        }
    }
}
