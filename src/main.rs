use anyhow::Result;
use clap::Parser;
use continuum_bi::chart::JsonMap;
use continuum_bi::config::Config;
use continuum_bi::orchestrator::Orchestrator;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "continuum")]
#[command(about = "Natural-language business-intelligence queries over a sales dataset")]
struct Args {
    /// The question in natural language
    query: String,

    /// Path to the sales CSV (default: data/demo_sales.csv)
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// OpenAI-compatible API key (or set OPENAI_API_KEY env var)
    #[arg(long)]
    api_key: Option<String>,

    /// Filters as a JSON object, e.g. '{"regions": ["West"]}'
    #[arg(short, long)]
    filters: Option<String>,

    /// Include per-tool debug entries in the output
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let mut config = Config::from_env();
    if let Some(data) = args.data {
        config.data_path = data;
    }
    if args.api_key.is_some() {
        config.api_key = args.api_key;
    }
    if args.debug {
        config.debug = true;
    }

    info!("Query: {}", args.query);
    if config.llm_ready() {
        info!("Generative model configured: {}", config.model);
    } else {
        info!("No API key found, using ranker-based classification");
    }

    let filters: JsonMap = match &args.filters {
        Some(raw) => serde_json::from_str(raw)?,
        None => JsonMap::new(),
    };

    let orchestrator = Orchestrator::new(config);
    let response = orchestrator.handle(&args.query, &filters).await;

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
