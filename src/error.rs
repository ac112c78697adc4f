use thiserror::Error;

#[derive(Error, Debug)]
pub enum BiError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Data error: {0}")]
    Data(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Filter error: {0}")]
    Filter(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Polars error: {0}")]
    Polars(String),
}

impl From<polars::error::PolarsError> for BiError {
    fn from(err: polars::error::PolarsError) -> Self {
        BiError::Polars(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BiError>;
