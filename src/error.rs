use thiserror::Error;

#[derive(Error, Debug)]
pub enum EstimationError {
    /// Two reported rows share a (year, scope, parameter, activity, unit) key.
    #[error("Ambiguous input: {0}")]
    InputAmbiguity(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing configuration sheet: {0}")]
    MissingSheet(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(String),

    #[error("Polars error: {0}")]
    Polars(String),
}

impl From<polars::error::PolarsError> for EstimationError {
    fn from(err: polars::error::PolarsError) -> Self {
        EstimationError::Polars(err.to_string())
    }
}

impl From<csv::Error> for EstimationError {
    fn from(err: csv::Error) -> Self {
        EstimationError::Csv(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EstimationError>;
