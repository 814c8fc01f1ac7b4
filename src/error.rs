use thiserror::Error;

/// Reasons a single ticker's run stops early. None of these abort the overall run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("market data request for {ticker} failed: {message}")]
    Fetch { ticker: String, message: String },

    #[error("no price rows returned for {ticker}")]
    EmptySeries { ticker: String },

    #[error("only {usable} usable row(s) after feature construction (need at least 2)")]
    InsufficientRows { usable: usize },

    #[error("cannot split {rows} row(s) into non-empty train and test segments")]
    DegenerateSplit { rows: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
