use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("document parse error: {0}")]
    Corrupt(String),

    #[error("page OCR failed: {0}")]
    OcrFailed(String),

    #[error("no text survived extraction for '{0}'")]
    NoText(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid response from {backend}: {details}")]
    Store { backend: String, details: String },

    #[error("vector index and catalog disagree: {0}")]
    SyncDivergence(String),

    #[error("store configuration error: {0}")]
    Configuration(String),

    #[error("extraction failed: {0}")]
    Extract(#[from] ExtractError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
