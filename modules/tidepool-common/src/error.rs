use thiserror::Error;

#[derive(Error, Debug)]
pub enum TidepoolError {
    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Expansion error: {0}")]
    Expansion(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Citation already exists: {0}")]
    AlreadyExists(String),

    #[error("Oracle error: {0}")]
    Oracle(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
