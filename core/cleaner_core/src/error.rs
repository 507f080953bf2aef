use thiserror::Error;

#[derive(Error, Debug)]
pub enum CleanerError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A host collaborator (history store, deletion engine, timers) refused the call.
    #[error("{0}")]
    Platform(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

pub type Result<T> = std::result::Result<T, CleanerError>;
