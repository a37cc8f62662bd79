use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DepcatError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed manifest {path:?}: {message}")]
    ManifestParse { path: PathBuf, message: String },

    #[error("Registry lookup for {package} failed: {message}")]
    RegistryLookup { package: String, message: String },

    #[error("`{command}` failed: {message}")]
    ExternalTool { command: String, message: String },

    #[error("Verification scan of {project} did not find {package}")]
    ReconciliationMiss { project: String, package: String },

    #[error("Invalid project record: {0}")]
    InvalidProject(String),

    #[error("Catalog error: {0}")]
    Catalog(#[from] rusqlite::Error),

    #[error("Catalog lock poisoned")]
    Poisoned,

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl DepcatError {
    pub fn manifest(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        DepcatError::ManifestParse {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DepcatError>;
