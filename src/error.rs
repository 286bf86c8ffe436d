use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShelfDbError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("`{name}` is not a valid {kind}")]
    InvalidName { name: String, kind: &'static str },

    #[error("Document not found: {repository}/{id}")]
    NotFound { repository: String, id: String },

    #[error("Decode error in {path}: {message}")]
    Decode { path: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ShelfDbError>;
