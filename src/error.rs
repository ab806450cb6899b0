//! Crate-wide error types.

use thiserror::Error;

pub type DiagResult<T> = Result<T, DiagError>;

#[derive(Debug, Error)]
pub enum DiagError {
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("missing bundle entry: {0}")]
    MissingEntry(String),

    #[error("failed to decode {file}: {message}")]
    Decode { file: String, message: String },

    #[error("zip error: {0}")]
    Zip(String),
}

impl From<zip::result::ZipError> for DiagError {
    fn from(value: zip::result::ZipError) -> Self {
        Self::Zip(value.to_string())
    }
}

impl DiagError {
    pub fn decode(file: &str, message: impl std::fmt::Display) -> Self {
        Self::Decode {
            file: file.to_string(),
            message: message.to_string(),
        }
    }
}
