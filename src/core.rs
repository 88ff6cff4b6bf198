use std::path::Path;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WwandError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    TomlParse(String),
}

pub type Result<T> = std::result::Result<T, WwandError>;

impl WwandError {
    pub fn toml_parse(error: impl std::fmt::Display, path: Option<&Path>) -> Self {
        match path {
            Some(p) => {
                let clean_path = p.canonicalize().unwrap_or_else(|_| p.to_path_buf());
                WwandError::TomlParse(format!(
                    "Failed to parse TOML at {:?}: {}",
                    clean_path, error
                ))
            }
            None => WwandError::TomlParse(format!("Failed to parse TOML: {}", error)),
        }
    }
}
