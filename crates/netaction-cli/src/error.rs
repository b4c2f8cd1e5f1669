use netaction_core::error::{ConfigError, HttpError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("argument parsing error: {0}")]
    ArgParse(String),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("device list error: {0}")]
    DeviceList(String),
    #[error("http client error: {0}")]
    Http(#[from] HttpError),
    #[error("validation error: {0}")]
    Validation(String),
}
