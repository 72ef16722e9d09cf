use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("ticket {0} not found")]
    NotFound(String),
    #[error("ticket backend error: {0}")]
    Backend(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
