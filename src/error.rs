use thiserror::Error;

use crate::validation::ValidationError;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("unknown driver #{0}")]
    UnknownDriver(u32),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("pit loss calculation failed: {0}")]
    PitLoss(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

pub type Result<T> = std::result::Result<T, SimError>;
