use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] stash_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No payload provided")]
    EmptyPayload,
    #[error("Campaign payload must be a JSON object")]
    PayloadNotObject,
    #[error("Campaign ID cannot be empty")]
    EmptyCampaignId,
    #[error("Invalid campaign ID: {0}")]
    InvalidCampaignId(String),
    #[error("No draft stored for campaign {0}")]
    DraftNotFound(String),
    #[error(transparent)]
    Config(#[from] stash_core::ConfigError),
    #[error("Save was not accepted: {0}")]
    SaveRejected(String),
}

