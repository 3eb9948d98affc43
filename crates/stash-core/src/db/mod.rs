//! Database layer for Stash

mod campaign_repository;
mod connection;
mod migrations;
mod queue_repository;

pub use campaign_repository::{CampaignRepository, LibSqlCampaignRepository};
pub use connection::Database;
pub use queue_repository::{LibSqlSaveQueueRepository, SaveQueueRepository};
