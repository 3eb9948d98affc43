use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use stash_core::metrics::TracingMetricsSink;
use stash_core::queue::SaveQueue;
use stash_core::status::StatusBoard;
use stash_core::{
    ConnectivityMonitor, ConnectivityProbe, DocumentId, HttpRevisionStore, PipelineConfig,
    PipelineOptions, SavePipeline, SaveStatus,
};

use crate::error::CliError;

/// Where the local queue lives and how the remote store is reached
pub struct Target {
    pub db_path: PathBuf,
    pub api_url: String,
    pub offline: bool,
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}

/// One-line description of a payload for listings
pub fn payload_preview(payload: &Value) -> String {
    if let Some(name) = stash_core::models::display_name(payload) {
        return name.to_string();
    }
    let rendered = payload.to_string();
    let preview: String = rendered.chars().take(60).collect();
    if preview.len() < rendered.len() {
        format!("{preview}...")
    } else {
        preview
    }
}

/// Single-line rendering of the save indicator
pub fn describe_status(status: &SaveStatus) -> String {
    let mut parts = Vec::new();
    if let Some(conflict) = &status.conflict {
        parts.push(format!("conflict on {}", conflict.document_id));
    } else if status.is_saving {
        parts.push("saving".to_string());
    } else if status.has_unsaved_changes {
        parts.push("unsaved changes".to_string());
    } else {
        parts.push("all changes saved".to_string());
    }
    if status.is_syncing {
        parts.push("syncing".to_string());
    }
    if status.queue_size > 0 {
        parts.push(format!("{} queued", status.queue_size));
    }
    if let Some(error) = &status.last_error {
        parts.push(format!("last error: {error}"));
    }
    parts.join(" | ")
}

pub fn parse_campaign_id(id: &str) -> Result<DocumentId, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(CliError::EmptyCampaignId);
    }
    trimmed
        .parse()
        .map_err(|_| CliError::InvalidCampaignId(trimmed.to_string()))
}

/// Parse a campaign payload; only JSON objects are accepted
pub fn parse_payload(text: &str) -> Result<Value, CliError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(CliError::EmptyPayload);
    }
    let payload: Value = serde_json::from_str(trimmed)?;
    if payload.is_object() {
        Ok(payload)
    } else {
        Err(CliError::PayloadNotObject)
    }
}

/// Read a payload from `file`, falling back to piped stdin
pub fn read_payload(file: Option<&Path>) -> Result<Value, CliError> {
    let text = match file {
        Some(path) => std::fs::read_to_string(path)?,
        None => read_piped_stdin()?.ok_or(CliError::EmptyPayload)?,
    };
    parse_payload(&text)
}

pub fn read_file_if_present(path: &Path) -> Result<Option<String>, CliError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error.into()),
    }
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(Some(buffer))
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("STASH_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stash")
        .join("queue.db")
}

pub fn open_store(api_url: &str) -> Result<Arc<HttpRevisionStore>, CliError> {
    Ok(Arc::new(HttpRevisionStore::new(api_url)?))
}

/// Open the local queue without touching the network
pub async fn open_queue(db_path: &Path) -> Result<SaveQueue, CliError> {
    Ok(SaveQueue::open_path(db_path, StatusBoard::new()).await?)
}

/// Probe the store once unless the caller forced offline mode
pub async fn initial_connectivity(target: &Target, store: &HttpRevisionStore) -> bool {
    if target.offline {
        return false;
    }
    let online = store.probe().await;
    if !online {
        tracing::warn!("Campaign API at {} is unreachable", store.base_url());
    }
    online
}

pub async fn open_pipeline(
    target: &Target,
) -> Result<(SavePipeline<HttpRevisionStore>, Arc<HttpRevisionStore>), CliError> {
    let config = PipelineConfig::from_env()?;
    let store = open_store(&target.api_url)?;
    let online = initial_connectivity(target, &store).await;

    let options = PipelineOptions {
        config,
        monitor: ConnectivityMonitor::new(online),
        metrics: Arc::new(TracingMetricsSink),
    };
    let pipeline = SavePipeline::open(Arc::clone(&store), &target.db_path, options).await?;
    Ok((pipeline, store))
}
