use std::path::Path;

use stash_core::util::unix_millis_now;

use crate::commands::common::{
    format_relative_time, open_queue, parse_campaign_id, payload_preview,
};
use crate::error::CliError;

pub async fn run_queue(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let queue = open_queue(db_path).await?;
    let entries = queue.list().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("Queue is empty");
        return Ok(());
    }

    let now = unix_millis_now();
    for entry in &entries {
        let mut line = format!(
            "{:>4}  {}  base rev {}  {}  {}",
            entry.seq,
            entry.document_id,
            entry.base_revision,
            format_relative_time(entry.enqueued_at, now),
            payload_preview(&entry.payload)
        );
        if entry.retry_count > 0 {
            line.push_str(&format!("  ({} failed replays)", entry.retry_count));
        }
        if let Some(error) = &entry.last_error {
            line.push_str(&format!("  last error: {error}"));
        }
        println!("{line}");
    }
    Ok(())
}

pub async fn run_drafts(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let queue = open_queue(db_path).await?;
    let drafts = queue.drafts().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&drafts)?);
        return Ok(());
    }

    if drafts.is_empty() {
        println!("No drafts");
        return Ok(());
    }

    let now = unix_millis_now();
    for draft in &drafts {
        println!(
            "{}  {}  {}",
            draft.document_id,
            format_relative_time(draft.saved_at, now),
            payload_preview(&draft.payload)
        );
    }
    Ok(())
}

pub async fn run_draft(id: &str, db_path: &Path) -> Result<(), CliError> {
    let id = parse_campaign_id(id)?;
    let queue = open_queue(db_path).await?;
    let Some(draft) = queue.draft(&id).await? else {
        return Err(CliError::DraftNotFound(id.to_string()));
    };

    println!("{}", serde_json::to_string_pretty(&draft.payload)?);
    Ok(())
}
