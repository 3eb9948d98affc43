use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use stash_core::{Document, ProbeLoop};
use tracing::{info, warn};

use crate::commands::common::{
    describe_status, open_pipeline, parse_campaign_id, parse_payload, read_file_if_present, Target,
};
use crate::error::CliError;

/// Mirror `file` into a campaign until Ctrl-C.
///
/// With `revision` the committed campaign is not fetched, so editing can
/// start while the store is unreachable.
pub async fn run_watch(
    id: &str,
    file: &Path,
    revision: Option<i64>,
    poll: Duration,
    target: &Target,
) -> Result<(), CliError> {
    let id = parse_campaign_id(id)?;
    let (pipeline, store) = open_pipeline(target).await?;

    let initial_text = read_file_if_present(file)?;
    let handle = match revision {
        Some(revision) => {
            let payload = match initial_text.as_deref() {
                Some(text) => parse_payload(text)?,
                None => return Err(CliError::EmptyPayload),
            };
            pipeline.open_known(Document::new(id, payload, revision)).await?
        }
        None => {
            let (document, handle) = pipeline.open_document(&id).await?;
            match initial_text.as_deref() {
                Some(text) => {
                    let payload = parse_payload(text)?;
                    if payload != document.payload {
                        handle.document_changed(payload)?;
                    }
                }
                None => {
                    std::fs::write(file, serde_json::to_string_pretty(&document.payload)?)?;
                    info!("Wrote revision {} to {}", document.revision, file.display());
                }
            }
            handle
        }
    };

    let probe = (!target.offline).then(|| {
        ProbeLoop::start(
            Arc::clone(&store),
            pipeline.monitor().clone(),
            pipeline.config().probe_interval,
        )
    });
    pipeline.start();

    println!(
        "Watching {} for campaign {id} (Ctrl-C to stop)",
        file.display()
    );

    let mut last_text = read_file_if_present(file)?;
    let mut status_rx = pipeline.subscribe_status();
    let mut ticker = tokio::time::interval(poll);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = status_rx.borrow_and_update().clone();
                println!("{}", describe_status(&status));
            }
            _ = ticker.tick() => {
                let text = read_file_if_present(file)?;
                if text == last_text {
                    continue;
                }
                if let Some(payload) = text.as_deref().and_then(|text| parse_edit(file, text)) {
                    handle.document_changed(payload)?;
                }
                last_text = text;
            }
        }
    }

    if let Err(error) = handle.save_now().await {
        warn!("Final save did not complete: {error}");
    }
    pipeline.stop().await;
    if let Some(probe) = probe {
        probe.stop().await;
    }

    let status = pipeline.status();
    println!("{}", describe_status(&status));
    Ok(())
}

fn parse_edit(file: &Path, text: &str) -> Option<Value> {
    match parse_payload(text) {
        Ok(payload) => Some(payload),
        Err(error) => {
            warn!("Ignoring {} until it parses: {error}", file.display());
            None
        }
    }
}
