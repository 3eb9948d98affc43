use serde::Serialize;

use crate::commands::common::{initial_connectivity, open_queue, open_store, Target};
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct StatusReport {
    api_url: String,
    online: bool,
    queue_size: usize,
    drafts: usize,
    db_path: String,
}

pub async fn run_status(as_json: bool, target: &Target) -> Result<(), CliError> {
    let store = open_store(&target.api_url)?;
    let queue = open_queue(&target.db_path).await?;

    let report = StatusReport {
        api_url: store.base_url().to_string(),
        online: initial_connectivity(target, &store).await,
        queue_size: queue.len().await?,
        drafts: queue.drafts().await?.len(),
        db_path: target.db_path.display().to_string(),
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let reachability = if report.online { "reachable" } else { "unreachable" };
    println!("Store:  {} ({reachability})", report.api_url);
    println!("Queue:  {} pending", report.queue_size);
    println!("Drafts: {}", report.drafts);
    println!("Local:  {}", report.db_path);
    Ok(())
}
