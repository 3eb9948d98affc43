use std::path::Path;

use stash_core::SaveDisposition;

use crate::commands::common::{open_pipeline, parse_campaign_id, read_payload, Target};
use crate::error::CliError;

pub async fn run_save(
    id: &str,
    revision: i64,
    file: Option<&Path>,
    target: &Target,
) -> Result<(), CliError> {
    let id = parse_campaign_id(id)?;
    let payload = read_payload(file)?;
    let (pipeline, _store) = open_pipeline(target).await?;

    pipeline.track(id, revision);
    let disposition = match pipeline.save(id, payload).await {
        Ok(disposition) => disposition,
        Err(error) if error.is_transport() => {
            let queued = pipeline.queue().len().await?;
            println!("Store unreachable after retries; saved locally, will sync ({queued} queued)");
            return Ok(());
        }
        Err(error) => return Err(error.into()),
    };

    match disposition {
        SaveDisposition::Committed { revision } => {
            println!("Saved campaign {id} at revision {revision}");
        }
        SaveDisposition::Queued => {
            let queued = pipeline.queue().len().await?;
            println!("Saved locally, will sync ({queued} queued)");
        }
        SaveDisposition::Conflicted(conflict) => {
            let server = conflict
                .server_revision
                .map_or_else(|| "unknown".to_string(), |revision| revision.to_string());
            return Err(CliError::SaveRejected(format!(
                "campaign changed elsewhere (local revision {}, server revision {server}); \
                 run `stash resolve {id} reload` or `stash resolve {id} overwrite`",
                conflict.current_revision
            )));
        }
    }
    Ok(())
}
