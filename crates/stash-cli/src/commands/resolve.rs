use std::path::Path;

use crate::commands::common::{open_pipeline, parse_campaign_id, read_payload, Target};
use crate::error::CliError;

pub async fn run_reload(id: &str, target: &Target) -> Result<(), CliError> {
    let id = parse_campaign_id(id)?;
    let (pipeline, _store) = open_pipeline(target).await?;
    let document = pipeline.resolver().resolve_by_reload(&id).await?;

    println!(
        "Discarded local edits; campaign {} is at revision {}",
        document.id, document.revision
    );
    Ok(())
}

pub async fn run_overwrite(
    id: &str,
    file: Option<&Path>,
    target: &Target,
) -> Result<(), CliError> {
    let id = parse_campaign_id(id)?;
    let payload = read_payload(file)?;
    let (pipeline, _store) = open_pipeline(target).await?;
    let revision = pipeline.resolver().resolve_by_overwrite(&id, payload).await?;

    println!("Overwrote campaign {id}; now at revision {revision}");
    Ok(())
}
