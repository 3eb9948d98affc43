use stash_core::revision::RevisionClient;

use crate::commands::common::{open_store, parse_campaign_id, payload_preview, Target};
use crate::error::CliError;

pub async fn run_show(id: &str, as_json: bool, target: &Target) -> Result<(), CliError> {
    let id = parse_campaign_id(id)?;
    let client = RevisionClient::new(open_store(&target.api_url)?);
    let document = client.fetch(&id).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&document)?);
        return Ok(());
    }

    println!(
        "{}  rev {}  {}",
        document.id,
        document.revision,
        payload_preview(&document.payload)
    );
    println!("{}", serde_json::to_string_pretty(&document.payload)?);
    Ok(())
}
