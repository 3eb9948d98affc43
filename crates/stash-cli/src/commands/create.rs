use std::path::Path;

use stash_core::revision::RevisionClient;

use crate::commands::common::{open_store, read_payload, Target};
use crate::error::CliError;

pub async fn run_create(file: Option<&Path>, target: &Target) -> Result<(), CliError> {
    let payload = read_payload(file)?;
    let client = RevisionClient::new(open_store(&target.api_url)?);
    let document = client.create(&payload).await?;

    println!(
        "Created campaign {} at revision {}",
        document.id, document.revision
    );
    Ok(())
}
