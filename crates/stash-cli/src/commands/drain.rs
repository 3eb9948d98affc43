use stash_core::DrainOutcome;

use crate::commands::common::{open_pipeline, Target};
use crate::error::CliError;

pub async fn run_drain(target: &Target) -> Result<(), CliError> {
    let (pipeline, _store) = open_pipeline(target).await?;

    match pipeline.drain().await? {
        DrainOutcome::Offline => {
            let queued = pipeline.queue().len().await?;
            println!("Store unreachable; {queued} saves stay queued");
        }
        DrainOutcome::AlreadyRunning => println!("A drain is already running"),
        DrainOutcome::Completed(report) => {
            println!(
                "Replayed {}: {} committed, {} requeued, {} abandoned",
                report.attempted, report.committed, report.requeued, report.abandoned
            );
            let remaining = pipeline.queue().len().await?;
            if remaining > 0 {
                println!("{remaining} saves still queued");
            }
        }
    }
    Ok(())
}
