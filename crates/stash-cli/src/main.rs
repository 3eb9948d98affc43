mod cli;
mod commands;
mod error;
#[cfg(test)]
mod tests;

use std::time::Duration;

use clap::Parser;

use crate::cli::{Cli, Commands, ResolveStrategy};
use crate::commands::common::{resolve_db_path, Target};
use crate::commands::create::run_create;
use crate::commands::drain::run_drain;
use crate::commands::queue::{run_draft, run_drafts, run_queue};
use crate::commands::resolve::{run_overwrite, run_reload};
use crate::commands::save::run_save;
use crate::commands::show::run_show;
use crate::commands::status::run_status;
use crate::commands::watch::run_watch;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "stash=info".parse() {
        filter = filter.add_directive(directive);
    }
    if let Ok(directive) = "stash_core=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let target = Target {
        db_path: resolve_db_path(cli.db_path),
        api_url: cli.api_url,
        offline: cli.offline,
    };

    match cli.command {
        Commands::Create { file } => run_create(file.as_deref(), &target).await,
        Commands::Show { id, json } => run_show(&id, json, &target).await,
        Commands::Save { id, revision, file } => {
            run_save(&id, revision, file.as_deref(), &target).await
        }
        Commands::Watch {
            id,
            file,
            revision,
            poll_ms,
        } => {
            run_watch(
                &id,
                &file,
                revision,
                Duration::from_millis(poll_ms.max(50)),
                &target,
            )
            .await
        }
        Commands::Queue { json } => run_queue(json, &target.db_path).await,
        Commands::Drafts { json } => run_drafts(json, &target.db_path).await,
        Commands::Draft { id } => run_draft(&id, &target.db_path).await,
        Commands::Drain => run_drain(&target).await,
        Commands::Resolve { id, strategy } => match strategy {
            ResolveStrategy::Reload => run_reload(&id, &target).await,
            ResolveStrategy::Overwrite { file } => {
                run_overwrite(&id, file.as_deref(), &target).await
            }
        },
        Commands::Status { json } => run_status(json, &target).await,
    }
}
