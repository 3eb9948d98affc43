use std::path::PathBuf;

use clap::Parser;
use pretty_assertions::assert_eq;
use serde_json::json;
use stash_core::{ConflictRecord, DocumentId, SaveStatus};

use crate::cli::{Cli, Commands, ResolveStrategy};
use crate::commands::common::{
    default_db_path, describe_status, format_relative_time, open_queue, parse_campaign_id,
    parse_payload, payload_preview, read_file_if_present, resolve_db_path,
};
use crate::commands::queue::{run_draft, run_drafts, run_queue};
use crate::error::CliError;

#[test]
fn parse_payload_requires_json_object() {
    assert_eq!(
        parse_payload(" {\"name\": \"Greyhawk\"} \n").unwrap(),
        json!({"name": "Greyhawk"})
    );
    assert!(matches!(parse_payload("  "), Err(CliError::EmptyPayload)));
    assert!(matches!(
        parse_payload("[1, 2]"),
        Err(CliError::PayloadNotObject)
    ));
    assert!(matches!(
        parse_payload("{not json"),
        Err(CliError::Serialization(_))
    ));
}

#[test]
fn parse_campaign_id_trims_and_validates() {
    let id = DocumentId::new();
    assert_eq!(parse_campaign_id(&format!("  {id} ")).unwrap(), id);
    assert!(matches!(
        parse_campaign_id(" "),
        Err(CliError::EmptyCampaignId)
    ));
    assert!(matches!(
        parse_campaign_id("abc"),
        Err(CliError::InvalidCampaignId(value)) if value == "abc"
    ));
}

#[test]
fn payload_preview_prefers_display_name() {
    assert_eq!(
        payload_preview(&json!({"name": "Curse of Strahd", "maps": []})),
        "Curse of Strahd"
    );
    let long = json!({"notes": "x".repeat(200)});
    let preview = payload_preview(&long);
    assert!(preview.ends_with("..."));
    assert_eq!(preview.chars().count(), 63);
    assert_eq!(payload_preview(&json!({"a": 1})), "{\"a\":1}");
}

#[test]
fn format_relative_time_buckets() {
    let now = 10 * 7 * 24 * 60 * 60 * 1000;
    assert_eq!(format_relative_time(now - 5_000, now), "just now");
    assert_eq!(format_relative_time(now - 5 * 60_000, now), "5m ago");
    assert_eq!(format_relative_time(now - 3 * 3_600_000, now), "3h ago");
    assert_eq!(format_relative_time(now - 2 * 86_400_000, now), "2d ago");
    assert_eq!(format_relative_time(now - 21 * 86_400_000, now), "3w ago");
}

#[test]
fn describe_status_summarizes_indicator() {
    assert_eq!(describe_status(&SaveStatus::default()), "all changes saved");

    let status = SaveStatus {
        has_unsaved_changes: true,
        queue_size: 2,
        last_error: Some("store unreachable".to_string()),
        ..SaveStatus::default()
    };
    assert_eq!(
        describe_status(&status),
        "unsaved changes | 2 queued | last error: store unreachable"
    );

    let id = DocumentId::new();
    let status = SaveStatus {
        is_saving: true,
        conflict: Some(ConflictRecord::new(id, 3, Some(4))),
        ..SaveStatus::default()
    };
    assert_eq!(describe_status(&status), format!("conflict on {id}"));
}

#[test]
fn resolve_db_path_prefers_flag() {
    let explicit = PathBuf::from("/tmp/stash-explicit.db");
    assert_eq!(resolve_db_path(Some(explicit.clone())), explicit);
    assert!(default_db_path().ends_with("stash/queue.db"));
}

#[test]
fn read_file_if_present_treats_missing_as_none() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("campaign.json");
    assert_eq!(read_file_if_present(&path).unwrap(), None);

    std::fs::write(&path, "{}").unwrap();
    assert_eq!(read_file_if_present(&path).unwrap().as_deref(), Some("{}"));
}

#[test]
fn cli_parses_resolve_overwrite() {
    let id = DocumentId::new().to_string();
    let cli = Cli::try_parse_from([
        "stash",
        "--offline",
        "resolve",
        id.as_str(),
        "overwrite",
        "--file",
        "campaign.json",
    ])
    .unwrap();

    assert!(cli.offline);
    match cli.command {
        Commands::Resolve {
            id: parsed,
            strategy: ResolveStrategy::Overwrite { file },
        } => {
            assert_eq!(parsed, id);
            assert_eq!(file, Some(PathBuf::from("campaign.json")));
        }
        _ => panic!("expected resolve overwrite"),
    }
}

#[test]
fn cli_watch_requires_file() {
    let id = DocumentId::new().to_string();
    assert!(Cli::try_parse_from(["stash", "watch", id.as_str()]).is_err());

    let cli = Cli::try_parse_from(["stash", "watch", id.as_str(), "-f", "c.json", "-r", "4"])
        .unwrap();
    match cli.command {
        Commands::Watch {
            revision, poll_ms, ..
        } => {
            assert_eq!(revision, Some(4));
            assert_eq!(poll_ms, 500);
        }
        _ => panic!("expected watch"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_commands_read_persisted_entries() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("nested").join("queue.db");
    let id = DocumentId::new();

    {
        let queue = open_queue(&db_path).await.unwrap();
        queue
            .enqueue(id, json!({"name": "Saltmarsh"}), 2, Some("offline".to_string()))
            .await
            .unwrap();
    }

    run_queue(false, &db_path).await.unwrap();
    run_queue(true, &db_path).await.unwrap();
    run_drafts(false, &db_path).await.unwrap();
    run_draft(&id.to_string(), &db_path).await.unwrap();

    let queue = open_queue(&db_path).await.unwrap();
    assert_eq!(queue.len().await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn draft_command_reports_missing_draft() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("queue.db");
    let id = DocumentId::new();

    let error = run_draft(&id.to_string(), &db_path).await.unwrap_err();
    assert!(matches!(error, CliError::DraftNotFound(value) if value == id.to_string()));
}
