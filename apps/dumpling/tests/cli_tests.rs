//! Integration tests for the dumpling command-line adapter.
//!
//! Commands run against a temporary redb database; results are checked by
//! reopening the database after each command returns.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use clap::Parser;
use dumpling::cli::{Cli, CliError, Commands, bounded, execute};
use dumpling::config::Backend;
use dumpling_core::{BucketId, DumpId, RedbStore, TriageError, TriageStore};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

fn write_dump(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

fn json_dump(id: &str, timestamp: &str, stack_hash: &str) -> String {
    format!(r#"{{"dump_id":"{id}","timestamp":"{timestamp}","stack_hash":"{stack_hash}"}}"#)
}

async fn run(db: &Path, args: &[&str]) -> Result<(), CliError> {
    let mut argv = vec!["dumpling", "-q", "-D", db.to_str().unwrap()];
    argv.extend_from_slice(args);
    execute(Cli::try_parse_from(argv).unwrap()).await
}

fn setup() -> (TempDir, PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let db = temp.path().join("triage.redb");
    (temp, db)
}

// =============================================================================
// ARGUMENT PARSING
// =============================================================================

#[test]
fn test_parse_global_flags() {
    let cli = Cli::try_parse_from([
        "dumpling", "-D", "x.redb", "-B", "memory", "--json-mode", "buckets", "--days", "7",
    ])
    .unwrap();
    assert_eq!(cli.database, Some(PathBuf::from("x.redb")));
    assert_eq!(cli.backend, Some(Backend::Memory));
    assert!(cli.json_mode);
    assert_eq!(
        cli.command,
        Some(Commands::Buckets {
            from: None,
            to: None,
            days: Some(7)
        })
    );
}

#[test]
fn test_from_requires_to() {
    assert!(Cli::try_parse_from(["dumpling", "buckets", "--from", "2024-01-01T00:00:00Z"]).is_err());
}

#[test]
fn test_days_conflicts_with_range() {
    assert!(
        Cli::try_parse_from([
            "dumpling",
            "buckets",
            "--days",
            "3",
            "--from",
            "2024-01-01T00:00:00Z",
            "--to",
            "2024-01-05T00:00:00Z",
        ])
        .is_err()
    );
}

#[test]
fn test_ingest_requires_files() {
    assert!(Cli::try_parse_from(["dumpling", "ingest"]).is_err());
}

// =============================================================================
// BOUNDED STORE ACCESS
// =============================================================================

#[tokio::test]
async fn test_bounded_passes_result_through() {
    let value = bounded(Duration::from_secs(5), || Ok(42)).await.unwrap();
    assert_eq!(value, 42);
}

#[tokio::test]
async fn test_bounded_timeout_is_store_unavailable() {
    let result: Result<(), TriageError> = bounded(Duration::from_millis(10), || {
        std::thread::sleep(Duration::from_millis(300));
        Ok(())
    })
    .await;
    let err = result.unwrap_err();
    assert!(matches!(err, TriageError::StoreUnavailable(_)));
    assert!(err.is_retryable());
}

// =============================================================================
// COMMANDS
// =============================================================================

#[tokio::test]
async fn test_init_refuses_existing_database() {
    let (_temp, db) = setup();
    run(&db, &["init"]).await.unwrap();
    assert!(db.exists());

    let again = run(&db, &["init"]).await;
    assert!(matches!(again, Err(CliError::Io(_))));

    run(&db, &["init", "--force"]).await.unwrap();
}

#[tokio::test]
async fn test_ingest_then_query() {
    let (temp, db) = setup();
    let d1 = write_dump(temp.path(), "d1.json", &json_dump("D1", "2024-01-10T00:00:00Z", "H1"));
    let d2 = write_dump(
        temp.path(),
        "d2.txt",
        "DumpId: D2\nTimestamp: 2024-01-11T00:00:00Z\nStackHash: H1\n",
    );

    run(&db, &["ingest", d1.to_str().unwrap(), d2.to_str().unwrap()])
        .await
        .unwrap();

    run(
        &db,
        &["buckets", "--from", "2024-01-01T00:00:00Z", "--to", "2024-02-01T00:00:00Z"],
    )
    .await
    .unwrap();
    run(&db, &["dumps", "H1"]).await.unwrap();
    run(&db, &["properties", "D1"]).await.unwrap();
    run(&db, &["--json-mode", "status"]).await.unwrap();

    let store = RedbStore::open(&db).unwrap();
    let bucket = store.get_bucket(&BucketId::new("H1")).unwrap().unwrap();
    assert_eq!(bucket.dump_count, 2);
    let dump = store.get_dump(&DumpId::new("D1")).unwrap().unwrap();
    assert_eq!(dump.payload_ref.as_deref(), d1.to_str());
}

#[tokio::test]
async fn test_ingest_reports_partial_failure() {
    let (temp, db) = setup();
    let good = write_dump(temp.path(), "good.json", &json_dump("D1", "2024-01-10T00:00:00Z", "H1"));
    let bad = write_dump(temp.path(), "bad.json", r#"{"timestamp":"2024-01-10T00:00:00Z"}"#);
    let missing = temp.path().join("missing.json");

    let result = run(
        &db,
        &[
            "ingest",
            good.to_str().unwrap(),
            bad.to_str().unwrap(),
            missing.to_str().unwrap(),
        ],
    )
    .await;
    assert!(matches!(
        result,
        Err(CliError::Partial {
            failed: 2,
            total: 3
        })
    ));

    let store = RedbStore::open(&db).unwrap();
    assert_eq!(store.stats().unwrap().dumps, 1);
}

#[tokio::test]
async fn test_ingest_bounds_each_dump_not_the_run() {
    let (temp, db) = setup();
    let config = temp.path().join("dumpling.toml");
    std::fs::write(&config, "[query]\nstore_timeout_ms = 500\n").unwrap();

    // Far more commits than fit in one 500ms window on a synced disk.
    let files: Vec<PathBuf> = (0..400)
        .map(|i| {
            let body = json_dump(&format!("D{i:04}"), "2024-01-10T00:00:00Z", "H1");
            write_dump(temp.path(), &format!("d{i:04}.json"), &body)
        })
        .collect();

    let mut argv = vec![
        "dumpling",
        "-q",
        "-c",
        config.to_str().unwrap(),
        "-D",
        db.to_str().unwrap(),
        "ingest",
    ];
    argv.extend(files.iter().map(|f| f.to_str().unwrap()));
    execute(Cli::try_parse_from(argv).unwrap()).await.unwrap();

    let store = RedbStore::open(&db).unwrap();
    let bucket = store.get_bucket(&BucketId::new("H1")).unwrap().unwrap();
    assert_eq!(bucket.dump_count, 400);
    assert_eq!(store.stats().unwrap().associations, 400);
}

#[tokio::test]
async fn test_unknown_format_is_usage_error() {
    let (temp, db) = setup();
    let file = write_dump(temp.path(), "d.json", &json_dump("D1", "2024-01-10T00:00:00Z", "H1"));
    let result = run(&db, &["ingest", "-t", "xml", file.to_str().unwrap()]).await;
    assert!(matches!(result, Err(CliError::Usage(_))));
}

#[tokio::test]
async fn test_inverted_range_is_invalid() {
    let (_temp, db) = setup();
    let result = run(
        &db,
        &["buckets", "--from", "2024-01-05T00:00:00Z", "--to", "2024-01-01T00:00:00Z"],
    )
    .await;
    assert!(matches!(
        result,
        Err(CliError::Triage(TriageError::InvalidRange { .. }))
    ));
}

#[tokio::test]
async fn test_unknown_dump_properties_fails() {
    let (_temp, db) = setup();
    let result = run(&db, &["properties", "nope"]).await;
    assert!(matches!(
        result,
        Err(CliError::Triage(TriageError::NotFound(_)))
    ));
}

#[tokio::test]
async fn test_dumps_of_unknown_bucket_is_empty_success() {
    let (_temp, db) = setup();
    run(&db, &["dumps", "nope"]).await.unwrap();
}

#[tokio::test]
async fn test_dashboard_on_memory_backend() {
    let (_temp, db) = setup();
    run(&db, &["-B", "memory", "--json-mode", "dashboard", "--days", "7"])
        .await
        .unwrap();
    assert!(!db.exists());
}
