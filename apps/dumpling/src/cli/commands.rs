//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.
//!
//! Store calls are blocking; each one runs on tokio's blocking pool and is
//! bounded by `query.store_timeout_ms`. An elapsed bound is reported as
//! `TriageError::StoreUnavailable`, the one retryable error kind.

use dumpling_core::primitives::MAX_DUMP_BYTES;
use dumpling_core::{
    BucketId, DumpFormat, DumpId, IngestOutcome, IngestPipeline, MemoryStore, QueryService,
    RawDump, RedbStore, StoreHandle, Timestamp, TriageError, Window,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::{CliError, Output};
use crate::config::{AppConfig, Backend};

// =============================================================================
// BOUNDED STORE ACCESS
// =============================================================================

/// Run a blocking store operation with a time bound.
///
/// The operation keeps running on the blocking pool after the bound
/// elapses; only the caller stops waiting.
pub async fn bounded<T, F>(limit: Duration, op: F) -> Result<T, TriageError>
where
    F: FnOnce() -> Result<T, TriageError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(limit, tokio::task::spawn_blocking(op)).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(TriageError::StoreUnavailable(format!(
            "store task failed: {}",
            join
        ))),
        Err(_) => {
            tracing::error!("Store access timed out after {}ms", limit.as_millis());
            Err(TriageError::StoreUnavailable(format!(
                "store access timed out after {}ms",
                limit.as_millis()
            )))
        }
    }
}

/// Open the configured backend.
pub fn open_store(config: &AppConfig) -> Result<StoreHandle, TriageError> {
    match config.store.backend {
        Backend::Redb => Ok(Arc::new(RedbStore::open(&config.store.path)?)),
        Backend::Memory => {
            tracing::warn!("Using the memory backend; nothing is persisted");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Everything a command needs: one store handle for the whole run.
pub struct Context {
    config: AppConfig,
    store: StoreHandle,
    output: Output,
    limit: Duration,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .field("output", &self.output)
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Open the store once for this process.
    pub async fn open(config: AppConfig, output: Output) -> Result<Self, CliError> {
        let limit = Duration::from_millis(config.triage.query.store_timeout_ms);
        let opener = config.clone();
        let store = bounded(limit, move || open_store(&opener)).await?;
        Ok(Self {
            config,
            store,
            output,
            limit,
        })
    }

    /// Run a blocking operation against the store, bounded.
    async fn run<T, F>(&self, op: F) -> Result<T, TriageError>
    where
        F: FnOnce(StoreHandle) -> Result<T, TriageError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        bounded(self.limit, move || op(store)).await
    }

    fn query_service(&self) -> Arc<QueryService> {
        Arc::new(QueryService::new(self.store.clone(), &self.config.triage.query))
    }

    /// Dashboard window ending `lookahead_days` after now.
    fn trailing_window(&self, days: Option<i64>) -> Result<Window, CliError> {
        let query = &self.config.triage.query;
        let days = days.unwrap_or(query.window_days);
        if days < 0 {
            return Err(CliError::Usage(format!("--days must be >= 0, got {}", days)));
        }
        Ok(Window::trailing(Timestamp::now(), days, query.lookahead_days))
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| TriageError::SerializationError(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Initialize new database.
pub async fn cmd_init(config: &AppConfig, force: bool, output: Output) -> Result<(), CliError> {
    let path = config.store.path.clone();

    if config.store.backend == Backend::Memory {
        println!("Memory backend needs no initialization");
        return Ok(());
    }

    if path.exists() {
        if !force {
            return Err(CliError::Io(format!(
                "Database {} already exists. Use --force to overwrite.",
                path.display()
            )));
        }
        std::fs::remove_file(&path)
            .map_err(|e| CliError::Io(format!("Remove {}: {}", path.display(), e)))?;
    }

    let limit = Duration::from_millis(config.triage.query.store_timeout_ms);
    let opener = config.clone();
    bounded(limit, move || open_store(&opener).map(|_| ())).await?;

    if output.json {
        print_json(&serde_json::json!({
            "database": path.to_string_lossy(),
            "backend": config.store.backend.to_string(),
        }))?;
    } else {
        println!("Initialized new redb database at {}", path.display());
    }
    Ok(())
}

// =============================================================================
// INGEST COMMAND
// =============================================================================

/// Read a dump file, refusing anything larger than the extractor accepts.
fn read_dump_file(path: &Path) -> Result<Vec<u8>, String> {
    let canonical = path
        .canonicalize()
        .map_err(|e| format!("Invalid file path '{}': {}", path.display(), e))?;
    let metadata = std::fs::metadata(&canonical)
        .map_err(|e| format!("Cannot read file metadata: {}", e))?;
    if !metadata.is_file() {
        return Err(format!("Path '{}' is not a regular file", path.display()));
    }
    if metadata.len() > MAX_DUMP_BYTES as u64 {
        return Err(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            MAX_DUMP_BYTES
        ));
    }
    std::fs::read(&canonical).map_err(|e| format!("Read file: {}", e))
}

/// Ingest dump files.
pub async fn cmd_ingest(ctx: &Context, files: &[PathBuf], format: &str) -> Result<(), CliError> {
    let format = DumpFormat::parse(format)
        .ok_or_else(|| CliError::Usage(format!("unknown dump format '{}'", format)))?;

    tracing::info!("Ingesting {} file(s) (format: {:?})", files.len(), format);

    // Per-file results in input order; unreadable files fail individually.
    let mut results: Vec<(String, Result<IngestOutcome, String>)> =
        Vec::with_capacity(files.len());
    let mut pending: Vec<(usize, RawDump)> = Vec::new();

    for path in files {
        let label = path.display().to_string();
        match read_dump_file(path) {
            Ok(bytes) => {
                pending.push((
                    results.len(),
                    RawDump {
                        bytes,
                        payload_ref: Some(label.clone()),
                    },
                ));
                results.push((label, Err(String::new())));
            }
            Err(e) => {
                tracing::warn!("Skipping {}: {}", label, e);
                results.push((label, Err(e)));
            }
        }
    }

    let pipeline = Arc::new(
        IngestPipeline::new(ctx.store.clone(), &ctx.config.triage.signature).with_format(format),
    );

    // One bounded store call per dump: the time bound applies to a single
    // record, however many files were given.
    for (slot, raw) in pending {
        let pipeline = pipeline.clone();
        let outcome = ctx
            .run(move |_| pipeline.ingest(&raw.bytes, raw.payload_ref.as_deref()))
            .await;
        let outcome = match outcome {
            Err(e) if e.is_retryable() => return Err(e.into()),
            other => other.map_err(|e| e.to_string()),
        };
        if let Some(entry) = results.get_mut(slot) {
            entry.1 = outcome;
        }
    }

    let failed = results.iter().filter(|(_, r)| r.is_err()).count();

    if ctx.output.json {
        let items: Vec<_> = results
            .iter()
            .map(|(file, result)| match result {
                Ok(outcome) => serde_json::json!({
                    "file": file,
                    "dump": outcome.dump.as_str(),
                    "bucket": outcome.bucket.as_str(),
                    "status": outcome.status,
                }),
                Err(error) => serde_json::json!({ "file": file, "error": error }),
            })
            .collect();
        print_json(&serde_json::json!({
            "ingested": results.len() - failed,
            "failed": failed,
            "results": items,
        }))?;
    } else {
        if !ctx.output.quiet {
            for (file, result) in &results {
                match result {
                    Ok(o) => println!("{}: {} -> {} ({:?})", file, o.dump, o.bucket, o.status),
                    Err(e) => println!("{}: FAILED ({})", file, e),
                }
            }
        }
        println!(
            "Ingested {} of {} dump(s)",
            results.len() - failed,
            results.len()
        );
    }

    if failed > 0 {
        return Err(CliError::Partial {
            failed,
            total: results.len(),
        });
    }
    Ok(())
}

// =============================================================================
// QUERY COMMANDS
// =============================================================================

fn parse_time(flag: &str, value: &str) -> Result<Timestamp, CliError> {
    Timestamp::parse_rfc3339(value)
        .ok_or_else(|| CliError::Usage(format!("--{} expects RFC 3339, got '{}'", flag, value)))
}

/// List active buckets.
pub async fn cmd_buckets(
    ctx: &Context,
    from: Option<&str>,
    to: Option<&str>,
    days: Option<i64>,
) -> Result<(), CliError> {
    let window = match (from, to) {
        (Some(from), Some(to)) => Window {
            start: parse_time("from", from)?,
            end: parse_time("to", to)?,
        },
        _ => ctx.trailing_window(days)?,
    };

    let service = ctx.query_service();
    let buckets = ctx
        .run(move |_| service.list_active_buckets(window.start, window.end))
        .await?;

    if ctx.output.json {
        let items: Vec<_> = buckets
            .iter()
            .map(|b| {
                serde_json::json!({
                    "id": b.id.as_str(),
                    "signature": b.signature.as_str(),
                    "created_at": b.created_at.to_string(),
                    "last_updated": b.last_updated.to_string(),
                    "dump_count": b.dump_count,
                })
            })
            .collect();
        print_json(&items)?;
        return Ok(());
    }

    println!("Active buckets [{}, {})", window.start, window.end);
    println!("==========================");
    for b in &buckets {
        println!("{:>6}  {}  {}", b.dump_count, b.last_updated, b.id);
        if ctx.output.verbose {
            println!("        created {}", b.created_at);
        }
    }
    println!();
    println!("{} bucket(s)", buckets.len());
    Ok(())
}

/// List the dumps of a bucket.
pub async fn cmd_dumps(ctx: &Context, bucket: &str) -> Result<(), CliError> {
    let service = ctx.query_service();
    let id = BucketId::new(bucket);
    let dumps = ctx.run(move |_| service.list_dumps(&id)).await?;

    if ctx.output.json {
        let items: Vec<_> = dumps
            .iter()
            .map(|d| {
                serde_json::json!({
                    "dump_id": d.id.as_str(),
                    "timestamp": d.timestamp.to_string(),
                    "payload_ref": d.payload_ref,
                })
            })
            .collect();
        print_json(&items)?;
        return Ok(());
    }

    println!("Dumps in bucket {}", bucket);
    println!("================");
    for d in &dumps {
        match &d.payload_ref {
            Some(payload) => println!("{}  {}  {}", d.timestamp, d.id, payload),
            None => println!("{}  {}", d.timestamp, d.id),
        }
    }
    println!();
    println!("{} dump(s)", dumps.len());
    Ok(())
}

/// Show the properties of a dump.
pub async fn cmd_properties(ctx: &Context, dump: &str) -> Result<(), CliError> {
    let service = ctx.query_service();
    let id = DumpId::new(dump);
    let json = ctx.run(move |_| service.get_properties_json(&id)).await?;

    if ctx.output.json {
        println!("{}", json);
    } else {
        match serde_json::from_str::<serde_json::Value>(&json) {
            Ok(value) => print_json(&value)?,
            Err(_) => println!("{}", json),
        }
    }
    Ok(())
}

/// Show the dashboard.
pub async fn cmd_dashboard(ctx: &Context, days: Option<i64>) -> Result<(), CliError> {
    let window = ctx.trailing_window(days)?;
    let service = ctx.query_service();
    let view = ctx.run(move |_| service.dashboard(&window)).await?;

    if ctx.output.json {
        print_json(&view)?;
        return Ok(());
    }

    println!("Crash Dashboard [{}, {})", view.window_start, view.window_end);
    println!("===============");
    for bucket in &view.buckets {
        println!();
        println!(
            "{}  ({} dump(s), last {})",
            bucket.id, bucket.dump_count, bucket.last_updated
        );
        if ctx.output.quiet {
            continue;
        }
        for dump in &bucket.dumps {
            println!("  {}  {}", dump.timestamp, dump.dump_id);
            if ctx.output.verbose {
                println!("    {}", dump.properties_json);
            }
        }
    }
    if view.buckets.is_empty() {
        println!("No active buckets");
    }
    Ok(())
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show store status.
pub async fn cmd_status(ctx: &Context) -> Result<(), CliError> {
    let stats = ctx.run(|store| store.stats()).await?;
    let database = ctx.config.store.path.to_string_lossy().to_string();
    let backend = ctx.config.store.backend.to_string();

    if ctx.output.json {
        print_json(&serde_json::json!({
            "database": database,
            "backend": backend,
            "buckets": stats.buckets,
            "dumps": stats.dumps,
            "associations": stats.associations,
        }))?;
        return Ok(());
    }

    println!("Dumpling Triage Status");
    println!("======================");
    println!("Database: {}", database);
    println!("Backend:  {}", backend);
    println!();
    println!("Buckets:      {}", stats.buckets);
    println!("Dumps:        {}", stats.dumps);
    println!("Associations: {}", stats.associations);
    Ok(())
}
