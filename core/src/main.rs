//! VIGIL operator CLI - inspect and maintain a file-backed audit log
//!
//! ## Usage
//!
//! ```bash
//! # Last 24 hours, newest first
//! vigil --path /var/lib/vigil/audit query
//!
//! # Failed logins this month as CSV
//! vigil query --start 2024-03-01 --types authentication.failure --format csv
//!
//! # Check the hash chain
//! vigil verify
//! ```
//!
//! ## Environment Variables
//!
//! - `VIGIL_AUDIT_PATH`: audit directory when `--path` is not given (default: "audit")
//! - `VIGIL_LOG_LEVEL`: log level (default: "info")
//! - `VIGIL_LOG_FORMAT`: `json` or `pretty` (default: "pretty")

use anyhow::{Context, bail};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::fmt::Write as _;
use std::path::PathBuf;
use tracing::info;
use vigil_core::audit::{
    AuditQuery, AuditQueryResult, AuditStats, Auditor, ChainReport, ExportFormat, SortBy,
    SortOrder, StorageType, export_events,
};
use vigil_core::config::Config;
use vigil_core::telemetry;

#[derive(Parser)]
#[command(name = "vigil")]
#[command(about = "Query and maintain VIGIL audit logs")]
struct Cli {
    /// Audit log directory
    #[arg(long, global = true)]
    path: Option<PathBuf>,
    /// Gzip segments written by this invocation
    #[arg(long, global = true)]
    compression: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Query audit events with filters
    Query {
        /// Start time (RFC3339 or YYYY-MM-DD, default: 24h ago)
        #[arg(long)]
        start: Option<String>,
        /// End time (RFC3339 or YYYY-MM-DD, default: now)
        #[arg(long)]
        end: Option<String>,
        /// Comma-separated event types
        #[arg(long, value_delimiter = ',')]
        types: Vec<String>,
        /// Comma-separated actors
        #[arg(long, value_delimiter = ',')]
        actors: Vec<String>,
        /// Comma-separated resources
        #[arg(long, value_delimiter = ',')]
        resources: Vec<String>,
        /// Maximum results, 0 for all
        #[arg(long, default_value_t = 100)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        /// timestamp, event_type or actor
        #[arg(long, default_value = "timestamp")]
        sort_by: String,
        /// asc or desc
        #[arg(long, default_value = "desc")]
        order: String,
        #[arg(long, value_enum, default_value_t = QueryFormat::Table)]
        format: QueryFormat,
        /// Write results to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Export audit events
    Export {
        /// Start time (default: 7 days ago)
        #[arg(long)]
        start: Option<String>,
        /// End time (default: now)
        #[arg(long)]
        end: Option<String>,
        /// json, csv or xml
        #[arg(long, default_value = "json")]
        format: String,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Show audit log statistics
    Stats,
    /// Remove rotated segments past retention
    Cleanup {
        /// Override the configured retention
        #[arg(long)]
        retention_days: Option<u32>,
    },
    /// Rotate the active segment
    Rotate,
    /// Verify stored hashes and chain links
    Verify {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum QueryFormat {
    Table,
    Json,
    Jsonl,
    Csv,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    telemetry::init(&config.log_level, config.log_format)?;

    if let Some(path) = cli.path {
        config.audit.storage_path = path;
    }
    config.audit.storage_type = StorageType::File;
    config.audit.compression |= cli.compression;

    if let Commands::Cleanup {
        retention_days: Some(days),
    } = cli.command
    {
        config.audit.retention_days = days;
    }

    let auditor = Auditor::start(config.audit.clone())
        .await
        .with_context(|| format!("failed to open {}", config.audit.storage_path.display()))?;

    let result = run(&auditor, cli.command, config.audit.retention_days).await;
    auditor.stop().await?;
    result
}

async fn run(auditor: &Auditor, command: Commands, retention_days: u32) -> anyhow::Result<()> {
    match command {
        Commands::Query {
            start,
            end,
            types,
            actors,
            resources,
            limit,
            offset,
            sort_by,
            order,
            format,
            output,
        } => {
            let now = Utc::now();
            let start = parse_time_or(start.as_deref(), now - Duration::hours(24))?;
            let end = parse_time_or(end.as_deref(), now)?;

            let mut query = AuditQuery::new()
                .between(start, end)
                .limit(limit)
                .offset(offset)
                .sort(sort_by.parse::<SortBy>()?, order.parse::<SortOrder>()?);
            for t in types.into_iter().filter(|t| !t.is_empty()) {
                query = query.event_type(t);
            }
            for a in actors.into_iter().filter(|a| !a.is_empty()) {
                query = query.actor(a);
            }
            for r in resources.into_iter().filter(|r| !r.is_empty()) {
                query = query.resource(r);
            }

            let results = auditor.query(&query).await.context("query failed")?;
            let rendered = match format {
                QueryFormat::Table => format_table(&results).into_bytes(),
                QueryFormat::Json => serde_json::to_vec_pretty(&results)?,
                QueryFormat::Jsonl => format_json_lines(&results)?.into_bytes(),
                QueryFormat::Csv => export_events(&results.events, ExportFormat::Csv)?,
            };
            emit(&rendered, output, "Results written to")
        }
        Commands::Export {
            start,
            end,
            format,
            output,
        } => {
            let now = Utc::now();
            let start = parse_time_or(start.as_deref(), now - Duration::days(7))?;
            let end = parse_time_or(end.as_deref(), now)?;
            let format: ExportFormat = format.parse()?;

            let data = auditor
                .export(start, end, format)
                .await
                .context("export failed")?;
            emit(&data, output, "Exported to")
        }
        Commands::Stats => {
            let stats = auditor.stats().await?;
            print!("{}", format_stats(&stats));
            Ok(())
        }
        Commands::Cleanup { .. } => {
            let removed = auditor.cleanup().await.context("cleanup failed")?;
            println!(
                "Removed {removed} segment(s) older than {retention_days} days"
            );
            Ok(())
        }
        Commands::Rotate => {
            auditor.rotate().await.context("rotation failed")?;
            println!("Audit logs rotated");
            Ok(())
        }
        Commands::Verify { json } => {
            let report = auditor.verify_integrity().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", format_report(&report));
            }
            if !report.is_valid() {
                bail!("audit chain verification failed");
            }
            Ok(())
        }
    }
}

fn emit(data: &[u8], output: Option<PathBuf>, verb: &str) -> anyhow::Result<()> {
    match output {
        Some(path) => {
            std::fs::write(&path, data)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), bytes = data.len(), "Output written");
            println!("{verb} {}", path.display());
        }
        None => println!("{}", String::from_utf8_lossy(data)),
    }
    Ok(())
}

/// RFC3339, `YYYY-MM-DDTHH:MM:SS`, `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DD`, as UTC
fn parse_time(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(t.and_utc());
        }
    }
    if let Some(t) = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(t.and_utc());
    }
    bail!("unable to parse time: {raw}")
}

fn parse_time_or(raw: Option<&str>, default: DateTime<Utc>) -> anyhow::Result<DateTime<Utc>> {
    raw.map(parse_time).transpose().map(|t| t.unwrap_or(default))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let kept: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}

fn format_table(results: &AuditQueryResult) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Total: {} events (showing {})\n",
        results.total_count,
        results.events.len()
    );
    let _ = writeln!(
        out,
        "{:<20} {:<25} {:<20} {:<15} {:<15}",
        "TIMESTAMP", "EVENT TYPE", "ACTOR", "ACTION", "RESOURCE"
    );
    let _ = writeln!(out, "{}", "-".repeat(100));

    for event in &results.events {
        let _ = writeln!(
            out,
            "{:<20} {:<25} {:<20} {:<15} {:<15}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            truncate(event.event_type.as_str(), 25),
            truncate(&event.actor, 20),
            truncate(&event.action, 15),
            truncate(&event.resource, 15),
        );
    }

    if results.has_more {
        out.push_str("\n(More results available - use --offset to paginate)\n");
    }
    out
}

fn format_json_lines(results: &AuditQueryResult) -> anyhow::Result<String> {
    let lines = results
        .events
        .iter()
        .map(serde_json::to_string)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(lines.join("\n"))
}

fn format_stats(stats: &AuditStats) -> String {
    let mut out = String::from("=== Audit Log Statistics ===\n");
    let last = stats
        .last_event_time
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "-".to_string());
    let _ = writeln!(out, "Total Events:     {}", stats.total_events);
    let _ = writeln!(out, "Last Event Time:  {last}");
    let _ = writeln!(out, "Storage Size:     {} bytes", stats.storage_size_bytes);
    let _ = writeln!(out, "Avg Events/Day:   {:.2}", stats.avg_events_per_day);

    out.push_str("\nEvents by Type:\n");
    for (event_type, count) in &stats.events_by_type {
        let _ = writeln!(out, "  {event_type:<30} {count}");
    }

    let mut actors: Vec<_> = stats.events_by_actor.iter().collect();
    actors.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    out.push_str("\nTop Actors:\n");
    for (actor, count) in actors.into_iter().take(10) {
        let _ = writeln!(out, "  {actor:<30} {count}");
    }
    out
}

fn format_report(report: &ChainReport) -> String {
    let mut out = String::new();
    let status = if report.is_valid() { "VALID" } else { "INVALID" };
    let _ = writeln!(out, "Chain:    {status}");
    let _ = writeln!(out, "Checked:  {} events", report.checked);
    let _ = writeln!(out, "Linked:   {}", report.linked);
    if let Some(head) = &report.head {
        let _ = writeln!(out, "Head:     {head}");
    }
    for issue in &report.issues {
        let _ = writeln!(out, "  event {} (position {}): {:?}", issue.id, issue.position, issue.kind);
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_time_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(parse_time("2024-03-01T12:30:00Z").unwrap(), expected);
        assert_eq!(parse_time("2024-03-01T14:30:00+02:00").unwrap(), expected);
        assert_eq!(parse_time("2024-03-01 12:30:00").unwrap(), expected);
        assert_eq!(
            parse_time("2024-03-01").unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
        );
        assert!(parse_time("yesterday").is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a-very-long-actor-name", 10), "a-very-...");
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "vigil", "--path", "/tmp/a", "query", "--types", "a.b,c.d", "--format", "csv",
        ])
        .unwrap();
        assert_eq!(cli.path, Some(PathBuf::from("/tmp/a")));
        match cli.command {
            Commands::Query { types, format, .. } => {
                assert_eq!(types, vec!["a.b", "c.d"]);
                assert!(matches!(format, QueryFormat::Csv));
            }
            _ => panic!("expected query"),
        }
    }
}
