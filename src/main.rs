use anyhow::{bail, Context, Result};
use std::env;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use supporter_analytics::{batch_reports, open_database, SnapshotIngester};

const DEFAULT_DB: &str = "supporters.db";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("import") => {
            let csv_path = args
                .get(2)
                .context("usage: supporter-analytics import <csv-path> [db-path]")?;
            let db_path = args.get(3).map(String::as_str).unwrap_or(DEFAULT_DB);
            run_import(Path::new(csv_path), Path::new(db_path))
        }
        Some("list") => {
            let db_path = args.get(2).map(String::as_str).unwrap_or(DEFAULT_DB);
            run_list(Path::new(db_path))
        }
        _ => {
            bail!(
                "usage: supporter-analytics <command>\n\
                 \n\
                 commands:\n\
                 \x20 import <csv-path> [db-path]   ingest one snapshot export\n\
                 \x20 list [db-path]                show batches, newest first, with revenue"
            );
        }
    }
}

fn run_import(csv_path: &Path, db_path: &Path) -> Result<()> {
    let ingester = SnapshotIngester::open(db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;

    let summary = ingester
        .ingest_path(csv_path)
        .with_context(|| format!("failed to import {}", csv_path.display()))?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn run_list(db_path: &Path) -> Result<()> {
    let conn = open_database(db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;

    let reports = batch_reports(&conn, true)?;
    if reports.is_empty() {
        println!("No batches ingested yet.");
        return Ok(());
    }

    for report in reports {
        println!(
            "#{:<4} {:<28} {}  rows={:<5} active={:<5} net={:<+5} lost={:<4} revenue=${:.2}",
            report.batch_id,
            report.source_label,
            report.created_at,
            report.row_count,
            report.active_count,
            report.net_change,
            report.lost_count,
            report.revenue.unwrap_or(0.0),
        );
    }
    Ok(())
}
