//! CSV workflow import
//!
//! Columns: `title,category,description,source_url,template_path`. The header
//! row is required; column order is free. `template_path` is resolved relative
//! to the CSV file. Invalid rows are reported and skipped, the rest become
//! `pending` workflows.

use anyhow::{bail, Context};
use serde::Deserialize;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use gighub_common::queue::{dispatch, Job};
use gighub_common::ValidationErrors;

use crate::db::workflows::{create_workflow, NewWorkflow};
use crate::n8n;

const TITLE_MAX: usize = 255;

#[derive(Debug, Deserialize)]
struct ImportRow {
    title: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    source_url: Option<String>,
    #[serde(default)]
    template_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Queue ProcessN8nWorkflow for rows that carry template data
    pub dispatch: bool,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRow {
    /// 1-based line where the record starts (header is line 1)
    pub line: u64,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct ImportReport {
    pub imported: Vec<i64>,
    pub dispatched: usize,
    pub skipped: Vec<SkippedRow>,
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Validate one row and load its template file
fn prepare_row(row: ImportRow, base_dir: &Path) -> Result<NewWorkflow, String> {
    let title = blank_to_none(row.title);
    let source_url = blank_to_none(row.source_url);
    let template_path = blank_to_none(row.template_path);

    let mut errors = ValidationErrors::new();
    errors.required("title", title.as_deref());
    errors.max_len("title", title.as_deref(), TITLE_MAX);
    errors.url("source_url", source_url.as_deref());
    if let Some(message) = errors.first_message() {
        return Err(message.to_string());
    }

    let template_json = match template_path {
        Some(rel) => {
            let path: PathBuf = base_dir.join(&rel);
            let json = std::fs::read_to_string(&path)
                .map_err(|e| format!("Cannot read template {}: {}", path.display(), e))?;
            n8n::parse_template(&json).map_err(|e| format!("{}: {}", rel, e))?;
            Some(json)
        }
        None => None,
    };

    Ok(NewWorkflow {
        title: title.unwrap_or_default(),
        description: blank_to_none(row.description),
        category: blank_to_none(row.category),
        source_url,
        template_json,
    })
}

/// Quoted fields may span lines, so the record's own start line is used
fn record_line(position: Option<&csv::Position>) -> u64 {
    position.map(|p| p.line()).unwrap_or_default()
}

pub async fn import_workflows_csv(
    db: &SqlitePool,
    csv_path: &Path,
    options: &ImportOptions,
) -> anyhow::Result<ImportReport> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .flexible(true)
        .from_path(csv_path)
        .with_context(|| format!("Open {}", csv_path.display()))?;

    let headers = reader.headers().context("Read CSV header")?.clone();
    if !headers.iter().any(|h| h == "title") {
        bail!("CSV header must include a 'title' column");
    }

    let base_dir = csv_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut report = ImportReport::default();

    for record in reader.records() {
        let (line, prepared) = match record {
            Ok(record) => (
                record_line(record.position()),
                record
                    .deserialize::<ImportRow>(Some(&headers))
                    .map_err(|e| format!("Malformed row: {}", e))
                    .and_then(|row| prepare_row(row, &base_dir)),
            ),
            Err(e) => (record_line(e.position()), Err(format!("Malformed row: {}", e))),
        };

        let new = match prepared {
            Ok(new) => new,
            Err(reason) => {
                warn!(line, reason = %reason, "Skipping CSV row");
                report.skipped.push(SkippedRow { line, reason });
                continue;
            }
        };

        let has_source = new.template_json.is_some() || new.source_url.is_some();
        let workflow = create_workflow(db, &new).await?;
        report.imported.push(workflow.id);

        if options.dispatch && has_source {
            dispatch(
                db,
                &Job::ProcessN8nWorkflow {
                    workflow_id: workflow.id,
                },
                options.max_attempts,
            )
            .await?;
            report.dispatched += 1;
        }
    }

    info!(
        imported = report.imported.len(),
        dispatched = report.dispatched,
        skipped = report.skipped.len(),
        "CSV import finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gighub_common::db::init_memory_pool;
    use gighub_common::queue::{pending_count, AI_QUEUE};
    use std::fs;

    const TEMPLATE: &str = r#"{"nodes": [{"name": "a", "type": "n8n-nodes-base.slack"}]}"#;

    fn options(dispatch: bool) -> ImportOptions {
        ImportOptions {
            dispatch,
            max_attempts: 3,
        }
    }

    #[tokio::test]
    async fn test_import_valid_and_invalid_rows() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("templates")).unwrap();
        fs::write(dir.path().join("templates/slack.json"), TEMPLATE).unwrap();
        fs::write(dir.path().join("templates/broken.json"), "{}").unwrap();

        let csv_path = dir.path().join("workflows.csv");
        fs::write(
            &csv_path,
            "title,category,description,source_url,template_path\n\
             Slack digest,Comms,Daily digest,,templates/slack.json\n\
             ,Comms,missing title,,\n\
             Remote one,Ops,,https://n8n.io/workflows/1.json,\n\
             Bad URL,Ops,,ftp://nope,\n\
             Broken template,Ops,,,templates/broken.json\n\
             Missing file,Ops,,,templates/none.json\n\
             Plain,,,,\n",
        )
        .unwrap();

        let db = init_memory_pool().await.unwrap();
        let report = import_workflows_csv(&db, &csv_path, &options(true)).await.unwrap();

        assert_eq!(report.imported.len(), 3);
        assert_eq!(report.dispatched, 2);
        let lines: Vec<u64> = report.skipped.iter().map(|s| s.line).collect();
        assert_eq!(lines, vec![3, 5, 6, 7]);
        assert!(report.skipped[0].reason.contains("title field is required"));
        assert_eq!(pending_count(&db, AI_QUEUE).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_skipped_line_follows_multiline_records() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("w.csv");
        fs::write(
            &csv_path,
            "title,description\n\
             First,\"spans\nthree\nlines\"\n\
             ,no title\n",
        )
        .unwrap();

        let db = init_memory_pool().await.unwrap();
        let report = import_workflows_csv(&db, &csv_path, &options(false)).await.unwrap();

        assert_eq!(report.imported.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].line, 5);
    }

    #[tokio::test]
    async fn test_no_dispatch_and_column_order() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("w.csv");
        fs::write(&csv_path, "source_url,title\nhttps://example.com/t.json,Reordered\n").unwrap();

        let db = init_memory_pool().await.unwrap();
        let report = import_workflows_csv(&db, &csv_path, &options(false)).await.unwrap();

        assert_eq!(report.imported.len(), 1);
        assert_eq!(report.dispatched, 0);
        assert_eq!(pending_count(&db, AI_QUEUE).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_header_without_title_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("w.csv");
        fs::write(&csv_path, "name,category\nfoo,bar\n").unwrap();

        let db = init_memory_pool().await.unwrap();
        assert!(import_workflows_csv(&db, &csv_path, &options(true)).await.is_err());
    }
}
