//! Workflow persistence

use chrono::Utc;
use sqlx::types::Json;
use sqlx::SqlitePool;

use gighub_common::db::{AiStatus, Faq, Workflow};
use gighub_common::Result;

const WORKFLOW_COLUMNS: &str = "id, title, slug, description, category, source_url, template_json, \
     node_count, integrations, seo_title, seo_description, blog_post, faqs, ai_status, ai_error, \
     created_at, updated_at";

#[derive(Debug, Clone, Default)]
pub struct NewWorkflow {
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub source_url: Option<String>,
    pub template_json: Option<String>,
}

/// Partial update; `None` leaves a column unchanged
#[derive(Debug, Clone, Default)]
pub struct WorkflowChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub source_url: Option<String>,
    pub template_json: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct WorkflowFilter {
    /// Substring of title or description
    pub search: Option<String>,
    pub category: Option<String>,
    pub ai_status: Option<AiStatus>,
}

/// URL slug: lowercase ASCII alphanumerics separated by single dashes
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "workflow".to_string()
    } else {
        slug
    }
}

/// First free slug among `base`, `base-2`, `base-3`, ...
async fn unique_slug(db: &SqlitePool, base: &str) -> Result<String> {
    let taken: Vec<String> =
        sqlx::query_scalar("SELECT slug FROM workflows WHERE slug = ? OR slug LIKE ? || '-%'")
            .bind(base)
            .bind(base)
            .fetch_all(db)
            .await?;

    if !taken.iter().any(|s| s == base) {
        return Ok(base.to_string());
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}-{}", base, n);
        if !taken.contains(&candidate) {
            return Ok(candidate);
        }
        n += 1;
    }
}

/// Attempts at claiming a slug before giving up
const SLUG_ATTEMPTS: usize = 5;

/// Insert a workflow under the first free slug for its title
///
/// The slug is chosen before the insert, so a concurrent create can claim it
/// first; a unique violation picks the next free slug and tries again.
pub async fn create_workflow(db: &SqlitePool, new: &NewWorkflow) -> Result<Workflow> {
    let base = slugify(&new.title);
    let mut attempt = 1;
    loop {
        let slug = unique_slug(db, &base).await?;
        match insert_workflow(db, new, &slug).await {
            Ok(id) => {
                tracing::info!(workflow_id = id, slug = %slug, "Workflow created");
                return require_workflow(db, id).await;
            }
            Err(e) if e.is_unique_violation() && attempt < SLUG_ATTEMPTS => {
                tracing::debug!(slug = %slug, attempt, "Slug claimed concurrently, retrying");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn insert_workflow(db: &SqlitePool, new: &NewWorkflow, slug: &str) -> Result<i64> {
    let now = Utc::now();
    Ok(sqlx::query_scalar(
        r#"
        INSERT INTO workflows (title, slug, description, category, source_url, template_json,
                               ai_status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, 'pending', ?, ?)
        RETURNING id
        "#,
    )
    .bind(&new.title)
    .bind(slug)
    .bind(&new.description)
    .bind(&new.category)
    .bind(&new.source_url)
    .bind(&new.template_json)
    .bind(now)
    .bind(now)
    .fetch_one(db)
    .await?)
}

pub async fn get_workflow(db: &SqlitePool, id: i64) -> Result<Option<Workflow>> {
    Ok(sqlx::query_as::<_, Workflow>(&format!(
        "SELECT {} FROM workflows WHERE id = ?",
        WORKFLOW_COLUMNS
    ))
    .bind(id)
    .fetch_optional(db)
    .await?)
}

/// Like [`get_workflow`] but a missing row is [`gighub_common::Error::NotFound`]
pub async fn require_workflow(db: &SqlitePool, id: i64) -> Result<Workflow> {
    get_workflow(db, id)
        .await?
        .ok_or_else(|| gighub_common::Error::NotFound(format!("Workflow {}", id)))
}

/// One page of workflows (newest first) plus the total matching count
pub async fn list_workflows(
    db: &SqlitePool,
    filter: &WorkflowFilter,
    limit: i64,
    offset: i64,
) -> Result<(Vec<Workflow>, i64)> {
    let pattern = filter.search.as_ref().map(|s| format!("%{}%", s));
    let status = filter.ai_status.map(|s| s.as_str());

    const WHERE: &str = r#"
        WHERE (?1 IS NULL OR title LIKE ?1 OR description LIKE ?1)
          AND (?2 IS NULL OR category = ?2)
          AND (?3 IS NULL OR ai_status = ?3)
    "#;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM workflows {}", WHERE))
        .bind(&pattern)
        .bind(&filter.category)
        .bind(status)
        .fetch_one(db)
        .await?;

    let rows = sqlx::query_as::<_, Workflow>(&format!(
        "SELECT {} FROM workflows {} ORDER BY id DESC LIMIT ?4 OFFSET ?5",
        WORKFLOW_COLUMNS, WHERE
    ))
    .bind(&pattern)
    .bind(&filter.category)
    .bind(status)
    .bind(limit)
    .bind(offset)
    .fetch_all(db)
    .await?;

    Ok((rows, total))
}

pub async fn update_workflow(
    db: &SqlitePool,
    id: i64,
    changes: &WorkflowChanges,
) -> Result<Option<Workflow>> {
    let result = sqlx::query(
        r#"
        UPDATE workflows SET
            title = COALESCE(?, title),
            description = COALESCE(?, description),
            category = COALESCE(?, category),
            source_url = COALESCE(?, source_url),
            template_json = COALESCE(?, template_json),
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&changes.title)
    .bind(&changes.description)
    .bind(&changes.category)
    .bind(&changes.source_url)
    .bind(&changes.template_json)
    .bind(Utc::now())
    .bind(id)
    .execute(db)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }
    get_workflow(db, id).await
}

pub async fn delete_workflow(db: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Set `ai_status`; `ai_error` is replaced by `error` (cleared when `None`)
pub async fn set_ai_status(
    db: &SqlitePool,
    id: i64,
    status: AiStatus,
    error: Option<&str>,
) -> Result<()> {
    sqlx::query("UPDATE workflows SET ai_status = ?, ai_error = ?, updated_at = ? WHERE id = ?")
        .bind(status)
        .bind(error)
        .bind(Utc::now())
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn store_template_analysis(
    db: &SqlitePool,
    id: i64,
    node_count: i64,
    integrations: &[String],
) -> Result<()> {
    sqlx::query("UPDATE workflows SET node_count = ?, integrations = ?, updated_at = ? WHERE id = ?")
        .bind(node_count)
        .bind(Json(integrations))
        .bind(Utc::now())
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn store_seo(db: &SqlitePool, id: i64, title: &str, description: &str) -> Result<()> {
    sqlx::query("UPDATE workflows SET seo_title = ?, seo_description = ?, updated_at = ? WHERE id = ?")
        .bind(title)
        .bind(description)
        .bind(Utc::now())
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn store_blog_post(db: &SqlitePool, id: i64, blog_post: &str) -> Result<()> {
    sqlx::query("UPDATE workflows SET blog_post = ?, updated_at = ? WHERE id = ?")
        .bind(blog_post)
        .bind(Utc::now())
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn store_faqs(db: &SqlitePool, id: i64, faqs: &[Faq]) -> Result<()> {
    sqlx::query("UPDATE workflows SET faqs = ?, updated_at = ? WHERE id = ?")
        .bind(Json(faqs))
        .bind(Utc::now())
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}
