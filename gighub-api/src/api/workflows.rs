//! Workflow catalogue
//!
//! Creating a workflow with template data (inline `template` or a
//! `source_url`) queues `ProcessN8nWorkflow`; so does changing either on
//! update. AI content itself is only written by the queue jobs.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use gighub_common::db::{AiStatus, Workflow};
use gighub_common::queue::{dispatch, ContentSection, Job};
use gighub_common::ValidationErrors;
use gighub_services::db::workflows::{
    self as store, NewWorkflow, WorkflowChanges, WorkflowFilter,
};
use gighub_services::n8n;

use super::clean;
use crate::error::{ApiError, ApiResult};
use crate::extract::{Json, Path, Query};
use crate::pagination::{PageParams, Paginated};
use crate::AppState;

const TITLE_MAX: usize = 255;

#[derive(Debug, Deserialize)]
pub struct WorkflowQuery {
    pub search: Option<String>,
    pub category: Option<String>,
    pub ai_status: Option<AiStatus>,
}

/// Create/update body
///
/// `template` may be the n8n export as a JSON object or as a string.
#[derive(Debug, Default, Deserialize)]
pub struct WorkflowRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub source_url: Option<String>,
    pub template: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RegenerateRequest {
    #[serde(default)]
    pub sections: Vec<ContentSection>,
}

#[derive(Debug, Serialize)]
pub struct RegenerateResponse {
    pub message: String,
    pub workflow_id: i64,
    pub sections: Vec<ContentSection>,
}

struct ValidWorkflow {
    title: Option<String>,
    description: Option<String>,
    category: Option<String>,
    source_url: Option<String>,
    template_json: Option<String>,
}

fn validate(req: WorkflowRequest, creating: bool) -> Result<ValidWorkflow, ValidationErrors> {
    let title = clean(req.title);
    let source_url = clean(req.source_url);

    let mut errors = ValidationErrors::new();
    if creating {
        errors.required("title", title.as_deref());
    }
    errors.max_len("title", title.as_deref(), TITLE_MAX);
    errors.url("source_url", source_url.as_deref());

    let template_json = match req.template {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    };
    if let Some(json) = &template_json {
        if let Err(e) = n8n::parse_template(json) {
            errors.add("template", format!("The template is not a valid n8n workflow: {}.", e));
        }
    }
    errors.into_result()?;

    Ok(ValidWorkflow {
        title,
        description: clean(req.description),
        category: clean(req.category),
        source_url,
        template_json,
    })
}

async fn queue_processing(state: &AppState, workflow_id: i64) -> ApiResult<()> {
    dispatch(&state.db, &Job::ProcessN8nWorkflow { workflow_id }, state.max_attempts).await?;
    Ok(())
}

/// GET /api/workflows
pub async fn list_workflows(
    State(state): State<AppState>,
    Query(page): Query<PageParams>,
    Query(query): Query<WorkflowQuery>,
) -> ApiResult<Json<Paginated<Workflow>>> {
    let page = page.resolve();
    let filter = WorkflowFilter {
        search: clean(query.search),
        category: clean(query.category),
        ai_status: query.ai_status,
    };
    let (rows, total) = store::list_workflows(&state.db, &filter, page.limit(), page.offset()).await?;
    Ok(Json(Paginated::new(rows, page, total)))
}

/// POST /api/workflows
pub async fn create_workflow(
    State(state): State<AppState>,
    Json(req): Json<WorkflowRequest>,
) -> ApiResult<(StatusCode, Json<Workflow>)> {
    let valid = validate(req, true)?;

    let workflow = store::create_workflow(
        &state.db,
        &NewWorkflow {
            title: valid.title.unwrap_or_default(),
            description: valid.description,
            category: valid.category,
            source_url: valid.source_url,
            template_json: valid.template_json,
        },
    )
    .await?;

    if workflow.has_template_source() {
        queue_processing(&state, workflow.id).await?;
    }
    info!(workflow_id = workflow.id, slug = %workflow.slug, "Workflow created");

    Ok((StatusCode::CREATED, Json(workflow)))
}

/// GET /api/workflows/:id
pub async fn show_workflow(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Workflow>> {
    Ok(Json(store::require_workflow(&state.db, id).await?))
}

/// PUT /api/workflows/:id
pub async fn update_workflow(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<WorkflowRequest>,
) -> ApiResult<Json<Workflow>> {
    let valid = validate(req, false)?;
    let source_changed = valid.template_json.is_some() || valid.source_url.is_some();

    let changes = WorkflowChanges {
        title: valid.title,
        description: valid.description,
        category: valid.category,
        source_url: valid.source_url,
        template_json: valid.template_json,
    };
    let mut workflow = store::update_workflow(&state.db, id, &changes)
        .await?
        .ok_or_else(|| ApiError::not_found("Workflow"))?;

    if source_changed {
        store::set_ai_status(&state.db, id, AiStatus::Pending, None).await?;
        queue_processing(&state, id).await?;
        workflow.ai_status = AiStatus::Pending;
        workflow.ai_error = None;
    }
    Ok(Json(workflow))
}

/// DELETE /api/workflows/:id
pub async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    if store::delete_workflow(&state.db, id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("Workflow"))
    }
}

/// POST /api/workflows/:id/regenerate
///
/// Body is optional; no sections means all of them.
pub async fn regenerate_workflow(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Option<Json<RegenerateRequest>>,
) -> ApiResult<(StatusCode, Json<RegenerateResponse>)> {
    let workflow = store::require_workflow(&state.db, id).await?;
    let mut sections: Vec<ContentSection> = Vec::new();
    for section in body.map(|Json(b)| b.sections).unwrap_or_default() {
        if !sections.contains(&section) {
            sections.push(section);
        }
    }

    dispatch(
        &state.db,
        &Job::RegenerateWorkflowAiContent {
            workflow_id: workflow.id,
            sections: sections.clone(),
        },
        state.max_attempts,
    )
    .await?;

    let sections = if sections.is_empty() {
        ContentSection::ALL.to_vec()
    } else {
        sections
    };
    info!(workflow_id = workflow.id, ?sections, "Workflow regeneration queued");

    Ok((
        StatusCode::ACCEPTED,
        Json(RegenerateResponse {
            message: "Regeneration queued.".to_string(),
            workflow_id: workflow.id,
            sections,
        }),
    ))
}

pub fn workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows", get(list_workflows).post(create_workflow))
        .route(
            "/api/workflows/:id",
            get(show_workflow).put(update_workflow).delete(delete_workflow),
        )
        .route("/api/workflows/:id/regenerate", post(regenerate_workflow))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_template_accepts_object_and_string() {
        let object = WorkflowRequest {
            title: Some("A".into()),
            template: Some(json!({"nodes": [{"name": "x", "type": "n8n-nodes-base.slack"}]})),
            ..Default::default()
        };
        assert!(validate(object, true).unwrap().template_json.is_some());

        let string = WorkflowRequest {
            title: Some("A".into()),
            template: Some(json!(r#"{"nodes": []}"#)),
            ..Default::default()
        };
        assert!(validate(string, true).unwrap().template_json.is_some());
    }

    #[test]
    fn test_invalid_template_and_missing_title() {
        let req = WorkflowRequest {
            template: Some(json!({"connections": {}})),
            source_url: Some("ftp://x".into()),
            ..Default::default()
        };
        let errors = validate(req, true).err().unwrap();
        assert!(errors.has("title"));
        assert!(errors.has("template"));
        assert!(errors.has("source_url"));
    }

    #[test]
    fn test_update_does_not_require_title() {
        assert!(validate(WorkflowRequest::default(), false).is_ok());
    }
}
