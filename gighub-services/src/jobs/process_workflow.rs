//! ProcessN8nWorkflow: parse the template, then generate all AI content

use anyhow::{anyhow, Context};
use tracing::{error, info, warn};

use gighub_common::db::{AiStatus, Workflow};

use super::JobRunner;
use crate::ai::WorkflowContext;
use crate::db::workflows;
use crate::n8n;

pub(super) async fn run(runner: &JobRunner, workflow_id: i64) -> anyhow::Result<()> {
    let Some(workflow) = workflows::get_workflow(&runner.db, workflow_id).await? else {
        warn!(workflow_id, "Workflow no longer exists, skipping processing");
        return Ok(());
    };

    runner
        .set_workflow_status(workflow_id, AiStatus::Processing, None)
        .await?;

    match process(runner, &workflow).await {
        Ok(()) => {
            runner
                .set_workflow_status(workflow_id, AiStatus::Completed, None)
                .await?;
            info!(workflow_id, "Workflow processed");
            Ok(())
        }
        Err(e) => {
            let message = format!("{:#}", e);
            error!(workflow_id, error = %message, "Workflow processing failed");
            runner
                .set_workflow_status(workflow_id, AiStatus::Failed, Some(&message))
                .await?;
            Err(e)
        }
    }
}

async fn process(runner: &JobRunner, workflow: &Workflow) -> anyhow::Result<()> {
    let generator = runner.generator()?;

    let raw = template_source(runner, workflow).await?;
    let template = n8n::parse_template(&raw).context("Parse n8n template")?;
    info!(
        workflow_id = workflow.id,
        nodes = template.node_count,
        integrations = template.integrations.len(),
        "Template parsed"
    );

    workflows::store_template_analysis(
        &runner.db,
        workflow.id,
        template.node_count as i64,
        &template.integrations,
    )
    .await?;

    let ctx = WorkflowContext {
        title: workflow.title.clone(),
        description: workflow.description.clone(),
        category: workflow.category.clone(),
        integrations: template.integrations.clone(),
        node_count: template.node_count as i64,
        trigger: template.trigger.clone(),
    };

    let seo = generator.generate_seo(&ctx).await.context("Generate SEO copy")?;
    workflows::store_seo(&runner.db, workflow.id, &seo.title, &seo.description).await?;

    let post = generator
        .generate_blog_post(&ctx)
        .await
        .context("Generate blog post")?;
    workflows::store_blog_post(&runner.db, workflow.id, &post).await?;

    let faqs = generator.generate_faqs(&ctx).await.context("Generate FAQs")?;
    workflows::store_faqs(&runner.db, workflow.id, &faqs).await?;

    Ok(())
}

/// Stored template JSON, else the body of `source_url`
async fn template_source(runner: &JobRunner, workflow: &Workflow) -> anyhow::Result<String> {
    if let Some(json) = &workflow.template_json {
        return Ok(json.clone());
    }

    let url = workflow
        .source_url
        .as_deref()
        .ok_or_else(|| anyhow!("Workflow has neither template JSON nor a source URL"))?;

    info!(workflow_id = workflow.id, url, "Fetching workflow template");
    let response = runner
        .http
        .get(url)
        .send()
        .await
        .with_context(|| format!("Fetch template from {}", url))?;

    let status = response.status();
    if !status.is_success() {
        return Err(anyhow!("Template fetch from {} returned {}", url, status));
    }
    Ok(response.text().await?)
}
