//! RegenerateWorkflowAiContent: rebuild selected sections from stored data

use anyhow::Context;
use tracing::{error, info, warn};

use gighub_common::db::{AiStatus, Workflow};
use gighub_common::queue::ContentSection;

use super::JobRunner;
use crate::ai::WorkflowContext;
use crate::db::workflows;
use crate::n8n;

pub(super) async fn run(
    runner: &JobRunner,
    workflow_id: i64,
    sections: &[ContentSection],
) -> anyhow::Result<()> {
    let Some(workflow) = workflows::get_workflow(&runner.db, workflow_id).await? else {
        warn!(workflow_id, "Workflow no longer exists, skipping regeneration");
        return Ok(());
    };

    let sections: &[ContentSection] = if sections.is_empty() {
        &ContentSection::ALL
    } else {
        sections
    };

    runner
        .set_workflow_status(workflow_id, AiStatus::Processing, None)
        .await?;

    match regenerate(runner, &workflow, sections).await {
        Ok(()) => {
            runner
                .set_workflow_status(workflow_id, AiStatus::Completed, None)
                .await?;
            info!(workflow_id, ?sections, "Workflow content regenerated");
            Ok(())
        }
        Err(e) => {
            let message = format!("{:#}", e);
            error!(workflow_id, error = %message, "Workflow regeneration failed");
            runner
                .set_workflow_status(workflow_id, AiStatus::Failed, Some(&message))
                .await?;
            Err(e)
        }
    }
}

async fn regenerate(
    runner: &JobRunner,
    workflow: &Workflow,
    sections: &[ContentSection],
) -> anyhow::Result<()> {
    let generator = runner.generator()?;

    // Trigger is not stored; recover it from the template when we have one
    let trigger = workflow
        .template_json
        .as_deref()
        .and_then(|json| n8n::parse_template(json).ok())
        .and_then(|t| t.trigger);
    let ctx = WorkflowContext::from_workflow(workflow, trigger);

    for section in sections {
        match section {
            ContentSection::Seo => {
                let seo = generator.generate_seo(&ctx).await.context("Generate SEO copy")?;
                workflows::store_seo(&runner.db, workflow.id, &seo.title, &seo.description).await?;
            }
            ContentSection::BlogPost => {
                let post = generator
                    .generate_blog_post(&ctx)
                    .await
                    .context("Generate blog post")?;
                workflows::store_blog_post(&runner.db, workflow.id, &post).await?;
            }
            ContentSection::Faqs => {
                let faqs = generator.generate_faqs(&ctx).await.context("Generate FAQs")?;
                workflows::store_faqs(&runner.db, workflow.id, &faqs).await?;
            }
        }
    }
    Ok(())
}
