//! Prompt text for workflow content generation

use super::generator::WorkflowContext;

pub const SYSTEM_PROMPT: &str = "You are a technical copywriter for an automation marketplace. \
Write accurate, concise copy about n8n workflow templates. Never invent integrations \
that are not listed.";

fn describe(ctx: &WorkflowContext) -> String {
    let mut out = format!("Workflow title: {}\n", ctx.title);
    if let Some(category) = &ctx.category {
        out.push_str(&format!("Category: {}\n", category));
    }
    if let Some(description) = &ctx.description {
        out.push_str(&format!("Description: {}\n", description));
    }
    if let Some(trigger) = &ctx.trigger {
        out.push_str(&format!("Trigger: {}\n", trigger));
    }
    out.push_str(&format!("Node count: {}\n", ctx.node_count));
    if ctx.integrations.is_empty() {
        out.push_str("Integrations: none listed\n");
    } else {
        out.push_str(&format!("Integrations: {}\n", ctx.integrations.join(", ")));
    }
    out
}

pub fn seo_prompt(ctx: &WorkflowContext) -> String {
    format!(
        "{}\nWrite SEO metadata for this workflow's landing page.\n\
         Respond with exactly two lines:\n\
         TITLE: <at most 60 characters>\n\
         DESCRIPTION: <at most 160 characters>",
        describe(ctx)
    )
}

pub fn blog_post_prompt(ctx: &WorkflowContext) -> String {
    format!(
        "{}\nWrite a blog post in Markdown (400-700 words) explaining what this workflow \
         automates, who it is for, how each integration is used, and how to set it up. \
         Start with a level-one heading.",
        describe(ctx)
    )
}

pub fn faq_prompt(ctx: &WorkflowContext, max: usize) -> String {
    format!(
        "{}\nWrite up to {} frequently asked questions about this workflow.\n\
         Respond with only a JSON array of objects with \"question\" and \"answer\" string fields.",
        describe(ctx),
        max
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_lists_integrations() {
        let ctx = WorkflowContext {
            title: "Slack alerts".into(),
            description: None,
            category: Some("DevOps".into()),
            integrations: vec!["Http Request".into(), "Slack".into()],
            node_count: 4,
            trigger: Some("Cron".into()),
        };
        let prompt = seo_prompt(&ctx);
        assert!(prompt.contains("Integrations: Http Request, Slack"));
        assert!(prompt.contains("Category: DevOps"));
        assert!(prompt.contains("TITLE:"));
        assert!(!prompt.contains("Description:"));
    }
}
