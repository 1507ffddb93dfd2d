//! n8n workflow template parsing
//!
//! Accepts an exported workflow (`{"name", "nodes": [...], "connections": {...}}`)
//! or the template-API wrapper (`{"workflow": {...}}`) and extracts what the
//! content generator needs: node count, the integrations in use and the trigger.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeSet;
use thiserror::Error;

const NODE_TYPE_PREFIXES: &[&str] = &["n8n-nodes-base.", "@n8n/n8n-nodes-langchain."];
const STICKY_NOTE: &str = "stickyNote";

#[derive(Debug, Error)]
pub enum N8nError {
    #[error("Template is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Template has no nodes array")]
    MissingNodes,
}

#[derive(Debug, Clone, Deserialize)]
pub struct N8nNode {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
    #[serde(rename = "type", default, deserialize_with = "null_as_empty")]
    pub node_type: String,
}

/// Exports from older n8n versions carry `null` for unset strings
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl N8nNode {
    /// Node type without its package prefix (`n8n-nodes-base.slack` → `slack`)
    pub fn short_type(&self) -> &str {
        NODE_TYPE_PREFIXES
            .iter()
            .find_map(|prefix| self.node_type.strip_prefix(prefix))
            .unwrap_or(&self.node_type)
    }

    fn is_sticky_note(&self) -> bool {
        self.short_type() == STICKY_NOTE
    }
}

#[derive(Debug, Clone)]
pub struct N8nTemplate {
    pub name: Option<String>,
    pub nodes: Vec<N8nNode>,
    /// Nodes excluding sticky notes
    pub node_count: usize,
    /// Humanized, distinct, sorted
    pub integrations: Vec<String>,
    /// Humanized type of the trigger node
    pub trigger: Option<String>,
}

pub fn parse_template(json: &str) -> Result<N8nTemplate, N8nError> {
    let root: Value = serde_json::from_str(json)?;

    let body = match root.get("workflow") {
        Some(inner) if inner.get("nodes").is_some() => inner,
        _ => &root,
    };

    let nodes_value = body
        .get("nodes")
        .filter(|v| v.is_array())
        .ok_or(N8nError::MissingNodes)?;
    let nodes: Vec<N8nNode> = serde_json::from_value(nodes_value.clone())?;

    let name = body
        .get("name")
        .or_else(|| root.get("name"))
        .and_then(Value::as_str)
        .map(String::from);

    let working: Vec<&N8nNode> = nodes
        .iter()
        .filter(|n| !n.is_sticky_note() && !n.node_type.is_empty())
        .collect();

    let integrations: BTreeSet<String> = working
        .iter()
        .map(|n| humanize_node_type(n.short_type()))
        .collect();

    let trigger = working
        .iter()
        .map(|n| n.short_type())
        .find(|t| t.ends_with("Trigger") || *t == "webhook")
        .map(humanize_node_type);

    Ok(N8nTemplate {
        name,
        node_count: working.len(),
        nodes,
        integrations: integrations.into_iter().collect(),
        trigger,
    })
}

/// `httpRequest` → `Http Request`, `googleSheetsTrigger` → `Google Sheets Trigger`
pub fn humanize_node_type(short_type: &str) -> String {
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut prev: Option<char> = None;

    for c in short_type.chars() {
        if c == '_' || c == '-' || c == ' ' {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev = None;
            continue;
        }
        let boundary = matches!(prev, Some(p) if c.is_uppercase() && !p.is_uppercase());
        if boundary && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        current.push(c);
        prev = Some(c);
    }
    if !current.is_empty() {
        words.push(current);
    }

    words
        .iter()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = r#"{
        "name": "GitHub to Slack",
        "nodes": [
            {"name": "On push", "type": "n8n-nodes-base.githubTrigger"},
            {"name": "Fetch", "type": "n8n-nodes-base.httpRequest"},
            {"name": "Fetch again", "type": "n8n-nodes-base.httpRequest"},
            {"name": "Notify", "type": "n8n-nodes-base.slack"},
            {"name": "Summarize", "type": "@n8n/n8n-nodes-langchain.openAi"},
            {"name": "Note", "type": "n8n-nodes-base.stickyNote"}
        ],
        "connections": {}
    }"#;

    #[test]
    fn test_integrations_humanized_and_deduplicated() {
        let template = parse_template(TEMPLATE).unwrap();
        assert_eq!(template.name.as_deref(), Some("GitHub to Slack"));
        assert_eq!(template.node_count, 5);
        assert_eq!(template.nodes.len(), 6);
        assert_eq!(
            template.integrations,
            vec!["Github Trigger", "Http Request", "Open Ai", "Slack"]
        );
        assert_eq!(template.trigger.as_deref(), Some("Github Trigger"));
    }

    #[test]
    fn test_wrapper_format_accepted() {
        let wrapped = format!(r#"{{"id": 42, "workflow": {}}}"#, TEMPLATE);
        let template = parse_template(&wrapped).unwrap();
        assert_eq!(template.node_count, 5);
        assert_eq!(template.name.as_deref(), Some("GitHub to Slack"));
    }

    #[test]
    fn test_webhook_counts_as_trigger() {
        let json = r#"{"nodes": [
            {"name": "a", "type": "n8n-nodes-base.set"},
            {"name": "b", "type": "n8n-nodes-base.webhook"}
        ]}"#;
        let template = parse_template(json).unwrap();
        assert_eq!(template.trigger.as_deref(), Some("Webhook"));
        assert!(template.name.is_none());
    }

    #[test]
    fn test_null_name_or_type_is_tolerated() {
        let json = r#"{"nodes": [
            {"name": null, "type": "n8n-nodes-base.slack"},
            {"name": "Orphan", "type": null},
            {"name": "Start", "type": "n8n-nodes-base.manualTrigger"}
        ]}"#;
        let template = parse_template(json).unwrap();
        assert_eq!(template.nodes.len(), 3);
        assert_eq!(template.nodes[0].name, "");
        assert_eq!(template.nodes[1].node_type, "");
        assert_eq!(template.node_count, 2);
        assert_eq!(template.integrations, vec!["Manual Trigger", "Slack"]);
    }

    #[test]
    fn test_errors() {
        assert!(matches!(parse_template("{nope"), Err(N8nError::InvalidJson(_))));
        assert!(matches!(parse_template(r#"{"connections": {}}"#), Err(N8nError::MissingNodes)));
        assert!(matches!(parse_template(r#"{"nodes": {}}"#), Err(N8nError::MissingNodes)));
    }

    #[test]
    fn test_humanize_node_type() {
        assert_eq!(humanize_node_type("httpRequest"), "Http Request");
        assert_eq!(humanize_node_type("googleSheetsTrigger"), "Google Sheets Trigger");
        assert_eq!(humanize_node_type("awsS3"), "Aws S3");
        assert_eq!(humanize_node_type("slack"), "Slack");
        assert_eq!(humanize_node_type("my_custom-node"), "My Custom Node");
    }
}
