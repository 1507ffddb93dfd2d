//! Workflow AI generator
//!
//! Wraps an LLM completion endpoint with API key rotation. A single call to
//! [`WorkflowAiGenerator::generate`] walks the key pool:
//!
//! - 2xx returns the completion
//! - 429 or 401/403 rotates to the next key immediately
//! - 5xx or a transport error retries the same key up to `max_server_retries`
//!   times with exponential backoff, then rotates
//! - any other 4xx fails the call
//!
//! Each key is tried at most once per call; when all have been used up the call
//! fails with [`GeneratorError::AllKeysExhausted`].

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use gighub_common::config::AiConfig;
use gighub_common::db::{Faq, Workflow};

use super::client::{extract_content, ChatMessage, ChatRequest, CompletionTransport, HttpTransport};
use super::key_pool::{key_hint, KeyPool};
use super::prompts;
use super::GeneratorError;

pub const SEO_TITLE_MAX: usize = 60;
pub const SEO_DESCRIPTION_MAX: usize = 160;
pub const MAX_FAQS: usize = 8;

/// Upper bound for one backoff sleep
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Facts about a workflow fed into every prompt
#[derive(Debug, Clone, Default)]
pub struct WorkflowContext {
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub integrations: Vec<String>,
    pub node_count: i64,
    pub trigger: Option<String>,
}

impl WorkflowContext {
    pub fn from_workflow(workflow: &Workflow, trigger: Option<String>) -> Self {
        Self {
            title: workflow.title.clone(),
            description: workflow.description.clone(),
            category: workflow.category.clone(),
            integrations: workflow.integrations.0.clone(),
            node_count: workflow.node_count,
            trigger,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeoCopy {
    pub title: String,
    pub description: String,
}

/// Result of one request against one key
enum Attempt {
    Done(String),
    /// Key is unusable for the rest of this call
    Rotate(&'static str),
    /// Worth retrying with the same key
    Retry(String),
    Fail(GeneratorError),
}

pub struct WorkflowAiGenerator {
    keys: KeyPool,
    transport: Arc<dyn CompletionTransport>,
    limiter: Option<DefaultDirectRateLimiter>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    max_server_retries: u32,
    retry_base_delay: Duration,
}

impl WorkflowAiGenerator {
    pub fn new(keys: KeyPool, transport: Arc<dyn CompletionTransport>, config: &AiConfig) -> Self {
        let limiter = config
            .requests_per_minute
            .and_then(NonZeroU32::new)
            .map(|rpm| RateLimiter::direct(Quota::per_minute(rpm)));

        Self {
            keys,
            transport,
            limiter,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_server_retries: config.max_server_retries,
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }

    /// Generator over the HTTP transport
    pub fn from_config(config: &AiConfig, keys: Vec<String>) -> Result<Self, GeneratorError> {
        let pool = KeyPool::new(keys)?;
        let transport =
            HttpTransport::new(config).map_err(|e| GeneratorError::Client(e.to_string()))?;
        info!(keys = pool.len(), model = %config.model, "AI generator initialized");
        Ok(Self::new(pool, Arc::new(transport), config))
    }

    pub fn key_pool(&self) -> &KeyPool {
        &self.keys
    }

    /// Send a chat completion, rotating keys as described in the module docs
    pub async fn generate(&self, messages: Vec<ChatMessage>) -> Result<String, GeneratorError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let mut attempts: u32 = 0;
        let start = self.keys.position();

        for offset in 0..self.keys.len() {
            let key = self.keys.key_at(start, offset).to_string();
            let mut server_retries: u32 = 0;

            loop {
                if let Some(limiter) = &self.limiter {
                    limiter.until_ready().await;
                }
                attempts += 1;

                match self.attempt(&key, &request).await {
                    Attempt::Done(content) => {
                        debug!(key = %key_hint(&key), attempts, "Completion received");
                        self.keys.advance(start, start + offset);
                        return Ok(content);
                    }
                    Attempt::Fail(err) => {
                        self.keys.advance(start, start + offset);
                        return Err(err);
                    }
                    Attempt::Rotate(reason) => {
                        warn!(key = %key_hint(&key), reason, "Rotating API key");
                        break;
                    }
                    Attempt::Retry(reason) => {
                        if server_retries >= self.max_server_retries {
                            warn!(
                                key = %key_hint(&key),
                                retries = server_retries,
                                error = %reason,
                                "Retries exhausted, rotating API key"
                            );
                            break;
                        }
                        let delay = backoff_delay(self.retry_base_delay, server_retries);
                        warn!(
                            key = %key_hint(&key),
                            retry = server_retries + 1,
                            delay_ms = delay.as_millis() as u64,
                            error = %reason,
                            "Retrying with same API key"
                        );
                        tokio::time::sleep(delay).await;
                        server_retries += 1;
                    }
                }
            }
        }

        Err(GeneratorError::AllKeysExhausted { attempts })
    }

    async fn attempt(&self, key: &str, request: &ChatRequest) -> Attempt {
        let response = match self.transport.send(key, request).await {
            Ok(response) => response,
            Err(e) => return Attempt::Retry(e.to_string()),
        };

        match response.status {
            200..=299 => match extract_content(&response.body) {
                Ok(content) => Attempt::Done(content),
                Err(e) => Attempt::Fail(GeneratorError::InvalidResponse(e)),
            },
            429 => Attempt::Rotate("rate limited"),
            401 | 403 => Attempt::Rotate("key rejected"),
            500..=599 => Attempt::Retry(format!("server error {}", response.status)),
            status => Attempt::Fail(GeneratorError::Request {
                status,
                body: response.body,
            }),
        }
    }

    async fn ask(&self, prompt: String) -> Result<String, GeneratorError> {
        self.generate(vec![
            ChatMessage::system(prompts::SYSTEM_PROMPT),
            ChatMessage::user(prompt),
        ])
        .await
    }

    pub async fn generate_seo(&self, ctx: &WorkflowContext) -> Result<SeoCopy, GeneratorError> {
        let raw = self.ask(prompts::seo_prompt(ctx)).await?;
        parse_seo(&raw, &ctx.title)
    }

    /// Markdown blog post
    pub async fn generate_blog_post(&self, ctx: &WorkflowContext) -> Result<String, GeneratorError> {
        let raw = self.ask(prompts::blog_post_prompt(ctx)).await?;
        let post = strip_code_fence(&raw).trim().to_string();
        if post.is_empty() {
            return Err(GeneratorError::InvalidResponse("Empty blog post".into()));
        }
        Ok(post)
    }

    pub async fn generate_faqs(&self, ctx: &WorkflowContext) -> Result<Vec<Faq>, GeneratorError> {
        let raw = self.ask(prompts::faq_prompt(ctx, MAX_FAQS)).await?;
        parse_faqs(&raw)
    }
}

/// `base * 2^retry`, capped at [`MAX_RETRY_DELAY`]
fn backoff_delay(base: Duration, retry: u32) -> Duration {
    base.checked_mul(2u32.saturating_pow(retry))
        .unwrap_or(MAX_RETRY_DELAY)
        .min(MAX_RETRY_DELAY)
}

fn parse_seo(raw: &str, fallback_title: &str) -> Result<SeoCopy, GeneratorError> {
    let mut title = None;
    let mut description = None;

    for line in raw.lines() {
        let line = line.trim().trim_start_matches(['*', '#', '-']).trim();
        if let Some(rest) = strip_label(line, "TITLE:") {
            title = Some(rest);
        } else if let Some(rest) = strip_label(line, "DESCRIPTION:") {
            description = Some(rest);
        }
    }

    let description = description
        .filter(|d| !d.is_empty())
        .ok_or_else(|| GeneratorError::InvalidResponse("SEO response has no DESCRIPTION line".into()))?;
    let title = title
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| fallback_title.to_string());

    Ok(SeoCopy {
        title: truncate_on_word(&title, SEO_TITLE_MAX),
        description: truncate_on_word(&description, SEO_DESCRIPTION_MAX),
    })
}

fn strip_label(line: &str, label: &str) -> Option<String> {
    let head = line.get(..label.len())?;
    if head.eq_ignore_ascii_case(label) {
        Some(line[label.len()..].trim().trim_matches('"').to_string())
    } else {
        None
    }
}

/// Cut `text` to at most `max` characters, preferring the last word boundary
pub fn truncate_on_word(text: &str, max: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max {
        return text.to_string();
    }

    let cut: String = text.chars().take(max).collect();
    let next_is_space = text.chars().nth(max).map(char::is_whitespace).unwrap_or(true);
    let kept = if next_is_space {
        cut.as_str()
    } else {
        match cut.rfind(char::is_whitespace) {
            Some(pos) if pos > 0 => &cut[..pos],
            _ => cut.as_str(),
        }
    };

    kept.trim_end()
        .trim_end_matches([',', ';', ':', '-'])
        .trim_end()
        .to_string()
}

/// Remove a surrounding ``` fence (with optional language tag)
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn parse_faqs(raw: &str) -> Result<Vec<Faq>, GeneratorError> {
    let body = strip_code_fence(raw);
    let json = match (body.find('['), body.rfind(']')) {
        (Some(start), Some(end)) if end > start => &body[start..=end],
        _ => {
            return Err(GeneratorError::InvalidResponse(
                "FAQ response has no JSON array".into(),
            ))
        }
    };

    let faqs: Vec<Faq> = serde_json::from_str(json)
        .map_err(|e| GeneratorError::InvalidResponse(format!("FAQ JSON: {}", e)))?;

    let faqs: Vec<Faq> = faqs
        .into_iter()
        .filter(|f| !f.question.trim().is_empty() && !f.answer.trim().is_empty())
        .take(MAX_FAQS)
        .collect();

    if faqs.is_empty() {
        return Err(GeneratorError::InvalidResponse("FAQ array is empty".into()));
    }
    Ok(faqs)
}
