//! LLM content generation
//!
//! - [`key_pool`]: rotating API keys
//! - [`client`]: OpenAI-compatible transport seam
//! - [`generator`]: retry/rotation loop and the workflow content operations
//! - [`prompts`]: prompt text

pub mod client;
pub mod generator;
pub mod key_pool;
pub mod prompts;

pub use client::{ChatMessage, ChatRequest, CompletionTransport, HttpTransport};
pub use generator::{SeoCopy, WorkflowAiGenerator, WorkflowContext};
pub use key_pool::KeyPool;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("No AI API keys configured")]
    NoApiKeys,

    /// Every key was rate limited, rejected or kept failing
    #[error("All API keys exhausted after {attempts} attempts")]
    AllKeysExhausted { attempts: u32 },

    /// Non-retryable client error (bad request, unprocessable, ...)
    #[error("LLM request rejected ({status}): {body}")]
    Request { status: u16, body: String },

    #[error("Invalid LLM response: {0}")]
    InvalidResponse(String),

    #[error("HTTP client error: {0}")]
    Client(String),
}
