//! # GigHub Common Library
//!
//! Shared code for the GigHub services including:
//! - Database schema, models and pool setup
//! - Broadcast event types (HubEvent enum) and the EventBus
//! - Durable job queue (dispatch, reserve, retry, bury)
//! - Configuration loading
//! - Token and password helpers
//! - Validation error collection

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod queue;
pub mod sse;
pub mod validation;

pub use error::{Error, Result};
pub use validation::ValidationErrors;
