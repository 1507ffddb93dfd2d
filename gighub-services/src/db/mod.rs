//! Queries owned by the services crate
//!
//! Shared by the job handlers, the importer and the API crate.

pub mod platform_accounts;
pub mod workflows;
