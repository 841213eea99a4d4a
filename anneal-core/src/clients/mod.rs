//! Clients for external services.
//!
//! - orchestrator: task-orchestration backend (job submission, task status)
//! - response: HTTP status to error mapping used by every client

pub mod orchestrator;
pub mod response;

pub use orchestrator::HttpOrchestrator;
pub use response::check_response;
