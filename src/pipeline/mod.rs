//! Email triage pipeline.
//!
//! A pass flows through:
//! 1. `MailSource::fetch()` and dedup by hash (`TriageRunner`)
//! 2. `HostFilter::matches()` (sender allow-list, no LLM)
//! 3. `TriageOrchestrator::process_emails()` (relevancy, summary, drafts)
//! 4. Commit of each outcome (`TriageRunner`)
//!
//! The orchestrator never writes; drafts are stored for the user to review
//! and refine, never sent.

pub mod filter;
pub mod orchestrator;
pub mod runner;
pub mod scheduler;
pub mod stages;
pub mod types;

pub use filter::HostFilter;
pub use orchestrator::TriageOrchestrator;
pub use runner::{RunSummary, TriageRunner};
pub use scheduler::{SchedulerHandle, spawn_triage_scheduler};
pub use stages::{LocalClock, TriageStages};
pub use types::*;
