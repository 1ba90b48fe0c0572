//! Mail Triage: relevancy, summaries and reply drafts for incoming email.

pub mod api;
pub mod channels;
pub mod config;
pub mod error;
pub mod followup;
pub mod llm;
pub mod pipeline;
pub mod store;
