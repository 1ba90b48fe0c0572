//! Capability traits for everything the triage core reads or writes.
//!
//! The orchestrator itself never writes; these are consumed by its caller
//! (`TriageRunner`), the follow-up evaluator and the HTTP layer.

use async_trait::async_trait;

use crate::error::{DatabaseError, PipelineError};
use crate::pipeline::types::{
    AllowedHost, ChatHistory, Context, Email, EmailStatus, Message, PotentialReply, StoredReply,
};

/// Durable home of emails and drafted replies.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    /// Store emails whose `hash` has not been seen before. Returns only the
    /// newly stored ones, in input order.
    async fn insert_unseen_emails(&self, emails: Vec<Email>) -> Result<Vec<Email>, DatabaseError>;

    async fn get_email(&self, id: &str) -> Result<Option<Email>, DatabaseError>;

    /// Stored emails with no triage outcome yet, oldest first.
    async fn list_untriaged_emails(&self) -> Result<Vec<Email>, DatabaseError>;

    /// Record the triage outcome of an email.
    async fn update_email_status(
        &self,
        id: &str,
        status: EmailStatus,
        summary: Option<&str>,
    ) -> Result<(), DatabaseError>;

    /// Insert a draft. Returns its generated id.
    async fn insert_potential_reply(&self, reply: &PotentialReply) -> Result<String, DatabaseError>;

    async fn get_potential_reply(&self, id: &str) -> Result<Option<StoredReply>, DatabaseError>;

    /// Drafts for one email, oldest first.
    async fn list_potential_replies(&self, email_id: &str)
    -> Result<Vec<StoredReply>, DatabaseError>;
}

/// Steering context and sender rules. Snapshotted once per run.
#[async_trait]
pub trait ContextStore: Send + Sync {
    async fn get_context(&self) -> Result<Context, DatabaseError>;

    async fn get_allowed_hosts(&self) -> Result<Vec<AllowedHost>, DatabaseError>;

    /// Insert or overwrite one context entry.
    async fn set_context_value(&self, key: &str, value: &str) -> Result<(), DatabaseError>;

    /// Add a rule. Returns its id.
    async fn add_allowed_host(&self, host: &AllowedHost) -> Result<String, DatabaseError>;
}

/// Follow-up transcripts, one per drafted reply.
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    async fn get_transcript(&self, reply_id: &str) -> Result<Option<ChatHistory>, DatabaseError>;

    /// Create an empty transcript for `reply_id`.
    async fn create_transcript(
        &self,
        email_id: &str,
        reply_id: &str,
    ) -> Result<ChatHistory, DatabaseError>;

    /// Append `messages` in order, as one write.
    async fn append_transcript(
        &self,
        conversation_id: &str,
        messages: &[Message],
    ) -> Result<(), DatabaseError>;
}

/// Summary documents searched when drafting replies.
#[async_trait]
pub trait RetrievalStore: Send + Sync {
    async fn add_document(&self, text: &str, metadata: serde_json::Value)
    -> Result<(), PipelineError>;

    /// Best matches for `query`, most relevant first.
    async fn search(&self, query: &str) -> Result<Vec<String>, PipelineError>;
}
