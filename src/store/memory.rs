//! In-memory implementation of every store trait.
//!
//! Used by tests and demos. Transcript appends are recorded so callers can
//! check exactly what was sent to the durable side.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{DatabaseError, PipelineError};
use crate::pipeline::types::{
    AllowedHost, ChatHistory, Context, Email, EmailStatus, Message, PotentialReply, StoredReply,
};
use crate::store::retrieval::{self, DEFAULT_TOP_K};
use crate::store::traits::{ContextStore, PersistenceSink, RetrievalStore, TranscriptStore};

/// One stored retrieval document.
#[derive(Debug, Clone)]
pub struct Document {
    pub text: String,
    pub metadata: serde_json::Value,
}

/// One `append_transcript` call.
#[derive(Debug, Clone)]
pub struct AppendCall {
    pub conversation_id: String,
    pub messages: Vec<Message>,
}

#[derive(Default)]
struct Inner {
    emails: Vec<Email>,
    hashes: HashSet<String>,
    replies: Vec<StoredReply>,
    context: BTreeMap<String, String>,
    allowed_hosts: Vec<AllowedHost>,
    transcripts: HashMap<String, ChatHistory>,
    append_calls: Vec<AppendCall>,
    documents: Vec<Document>,
}

/// Memory-backed store.
pub struct MemoryStore {
    inner: RwLock<Inner>,
    top_k: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Seed the steering context.
    pub async fn with_context(self, context: &Context) -> Self {
        {
            let mut inner = self.inner.write().await;
            for (k, v) in context.iter() {
                inner.context.insert(k.to_string(), v.to_string());
            }
        }
        self
    }

    /// Every `append_transcript` call so far, in order.
    pub async fn append_calls(&self) -> Vec<AppendCall> {
        self.inner.read().await.append_calls.clone()
    }

    /// All stored retrieval documents, in insertion order.
    pub async fn documents(&self) -> Vec<Document> {
        self.inner.read().await.documents.clone()
    }

    pub async fn email_count(&self) -> usize {
        self.inner.read().await.emails.len()
    }
}

#[async_trait]
impl PersistenceSink for MemoryStore {
    async fn insert_unseen_emails(&self, emails: Vec<Email>) -> Result<Vec<Email>, DatabaseError> {
        let mut inner = self.inner.write().await;
        let mut unseen = Vec::new();
        for email in emails {
            if inner.hashes.insert(email.hash.clone()) {
                inner.emails.push(email.clone());
                unseen.push(email);
            }
        }
        Ok(unseen)
    }

    async fn get_email(&self, id: &str) -> Result<Option<Email>, DatabaseError> {
        let inner = self.inner.read().await;
        Ok(inner.emails.iter().find(|e| e.id == id).cloned())
    }

    async fn list_untriaged_emails(&self) -> Result<Vec<Email>, DatabaseError> {
        let inner = self.inner.read().await;
        Ok(inner
            .emails
            .iter()
            .filter(|e| e.status.is_none())
            .cloned()
            .collect())
    }

    async fn update_email_status(
        &self,
        id: &str,
        status: EmailStatus,
        summary: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let mut inner = self.inner.write().await;
        let email = inner
            .emails
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "email".to_string(),
                id: id.to_string(),
            })?;
        email.status = Some(status);
        if let Some(summary) = summary {
            email.summary = Some(summary.to_string());
        }
        Ok(())
    }

    async fn insert_potential_reply(&self, reply: &PotentialReply) -> Result<String, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        self.inner.write().await.replies.push(StoredReply {
            id: id.clone(),
            reply: reply.clone(),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn get_potential_reply(&self, id: &str) -> Result<Option<StoredReply>, DatabaseError> {
        let inner = self.inner.read().await;
        Ok(inner.replies.iter().find(|r| r.id == id).cloned())
    }

    async fn list_potential_replies(
        &self,
        email_id: &str,
    ) -> Result<Vec<StoredReply>, DatabaseError> {
        let inner = self.inner.read().await;
        Ok(inner
            .replies
            .iter()
            .filter(|r| r.reply.email_id == email_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ContextStore for MemoryStore {
    async fn get_context(&self) -> Result<Context, DatabaseError> {
        let inner = self.inner.read().await;
        Ok(inner.context.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    async fn get_allowed_hosts(&self) -> Result<Vec<AllowedHost>, DatabaseError> {
        Ok(self.inner.read().await.allowed_hosts.clone())
    }

    async fn set_context_value(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        self.inner
            .write()
            .await
            .context
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn add_allowed_host(&self, host: &AllowedHost) -> Result<String, DatabaseError> {
        let id = host
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut stored = host.clone();
        stored.id = Some(id.clone());
        self.inner.write().await.allowed_hosts.push(stored);
        Ok(id)
    }
}

#[async_trait]
impl TranscriptStore for MemoryStore {
    async fn get_transcript(&self, reply_id: &str) -> Result<Option<ChatHistory>, DatabaseError> {
        Ok(self.inner.read().await.transcripts.get(reply_id).cloned())
    }

    async fn create_transcript(
        &self,
        email_id: &str,
        reply_id: &str,
    ) -> Result<ChatHistory, DatabaseError> {
        let mut inner = self.inner.write().await;
        let history = inner
            .transcripts
            .entry(reply_id.to_string())
            .or_insert_with(|| ChatHistory {
                id: Uuid::new_v4().to_string(),
                email_id: email_id.to_string(),
                reply_id: reply_id.to_string(),
                chat_messages: Vec::new(),
            });
        Ok(history.clone())
    }

    async fn append_transcript(
        &self,
        conversation_id: &str,
        messages: &[Message],
    ) -> Result<(), DatabaseError> {
        let mut inner = self.inner.write().await;
        let history = inner
            .transcripts
            .values_mut()
            .find(|h| h.id == conversation_id)
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "chat_history".to_string(),
                id: conversation_id.to_string(),
            })?;
        history.chat_messages.extend_from_slice(messages);
        inner.append_calls.push(AppendCall {
            conversation_id: conversation_id.to_string(),
            messages: messages.to_vec(),
        });
        Ok(())
    }
}

#[async_trait]
impl RetrievalStore for MemoryStore {
    async fn add_document(
        &self,
        text: &str,
        metadata: serde_json::Value,
    ) -> Result<(), PipelineError> {
        self.inner.write().await.documents.push(Document {
            text: text.to_string(),
            metadata,
        });
        Ok(())
    }

    async fn search(&self, query: &str) -> Result<Vec<String>, PipelineError> {
        let inner = self.inner.read().await;
        Ok(retrieval::rank(
            query,
            inner.documents.iter().map(|d| d.text.as_str()),
            self.top_k,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email(id: &str, body: &str) -> Email {
        Email {
            id: id.into(),
            hash: Email::compute_hash(&[], None, body),
            from: vec!["a@co.com".into()],
            to: vec![],
            cc: None,
            bcc: None,
            subject: None,
            text: Some(body.into()),
            date: Some(Utc::now()),
            read: false,
            status: None,
            summary: None,
        }
    }

    #[tokio::test]
    async fn dedups_by_hash() {
        let store = MemoryStore::new();
        let first = store
            .insert_unseen_emails(vec![email("1", "a"), email("2", "b")])
            .await
            .unwrap();
        assert_eq!(first.len(), 2);

        let second = store
            .insert_unseen_emails(vec![email("3", "a"), email("4", "c")])
            .await
            .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, "4");
        assert_eq!(store.email_count().await, 3);
    }

    #[tokio::test]
    async fn status_update_requires_known_email() {
        let store = MemoryStore::new();
        store.insert_unseen_emails(vec![email("1", "a")]).await.unwrap();
        store
            .update_email_status("1", EmailStatus::Summarized, Some("short"))
            .await
            .unwrap();
        let stored = store.get_email("1").await.unwrap().unwrap();
        assert_eq!(stored.status, Some(EmailStatus::Summarized));
        assert_eq!(stored.summary.as_deref(), Some("short"));

        let missing = store
            .update_email_status("nope", EmailStatus::Empty, None)
            .await;
        assert!(matches!(missing, Err(DatabaseError::NotFound { .. })));
    }

    #[tokio::test]
    async fn transcripts_append_in_order() {
        let store = MemoryStore::new();
        let history = store.create_transcript("e1", "r1").await.unwrap();
        store
            .append_transcript(&history.id, &[Message::human("a"), Message::ai("b")])
            .await
            .unwrap();

        let fetched = store.get_transcript("r1").await.unwrap().unwrap();
        let texts: Vec<&str> = fetched.chat_messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b"]);
        assert_eq!(store.append_calls().await.len(), 1);
    }

    #[tokio::test]
    async fn search_uses_top_k() {
        let store = MemoryStore::new().with_top_k(1);
        store
            .add_document("boss meeting friday", serde_json::json!({}))
            .await
            .unwrap();
        store
            .add_document("boss lunch", serde_json::json!({}))
            .await
            .unwrap();
        let hits = store.search("boss meeting").await.unwrap();
        assert_eq!(hits, vec!["boss meeting friday"]);
    }
}
