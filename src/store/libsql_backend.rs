//! libSQL backend: implements every store trait on one connection.
//!
//! Supports local file and in-memory databases. Address lists and transcripts
//! are stored as JSON text columns.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DatabaseError, PipelineError};
use crate::pipeline::types::{
    AllowedHost, ChatHistory, Context, Email, EmailStatus, HostRuleType, Message, PotentialReply,
    StoredReply,
};
use crate::store::migrations;
use crate::store::retrieval::{self, DEFAULT_TOP_K};
use crate::store::traits::{ContextStore, PersistenceSink, RetrievalStore, TranscriptStore};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    top_k: usize,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            top_k: DEFAULT_TOP_K,
        })
    }

    /// Number of documents returned per retrieval search.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Convert `Option<String>` to libsql Value.
fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(s: &str) -> Result<T, DatabaseError> {
    serde_json::from_str(s).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

const EMAIL_COLUMNS: &str =
    "id, hash, from_addrs, to_addrs, cc_addrs, bcc_addrs, subject, body, date, read, status, summary";

const REPLY_COLUMNS: &str = "id, email_id, intention, reply_text, summary, created_at";

const HISTORY_COLUMNS: &str = "id, email_id, reply_id, chat_messages";

/// Map a libsql Row to an Email. Column order matches EMAIL_COLUMNS.
fn row_to_email(row: &libsql::Row) -> Result<Email, DatabaseError> {
    let get_err = |e: libsql::Error| DatabaseError::Query(format!("email row parse: {e}"));

    let from_json_str: String = row.get(2).map_err(get_err)?;
    let to_json_str: String = row.get(3).map_err(get_err)?;
    let cc = row
        .get::<String>(4)
        .ok()
        .map(|s| from_json::<Vec<String>>(&s))
        .transpose()?;
    let bcc = row
        .get::<String>(5)
        .ok()
        .map(|s| from_json::<Vec<String>>(&s))
        .transpose()?;
    let status = row
        .get::<String>(10)
        .ok()
        .and_then(|s| s.parse::<EmailStatus>().ok());

    Ok(Email {
        id: row.get(0).map_err(get_err)?,
        hash: row.get(1).map_err(get_err)?,
        from: from_json(&from_json_str)?,
        to: from_json(&to_json_str)?,
        cc,
        bcc,
        subject: row.get::<String>(6).ok(),
        text: row.get::<String>(7).ok(),
        date: row.get::<String>(8).ok().map(|s| parse_datetime(&s)),
        read: row.get::<i64>(9).map_err(get_err)? != 0,
        status,
        summary: row.get::<String>(11).ok(),
    })
}

/// Column order matches REPLY_COLUMNS.
fn row_to_reply(row: &libsql::Row) -> Result<StoredReply, libsql::Error> {
    let created_str: String = row.get(5)?;
    Ok(StoredReply {
        id: row.get(0)?,
        reply: PotentialReply {
            email_id: row.get(1)?,
            intention: row.get(2)?,
            reply_text: row.get(3)?,
            summary: row.get(4)?,
        },
        created_at: parse_datetime(&created_str),
    })
}

/// Column order matches HISTORY_COLUMNS.
fn row_to_history(row: &libsql::Row) -> Result<ChatHistory, DatabaseError> {
    let get_err = |e: libsql::Error| DatabaseError::Query(format!("chat_history row parse: {e}"));
    let messages_json: String = row.get(3).map_err(get_err)?;
    Ok(ChatHistory {
        id: row.get(0).map_err(get_err)?,
        email_id: row.get(1).map_err(get_err)?,
        reply_id: row.get(2).map_err(get_err)?,
        chat_messages: from_json(&messages_json)?,
    })
}

/// Map an `id, host, type` row. Unknown rule types are an error, never a
/// silent suffix rule.
fn row_to_allowed_host(row: &libsql::Row) -> Result<AllowedHost, DatabaseError> {
    let get_err = |e: libsql::Error| DatabaseError::Query(format!("allowed host row parse: {e}"));

    let id: String = row.get(0).map_err(get_err)?;
    let kind: String = row.get(2).map_err(get_err)?;
    let kind: HostRuleType = kind
        .parse()
        .map_err(|e: String| DatabaseError::Serialization(format!("allowed host {id}: {e}")))?;
    Ok(AllowedHost {
        id: Some(id),
        host: row.get(1).map_err(get_err)?,
        kind,
    })
}

// ── Emails & replies ────────────────────────────────────────────────

#[async_trait]
impl PersistenceSink for LibSqlBackend {
    async fn insert_unseen_emails(&self, emails: Vec<Email>) -> Result<Vec<Email>, DatabaseError> {
        let conn = self.conn();
        let mut unseen = Vec::new();

        for email in emails {
            let changed = conn
                .execute(
                    &format!(
                        "INSERT OR IGNORE INTO emails ({EMAIL_COLUMNS}) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
                    ),
                    params![
                        email.id.clone(),
                        email.hash.clone(),
                        to_json(&email.from)?,
                        to_json(&email.to)?,
                        opt_text_owned(email.cc.as_ref().map(to_json).transpose()?),
                        opt_text_owned(email.bcc.as_ref().map(to_json).transpose()?),
                        opt_text(email.subject.as_deref()),
                        opt_text(email.text.as_deref()),
                        opt_text_owned(email.date.map(|d| d.to_rfc3339())),
                        i64::from(email.read),
                        opt_text(email.status.as_ref().map(EmailStatus::as_str)),
                        opt_text(email.summary.as_deref()),
                    ],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("insert_unseen_emails: {e}")))?;

            if changed > 0 {
                unseen.push(email);
            } else {
                debug!(email_id = %email.id, "Email already stored, skipping");
            }
        }
        Ok(unseen)
    }

    async fn get_email(&self, id: &str) -> Result<Option<Email>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {EMAIL_COLUMNS} FROM emails WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_email: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_email(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_email: {e}"))),
        }
    }

    async fn list_untriaged_emails(&self) -> Result<Vec<Email>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {EMAIL_COLUMNS} FROM emails WHERE status IS NULL \
                     ORDER BY created_at ASC, rowid ASC"
                ),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_untriaged_emails: {e}")))?;

        let mut emails = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_untriaged_emails: {e}")))?
        {
            emails.push(row_to_email(&row)?);
        }
        Ok(emails)
    }

    async fn update_email_status(
        &self,
        id: &str,
        status: EmailStatus,
        summary: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE emails SET status = ?1, summary = COALESCE(?2, summary), \
                 updated_at = ?3 WHERE id = ?4",
                params![status.as_str(), opt_text(summary), Utc::now().to_rfc3339(), id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_email_status: {e}")))?;

        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "email".to_string(),
                id: id.to_string(),
            });
        }
        debug!(email_id = id, status = %status, "Email status updated");
        Ok(())
    }

    async fn insert_potential_reply(&self, reply: &PotentialReply) -> Result<String, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        self.conn()
            .execute(
                &format!("INSERT INTO potential_replies ({REPLY_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
                params![
                    id.clone(),
                    reply.email_id.clone(),
                    reply.intention.clone(),
                    reply.reply_text.clone(),
                    reply.summary.clone(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_potential_reply: {e}")))?;

        debug!(reply_id = %id, email_id = %reply.email_id, "Potential reply inserted");
        Ok(id)
    }

    async fn get_potential_reply(&self, id: &str) -> Result<Option<StoredReply>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {REPLY_COLUMNS} FROM potential_replies WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_potential_reply: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let reply = row_to_reply(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_potential_reply row parse: {e}")))?;
                Ok(Some(reply))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_potential_reply: {e}"))),
        }
    }

    async fn list_potential_replies(
        &self,
        email_id: &str,
    ) -> Result<Vec<StoredReply>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {REPLY_COLUMNS} FROM potential_replies WHERE email_id = ?1 ORDER BY created_at ASC"
                ),
                params![email_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_potential_replies: {e}")))?;

        let mut replies = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_potential_replies: {e}")))?
        {
            let reply = row_to_reply(&row)
                .map_err(|e| DatabaseError::Query(format!("list_potential_replies row parse: {e}")))?;
            replies.push(reply);
        }
        Ok(replies)
    }
}

// ── Context & allowed hosts ─────────────────────────────────────────

#[async_trait]
impl ContextStore for LibSqlBackend {
    async fn get_context(&self) -> Result<Context, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT key, value FROM contexts ORDER BY key", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("get_context: {e}")))?;

        let mut context = Context::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("get_context: {e}")))?
        {
            let key: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("get_context row parse: {e}")))?;
            let value: String = row
                .get(1)
                .map_err(|e| DatabaseError::Query(format!("get_context row parse: {e}")))?;
            context.insert(key, value);
        }
        Ok(context)
    }

    async fn get_allowed_hosts(&self) -> Result<Vec<AllowedHost>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT id, host, type FROM allowed_hosts ORDER BY created_at ASC", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("get_allowed_hosts: {e}")))?;

        let mut hosts = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("get_allowed_hosts: {e}")))?
        {
            hosts.push(row_to_allowed_host(&row)?);
        }
        Ok(hosts)
    }

    async fn set_context_value(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO contexts (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
                params![key, value],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_context_value: {e}")))?;
        Ok(())
    }

    async fn add_allowed_host(&self, host: &AllowedHost) -> Result<String, DatabaseError> {
        let id = host
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        self.conn()
            .execute(
                "INSERT INTO allowed_hosts (id, host, type) VALUES (?1, ?2, ?3)",
                params![id.clone(), host.host.clone(), host.kind.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("add_allowed_host: {e}")))?;
        Ok(id)
    }
}

// ── Transcripts ─────────────────────────────────────────────────────

#[async_trait]
impl TranscriptStore for LibSqlBackend {
    async fn get_transcript(&self, reply_id: &str) -> Result<Option<ChatHistory>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {HISTORY_COLUMNS} FROM chat_history WHERE reply_id = ?1"),
                params![reply_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_transcript: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_history(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_transcript: {e}"))),
        }
    }

    async fn create_transcript(
        &self,
        email_id: &str,
        reply_id: &str,
    ) -> Result<ChatHistory, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO chat_history (id, email_id, reply_id, chat_messages)
                 VALUES (?1, ?2, ?3, '[]')",
                params![id, email_id, reply_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_transcript: {e}")))?;

        // A transcript created concurrently for the same reply wins.
        self.get_transcript(reply_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "chat_history".to_string(),
                id: reply_id.to_string(),
            })
    }

    async fn append_transcript(
        &self,
        conversation_id: &str,
        messages: &[Message],
    ) -> Result<(), DatabaseError> {
        if messages.is_empty() {
            return Ok(());
        }

        // One UPDATE with nested json_insert keeps the append atomic and ordered.
        let mut expr = "chat_messages".to_string();
        let mut values: Vec<libsql::Value> = Vec::with_capacity(messages.len() + 1);
        for (i, message) in messages.iter().enumerate() {
            expr = format!("json_insert({expr}, '$[#]', json(?{}))", i + 1);
            values.push(libsql::Value::Text(to_json(message)?));
        }
        values.push(libsql::Value::Text(conversation_id.to_string()));
        let sql = format!(
            "UPDATE chat_history SET chat_messages = {expr}, updated_at = datetime('now') WHERE id = ?{}",
            messages.len() + 1
        );

        let changed = self
            .conn()
            .execute(&sql, values)
            .await
            .map_err(|e| DatabaseError::Query(format!("append_transcript: {e}")))?;

        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "chat_history".to_string(),
                id: conversation_id.to_string(),
            });
        }
        debug!(conversation_id, appended = messages.len(), "Transcript appended");
        Ok(())
    }
}

// ── Retrieval ───────────────────────────────────────────────────────

#[async_trait]
impl RetrievalStore for LibSqlBackend {
    async fn add_document(
        &self,
        text: &str,
        metadata: serde_json::Value,
    ) -> Result<(), PipelineError> {
        self.conn()
            .execute(
                "INSERT INTO summary_documents (content, metadata) VALUES (?1, ?2)",
                params![text, metadata.to_string()],
            )
            .await
            .map_err(|e| PipelineError::Retrieval(format!("add_document: {e}")))?;
        Ok(())
    }

    async fn search(&self, query: &str) -> Result<Vec<String>, PipelineError> {
        let mut rows = self
            .conn()
            .query("SELECT content FROM summary_documents ORDER BY id ASC", ())
            .await
            .map_err(|e| PipelineError::Retrieval(format!("search: {e}")))?;

        let mut documents = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| PipelineError::Retrieval(format!("search: {e}")))?
        {
            let content: String = row
                .get(0)
                .map_err(|e| PipelineError::Retrieval(format!("search row parse: {e}")))?;
            documents.push(content);
        }
        Ok(retrieval::rank(
            query,
            documents.iter().map(String::as_str),
            self.top_k,
        ))
    }
}
