//! Shared types for the triage pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::PipelineError;

// ── Email ───────────────────────────────────────────────────────────

const HASH_SEPARATOR: u8 = 0x1f;

/// A fetched email. Address lists hold raw header values like
/// `Jim Lorem <jim@example.com>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Email {
    pub id: String,
    /// Content digest used to skip mail that was already stored.
    pub hash: String,
    pub from: Vec<String>,
    pub to: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cc: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bcc: Option<Vec<String>>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub status: Option<EmailStatus>,
    #[serde(default)]
    pub summary: Option<String>,
}

impl Email {
    /// SHA-256 over sender, date and body text, base64 encoded. Fields are
    /// separated by a unit separator so their boundaries cannot shift.
    pub fn compute_hash(from: &[String], date: Option<DateTime<Utc>>, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(from.join("\n").as_bytes());
        hasher.update([HASH_SEPARATOR]);
        if let Some(date) = date {
            hasher.update(date.to_rfc3339().as_bytes());
        }
        hasher.update([HASH_SEPARATOR]);
        hasher.update(text.as_bytes());
        BASE64.encode(hasher.finalize())
    }

    /// Body text, treating an empty body as absent.
    pub fn body(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.is_empty())
    }

    /// True when body, sender or date is missing. Such mail cannot be evaluated.
    pub fn is_empty(&self) -> bool {
        self.body().is_none() || self.from.is_empty() || self.date.is_none()
    }

    /// Delivery date as rendered into prompts.
    pub fn delivery_date(&self) -> String {
        self.date
            .map(|d| d.to_rfc2822())
            .unwrap_or_else(|| "None".to_string())
    }
}

/// Renders a list newline-joined, or `None` when absent.
pub fn join_or_none(values: Option<&[String]>) -> String {
    match values {
        Some(values) => values.join("\n"),
        None => "None".to_string(),
    }
}

/// Processing status written back to a stored email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailStatus {
    Empty,
    Irrelevant,
    Summarized,
    ReplyEmail,
}

impl EmailStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Irrelevant => "irrelevant",
            Self::Summarized => "summarized",
            Self::ReplyEmail => "reply_email",
        }
    }
}

impl fmt::Display for EmailStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmailStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "empty" => Ok(Self::Empty),
            "irrelevant" => Ok(Self::Irrelevant),
            "summarized" => Ok(Self::Summarized),
            "reply_email" => Ok(Self::ReplyEmail),
            other => Err(format!("unknown email status '{other}'")),
        }
    }
}

// ── Context ─────────────────────────────────────────────────────────

/// Free-text steering instructions, e.g. `"User's full name" → "Jim Lorem"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context(BTreeMap<String, String>);

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Copy with one extra entry. The original is left untouched.
    pub fn with_entry(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut copy = self.clone();
        copy.insert(key, value);
        copy
    }

    /// `key: value` lines joined by newlines.
    pub fn render(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Context {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

// ── Allowed hosts ───────────────────────────────────────────────────

/// How an allowed-host rule is matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostRuleType {
    /// Address ends with the host.
    String,
    /// Address matches the pattern anywhere.
    Regex,
}

impl HostRuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Regex => "regex",
        }
    }
}

impl FromStr for HostRuleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(Self::String),
            "regex" => Ok(Self::Regex),
            other => Err(format!("unknown host rule type '{other}'")),
        }
    }
}

/// A sender filter rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedHost {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub host: String,
    #[serde(rename = "type")]
    pub kind: HostRuleType,
}

impl AllowedHost {
    pub fn suffix(host: impl Into<String>) -> Self {
        Self {
            id: None,
            host: host.into(),
            kind: HostRuleType::String,
        }
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        Self {
            id: None,
            host: pattern.into(),
            kind: HostRuleType::Regex,
        }
    }
}

// ── Outcomes ────────────────────────────────────────────────────────

/// One drafted reply for one intention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PotentialReply {
    pub email_id: String,
    pub intention: String,
    pub reply_text: String,
    /// Shared by every draft of the same email.
    pub summary: String,
}

/// A persisted draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredReply {
    pub id: String,
    #[serde(flatten)]
    pub reply: PotentialReply,
    pub created_at: DateTime<Utc>,
}

/// Outcome of triaging one email. A `reply` decision yields one `Summarized`
/// plus one `PotentialReply` per intention; every other path yields exactly one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessedEmail {
    /// Body, sender or date missing.
    Empty { email: Email },
    /// Classified `none`.
    Irrelevant { email: Email },
    Summarized { email: Email, summary: String },
    PotentialReply(PotentialReply),
}

impl ProcessedEmail {
    pub fn email_id(&self) -> &str {
        match self {
            Self::Empty { email } | Self::Irrelevant { email } | Self::Summarized { email, .. } => {
                &email.id
            }
            Self::PotentialReply(reply) => &reply.email_id,
        }
    }

    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Empty { .. } => "empty",
            Self::Irrelevant { .. } => "irrelevant",
            Self::Summarized { .. } => "summarized",
            Self::PotentialReply(_) => "potential_reply",
        }
    }
}

/// A stage failure recorded against one email (and one intention, when the
/// failure is a single draft).
#[derive(Debug)]
pub struct EmailFailure {
    pub email_id: String,
    pub stage: &'static str,
    pub intention: Option<String>,
    pub error: PipelineError,
}

/// Result of one orchestrator run: successful outcomes and recorded failures.
#[derive(Debug, Default)]
pub struct TriageReport {
    pub outcomes: Vec<ProcessedEmail>,
    pub failures: Vec<EmailFailure>,
    /// Allowed-host rules skipped because they did not compile.
    pub rule_errors: Vec<PipelineError>,
    /// Emails dropped by the host filter.
    pub filtered_out: usize,
}

impl TriageReport {
    pub fn outcomes_for<'a>(&'a self, email_id: &'a str) -> impl Iterator<Item = &'a ProcessedEmail> {
        self.outcomes.iter().filter(move |o| o.email_id() == email_id)
    }

    pub fn failures_for<'a>(&'a self, email_id: &'a str) -> impl Iterator<Item = &'a EmailFailure> {
        self.failures.iter().filter(move |f| f.email_id == email_id)
    }
}

// ── Transcripts ─────────────────────────────────────────────────────

/// Who wrote a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Ai,
    Human,
}

/// One follow-up turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub text: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl Message {
    pub fn human(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Human,
            text: text.into(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn ai(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Ai,
            text: text.into(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// Follow-up conversation anchored to one drafted reply. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatHistory {
    pub id: String,
    pub email_id: String,
    pub reply_id: String,
    pub chat_messages: Vec<Message>,
}
