//! Mail sources: where a triage run gets its emails from.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::DateTime;
use mail_parser::{Address, MessageParser, MimeHeaders};
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::pipeline::types::Email;

/// Supplies parsed emails for one triage run.
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Source name for logging.
    fn name(&self) -> &str;

    async fn fetch(&self) -> Result<Vec<Email>, PipelineError>;
}

// ── Maildir-style directory ─────────────────────────────────────────

/// Reads every `*.eml` file in a directory.
///
/// Files are not moved or marked after reading; re-reads are deduplicated by
/// hash when the emails are stored.
pub struct MaildirSource {
    dir: PathBuf,
}

impl MaildirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl MailSource for MaildirSource {
    fn name(&self) -> &str {
        "maildir"
    }

    async fn fetch(&self) -> Result<Vec<Email>, PipelineError> {
        let dir = self.dir.clone();
        let emails = tokio::task::spawn_blocking(move || read_eml_dir(&dir))
            .await
            .map_err(|e| PipelineError::MailSource(format!("fetch task panicked: {e}")))??;
        info!(dir = %self.dir.display(), count = emails.len(), "Fetched emails");
        Ok(emails)
    }
}

/// Parse every `.eml` file in `dir`, sorted by file name. Unparsable files are
/// skipped with a warning.
fn read_eml_dir(dir: &Path) -> Result<Vec<Email>, PipelineError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| PipelineError::MailSource(format!("{}: {e}", dir.display())))?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "eml"))
        .collect();
    paths.sort();

    let mut emails = Vec::with_capacity(paths.len());
    for path in paths {
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read email file");
                continue;
            }
        };
        let fallback_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        match parse_email(&raw, &fallback_id) {
            Some(email) => emails.push(email),
            None => warn!(path = %path.display(), "Skipping unparsable email"),
        }
    }
    Ok(emails)
}

/// Parse a raw RFC 5322 message into an [`Email`].
///
/// `fallback_id` is used when the message has no `Message-ID`.
pub fn parse_email(raw: &[u8], fallback_id: &str) -> Option<Email> {
    let parsed = MessageParser::default().parse(raw)?;

    let text = extract_text(&parsed);
    let id = parsed
        .message_id()
        .map(str::to_string)
        .unwrap_or_else(|| fallback_id.to_string());
    let date = parsed
        .date()
        .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0));
    let from = format_addresses(parsed.from());

    debug!(email_id = %id, "Parsed email");
    Some(Email {
        hash: Email::compute_hash(&from, date, text.as_deref().unwrap_or_default()),
        id,
        from,
        to: format_addresses(parsed.to()),
        cc: parsed.cc().map(|a| format_addresses(Some(a))),
        bcc: parsed.bcc().map(|a| format_addresses(Some(a))),
        subject: parsed.subject().map(str::to_string),
        text,
        date,
        read: false,
        status: None,
        summary: None,
    })
}

/// `Name <address>` when a display name is present, the bare address otherwise.
fn format_addresses(address: Option<&Address>) -> Vec<String> {
    let Some(address) = address else {
        return Vec::new();
    };
    address
        .iter()
        .filter_map(|addr| match (addr.name(), addr.address()) {
            (Some(name), Some(email)) => Some(format!("{name} <{email}>")),
            (None, Some(email)) => Some(email.to_string()),
            _ => None,
        })
        .collect()
}

/// Plain-text body, falling back to stripped HTML and then to the first
/// text attachment.
fn extract_text(parsed: &mail_parser::Message) -> Option<String> {
    if let Some(text) = parsed.body_text(0) {
        return Some(text.trim().to_string());
    }
    if let Some(html) = parsed.body_html(0) {
        return Some(strip_html(html.as_ref()));
    }
    for part in parsed.attachments() {
        let part: &mail_parser::MessagePart = part;
        if let Some(ct) = MimeHeaders::content_type(part)
            && ct.ctype() == "text"
            && let Ok(text) = std::str::from_utf8(part.contents())
        {
            return Some(text.trim().to_string());
        }
    }
    None
}

/// Strip HTML tags and normalize whitespace.
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── Fixed list ──────────────────────────────────────────────────────

/// Returns the same emails on every fetch.
pub struct StaticMailSource {
    emails: Vec<Email>,
}

impl StaticMailSource {
    pub fn new(emails: Vec<Email>) -> Self {
        Self { emails }
    }
}

#[async_trait]
impl MailSource for StaticMailSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch(&self) -> Result<Vec<Email>, PipelineError> {
        Ok(self.emails.clone())
    }
}
