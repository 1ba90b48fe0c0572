//! One triage pass: fetch, dedup, triage, commit.
//!
//! The runner is the orchestrator's caller. It owns every storage write a
//! pass makes. Each pass triages every stored email that still has no
//! outcome, so mail whose triage failed is picked up again next time.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::channels::MailSource;
use crate::error::PipelineError;
use crate::pipeline::orchestrator::TriageOrchestrator;
use crate::pipeline::types::{EmailStatus, ProcessedEmail, TriageReport};
use crate::store::{ContextStore, PersistenceSink, RetrievalStore};

/// A recorded per-email failure, flattened for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct FailureSummary {
    pub email_id: String,
    pub stage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intention: Option<String>,
    pub kind: String,
    pub error: String,
}

/// Counts for one triage pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub fetched: usize,
    pub unseen: usize,
    /// Stored emails without an outcome that this pass triaged, new ones included.
    pub pending: usize,
    pub filtered_out: usize,
    pub empty: usize,
    pub irrelevant: usize,
    pub summarized: usize,
    pub potential_replies: usize,
    /// Ids of the drafts stored during this pass.
    pub reply_ids: Vec<String>,
    pub failures: Vec<FailureSummary>,
    pub rule_errors: Vec<String>,
    /// Outcomes that could not be written.
    pub commit_failures: usize,
}

/// Runs triage passes against injected collaborators.
pub struct TriageRunner {
    source: Arc<dyn MailSource>,
    contexts: Arc<dyn ContextStore>,
    sink: Arc<dyn PersistenceSink>,
    retrieval: Arc<dyn RetrievalStore>,
    orchestrator: Arc<TriageOrchestrator>,
    pass_lock: Mutex<()>,
}

impl TriageRunner {
    pub fn new(
        source: Arc<dyn MailSource>,
        contexts: Arc<dyn ContextStore>,
        sink: Arc<dyn PersistenceSink>,
        retrieval: Arc<dyn RetrievalStore>,
        orchestrator: Arc<TriageOrchestrator>,
    ) -> Self {
        Self {
            source,
            contexts,
            sink,
            retrieval,
            orchestrator,
            pass_lock: Mutex::new(()),
        }
    }

    /// Run one pass.
    ///
    /// Fails only when mail, context or rules cannot be loaded, or unseen
    /// emails cannot be stored. Per-email failures and failed commits are
    /// reported in the summary instead. Concurrent calls run one at a time.
    pub async fn run_once(&self) -> Result<RunSummary, PipelineError> {
        let _pass = self.pass_lock.lock().await;
        info!(source = self.source.name(), "Starting triage pass");

        let (emails, context, rules) = tokio::join!(
            self.source.fetch(),
            self.contexts.get_context(),
            self.contexts.get_allowed_hosts(),
        );
        let emails = emails?;
        let context = context?;
        let rules = rules?;

        let fetched = emails.len();
        let unseen = self.sink.insert_unseen_emails(emails).await?;
        let pending = self.sink.list_untriaged_emails().await?;
        let mut summary = RunSummary {
            fetched,
            unseen: unseen.len(),
            pending: pending.len(),
            ..RunSummary::default()
        };

        if pending.is_empty() {
            info!(fetched, "No emails awaiting triage");
            return Ok(summary);
        }

        let report = self
            .orchestrator
            .process_emails(pending, &context, &rules)
            .await;
        self.commit(report, &mut summary).await;

        info!(
            fetched = summary.fetched,
            unseen = summary.unseen,
            pending = summary.pending,
            summarized = summary.summarized,
            potential_replies = summary.potential_replies,
            failures = summary.failures.len(),
            commit_failures = summary.commit_failures,
            "Triage pass complete"
        );
        Ok(summary)
    }

    async fn commit(&self, report: TriageReport, summary: &mut RunSummary) {
        summary.filtered_out = report.filtered_out;
        summary.rule_errors = report.rule_errors.iter().map(ToString::to_string).collect();
        summary.failures = report
            .failures
            .iter()
            .map(|f| FailureSummary {
                email_id: f.email_id.clone(),
                stage: f.stage.to_string(),
                intention: f.intention.clone(),
                kind: f.error.kind().to_string(),
                error: f.error.to_string(),
            })
            .collect();

        for outcome in &report.outcomes {
            match outcome {
                ProcessedEmail::Empty { .. } => summary.empty += 1,
                ProcessedEmail::Irrelevant { .. } => summary.irrelevant += 1,
                ProcessedEmail::Summarized { .. } => summary.summarized += 1,
                ProcessedEmail::PotentialReply(_) => summary.potential_replies += 1,
            }

            match self.commit_outcome(outcome).await {
                Ok(Some(reply_id)) => summary.reply_ids.push(reply_id),
                Ok(None) => {}
                Err(e) => {
                    error!(
                        email_id = outcome.email_id(),
                        outcome = outcome.label(),
                        error = %e,
                        "Failed to commit triage outcome"
                    );
                    summary.commit_failures += 1;
                }
            }
        }
    }

    /// Write one outcome. Returns the draft id for stored replies.
    async fn commit_outcome(
        &self,
        outcome: &ProcessedEmail,
    ) -> Result<Option<String>, PipelineError> {
        match outcome {
            ProcessedEmail::Empty { email } => {
                self.sink
                    .update_email_status(&email.id, EmailStatus::Empty, None)
                    .await?;
            }
            ProcessedEmail::Irrelevant { email } => {
                self.sink
                    .update_email_status(&email.id, EmailStatus::Irrelevant, None)
                    .await?;
            }
            ProcessedEmail::Summarized { email, summary } => {
                self.sink
                    .update_email_status(&email.id, EmailStatus::Summarized, Some(summary))
                    .await?;
                let metadata = serde_json::json!({
                    "id": email.id,
                    "from": email.from.join(", "),
                    "date": email.date.map(|d| d.to_rfc3339()),
                    "subject": email.subject,
                });
                if let Err(e) = self.retrieval.add_document(summary, metadata).await {
                    warn!(email_id = %email.id, error = %e, "Failed to index summary");
                    return Err(e);
                }
            }
            ProcessedEmail::PotentialReply(reply) => {
                let id = self.sink.insert_potential_reply(reply).await?;
                return Ok(Some(id));
            }
        }
        Ok(None)
    }
}
