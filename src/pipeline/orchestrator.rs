//! Triage orchestrator: filter, classify, summarize and draft replies.
//!
//! Per email:
//! 1. Host filter (pre-filter, no outcome for excluded mail)
//! 2. Missing body, sender or date ⇒ `Empty`
//! 3. Relevancy ⇒ `none` | `save` | `reply`
//! 4. `reply`: summarizer runs alongside keywords → retrieval → intentions,
//!    then one draft per intention
//!
//! The orchestrator never writes to storage. It returns tagged outcomes and
//! leaves committing them to its caller.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::llm::RetryPolicy;
use crate::pipeline::filter::HostFilter;
use crate::pipeline::stages::{Decision, TriageStages, intentions, keywords, relevancy, replier, summarizer};
use crate::pipeline::types::{
    AllowedHost, Context, Email, EmailFailure, PotentialReply, ProcessedEmail, TriageReport,
};
use crate::store::RetrievalStore;

/// Stage label used when a retrieval search fails.
pub const RETRIEVAL_STAGE: &str = "retrieval";

/// Outcomes and failures for one email.
#[derive(Default)]
struct EmailResult {
    outcomes: Vec<ProcessedEmail>,
    failures: Vec<EmailFailure>,
}

impl EmailResult {
    fn outcome(outcome: ProcessedEmail) -> Self {
        Self {
            outcomes: vec![outcome],
            failures: Vec::new(),
        }
    }

    fn fail(
        &mut self,
        email_id: &str,
        stage: &'static str,
        intention: Option<String>,
        error: PipelineError,
    ) {
        warn!(
            email_id,
            stage,
            intention = intention.as_deref().unwrap_or(""),
            kind = error.kind(),
            error = %error,
            "Triage stage failed"
        );
        self.failures.push(EmailFailure {
            email_id: email_id.to_string(),
            stage,
            intention,
            error,
        });
    }
}

/// Intentions plus the retrieved history they are drafted against.
struct ReplyPlan {
    intentions: Vec<String>,
    summaries: String,
}

/// Runs the triage state machine over a batch of emails.
pub struct TriageOrchestrator {
    stages: TriageStages,
    retrieval: Arc<dyn RetrievalStore>,
    retry: RetryPolicy,
}

impl TriageOrchestrator {
    pub fn new(stages: TriageStages, retrieval: Arc<dyn RetrievalStore>) -> Self {
        Self {
            stages,
            retrieval,
            retry: RetryPolicy::none(),
        }
    }

    /// Retry policy applied to every stage call and retrieval search.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Triage `emails` against one snapshot of `context` and `rules`.
    ///
    /// Emails are processed concurrently. A failure in one email never
    /// affects another; failures are returned next to the outcomes.
    pub async fn process_emails(
        &self,
        emails: Vec<Email>,
        context: &Context,
        rules: &[AllowedHost],
    ) -> TriageReport {
        let (filter, rule_errors) = HostFilter::compile(rules);
        let received = emails.len();

        let (admitted, excluded): (Vec<Email>, Vec<Email>) =
            emails.into_iter().partition(|email| filter.matches(email));
        for email in &excluded {
            debug!(email_id = %email.id, "Sender not allowed, skipping email");
        }

        info!(
            received,
            admitted = admitted.len(),
            rules = filter.rule_count(),
            "Triaging email batch"
        );

        let results = join_all(
            admitted
                .into_iter()
                .map(|email| self.process_email(email, context)),
        )
        .await;

        let mut report = TriageReport {
            rule_errors,
            filtered_out: excluded.len(),
            ..TriageReport::default()
        };
        for result in results {
            report.outcomes.extend(result.outcomes);
            report.failures.extend(result.failures);
        }

        info!(
            outcomes = report.outcomes.len(),
            failures = report.failures.len(),
            "Triage batch complete"
        );
        report
    }

    async fn process_email(&self, email: Email, context: &Context) -> EmailResult {
        if email.is_empty() {
            debug!(email_id = %email.id, "Email has no body, sender or date");
            return EmailResult::outcome(ProcessedEmail::Empty { email });
        }

        let classifier = &self.stages.relevancy;
        let email_ref = &email;
        let decision = match self
            .retry
            .run(relevancy::STAGE, move || classifier.classify(email_ref, context))
            .await
        {
            Ok(decision) => decision,
            Err(error) => {
                let mut result = EmailResult::default();
                result.fail(&email.id, relevancy::STAGE, None, error);
                return result;
            }
        };
        debug!(email_id = %email.id, decision = decision.as_str(), "Email classified");

        match decision {
            Decision::None => EmailResult::outcome(ProcessedEmail::Irrelevant { email }),
            Decision::Save => {
                let summarizer = &self.stages.summarizer;
                let summary = self
                    .retry
                    .run(summarizer::STAGE, move || summarizer.summarize(email_ref, context))
                    .await;
                match summary {
                    Ok(summary) => EmailResult::outcome(ProcessedEmail::Summarized { email, summary }),
                    Err(error) => {
                        let mut result = EmailResult::default();
                        result.fail(&email.id, summarizer::STAGE, None, error);
                        result
                    }
                }
            }
            Decision::Reply => self.reply_branch(email, context).await,
        }
    }

    /// Summary and drafts for an email that needs an answer. Drafts come
    /// first, the shared `Summarized` record last.
    async fn reply_branch(&self, email: Email, context: &Context) -> EmailResult {
        let summarizer = &self.stages.summarizer;
        let email_ref = &email;

        let (summary, plan) = tokio::join!(
            self.retry
                .run(summarizer::STAGE, move || summarizer.summarize(email_ref, context)),
            self.plan_replies(email_ref, context),
        );

        let mut result = EmailResult::default();
        let plan = match plan {
            Ok(plan) => Some(plan),
            Err((stage, error)) => {
                result.fail(&email.id, stage, None, error);
                None
            }
        };
        let summary = match summary {
            Ok(summary) => summary,
            Err(error) => {
                result.fail(&email.id, summarizer::STAGE, None, error);
                return result;
            }
        };

        if let Some(plan) = plan {
            let replier = &self.stages.replier;
            let summaries = plan.summaries.as_str();
            let drafts = join_all(plan.intentions.iter().map(move |intention| async move {
                let draft = self
                    .retry
                    .run(replier::STAGE, move || {
                        replier.draft(email_ref, context, intention, summaries)
                    })
                    .await;
                (intention, draft)
            }))
            .await;

            for (intention, draft) in drafts {
                match draft {
                    Ok(reply_text) => {
                        result.outcomes.push(ProcessedEmail::PotentialReply(PotentialReply {
                            email_id: email.id.clone(),
                            intention: intention.clone(),
                            reply_text,
                            summary: summary.clone(),
                        }))
                    }
                    Err(error) => {
                        result.fail(&email.id, replier::STAGE, Some(intention.clone()), error)
                    }
                }
            }
        }

        result
            .outcomes
            .push(ProcessedEmail::Summarized { email, summary });
        result
    }

    /// Keywords → retrieval → intentions.
    async fn plan_replies(
        &self,
        email: &Email,
        context: &Context,
    ) -> Result<ReplyPlan, (&'static str, PipelineError)> {
        let extractor = &self.stages.keywords;
        let keywords = self
            .retry
            .run(keywords::STAGE, move || extractor.extract(email, context))
            .await
            .map_err(|e| (keywords::STAGE, e))?;

        let summaries = self
            .retrieve(&keywords)
            .await
            .map_err(|e| (RETRIEVAL_STAGE, e))?;

        let generator = &self.stages.intentions;
        let intentions = self
            .retry
            .run(intentions::STAGE, move || generator.generate(email, context))
            .await
            .map_err(|e| (intentions::STAGE, e))?;

        debug!(
            email_id = %email.id,
            keywords = keywords.len(),
            intentions = intentions.len(),
            "Reply plan ready"
        );
        Ok(ReplyPlan {
            intentions,
            summaries,
        })
    }

    /// One search per keyword, results flattened in keyword order and joined
    /// with newlines.
    async fn retrieve(&self, keywords: &[String]) -> Result<String, PipelineError> {
        let retrieval = &self.retrieval;
        let searches = keywords.iter().map(move |keyword| {
            self.retry
                .run(RETRIEVAL_STAGE, move || retrieval.search(keyword))
        });

        let mut documents = Vec::new();
        for found in join_all(searches).await {
            documents.extend(found?);
        }
        Ok(documents.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::llm::{LlmProvider, PromptInvoker};
    use crate::pipeline::stages::LocalClock;
    use crate::pipeline::stages::test_support::{StageRouter, sample_email};
    use crate::store::MemoryStore;

    fn orchestrator(router: Arc<StageRouter>, store: Arc<MemoryStore>) -> TriageOrchestrator {
        let llm: Arc<dyn LlmProvider> = router;
        let invoker = Arc::new(PromptInvoker::new(llm));
        TriageOrchestrator::new(TriageStages::new(invoker, LocalClock::default()), store)
    }

    fn email(id: &str, from: &str, body: &str) -> Email {
        Email {
            id: id.into(),
            hash: Email::compute_hash(&[from.to_string()], None, body),
            from: vec![from.into()],
            text: Some(body.into()),
            ..sample_email()
        }
    }

    fn formal() -> Context {
        [("Tone", "formal")].into_iter().collect()
    }

    #[tokio::test]
    async fn empty_email_makes_no_model_calls() {
        let router = Arc::new(StageRouter::new("reply"));
        let orch = orchestrator(Arc::clone(&router), Arc::new(MemoryStore::new()));

        let mut no_body = sample_email();
        no_body.text = None;
        let mut no_date = email("e2", "a@co.com", "hi");
        no_date.date = None;

        let report = orch.process_emails(vec![no_body, no_date], &formal(), &[]).await;
        assert_eq!(report.outcomes.len(), 2);
        assert!(
            report
                .outcomes
                .iter()
                .all(|o| matches!(o, ProcessedEmail::Empty { .. }))
        );
        assert_eq!(router.total_calls(), 0);
    }

    #[tokio::test]
    async fn irrelevant_email_skips_summarizer() {
        let router = Arc::new(StageRouter::new("none"));
        let orch = orchestrator(Arc::clone(&router), Arc::new(MemoryStore::new()));

        let report = orch.process_emails(vec![sample_email()], &formal(), &[]).await;
        assert_eq!(report.outcomes.len(), 1);
        assert!(matches!(report.outcomes[0], ProcessedEmail::Irrelevant { .. }));
        assert_eq!(router.calls(summarizer::STAGE), 0);
    }

    #[tokio::test]
    async fn save_yields_one_summary() {
        let router = Arc::new(StageRouter::new("save"));
        let orch = orchestrator(Arc::clone(&router), Arc::new(MemoryStore::new()));

        let report = orch.process_emails(vec![sample_email()], &formal(), &[]).await;
        assert_eq!(report.outcomes.len(), 1);
        match &report.outcomes[0] {
            ProcessedEmail::Summarized { summary, .. } => assert!(!summary.is_empty()),
            other => panic!("expected summarized, got {other:?}"),
        }
        assert_eq!(router.calls(intentions::STAGE), 0);
    }

    #[tokio::test]
    async fn reply_fans_out_over_intentions_with_shared_summary() {
        let router = Arc::new(
            StageRouter::new("reply").with_intentions(&["Confirm", "Decline", "Ask for agenda"]),
        );
        let orch = orchestrator(Arc::clone(&router), Arc::new(MemoryStore::new()));

        let report = orch.process_emails(vec![sample_email()], &formal(), &[]).await;
        assert!(report.failures.is_empty());
        assert_eq!(report.outcomes.len(), 4);

        let summaries: Vec<&str> = report
            .outcomes
            .iter()
            .map(|o| match o {
                ProcessedEmail::PotentialReply(r) => r.summary.as_str(),
                ProcessedEmail::Summarized { summary, .. } => summary.as_str(),
                other => panic!("unexpected outcome {other:?}"),
            })
            .collect();
        assert!(summaries.windows(2).all(|w| w[0] == w[1]));
        assert!(matches!(report.outcomes[3], ProcessedEmail::Summarized { .. }));
        assert_eq!(router.calls(summarizer::STAGE), 1);
        assert_eq!(router.calls(replier::STAGE), 3);
    }

    #[tokio::test]
    async fn formal_meeting_scenario() {
        let router = Arc::new(StageRouter::new("reply").with_intentions(&["Confirm attendance"]));
        let orch = orchestrator(Arc::clone(&router), Arc::new(MemoryStore::new()));

        let report = orch.process_emails(vec![sample_email()], &formal(), &[]).await;
        assert_eq!(report.outcomes.len(), 2);
        match &report.outcomes[0] {
            ProcessedEmail::PotentialReply(reply) => {
                assert_eq!(reply.intention, "Confirm attendance");
                assert_eq!(reply.reply_text, "Reply: Confirm attendance");
                assert_eq!(reply.email_id, "e1");
            }
            other => panic!("expected reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_draft_keeps_other_intentions() {
        let router = Arc::new(
            StageRouter::new("reply")
                .with_intentions(&["Confirm", "Decline"])
                .failing_draft("Decline"),
        );
        let orch = orchestrator(Arc::clone(&router), Arc::new(MemoryStore::new()));

        let report = orch.process_emails(vec![sample_email()], &formal(), &[]).await;
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].stage, replier::STAGE);
        assert_eq!(report.failures[0].intention.as_deref(), Some("Decline"));
    }

    #[tokio::test]
    async fn classifier_failure_is_not_downgraded() {
        let router = Arc::new(StageRouter::new("none").failing_stage(relevancy::STAGE));
        let orch = orchestrator(Arc::clone(&router), Arc::new(MemoryStore::new()));

        let ok = email("e2", "a@co.com", "hello");
        let report = orch.process_emails(vec![sample_email(), ok], &formal(), &[]).await;
        assert!(report.outcomes.is_empty());
        assert_eq!(report.failures.len(), 2);
        assert!(report.failures.iter().all(|f| f.stage == relevancy::STAGE));
    }

    #[tokio::test]
    async fn one_email_failing_does_not_affect_another() {
        let router = Arc::new(
            StageRouter::new("none")
                .with_decision_for("invoice", "save")
                .with_decision_for("meeting", "reply")
                .with_intentions(&["Confirm"])
                .failing_draft("Confirm"),
        );
        let orch = orchestrator(Arc::clone(&router), Arc::new(MemoryStore::new()));

        let emails = vec![
            sample_email(),
            email("e2", "billing@co.com", "Your invoice is attached"),
        ];
        let report = orch.process_emails(emails, &formal(), &[]).await;
        assert_eq!(report.failures_for("e1").count(), 1);
        assert_eq!(report.outcomes_for("e1").count(), 1);
        assert!(matches!(
            report.outcomes_for("e2").next(),
            Some(ProcessedEmail::Summarized { .. })
        ));
    }

    #[tokio::test]
    async fn host_filter_excludes_without_outcome() {
        let router = Arc::new(StageRouter::new("none"));
        let orch = orchestrator(Arc::clone(&router), Arc::new(MemoryStore::new()));
        let rules = vec![AllowedHost::suffix("example.com"), AllowedHost::regex("([")];

        let emails = vec![
            email("e1", "A <a@sub.example.com>", "hi"),
            email("e2", "a@example.com.evil.com", "hi"),
        ];
        let report = orch.process_emails(emails, &formal(), &rules).await;
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].email_id(), "e1");
        assert_eq!(report.filtered_out, 1);
        assert_eq!(report.rule_errors.len(), 1);
    }

    #[tokio::test]
    async fn retrieved_summaries_reach_the_drafter() {
        let store = Arc::new(MemoryStore::new());
        store
            .add_document("Meeting time moved to 3pm", serde_json::json!({}))
            .await
            .unwrap();
        let router = Arc::new(StageRouter::new("reply"));
        let llm: Arc<dyn LlmProvider> = Arc::clone(&router) as Arc<dyn LlmProvider>;
        let invoker = Arc::new(PromptInvoker::new(llm));
        let stages = TriageStages::new(invoker, LocalClock::default());
        let orch = TriageOrchestrator::new(stages, store);

        let report = orch.process_emails(vec![sample_email()], &formal(), &[]).await;
        assert!(report.failures.is_empty());
        assert_eq!(router.calls(keywords::STAGE), 1);
        let drafted = router.system_prompts(replier::STAGE);
        assert_eq!(drafted.len(), 1);
        assert!(drafted[0].contains("Past email summaries:\nMeeting time moved to 3pm"));
    }

    #[tokio::test]
    async fn classifications_are_stable_across_runs() {
        let router = Arc::new(StageRouter::new("none"));
        let orch = orchestrator(Arc::clone(&router), Arc::new(MemoryStore::new()));
        let mut empty = sample_email();
        empty.id = "e0".into();
        empty.from.clear();

        let first = orch
            .process_emails(vec![sample_email(), empty.clone()], &formal(), &[])
            .await;
        let second = orch
            .process_emails(vec![sample_email(), empty], &formal(), &[])
            .await;
        assert_eq!(first.outcomes, second.outcomes);
    }
}
