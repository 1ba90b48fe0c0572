//! Summarizer: a short summary used as the email's stored summary and as a
//! retrieval document.

use std::sync::Arc;

use tracing::debug;

use crate::error::PipelineError;
use crate::llm::{ChatPrompt, PromptInvoker, PromptTemplate};
use crate::pipeline::stages::relevancy::EMAIL_USER_PROMPT;
use crate::pipeline::stages::{LocalClock, stage_variables};
use crate::pipeline::types::{Context, Email};

pub const STAGE: &str = "summarizer";

const SYSTEM_PROMPT: &str = "\
Your role as an AI is to support users in managing their email exchanges. Your task is to summarize \
the email's body, given the context below. Included is the information regarding the email (from, to, \
cc, bcc addresses, delivery date and body) each delimited with XML tags. Please answer with nothing \
but the summary and make it as short as possible.

<context>
{context}
</context>

<current_time>
{current_time}
</current_time>";

pub struct Summarizer {
    invoker: Arc<PromptInvoker>,
    prompt: ChatPrompt,
    clock: LocalClock,
}

impl Summarizer {
    pub fn new(invoker: Arc<PromptInvoker>, clock: LocalClock) -> Self {
        Self {
            invoker,
            prompt: ChatPrompt::new(
                PromptTemplate::new("summarizer.system", SYSTEM_PROMPT),
                PromptTemplate::new("summarizer.user", EMAIL_USER_PROMPT),
            ),
            clock,
        }
    }

    pub async fn summarize(&self, email: &Email, context: &Context) -> Result<String, PipelineError> {
        let vars = stage_variables(email, context, &self.clock);
        let summary: String = self.invoker.invoke(STAGE, &self.prompt, &vars).await?;
        debug!(email_id = %email.id, chars = summary.len(), "Email summarized");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::pipeline::stages::test_support::{ScriptedLlm, sample_email};

    #[tokio::test]
    async fn returns_trimmed_summary() {
        let llm = Arc::new(ScriptedLlm::new(&["\nBoss asks to confirm meeting time.\n"]));
        let summarizer =
            Summarizer::new(Arc::new(PromptInvoker::new(llm)), LocalClock::default());
        let summary = summarizer
            .summarize(&sample_email(), &Context::new())
            .await
            .unwrap();
        assert_eq!(summary, "Boss asks to confirm meeting time.");
    }

    #[tokio::test]
    async fn blank_summary_is_rejected() {
        let llm = Arc::new(ScriptedLlm::new(&["   "]));
        let summarizer =
            Summarizer::new(Arc::new(PromptInvoker::new(llm)), LocalClock::default());
        let result = summarizer.summarize(&sample_email(), &Context::new()).await;
        assert!(matches!(result, Err(PipelineError::OutputParse { .. })));
    }
}
