//! Reply drafter: one reply body per intention.

use std::sync::Arc;

use tracing::debug;

use crate::error::PipelineError;
use crate::llm::{ChatPrompt, PromptInvoker, PromptTemplate};
use crate::pipeline::stages::{LocalClock, email_variables};
use crate::pipeline::types::{Context, Email};

pub const STAGE: &str = "replier";

const SYSTEM_PROMPT: &str = "\
Your role as an AI is to support users when responding to email exchanges. Your task is to write a \
reply given the email's body, user's intention and relevant summaries of previous emails (ignore them \
if they're irrelevant). You answer should only be the email's text and nothing else.

Context:
{context}

Past email summaries:
{summaries}";

const USER_PROMPT: &str = "\
Email from:
{from}

Email to:
{to}

Email body:
{body}

Delivery date:
{delivery_date}

Intention:
{intention}";

pub struct ReplyDrafter {
    invoker: Arc<PromptInvoker>,
    prompt: ChatPrompt,
    clock: LocalClock,
}

impl ReplyDrafter {
    pub fn new(invoker: Arc<PromptInvoker>, clock: LocalClock) -> Self {
        Self {
            invoker,
            prompt: ChatPrompt::new(
                PromptTemplate::new("replier.system", SYSTEM_PROMPT),
                PromptTemplate::new("replier.user", USER_PROMPT),
            ),
            clock,
        }
    }

    /// Draft a reply body for `intention`. `summaries` is the retrieved
    /// history, already joined.
    pub async fn draft(
        &self,
        email: &Email,
        context: &Context,
        intention: &str,
        summaries: &str,
    ) -> Result<String, PipelineError> {
        let context = context.with_entry("Current Time", self.clock.now());
        let vars = email_variables(email)
            .with("context", context.render())
            .with("summaries", summaries)
            .with("intention", intention);
        let reply: String = self.invoker.invoke(STAGE, &self.prompt, &vars).await?;
        debug!(email_id = %email.id, intention, chars = reply.len(), "Reply drafted");
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::pipeline::stages::test_support::{ScriptedLlm, sample_email};

    #[tokio::test]
    async fn injects_current_time_and_summaries() {
        let llm = Arc::new(ScriptedLlm::new(&["Dear Boss,\n\nConfirmed for 10am.\n"]));
        let drafter =
            ReplyDrafter::new(Arc::new(PromptInvoker::new(llm.clone())), LocalClock::default());
        let ctx: Context = [("Tone", "formal")].into_iter().collect();

        let reply = drafter
            .draft(&sample_email(), &ctx, "Confirm attendance", "Meeting moved to 10am")
            .await
            .unwrap();

        assert_eq!(reply, "Dear Boss,\n\nConfirmed for 10am.");
        let system = llm.system_prompt(0);
        assert!(system.contains("Current Time: "));
        assert!(system.contains("Tone: formal"));
        assert!(system.contains("Past email summaries:\nMeeting moved to 10am"));
        assert!(llm.user_prompt(0).contains("Intention:\nConfirm attendance"));
        // caller's context is not mutated
        assert_eq!(ctx.len(), 1);
    }
}
