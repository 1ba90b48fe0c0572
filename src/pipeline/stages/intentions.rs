//! Intention generator: candidate reasons to reply, one draft each.

use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::error::PipelineError;
use crate::llm::invoker::{json_key_instructions, parse_json_output};
use crate::llm::{ChatPrompt, PromptInvoker, PromptTemplate, StageOutput};
use crate::pipeline::stages::{LocalClock, stage_variables};
use crate::pipeline::types::{Context, Email};

pub const STAGE: &str = "intentions";

const SYSTEM_PROMPT: &str = "\
Your role as an AI is to support users in managing their email exchanges. Your task is to generate \
possible users intentions for replies, given the context below. Generate an array of sentences \
describing possible user reply intentions.

Context:
{context}";

const USER_PROMPT: &str = "\
Email from:
{from}

Email to:
{to}

Email cc:
{cc}

Email bcc:
{bcc}

Email body:
{body}

Delivery date:
{delivery_date}";

#[derive(Debug, Deserialize)]
struct IntentionsOutput {
    intentions: Vec<String>,
}

impl StageOutput for IntentionsOutput {
    fn format_instructions() -> Option<String> {
        Some(json_key_instructions(
            "intentions",
            "[\"...\"]",
            "Possible user intentions, as short sentences.",
        ))
    }

    fn parse(stage: &str, raw: &str) -> Result<Self, PipelineError> {
        parse_json_output(stage, raw)
    }
}

pub struct IntentionGenerator {
    invoker: Arc<PromptInvoker>,
    prompt: ChatPrompt,
    clock: LocalClock,
}

impl IntentionGenerator {
    pub fn new(invoker: Arc<PromptInvoker>, clock: LocalClock) -> Self {
        Self {
            invoker,
            prompt: ChatPrompt::new(
                PromptTemplate::new("intentions.system", SYSTEM_PROMPT),
                PromptTemplate::new("intentions.user", USER_PROMPT),
            ),
            clock,
        }
    }

    pub async fn generate(&self, email: &Email, context: &Context) -> Result<Vec<String>, PipelineError> {
        let vars = stage_variables(email, context, &self.clock);
        let output: IntentionsOutput = self.invoker.invoke(STAGE, &self.prompt, &vars).await?;
        let intentions: Vec<String> = output
            .intentions
            .into_iter()
            .map(|i| i.trim().to_string())
            .filter(|i| !i.is_empty())
            .collect();
        debug!(email_id = %email.id, count = intentions.len(), "Intentions generated");
        Ok(intentions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::pipeline::stages::test_support::{ScriptedLlm, sample_email};

    #[tokio::test]
    async fn generates_intentions_in_order() {
        let llm = Arc::new(ScriptedLlm::new(&[
            r#"Here you go: {"intentions": ["Confirm attendance", "Propose a new time"]}"#,
        ]));
        let generator =
            IntentionGenerator::new(Arc::new(PromptInvoker::new(llm.clone())), LocalClock::default());
        let ctx: Context = [("Tone", "formal")].into_iter().collect();
        let intentions = generator.generate(&sample_email(), &ctx).await.unwrap();

        assert_eq!(intentions, vec!["Confirm attendance", "Propose a new time"]);
        assert!(llm.system_prompt(0).contains("Context:\nTone: formal"));
        assert!(llm.user_prompt(0).contains("Email cc:\na@co.com\nb@co.com"));
        assert!(llm.user_prompt(0).contains("Email bcc:\nNone"));
    }
}
