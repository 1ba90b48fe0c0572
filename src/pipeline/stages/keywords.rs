//! Keyword extractor: short factual statements used as retrieval queries.

use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::error::PipelineError;
use crate::llm::invoker::{json_key_instructions, parse_json_output};
use crate::llm::{ChatPrompt, PromptInvoker, PromptTemplate, StageOutput};
use crate::pipeline::stages::relevancy::EMAIL_USER_PROMPT;
use crate::pipeline::stages::{LocalClock, stage_variables};
use crate::pipeline::types::{Context, Email};

pub const STAGE: &str = "keywords";

const SYSTEM_PROMPT: &str = "\
Your role as an AI is to assist users in managing their email correspondence more effectively. \
Specifically, your task is to zero in on the body of the provided email to identify the most significant \
pieces of information that are actionable or contextually important. Ignore header details like \"from\", \
\"to\", \"cc\", and \"delivery date\" unless they are directly related to the content and context of the \
email body. The email information will be structured with XML tags to delineate each component (from, \
to, cc, bcc, delivery date, and body).

Based on your analysis of the email body, your answer should be an array of short, succinct sentences \
that highlight key takeaways, action items, or important context.

<context>
Current Time: {current_time}
{context}
</context>";

#[derive(Debug, Deserialize)]
struct KeywordsOutput {
    extracted_info: Vec<String>,
}

impl StageOutput for KeywordsOutput {
    fn format_instructions() -> Option<String> {
        Some(json_key_instructions(
            "extracted_info",
            "[\"...\"]",
            "Important information extracted from the email, as short sentences.",
        ))
    }

    fn parse(stage: &str, raw: &str) -> Result<Self, PipelineError> {
        parse_json_output(stage, raw)
    }
}

pub struct KeywordExtractor {
    invoker: Arc<PromptInvoker>,
    prompt: ChatPrompt,
    clock: LocalClock,
}

impl KeywordExtractor {
    pub fn new(invoker: Arc<PromptInvoker>, clock: LocalClock) -> Self {
        Self {
            invoker,
            prompt: ChatPrompt::new(
                PromptTemplate::new("keywords.system", SYSTEM_PROMPT),
                PromptTemplate::new("keywords.user", EMAIL_USER_PROMPT),
            ),
            clock,
        }
    }

    /// Extracted statements in model order, blanks dropped.
    pub async fn extract(&self, email: &Email, context: &Context) -> Result<Vec<String>, PipelineError> {
        let vars = stage_variables(email, context, &self.clock);
        let output: KeywordsOutput = self.invoker.invoke(STAGE, &self.prompt, &vars).await?;
        let keywords: Vec<String> = output
            .extracted_info
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        debug!(email_id = %email.id, count = keywords.len(), "Keywords extracted");
        Ok(keywords)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::pipeline::stages::test_support::{ScriptedLlm, sample_email};

    #[tokio::test]
    async fn keeps_order_and_drops_blanks() {
        let llm = Arc::new(ScriptedLlm::new(&[
            r#"{"extracted_info": ["Meeting time needs confirmation", " ", "Sent by boss"]}"#,
        ]));
        let extractor =
            KeywordExtractor::new(Arc::new(PromptInvoker::new(llm)), LocalClock::default());
        let keywords = extractor
            .extract(&sample_email(), &Context::new())
            .await
            .unwrap();
        assert_eq!(
            keywords,
            vec!["Meeting time needs confirmation", "Sent by boss"]
        );
    }

    #[tokio::test]
    async fn wrong_key_is_parse_error() {
        let llm = Arc::new(ScriptedLlm::new(&[r#"{"keywords": ["x"]}"#]));
        let extractor =
            KeywordExtractor::new(Arc::new(PromptInvoker::new(llm)), LocalClock::default());
        let result = extractor.extract(&sample_email(), &Context::new()).await;
        assert!(matches!(result, Err(PipelineError::OutputParse { .. })));
    }
}
