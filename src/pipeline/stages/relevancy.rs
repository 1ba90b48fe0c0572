//! Relevancy classifier: the single branch point of a triage run.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PipelineError;
use crate::llm::invoker::{json_key_instructions, parse_json_output};
use crate::llm::{ChatPrompt, PromptInvoker, PromptTemplate, StageOutput};
use crate::pipeline::stages::{LocalClock, stage_variables};
use crate::pipeline::types::{Context, Email};

pub const STAGE: &str = "relevancy";

const SYSTEM_PROMPT: &str = "\
Your role as an AI is to support users in managing their email exchanges. Your task is to analyze \
the provided email and gauge its relevance to the user's ongoing needs. You must decide if a response \
to this email is needed from the user's standpoint.

Respond with one of the following actions:

'reply': Indicating the user should respond and the email should be retained in the database.
'save': Although the user doesn't need to reply, the email carries enough importance to be stored in the database.
'none': The user doesn't need to reply, and the email shouldn't be stored in the database.

For instances where the email is a promotional, scam or spam email, your response should consistently \
be 'none'. If the username of the sender is noreply, and it's not relevant to our context, you should \
answer 'none'. However, if the email is pertinent to the context information below, your response \
should at least be 'save'. But, if the email is of utmost importance that warrants a response from the \
user's standpoint (for instance, if the email explicitly mentions the user's name or email address, or \
when the user's feedback is sought), you should respond with 'reply'. Included is the information \
regarding the email (from, to, cc, bcc addresses, delivery date and body) each delimited with XML tags.

<context>
{context}
</context>

<current_time>
{current_time}
</current_time>";

pub(crate) const EMAIL_USER_PROMPT: &str = "\
<email-from>
{from}
</email-from>

<email-to>
{to}
</email-to>

<email-cc>
{cc}
</email-cc>

<email-bcc>
{bcc}
</email-bcc>

<email-body>
{body}
</email-body>

<delivery-date>
{delivery_date}
</delivery-date>";

/// Classifier verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Needs a response.
    Reply,
    /// Worth remembering, no response needed.
    Save,
    /// Promotional, spam or otherwise irrelevant.
    None,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reply => "reply",
            Self::Save => "save",
            Self::None => "none",
        }
    }
}

#[derive(Debug, Deserialize)]
struct RelevancyOutput {
    decision: Decision,
}

impl StageOutput for RelevancyOutput {
    fn format_instructions() -> Option<String> {
        Some(json_key_instructions(
            "decision",
            "\"reply\" | \"save\" | \"none\"",
            "Should the user reply to the email, given the context and the email's message? \
             Should the email be saved for future reference?",
        ))
    }

    fn parse(stage: &str, raw: &str) -> Result<Self, PipelineError> {
        parse_json_output(stage, raw)
    }
}

pub struct RelevancyClassifier {
    invoker: Arc<PromptInvoker>,
    prompt: ChatPrompt,
    clock: LocalClock,
}

impl RelevancyClassifier {
    pub fn new(invoker: Arc<PromptInvoker>, clock: LocalClock) -> Self {
        Self {
            invoker,
            prompt: ChatPrompt::new(
                PromptTemplate::new("relevancy.system", SYSTEM_PROMPT),
                PromptTemplate::new("relevancy.user", EMAIL_USER_PROMPT),
            ),
            clock,
        }
    }

    pub async fn classify(&self, email: &Email, context: &Context) -> Result<Decision, PipelineError> {
        let vars = stage_variables(email, context, &self.clock);
        let output: RelevancyOutput = self.invoker.invoke(STAGE, &self.prompt, &vars).await?;
        debug!(email_id = %email.id, decision = ?output.decision, "Email classified");
        Ok(output.decision)
    }
}
