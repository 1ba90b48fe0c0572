//! Conversational refinement of one drafted reply.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::llm::{ChatMessage, ChatPrompt, PromptInvoker, PromptTemplate, Variables};
use crate::pipeline::types::{Context, Message, MessageKind, StoredReply};
use crate::store::TranscriptStore;

pub const STAGE: &str = "followup";

const PREAMBLE: &str = "\
Your role as an AI is to help the user refine a reply to an email. Rewrite the reply according to \
the user's latest request and answer with the full reply text only.

Context:
{criteria}

Original Email body:
{body}

Original Intention
{intention}

Current reply draft:
{draft}";

/// What a follow-up conversation is anchored to. Steering criteria are not
/// part of the seed: they are read fresh for every turn.
#[derive(Debug, Clone)]
pub struct FollowUpSeed {
    pub reply: StoredReply,
    pub email_body: String,
}

/// Transcript-backed conversation about one drafted reply.
///
/// `submit` takes `&mut self`: one instance serves one writer. Callers that
/// share an evaluator must serialize access themselves.
pub struct FollowUpEvaluator {
    invoker: Arc<PromptInvoker>,
    transcripts: Arc<dyn TranscriptStore>,
    seed: FollowUpSeed,
    conversation_id: Option<String>,
    transcript: Vec<Message>,
    prompt_built: bool,
}

impl FollowUpEvaluator {
    pub fn new(
        invoker: Arc<PromptInvoker>,
        transcripts: Arc<dyn TranscriptStore>,
        seed: FollowUpSeed,
    ) -> Self {
        Self {
            invoker,
            transcripts,
            seed,
            conversation_id: None,
            transcript: Vec::new(),
            prompt_built: false,
        }
    }

    pub fn reply_id(&self) -> &str {
        &self.seed.reply.id
    }

    /// Working copy of the transcript, in submission order.
    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// Ask for a revision under the current `criteria`. Returns the model's
    /// new reply text.
    ///
    /// The new human and AI messages are persisted as one append. If the
    /// append fails the working copy is discarded and reloaded from storage
    /// on the next call.
    pub async fn submit(
        &mut self,
        criteria: &Context,
        input: &str,
    ) -> Result<String, PipelineError> {
        if !self.prompt_built {
            self.load_transcript().await?;
        }
        let conversation_id = self
            .conversation_id
            .clone()
            .ok_or_else(|| PipelineError::NotFound {
                entity: "chat_history".to_string(),
                id: self.seed.reply.id.clone(),
            })?;

        info!(
            reply_id = %self.seed.reply.id,
            turns = self.transcript.len(),
            "Submitting follow-up"
        );

        let human = Message::human(input);
        let prompt = self.build_prompt();
        let vars = self.variables(criteria).with("input", input);
        let answer: String = self.invoker.invoke(STAGE, &prompt, &vars).await?;
        let ai = Message::ai(answer.clone());

        // Both turns are recorded only once the model has answered.
        self.transcript.push(human.clone());
        self.transcript.push(ai.clone());

        if let Err(e) = self
            .transcripts
            .append_transcript(&conversation_id, &[human, ai])
            .await
        {
            warn!(
                reply_id = %self.seed.reply.id,
                error = %e,
                "Failed to persist follow-up turn, will reload transcript"
            );
            self.prompt_built = false;
            return Err(e.into());
        }

        debug!(reply_id = %self.seed.reply.id, turns = self.transcript.len(), "Follow-up stored");
        Ok(answer)
    }

    /// Replace the working copy with the stored transcript, creating an
    /// empty one on first use.
    async fn load_transcript(&mut self) -> Result<(), PipelineError> {
        let reply = &self.seed.reply;
        let history = match self.transcripts.get_transcript(&reply.id).await? {
            Some(history) => history,
            None => {
                self.transcripts
                    .create_transcript(&reply.reply.email_id, &reply.id)
                    .await?
            }
        };
        debug!(
            reply_id = %reply.id,
            conversation_id = %history.id,
            turns = history.chat_messages.len(),
            "Transcript loaded"
        );
        self.conversation_id = Some(history.id);
        self.transcript = history.chat_messages;
        self.prompt_built = true;
        Ok(())
    }

    fn build_prompt(&self) -> ChatPrompt {
        let history = self
            .transcript
            .iter()
            .map(|message| match message.kind {
                MessageKind::Human => ChatMessage::user(message.text.clone()),
                MessageKind::Ai => ChatMessage::assistant(message.text.clone()),
            })
            .collect();
        ChatPrompt::new(
            PromptTemplate::new("followup.system", PREAMBLE),
            PromptTemplate::new("followup.user", "{input}"),
        )
        .with_history(history)
    }

    fn variables(&self, criteria: &Context) -> Variables {
        Variables::new()
            .with("criteria", criteria.render())
            .with("body", self.seed.email_body.clone())
            .with("intention", self.seed.reply.reply.intention.clone())
            .with("draft", self.seed.reply.reply.reply_text.clone())
    }
}
