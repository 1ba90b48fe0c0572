//! Entry point for follow-up requests.
//!
//! Keeps one evaluator per reply id behind its own async mutex, so turns on
//! the same reply run one at a time while different replies proceed in
//! parallel. Steering context is re-read on every turn. Idle sessions are
//! evicted once the map reaches its bound; their transcripts reload from
//! storage on the next turn.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::error::PipelineError;
use crate::followup::evaluator::{FollowUpEvaluator, FollowUpSeed};
use crate::llm::PromptInvoker;
use crate::store::{ContextStore, PersistenceSink, TranscriptStore};

type Session = Arc<Mutex<FollowUpEvaluator>>;

/// Cached evaluators kept before idle ones are evicted.
pub const DEFAULT_MAX_SESSIONS: usize = 256;

pub struct FollowUpService {
    invoker: Arc<PromptInvoker>,
    sink: Arc<dyn PersistenceSink>,
    contexts: Arc<dyn ContextStore>,
    transcripts: Arc<dyn TranscriptStore>,
    sessions: Mutex<HashMap<String, Session>>,
    max_sessions: usize,
}

impl FollowUpService {
    pub fn new(
        invoker: Arc<PromptInvoker>,
        sink: Arc<dyn PersistenceSink>,
        contexts: Arc<dyn ContextStore>,
        transcripts: Arc<dyn TranscriptStore>,
    ) -> Self {
        Self {
            invoker,
            sink,
            contexts,
            transcripts,
            sessions: Mutex::new(HashMap::new()),
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }

    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions.max(1);
        self
    }

    /// Ask for a revision of reply `reply_id`. Returns the revised text.
    pub async fn submit_follow_up(
        &self,
        reply_id: &str,
        input: &str,
    ) -> Result<String, PipelineError> {
        let session = self.session(reply_id).await?;
        let criteria = self.contexts.get_context().await?;
        let mut evaluator = session.lock().await;
        evaluator.submit(&criteria, input).await
    }

    /// Number of replies with a live evaluator.
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    async fn session(&self, reply_id: &str) -> Result<Session, PipelineError> {
        if let Some(session) = self.sessions.lock().await.get(reply_id) {
            return Ok(Arc::clone(session));
        }

        let seed = self.load_seed(reply_id).await?;
        let evaluator = FollowUpEvaluator::new(
            Arc::clone(&self.invoker),
            Arc::clone(&self.transcripts),
            seed,
        );

        // Another request may have created the session while we were loading.
        let mut sessions = self.sessions.lock().await;
        if !sessions.contains_key(reply_id) && sessions.len() >= self.max_sessions {
            evict_idle(&mut sessions);
        }
        let session = sessions
            .entry(reply_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(evaluator)));
        debug!(reply_id, "Follow-up session ready");
        Ok(Arc::clone(session))
    }

    async fn load_seed(&self, reply_id: &str) -> Result<FollowUpSeed, PipelineError> {
        let reply = self
            .sink
            .get_potential_reply(reply_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound {
                entity: "potential reply".to_string(),
                id: reply_id.to_string(),
            })?;
        let email = self
            .sink
            .get_email(&reply.reply.email_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound {
                entity: "email".to_string(),
                id: reply.reply.email_id.clone(),
            })?;

        Ok(FollowUpSeed {
            email_body: email.text.unwrap_or_default(),
            reply,
        })
    }
}

/// Drop sessions no request is holding. Callers clone a session under the
/// map lock, so a count of one means only the map refers to it.
fn evict_idle(sessions: &mut HashMap<String, Session>) {
    let before = sessions.len();
    sessions.retain(|_, session| Arc::strong_count(session) > 1);
    debug!(evicted = before - sessions.len(), "Evicted idle follow-up sessions");
}
