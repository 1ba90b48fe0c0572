//! Prompt invoker: one structured LLM call per invocation.
//!
//! Renders a system + user template pair, sends it to the provider once and
//! parses the answer into the stage's output type. Parsing never guesses: a
//! response that does not fit is an `OutputParse` error. Retries belong to the
//! caller (see `llm::retry`).

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::PipelineError;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider, estimate_cost};
use crate::llm::template::{PromptTemplate, Variables};

/// Default sampling temperature for pipeline stages.
const DEFAULT_TEMPERATURE: f32 = 0.2;

/// Default output cap per call.
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// A chat prompt: system template, literal prior turns, user template.
#[derive(Debug, Clone)]
pub struct ChatPrompt {
    pub system: PromptTemplate,
    pub history: Vec<ChatMessage>,
    pub user: PromptTemplate,
}

impl ChatPrompt {
    pub fn new(system: PromptTemplate, user: PromptTemplate) -> Self {
        Self {
            system,
            history: Vec::new(),
            user,
        }
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }
}

/// Typed output of a stage.
pub trait StageOutput: Sized {
    /// Format instructions appended to the system prompt, if any.
    fn format_instructions() -> Option<String>;

    /// Parse the raw model answer.
    fn parse(stage: &str, raw: &str) -> Result<Self, PipelineError>;
}

/// Free text output. Empty answers are rejected.
impl StageOutput for String {
    fn format_instructions() -> Option<String> {
        None
    }

    fn parse(stage: &str, raw: &str) -> Result<Self, PipelineError> {
        let text = raw.trim();
        if text.is_empty() {
            return Err(PipelineError::OutputParse {
                stage: stage.to_string(),
                reason: "empty response".to_string(),
            });
        }
        Ok(text.to_string())
    }
}

/// Instructions asking for a single-key JSON object.
pub fn json_key_instructions(key: &str, shape: &str, description: &str) -> String {
    format!(
        "Respond with ONLY a JSON object of the form {{\"{key}\": {shape}}}.\n\
         \"{key}\": {description}\n\
         No other text."
    )
}

/// Parse a JSON object out of a model answer into `T`.
pub fn parse_json_output<T: DeserializeOwned>(stage: &str, raw: &str) -> Result<T, PipelineError> {
    let json_str = extract_json_object(raw);
    serde_json::from_str(&json_str).map_err(|e| PipelineError::OutputParse {
        stage: stage.to_string(),
        reason: format!("JSON parse error: {e}"),
    })
}

/// Extract a JSON object from LLM output (handles markdown wrapping).
pub fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}

/// Executes prompts against one provider.
pub struct PromptInvoker {
    llm: Arc<dyn LlmProvider>,
    temperature: f32,
    max_tokens: u32,
    stage_timeout: Option<Duration>,
}

impl PromptInvoker {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            stage_timeout: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Abort any single call that runs longer than `timeout`.
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = Some(timeout);
        self
    }

    pub fn model_name(&self) -> &str {
        self.llm.model_name()
    }

    /// Render `prompt` with `vars`, call the model once, parse into `T`.
    ///
    /// Template errors are raised before any model call is made.
    pub async fn invoke<T: StageOutput>(
        &self,
        stage: &str,
        prompt: &ChatPrompt,
        vars: &Variables,
    ) -> Result<T, PipelineError> {
        let mut system = prompt.system.render(vars)?;
        if let Some(instructions) = T::format_instructions() {
            system.push_str("\n\n");
            system.push_str(&instructions);
        }
        let user = prompt.user.render(vars)?;

        let mut messages = Vec::with_capacity(prompt.history.len() + 2);
        messages.push(ChatMessage::system(system));
        messages.extend(prompt.history.iter().cloned());
        messages.push(ChatMessage::user(user));

        let request = CompletionRequest::new(messages)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens);

        let call = self.llm.complete(request);
        let response = match self.stage_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                PipelineError::StageTimeout {
                    stage: stage.to_string(),
                    timeout: limit,
                }
            })??,
            None => call.await?,
        };

        debug!(
            stage,
            model = self.llm.model_name(),
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            cost_usd = %estimate_cost(self.llm.as_ref(), &response),
            "Stage completed"
        );

        T::parse(stage, &response.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use serde::Deserialize;

    use crate::error::LlmError;
    use crate::llm::provider::{CompletionResponse, FinishReason, Role};

    /// Mock LLM that returns a fixed response and records requests.
    struct RecordingLlm {
        response: String,
        delay: Option<Duration>,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl RecordingLlm {
        fn new(response: &str) -> Self {
            Self {
                response: response.to_string(),
                delay: None,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for RecordingLlm {
        fn model_name(&self) -> &str {
            "recording"
        }

        fn cost_per_token(&self) -> (Decimal, Decimal) {
            (Decimal::ZERO, Decimal::ZERO)
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            self.requests.lock().unwrap().push(request);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(CompletionResponse {
                content: self.response.clone(),
                input_tokens: 10,
                output_tokens: 5,
                finish_reason: FinishReason::Stop,
            })
        }
    }

    #[derive(Debug, Deserialize)]
    struct Keyed {
        decision: String,
    }

    impl StageOutput for Keyed {
        fn format_instructions() -> Option<String> {
            Some(json_key_instructions("decision", "\"...\"", "the decision"))
        }

        fn parse(stage: &str, raw: &str) -> Result<Self, PipelineError> {
            parse_json_output(stage, raw)
        }
    }

    fn prompt() -> ChatPrompt {
        ChatPrompt::new(
            PromptTemplate::new("test.system", "You help {name}."),
            PromptTemplate::new("test.user", "Body: {body}"),
        )
    }

    #[tokio::test]
    async fn invoke_renders_and_parses_text() {
        let llm = Arc::new(RecordingLlm::new("  a summary \n"));
        let invoker = PromptInvoker::new(llm.clone());
        let vars = Variables::new().with("name", "Jim").with("body", "hello");

        let out: String = invoker.invoke("test", &prompt(), &vars).await.unwrap();
        assert_eq!(out, "a summary");

        let requests = llm.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let messages = &requests[0].messages;
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, "You help Jim.");
        assert_eq!(messages[1].content, "Body: hello");
    }

    #[tokio::test]
    async fn invoke_missing_variable_makes_no_call() {
        let llm = Arc::new(RecordingLlm::new("x"));
        let invoker = PromptInvoker::new(llm.clone());
        let vars = Variables::new().with("name", "Jim");

        let result: Result<String, _> = invoker.invoke("test", &prompt(), &vars).await;
        assert!(matches!(result, Err(PipelineError::Template { .. })));
        assert!(llm.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invoke_structured_output_appends_instructions() {
        let llm = Arc::new(RecordingLlm::new("```json\n{\"decision\": \"save\"}\n```"));
        let invoker = PromptInvoker::new(llm.clone());
        let vars = Variables::new().with("name", "Jim").with("body", "b");

        let out: Keyed = invoker.invoke("test", &prompt(), &vars).await.unwrap();
        assert_eq!(out.decision, "save");
        let requests = llm.requests.lock().unwrap();
        assert!(requests[0].messages[0].content.contains("\"decision\""));
    }

    #[tokio::test]
    async fn invoke_unparseable_output_is_parse_error() {
        let llm = Arc::new(RecordingLlm::new("I think you should reply."));
        let invoker = PromptInvoker::new(llm);
        let vars = Variables::new().with("name", "Jim").with("body", "b");

        let result: Result<Keyed, _> = invoker.invoke("relevancy", &prompt(), &vars).await;
        match result {
            Err(PipelineError::OutputParse { stage, .. }) => assert_eq!(stage, "relevancy"),
            other => panic!("expected OutputParse, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn invoke_history_sits_between_system_and_user() {
        let llm = Arc::new(RecordingLlm::new("ok"));
        let invoker = PromptInvoker::new(llm.clone());
        let vars = Variables::new().with("name", "Jim").with("body", "b");
        let prompt = prompt().with_history(vec![
            ChatMessage::user("first"),
            ChatMessage::assistant("second"),
        ]);

        let _: String = invoker.invoke("test", &prompt, &vars).await.unwrap();
        let requests = llm.requests.lock().unwrap();
        let roles: Vec<Role> = requests[0].messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User]
        );
    }

    #[tokio::test]
    async fn invoke_times_out() {
        let mut llm = RecordingLlm::new("late");
        llm.delay = Some(Duration::from_millis(200));
        let invoker =
            PromptInvoker::new(Arc::new(llm)).with_stage_timeout(Duration::from_millis(10));
        let vars = Variables::new().with("name", "Jim").with("body", "b");

        let result: Result<String, _> = invoker.invoke("summarizer", &prompt(), &vars).await;
        assert!(matches!(result, Err(PipelineError::StageTimeout { .. })));
    }

    #[test]
    fn empty_text_is_rejected() {
        assert!(String::parse("summarizer", "   ").is_err());
    }

    #[test]
    fn extract_json_embedded_in_text() {
        let input = "My analysis: {\"decision\": \"none\"} done.";
        let result = extract_json_object(input);
        assert!(result.starts_with('{'));
        assert!(result.ends_with('}'));
    }

    #[test]
    fn extract_json_from_plain_fence() {
        let input = "```\n{\"decision\": \"reply\"}\n```";
        assert_eq!(extract_json_object(input), "{\"decision\": \"reply\"}");
    }
}
