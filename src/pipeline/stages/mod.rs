//! Per-email LLM stages.
//!
//! Each stage owns its prompt and turns one email (plus steering context) into
//! a typed value through the shared `PromptInvoker`. Context is always passed
//! in per call; stages hold no mutable state.

pub mod intentions;
pub mod keywords;
pub mod relevancy;
pub mod replier;
pub mod summarizer;

pub use intentions::IntentionGenerator;
pub use keywords::KeywordExtractor;
pub use relevancy::{Decision, RelevancyClassifier};
pub use replier::ReplyDrafter;
pub use summarizer::Summarizer;

use std::sync::Arc;

use chrono::{FixedOffset, Offset, Utc};

use crate::llm::{PromptInvoker, Variables};
use crate::pipeline::types::{Context, Email, join_or_none};

/// Wall clock in the user's timezone, rendered into prompts.
#[derive(Debug, Clone, Copy)]
pub struct LocalClock {
    offset: FixedOffset,
}

impl LocalClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Build from a whole-hour UTC offset. Out-of-range offsets fall back to UTC.
    pub fn from_offset_hours(hours: i32) -> Self {
        let offset = FixedOffset::east_opt(hours.saturating_mul(3600)).unwrap_or(Utc.fix());
        Self { offset }
    }

    pub fn now(&self) -> String {
        Utc::now()
            .with_timezone(&self.offset)
            .format("%-m/%-d/%Y, %-I:%M:%S %p")
            .to_string()
    }
}

impl Default for LocalClock {
    fn default() -> Self {
        Self::from_offset_hours(0)
    }
}

/// Email fields shared by every stage prompt.
pub fn email_variables(email: &Email) -> Variables {
    Variables::new()
        .with("from", email.from.join("\n"))
        .with("to", email.to.join("\n"))
        .with("cc", join_or_none(email.cc.as_deref()))
        .with("bcc", join_or_none(email.bcc.as_deref()))
        .with("subject", email.subject.clone().unwrap_or_else(|| "None".to_string()))
        .with("body", email.body().unwrap_or_default())
        .with("delivery_date", email.delivery_date())
}

/// Email fields plus rendered context and the current time.
pub fn stage_variables(email: &Email, context: &Context, clock: &LocalClock) -> Variables {
    email_variables(email)
        .with("context", context.render())
        .with("current_time", clock.now())
}

/// All five stages behind one invoker.
pub struct TriageStages {
    pub relevancy: RelevancyClassifier,
    pub summarizer: Summarizer,
    pub keywords: KeywordExtractor,
    pub intentions: IntentionGenerator,
    pub replier: ReplyDrafter,
}

impl TriageStages {
    pub fn new(invoker: Arc<PromptInvoker>, clock: LocalClock) -> Self {
        Self {
            relevancy: RelevancyClassifier::new(Arc::clone(&invoker), clock),
            summarizer: Summarizer::new(Arc::clone(&invoker), clock),
            keywords: KeywordExtractor::new(Arc::clone(&invoker), clock),
            intentions: IntentionGenerator::new(Arc::clone(&invoker), clock),
            replier: ReplyDrafter::new(invoker, clock),
        }
    }
}
