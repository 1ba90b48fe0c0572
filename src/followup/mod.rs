//! Follow-up conversations about drafted replies.

pub mod evaluator;
pub mod service;

pub use evaluator::{FollowUpEvaluator, FollowUpSeed};
pub use service::FollowUpService;
