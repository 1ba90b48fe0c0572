//! Mail sources feeding the triage runner.

pub mod mailbox;

pub use mailbox::{MailSource, MaildirSource, StaticMailSource};
