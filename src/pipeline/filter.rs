//! Sender allow-list filter.
//!
//! Runs before any model call. Emails whose sender matches no rule are left
//! out of the run entirely; they produce no outcome.
//!
//! With no rules configured every email passes. That is the current behavior
//! of an unconfigured install, not a security policy.

use regex::Regex;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::pipeline::types::{AllowedHost, Email, HostRuleType};

/// A compiled allowed-host rule.
#[derive(Debug, Clone)]
enum CompiledRule {
    Suffix(String),
    Pattern(Regex),
}

impl CompiledRule {
    fn matches(&self, address: &str) -> bool {
        match self {
            Self::Suffix(host) => address.ends_with(host.as_str()),
            Self::Pattern(regex) => regex.is_match(address),
        }
    }
}

/// Compiled snapshot of the allowed-host rules for one run.
#[derive(Debug, Clone, Default)]
pub struct HostFilter {
    rules: Vec<CompiledRule>,
    configured: usize,
}

impl HostFilter {
    /// Compile `rules`. Malformed regex rules are dropped and reported one
    /// error each; the remaining rules still apply.
    pub fn compile(rules: &[AllowedHost]) -> (Self, Vec<PipelineError>) {
        let mut compiled = Vec::with_capacity(rules.len());
        let mut errors = Vec::new();

        for rule in rules {
            match rule.kind {
                HostRuleType::String => compiled.push(CompiledRule::Suffix(rule.host.clone())),
                HostRuleType::Regex => match Regex::new(&rule.host) {
                    Ok(regex) => compiled.push(CompiledRule::Pattern(regex)),
                    Err(e) => {
                        warn!(host = %rule.host, error = %e, "Skipping malformed allowed-host rule");
                        errors.push(PipelineError::FilterConfig {
                            host: rule.host.clone(),
                            reason: e.to_string(),
                        });
                    }
                },
            }
        }

        (
            Self {
                rules: compiled,
                configured: rules.len(),
            },
            errors,
        )
    }

    /// Number of usable rules.
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// True if any rule matches any sender address.
    ///
    /// Only an empty configuration passes everything. A configuration whose
    /// every rule was malformed passes nothing.
    pub fn matches(&self, email: &Email) -> bool {
        if self.configured == 0 {
            return true;
        }

        let passed = email
            .from
            .iter()
            .map(|value| extract_address(value))
            .any(|address| self.rules.iter().any(|rule| rule.matches(address)));

        if !passed {
            debug!(email_id = %email.id, from = ?email.from, "Sender not in allowed hosts");
        }
        passed
    }
}

/// The address between `<` and `>`, or the raw value when there are no brackets.
pub fn extract_address(value: &str) -> &str {
    if let Some(start) = value.find('<')
        && let Some(len) = value[start + 1..].find('>')
    {
        return &value[start + 1..start + 1 + len];
    }
    value.trim()
}
