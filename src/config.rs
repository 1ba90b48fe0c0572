//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};
use crate::pipeline::scheduler::{DEFAULT_SCHEDULE, parse_schedule};
use crate::store::retrieval::DEFAULT_TOP_K;

/// Runtime configuration for the triage service.
#[derive(Debug, Clone)]
pub struct TriageConfig {
    pub llm: LlmConfig,
    /// libSQL database file.
    pub db_path: PathBuf,
    /// Directory of `.eml` files. No directory means no mail is fetched.
    pub maildir: Option<PathBuf>,
    pub port: u16,
    /// Cron expression for scheduled passes (6 or 7 fields).
    pub schedule: String,
    /// Deadline for a single model call.
    pub stage_timeout: Duration,
    pub retrieval_top_k: usize,
    /// UTC offset for the "current time" rendered into prompts.
    pub timezone_offset_hours: i32,
}

impl TriageConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend = match get("MAIL_TRIAGE_LLM_BACKEND") {
            Some(value) => value.parse::<LlmBackend>()?,
            None => LlmBackend::OpenAi,
        };
        let key_var = backend.api_key_var();
        let api_key = get(key_var).ok_or_else(|| ConfigError::MissingEnvVar(key_var.to_string()))?;
        let model = get("MAIL_TRIAGE_MODEL").unwrap_or_else(|| "gpt-4o".to_string());

        let schedule = get("MAIL_TRIAGE_SCHEDULE").unwrap_or_else(|| DEFAULT_SCHEDULE.to_string());
        parse_schedule(&schedule)?;

        Ok(Self {
            llm: LlmConfig {
                backend,
                api_key: SecretString::from(api_key),
                model,
            },
            db_path: get("MAIL_TRIAGE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/mail-triage.db")),
            maildir: get("MAIL_TRIAGE_MAILDIR").map(PathBuf::from),
            port: parse_or(&get, "MAIL_TRIAGE_PORT", 8080)?,
            schedule,
            stage_timeout: Duration::from_secs(parse_or(&get, "MAIL_TRIAGE_STAGE_TIMEOUT_SECS", 60)?),
            retrieval_top_k: parse_or(&get, "MAIL_TRIAGE_RETRIEVAL_TOP_K", DEFAULT_TOP_K)?,
            timezone_offset_hours: parse_or(&get, "MAIL_TRIAGE_TIMEZONE_OFFSET_HOURS", 7)?,
        })
    }
}

/// Parse `key` if set, else `default`.
fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{raw}': {e}"),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    fn config(vars: &[(&str, &str)]) -> Result<TriageConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        TriageConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let cfg = config(&[("OPENAI_API_KEY", "sk-test")]).unwrap();
        assert_eq!(cfg.llm.backend, LlmBackend::OpenAi);
        assert_eq!(cfg.llm.api_key.expose_secret(), "sk-test");
        assert_eq!(cfg.llm.model, "gpt-4o");
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.schedule, DEFAULT_SCHEDULE);
        assert_eq!(cfg.stage_timeout, Duration::from_secs(60));
        assert_eq!(cfg.retrieval_top_k, 3);
        assert_eq!(cfg.timezone_offset_hours, 7);
        assert!(cfg.maildir.is_none());
    }

    #[test]
    fn backend_selects_key_variable() {
        let err = config(&[
            ("MAIL_TRIAGE_LLM_BACKEND", "anthropic"),
            ("OPENAI_API_KEY", "sk-test"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref v) if v == "ANTHROPIC_API_KEY"));

        let cfg = config(&[
            ("MAIL_TRIAGE_LLM_BACKEND", "anthropic"),
            ("ANTHROPIC_API_KEY", "sk-ant"),
            ("MAIL_TRIAGE_MODEL", "claude-3-5-sonnet-latest"),
        ])
        .unwrap();
        assert_eq!(cfg.llm.backend, LlmBackend::Anthropic);
        assert_eq!(cfg.llm.model, "claude-3-5-sonnet-latest");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = config(&[("OPENAI_API_KEY", "k"), ("MAIL_TRIAGE_PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "MAIL_TRIAGE_PORT"));

        let err = config(&[("OPENAI_API_KEY", "k"), ("MAIL_TRIAGE_SCHEDULE", "hourly")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn blank_values_count_as_unset() {
        let err = config(&[("OPENAI_API_KEY", "  ")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(_)));

        let cfg = config(&[("OPENAI_API_KEY", "k"), ("MAIL_TRIAGE_MAILDIR", "/var/mail/in")]).unwrap();
        assert_eq!(cfg.maildir, Some(PathBuf::from("/var/mail/in")));
    }
}
