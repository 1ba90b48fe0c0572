//! Cron-driven triage passes with pause/resume.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::ConfigError;
use crate::llm::RetryPolicy;
use crate::pipeline::runner::{RunSummary, TriageRunner};

/// Every two hours from 09:00 to 21:00.
pub const DEFAULT_SCHEDULE: &str = "0 0 9-21/2 * * *";

/// Parse a 6- or 7-field cron expression.
pub fn parse_schedule(expr: &str) -> Result<cron::Schedule, ConfigError> {
    cron::Schedule::from_str(expr).map_err(|e| ConfigError::InvalidValue {
        key: "MAIL_TRIAGE_SCHEDULE".to_string(),
        message: format!("invalid cron '{expr}': {e}"),
    })
}

/// Control handle for a spawned scheduler.
pub struct SchedulerHandle {
    paused: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Skip ticks until resumed. A pass already running is not interrupted.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
        info!("Triage scheduler paused");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
        info!("Triage scheduler resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Triage scheduler task failed");
        }
    }
}

/// Spawn the scheduler loop. Each tick runs one pass under `retry`.
pub fn spawn_triage_scheduler(
    runner: Arc<TriageRunner>,
    schedule: cron::Schedule,
    retry: RetryPolicy,
) -> SchedulerHandle {
    let paused = Arc::new(AtomicBool::new(false));
    let paused_flag = Arc::clone(&paused);
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        info!(schedule = %schedule, "Triage scheduler started");

        loop {
            let Some(next) = schedule.upcoming(Utc).next() else {
                warn!("Schedule has no upcoming fire times, stopping");
                return;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            debug!(next = %next, "Waiting for next triage tick");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown_rx.changed() => {
                    info!("Triage scheduler shutting down");
                    return;
                }
            }

            if paused_flag.load(Ordering::Relaxed) {
                debug!("Triage scheduler paused, skipping tick");
                continue;
            }

            run_tick(&runner, &retry).await;
        }
    });

    SchedulerHandle {
        paused,
        shutdown_tx,
        task,
    }
}

/// One scheduled pass. Errors are logged after the retries run out.
pub async fn run_tick(runner: &TriageRunner, retry: &RetryPolicy) -> Option<RunSummary> {
    match retry.run("triage_pass", move || runner.run_once()).await {
        Ok(summary) => Some(summary),
        Err(e) => {
            error!(error = %e, kind = e.kind(), "Scheduled triage pass failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use chrono::Timelike;

    use crate::channels::MailSource;
    use crate::error::PipelineError;
    use crate::llm::{LlmProvider, PromptInvoker};
    use crate::pipeline::orchestrator::TriageOrchestrator;
    use crate::pipeline::stages::test_support::StageRouter;
    use crate::pipeline::stages::{LocalClock, TriageStages};
    use crate::pipeline::types::Email;
    use crate::store::{ContextStore, MemoryStore, PersistenceSink, RetrievalStore};

    /// Counts fetches; fails the first `failures` of them.
    struct CountingSource {
        fetches: AtomicUsize,
        failures: usize,
    }

    #[async_trait]
    impl MailSource for CountingSource {
        fn name(&self) -> &str {
            "counting"
        }

        async fn fetch(&self) -> Result<Vec<Email>, PipelineError> {
            let n = self.fetches.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(PipelineError::MailSource("imap down".into()));
            }
            Ok(Vec::new())
        }
    }

    fn runner(source: Arc<CountingSource>) -> Arc<TriageRunner> {
        let store = Arc::new(MemoryStore::new());
        let llm: Arc<dyn LlmProvider> = Arc::new(StageRouter::new("none"));
        let stages = TriageStages::new(Arc::new(PromptInvoker::new(llm)), LocalClock::default());
        let orchestrator = Arc::new(TriageOrchestrator::new(
            stages,
            Arc::clone(&store) as Arc<dyn RetrievalStore>,
        ));
        Arc::new(TriageRunner::new(
            source,
            Arc::clone(&store) as Arc<dyn ContextStore>,
            Arc::clone(&store) as Arc<dyn PersistenceSink>,
            store as Arc<dyn RetrievalStore>,
            orchestrator,
        ))
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::default()
            .with_backoff(Duration::from_millis(1), Duration::from_millis(2))
            .with_jitter(0.0)
    }

    #[test]
    fn default_schedule_parses() {
        let schedule = parse_schedule(DEFAULT_SCHEDULE).unwrap();
        let next = schedule.upcoming(Utc).next().unwrap();
        assert!((9..=21).contains(&next.hour()));
        assert_eq!(next.hour() % 2, 1);
    }

    #[test]
    fn bad_schedule_is_config_error() {
        let err = parse_schedule("every day").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[tokio::test]
    async fn tick_retries_failed_fetches() {
        let source = Arc::new(CountingSource {
            fetches: AtomicUsize::new(0),
            failures: 2,
        });
        let runner = runner(Arc::clone(&source));

        let summary = run_tick(&runner, &fast_retry()).await;
        assert!(summary.is_some());
        assert_eq!(source.fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn tick_gives_up_after_max_attempts() {
        let source = Arc::new(CountingSource {
            fetches: AtomicUsize::new(0),
            failures: usize::MAX,
        });
        let runner = runner(Arc::clone(&source));

        let summary = run_tick(&runner, &fast_retry().with_max_attempts(3)).await;
        assert!(summary.is_none());
        assert_eq!(source.fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn paused_scheduler_skips_ticks() {
        let source = Arc::new(CountingSource {
            fetches: AtomicUsize::new(0),
            failures: 0,
        });
        let schedule = parse_schedule("* * * * * *").unwrap();
        let handle = spawn_triage_scheduler(runner(Arc::clone(&source)), schedule, fast_retry());

        handle.pause();
        assert!(handle.is_paused());
        tokio::time::sleep(Duration::from_millis(2200)).await;
        assert_eq!(source.fetches.load(Ordering::SeqCst), 0);

        handle.resume();
        assert!(!handle.is_paused());
        tokio::time::sleep(Duration::from_millis(2200)).await;
        assert!(source.fetches.load(Ordering::SeqCst) >= 1);

        handle.shutdown().await;
    }
}
