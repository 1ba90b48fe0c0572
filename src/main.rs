use std::sync::Arc;

use anyhow::Context as _;
use tracing::{info, warn};

use mail_triage::api::{self, ApiState};
use mail_triage::channels::{MailSource, MaildirSource, StaticMailSource};
use mail_triage::config::TriageConfig;
use mail_triage::followup::FollowUpService;
use mail_triage::llm::{PromptInvoker, RetryPolicy, create_provider};
use mail_triage::pipeline::scheduler::{parse_schedule, spawn_triage_scheduler};
use mail_triage::pipeline::{LocalClock, TriageOrchestrator, TriageRunner, TriageStages};
use mail_triage::store::{ContextStore, LibSqlBackend, PersistenceSink, RetrievalStore, TranscriptStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = TriageConfig::from_env().context("loading configuration")?;

    eprintln!("📬 Mail Triage v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.llm.model);
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   Schedule: {}", config.schedule);
    eprintln!("   API: http://0.0.0.0:{}", config.port);

    // ── LLM ─────────────────────────────────────────────────────────────
    let llm = create_provider(&config.llm).context("creating LLM provider")?;
    let invoker = Arc::new(PromptInvoker::new(llm).with_stage_timeout(config.stage_timeout));
    let clock = LocalClock::from_offset_hours(config.timezone_offset_hours);

    // ── Database ────────────────────────────────────────────────────────
    let db = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("opening database at {}", config.db_path.display()))?
            .with_top_k(config.retrieval_top_k),
    );

    // ── Mail source ─────────────────────────────────────────────────────
    let source: Arc<dyn MailSource> = match &config.maildir {
        Some(dir) => Arc::new(MaildirSource::new(dir)),
        None => {
            warn!("MAIL_TRIAGE_MAILDIR not set, triage passes will see no mail");
            Arc::new(StaticMailSource::new(Vec::new()))
        }
    };

    // ── Pipeline ────────────────────────────────────────────────────────
    let orchestrator = Arc::new(
        TriageOrchestrator::new(
            TriageStages::new(Arc::clone(&invoker), clock),
            Arc::clone(&db) as Arc<dyn RetrievalStore>,
        )
        .with_retry(RetryPolicy::default()),
    );
    let runner = Arc::new(TriageRunner::new(
        source,
        Arc::clone(&db) as Arc<dyn ContextStore>,
        Arc::clone(&db) as Arc<dyn PersistenceSink>,
        Arc::clone(&db) as Arc<dyn RetrievalStore>,
        orchestrator,
    ));
    let follow_ups = Arc::new(FollowUpService::new(
        invoker,
        Arc::clone(&db) as Arc<dyn PersistenceSink>,
        Arc::clone(&db) as Arc<dyn ContextStore>,
        db as Arc<dyn TranscriptStore>,
    ));

    let schedule = parse_schedule(&config.schedule)?;
    let scheduler = spawn_triage_scheduler(Arc::clone(&runner), schedule, RetryPolicy::default());

    // ── HTTP ────────────────────────────────────────────────────────────
    let app = api::routes(ApiState { runner, follow_ups });
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("binding port {}", config.port))?;
    info!(port = config.port, "API server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("serving HTTP")?;

    scheduler.shutdown().await;
    info!("Shut down");
    Ok(())
}
