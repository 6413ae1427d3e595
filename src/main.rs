use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use case_screener::{
    assessment::{AssessmentStrategy, LlmAssessmentService},
    config::Config,
    corpus::CorpusStore,
    extraction::TextExtractor,
    queue::{AnalysisPipeline, JobStore},
    routes::create_router,
    utils::{init_tracing, DEFAULT_LOG_FILTER},
    AppState,
};

#[derive(Debug, Parser)]
#[command(name = "case-screener", about = "Screen uploaded case documents against rules, laws and keywords")]
struct Cli {
    /// Address to bind (overrides HOST)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides PORT)
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(DEFAULT_LOG_FILTER);

    let mut config = Config::from_env()?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    info!("Configuration loaded: {:?}", config.server);

    let service = LlmAssessmentService::from_config(&config.llm)
        .map_err(|e| anyhow::anyhow!("Failed to initialise assessment service: {}", e))?;
    if !service.is_configured() {
        warn!("LLM_API_KEY is not set; assessments will report the service as unavailable");
    }

    let strategy = Arc::new(AssessmentStrategy::new(Arc::new(service), &config.assessment));
    let corpus = CorpusStore::from_config(&config.corpus).await;
    let extractor = TextExtractor::new().with_max_archive_entry_bytes(config.server.max_archive_entry_bytes);
    let jobs = JobStore::new(AnalysisPipeline::new(extractor, corpus.clone(), strategy));

    let state = AppState {
        config: config.clone(),
        jobs,
        corpus,
    };
    let app = create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
