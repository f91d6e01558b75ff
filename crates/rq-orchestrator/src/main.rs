use clap::Parser;
use rq_core::LogFormat;
use rq_orchestrator::{Orchestrator, OrchestratorConfig};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "rq-orchestrator")]
#[command(about = "Reliable queue orchestrator: recovers tasks from dead workers", long_about = None)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Redis URL
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Key namespace
    #[arg(long, env = "RQ_NAMESPACE")]
    namespace: Option<String>,

    /// Seconds between liveness sweeps
    #[arg(long)]
    poll_interval_secs: Option<u64>,

    /// Log output: pretty or json
    #[arg(long, env = "RQ_LOG_FORMAT")]
    log_format: Option<LogFormat>,
}

impl Args {
    fn load_config(&self) -> anyhow::Result<OrchestratorConfig> {
        let mut config = match &self.config {
            Some(path) => OrchestratorConfig::from_file(path)?,
            None => OrchestratorConfig::default(),
        };

        if let Some(url) = &self.redis_url {
            config.store.redis_url = url.clone();
        }
        if let Some(namespace) = &self.namespace {
            config.store.namespace = Some(namespace.clone());
        }
        if let Some(poll) = self.poll_interval_secs {
            config.poll_interval_secs = poll;
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let config = args.load_config()?;

    rq_core::telemetry::init_tracing(config.log_format, "info");

    if let Err(e) = run(config).await {
        error!(component = "orchestrator", event = "fatal", error = %e, "Orchestrator exited");
        return Err(e);
    }
    Ok(())
}

async fn run(config: OrchestratorConfig) -> anyhow::Result<()> {
    config.validate()?;

    // the orchestrator never blocks on a reserve
    let store = config.store.connect(std::time::Duration::ZERO).await?;
    info!(component = "orchestrator", namespace = ?config.store.namespace, "Connected to store");

    let orchestrator = Orchestrator::new(config, Arc::new(store))?;

    // Handle shutdown signals
    let shutdown = orchestrator.shutdown_token();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!(component = "orchestrator", "Received shutdown signal");
        shutdown.cancel();
    });

    orchestrator.run().await;

    Ok(())
}
