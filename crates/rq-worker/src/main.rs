use clap::{Parser, ValueEnum};
use rq_core::LogFormat;
use rq_worker::handler::{EchoHandler, SleepHandler};
use rq_worker::{TaskHandler, Worker, WorkerConfig};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum HandlerKind {
    /// Log the payload and succeed
    Echo,
    /// Sleep for --sleep-ms, then succeed
    Sleep,
}

#[derive(Parser, Debug)]
#[command(name = "rq-worker")]
#[command(about = "Reliable queue worker", long_about = None)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(long)]
    config: Option<String>,

    /// Redis URL
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Key namespace
    #[arg(long, env = "RQ_NAMESPACE")]
    namespace: Option<String>,

    /// Worker ID (auto-generated if not provided)
    #[arg(long, env = "RQ_WORKER_ID")]
    worker_id: Option<String>,

    #[arg(long)]
    heartbeat_ttl_secs: Option<u64>,

    #[arg(long)]
    heartbeat_interval_secs: Option<u64>,

    #[arg(long)]
    reserve_timeout_secs: Option<u64>,

    /// Per-task time limit, 0 for none
    #[arg(long)]
    execution_timeout_secs: Option<u64>,

    /// Task handler to run
    #[arg(long, value_enum, default_value = "sleep")]
    handler: HandlerKind,

    /// Simulated work per task for the sleep handler
    #[arg(long, default_value = "3000")]
    sleep_ms: u64,

    /// Log output: pretty or json
    #[arg(long, env = "RQ_LOG_FORMAT")]
    log_format: Option<LogFormat>,
}

impl Args {
    fn load_config(&self) -> anyhow::Result<WorkerConfig> {
        let mut config = match &self.config {
            Some(path) => WorkerConfig::from_file(path)?,
            None => WorkerConfig::default(),
        };

        if let Some(url) = &self.redis_url {
            config.store.redis_url = url.clone();
        }
        if let Some(namespace) = &self.namespace {
            config.store.namespace = Some(namespace.clone());
        }
        if let Some(worker_id) = &self.worker_id {
            config.worker_id = Some(worker_id.clone());
        }
        if let Some(ttl) = self.heartbeat_ttl_secs {
            config.heartbeat_ttl_secs = ttl;
        }
        if let Some(interval) = self.heartbeat_interval_secs {
            config.heartbeat_interval_secs = interval;
        }
        if let Some(timeout) = self.reserve_timeout_secs {
            config.reserve_timeout_secs = timeout;
        }
        if let Some(timeout) = self.execution_timeout_secs {
            config.execution_timeout_secs = timeout;
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

    if let Err(e) = run(args, config).await {
        error!(component = "worker", event = "fatal", error = %e, "Worker exited");
        return Err(e);
    }
    Ok(())
}

async fn run(args: Args, config: WorkerConfig) -> anyhow::Result<()> {
    config.validate()?;

    let handler: Arc<dyn TaskHandler> = match args.handler {
        HandlerKind::Echo => Arc::new(EchoHandler),
        HandlerKind::Sleep => Arc::new(SleepHandler::new(args.sleep_ms)),
    };

    let store = config.store.connect(config.reserve_timeout()).await?;
    info!(component = "worker", namespace = ?config.store.namespace, "Connected to store");

    let worker = Worker::new(config, Arc::new(store), handler)?;

    // Handle shutdown signals
    let shutdown = worker.shutdown_token();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!(component = "worker", "Received shutdown signal");
        shutdown.cancel();
    });

    worker.run().await?;

    Ok(())
}
