mod inspect;

use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::Table;
use rq_client::Producer;
use rq_core::TaskPayload;
use rq_store::{QueueStore, StoreConfig};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Yaml,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum QueueKind {
    Pending,
    Quarantine,
    InFlight,
}

#[derive(Parser, Debug)]
#[command(name = "rq-admin")]
#[command(about = "Reliable queue admin CLI", long_about = None)]
struct Args {
    /// Redis URL
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// Key namespace
    #[arg(long, env = "RQ_NAMESPACE")]
    namespace: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Submit a new task
    Submit {
        /// JSON payload
        #[arg(required_unless_present = "payload_file")]
        payload: Option<String>,

        /// Read the JSON payload from a file instead
        #[arg(short, long, conflicts_with = "payload")]
        payload_file: Option<String>,
    },

    /// Submit a stream of demo tasks
    Generate {
        #[arg(short, long, default_value = "5")]
        count: u32,

        /// Pause between submissions
        #[arg(long, default_value = "500")]
        interval_ms: u64,
    },

    /// Show queue lengths
    QueueDepth,

    /// List known workers and their liveness
    Workers,

    /// List the contents of a queue, head first
    Inspect {
        #[arg(value_enum)]
        queue: QueueKind,

        /// Worker whose in-flight queue to show
        #[arg(required_if_eq("queue", "in-flight"))]
        worker_id: Option<String>,

        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Return a worker's in-flight tasks to the pending queue
    Recover {
        worker_id: String,

        /// Recover even if the worker's heartbeat is live
        #[arg(long)]
        force: bool,
    },
}

fn print<T: Serialize>(format: OutputFormat, value: &T, table: impl FnOnce(&T) -> Table) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
        OutputFormat::Table => println!("{}", table(value)),
    }
    Ok(())
}

fn read_payload(payload: Option<String>, payload_file: Option<String>) -> anyhow::Result<TaskPayload> {
    let text = match (payload, payload_file) {
        (_, Some(path)) => std::fs::read_to_string(&path)?,
        (Some(inline), None) => inline,
        (None, None) => anyhow::bail!("a payload or --payload-file is required"),
    };
    Ok(serde_json::from_str(&text)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Logs go to stdout alongside command output; keep them to warnings
    rq_core::telemetry::init_tracing(rq_core::LogFormat::Pretty, "warn");

    let store_config = StoreConfig {
        redis_url: args.redis_url.clone(),
        namespace: args.namespace.clone(),
    };
    let store: Arc<dyn QueueStore> = Arc::new(store_config.connect(Duration::ZERO).await?);
    let keys = store.keys().clone();
    let format = args.format;

    match args.command {
        Commands::Submit { payload, payload_file } => {
            let payload = read_payload(payload, payload_file)?;
            let record = Producer::new(store).submit(payload).await?;

            match format {
                OutputFormat::Json => println!("{}", json!({ "task_id": record.id() })),
                OutputFormat::Yaml => println!("task_id: {}", record.id()),
                OutputFormat::Table => println!("Task submitted: {}", record.id()),
            }
        }

        Commands::Generate { count, interval_ms } => {
            let producer = Producer::new(store);
            for i in 0..count {
                let payload = json!({
                    "kind": "data_analysis",
                    "data_id": 100 + i,
                    "difficulty": "high",
                });
                let record = producer.submit(payload).await?;
                println!("Task submitted: {}", record.id());

                if i + 1 < count {
                    tokio::time::sleep(Duration::from_millis(interval_ms)).await;
                }
            }
            println!("Submitted {count} tasks");
        }

        Commands::QueueDepth => {
            let depth = inspect::queue_depth(store.as_ref()).await?;
            print(format, &depth, inspect::depth_table)?;
        }

        Commands::Workers => {
            let rows = inspect::workers(store.as_ref()).await?;
            print(format, &rows, |rows| inspect::workers_table(rows))?;
        }

        Commands::Inspect { queue, worker_id, limit } => {
            let queue_key = match (queue, worker_id) {
                (QueueKind::Pending, _) => keys.pending(),
                (QueueKind::Quarantine, _) => keys.quarantine(),
                (QueueKind::InFlight, Some(id)) => keys.in_flight(&id),
                (QueueKind::InFlight, None) => anyhow::bail!("in-flight requires a worker id"),
            };
            let entries = inspect::entries(store.as_ref(), &queue_key, limit).await?;
            print(format, &entries, |entries| inspect::entries_table(entries))?;
        }

        Commands::Recover { worker_id, force } => {
            let recovery = inspect::recover(store, &worker_id, force).await?;

            match format {
                OutputFormat::Table => println!(
                    "Recovered {} task(s) from {}",
                    recovery.recovered, recovery.worker_id
                ),
                _ => print(format, &recovery, |_| Table::new())?,
            }
        }
    }

    Ok(())
}
