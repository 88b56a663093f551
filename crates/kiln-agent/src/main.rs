//! Kiln worker entrypoint.

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use kiln_agent::{AgentConfig, BuildAgent, LivenessAnnouncer, worker_name};
use kiln_core::ports::{CoordinationStore, JobQueue, SubBuildSubmitter};
use kiln_core::{BuildStatus, JobRecord, keys};
use kiln_notify::{NotificationDispatcher, TargetCipher};
use kiln_runner::DockerEnvironment;
use kiln_scheduler::{BuildContext, HttpSubBuildSubmitter, QueueSubBuildSubmitter, submit_build};
use kiln_store::{ACTIVE_WORKER_WINDOW, StoreQueue, active_worker_count, create_store, queue_length};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about = "Kiln continuous build worker", long_about = None)]
struct Cli {
    /// YAML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the worker until interrupted.
    Run {
        /// Queue `REPO[@COMMIT]` before starting. Repeatable.
        #[arg(long)]
        enqueue: Vec<String>,
    },
    /// Build one repository and exit.
    Build {
        /// `REPO[@COMMIT]`
        reference: String,
    },
    /// Encrypt a notification target for a repository key.
    Encrypt {
        #[arg(long)]
        key: String,
        target: String,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(fmt::layer().with_target(true)).init(),
        LogFormat::Json => registry.with(fmt::layer().json().with_target(true)).init(),
    }
}

struct Worker {
    config: AgentConfig,
    store: Arc<dyn CoordinationStore>,
    queue: Arc<dyn JobQueue>,
    agent: BuildAgent,
}

async fn assemble(config: AgentConfig) -> anyhow::Result<Worker> {
    let store = create_store(&config.store)
        .await
        .context("Coordination store is not reachable")?;
    let queue: Arc<dyn JobQueue> = Arc::new(StoreQueue::new(store.clone()));

    let docker = DockerEnvironment::connect().context("Docker is not reachable")?;
    if config.pull_image_on_start {
        if let Err(e) = docker.pull_image(&config.build_image).await {
            warn!(error = %e, "Could not pull build image, using local copy");
        }
    }

    let blobs = kiln_blob::create_blob_store(&config.blob).context("Invalid blob configuration")?;
    let sub_builds: Arc<dyn SubBuildSubmitter> = match &config.sub_build_url {
        Some(url) => Arc::new(HttpSubBuildSubmitter::new(url.clone())),
        None => Arc::new(QueueSubBuildSubmitter::new(queue.clone(), store.clone())),
    };

    tokio::fs::create_dir_all(&config.work_dir)
        .await
        .with_context(|| format!("Cannot create {}", config.work_dir.display()))?;

    let ctx = Arc::new(BuildContext {
        store: store.clone(),
        queue: queue.clone(),
        environment: Arc::new(docker),
        blobs,
        notifier: Arc::new(NotificationDispatcher::new(&config.notify)),
        sub_builds,
        config: config.builder_config(),
    });
    let agent = BuildAgent::new(ctx, config.max_concurrent_builds, config.poll_interval());

    Ok(Worker {
        config,
        store,
        queue,
        agent,
    })
}

async fn enqueue(worker: &Worker, reference: &str) -> anyhow::Result<JobRecord> {
    let job = JobRecord::parse_reference(reference);
    submit_build(worker.queue.as_ref(), worker.store.as_ref(), &job)
        .await
        .with_context(|| format!("Failed to queue {}", reference))?;
    Ok(job)
}

async fn run(worker: Worker, references: Vec<String>) -> anyhow::Result<()> {
    for reference in &references {
        enqueue(&worker, reference).await?;
    }
    let queued = queue_length(worker.queue.as_ref()).await?;
    let active_workers = active_worker_count(worker.store.as_ref(), ACTIVE_WORKER_WINDOW).await?;
    info!(queued, active_workers, "Worker starting");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let announcer = LivenessAnnouncer::new(
        worker.store.clone(),
        worker.config.worker_name.clone().unwrap_or_else(worker_name),
        worker.config.liveness_interval(),
        worker.config.liveness_retention(),
    );
    let liveness_rx = shutdown_rx.clone();
    let liveness = tokio::spawn(async move { announcer.run(liveness_rx).await });

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    worker.agent.run(shutdown_rx).await;
    if let Err(e) = liveness.await {
        error!(error = %e, "Liveness task failed");
    }
    Ok(())
}

async fn build_once(worker: Worker, reference: &str) -> anyhow::Result<()> {
    let job = enqueue(&worker, reference).await?;
    let deadline = worker.config.builder_config().lock_ttl;

    let reports = tokio::time::timeout(deadline, worker.agent.run_until_drained())
        .await
        .context("Build did not settle before the lock TTL")??;
    for report in &reports {
        info!(
            repository = %report.job.repository,
            resolution = ?report.resolution,
            "Build settled"
        );
    }

    let status = worker
        .store
        .get(&keys::build_status(&job.repository))
        .await?
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default();
    if status != BuildStatus::Finished.as_str() {
        let reason = worker
            .store
            .get(&keys::abort_reason(&job.repository))
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());
        match reason {
            Some(reason) => bail!("Build for {} aborted: {}", job.repository, reason),
            None => bail!("Build for {} ended with status '{}'", job.repository, status),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    if let Commands::Encrypt { key, target } = &cli.command {
        let sealed = TargetCipher::from_key(key)?.encrypt(target)?;
        println!("{}", sealed);
        return Ok(());
    }

    let config = AgentConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let worker = assemble(config).await?;

    match cli.command {
        Commands::Run { enqueue } => run(worker, enqueue).await,
        Commands::Build { reference } => build_once(worker, &reference).await,
        Commands::Encrypt { .. } => Ok(()),
    }
}
