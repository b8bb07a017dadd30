//! `entropyd`: the Entropy content-addressed object store daemon.
//!
//! Bootstrap follows the teacher's `cuenv` binary (clap-derived CLI,
//! `tracing-subscriber` `EnvFilter` init, `tokio::main`) retargeted from a
//! CLI toolchain to a long-running HTTP service.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use entropy_config::{BackendDescriptor, BackendOptions, Config};
use entropy_core::{DeferredWriteBackend, Error, PendingUploadSink, ReadBackend, Result, WriteBackend};
use entropy_coordinator::Coordinator;
use entropy_local::LocalBackend;
use entropy_migrate::{MigrationEngine, ReplicaBackend};
use entropy_remote::RemoteBackend;
use entropy_s3::S3Backend;
use entropy_scheduler::Scheduler;
use entropy_server::{router, AppState, Deferred};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Entropy: a content-addressed object store")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, env = "ENTROPY_CONFIG", default_value = "entropy.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (the default when no subcommand is given).
    Serve {
        /// Overrides the `listen` address from the config file.
        #[arg(long)]
        listen: Option<String>,
    },
    /// Run a verify-and-repair pass across all configured read backends.
    Verify {
        #[arg(long, default_value_t = 4)]
        concurrency: i64,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("entropyd: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(&cli.config)?;
    let hash = config.hash_algorithm()?;

    let local = Arc::new(LocalBackend::open("local", config.base_dir.clone(), hash)?);

    match cli.command.unwrap_or(Command::Serve { listen: None }) {
        Command::Serve { listen } => serve(&config, local, listen).await,
        Command::Verify { concurrency } => verify(&config, local, concurrency).await,
    }
}

async fn serve(config: &Config, local: Arc<LocalBackend>, listen_override: Option<String>) -> Result<()> {
    let mut read_backends: Vec<Arc<dyn ReadBackend>> = Vec::new();
    for desc in &config.read_backends {
        read_backends.push(build_read_backend(desc, &local).await?);
    }

    let mut write_backends: Vec<Arc<dyn WriteBackend>> = Vec::new();
    for desc in &config.write_backends {
        write_backends.push(build_write_backend(desc, &local).await?);
    }

    let mut deferred_backends: Vec<Arc<dyn DeferredWriteBackend>> = Vec::new();
    let mut scheduler_backends = std::collections::HashMap::new();
    for desc in &config.deferred_write_backends {
        let backend = build_write_backend(desc, &local).await?;
        scheduler_backends.insert(desc.name.clone(), backend.clone());
        deferred_backends.push(Arc::new(Deferred::new(backend, desc.name.clone())));
    }

    let pending_sink: Option<Arc<dyn PendingUploadSink>> = if deferred_backends.is_empty() {
        None
    } else {
        Some(local.clone())
    };

    let coordinator = Coordinator::new(
        read_backends,
        write_backends,
        deferred_backends,
        Some(local.clone() as Arc<dyn WriteBackend>),
        pending_sink,
    );

    let scheduler = if scheduler_backends.is_empty() {
        None
    } else {
        Some(Arc::new(Scheduler::new(local.clone(), scheduler_backends)))
    };

    let mut scheduler_shutdown = None;
    if let Some(scheduler) = &scheduler {
        let (tx, rx) = tokio::sync::oneshot::channel();
        scheduler_shutdown = Some(tx);
        let scheduler = Arc::clone(scheduler);
        tokio::spawn(async move { scheduler.run(rx).await });
    }

    let state = Arc::new(AppState::new(coordinator, scheduler));
    let app = router(state);

    let listen = listen_override.unwrap_or_else(|| config.listen.clone());
    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .map_err(|e| Error::io(format!("binding {listen}"), e))?;
    info!(%listen, "entropyd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::io("serving http", e))?;

    if let Some(tx) = scheduler_shutdown {
        let _ = tx.send(());
    }

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("received shutdown signal");
}

/// Verification mode: every configured read backend is treated as a replica
/// of `local`, and a single verify-and-repair migration is run against all
/// of local's content.
async fn verify(config: &Config, local: Arc<LocalBackend>, concurrency: i64) -> Result<()> {
    let mut replicas = Vec::new();
    for desc in &config.read_backends {
        if matches!(desc.options, BackendOptions::Local) {
            continue;
        }
        let read = build_read_backend(desc, &local).await?;
        let write = build_write_backend(desc, &local).await?;
        replicas.push(ReplicaBackend { read, write });
    }

    let migration = local.migrate_to(None, concurrency)?;
    let engine = Arc::new(MigrationEngine::new(local, migration, None, replicas));
    engine.run().await;
    info!("verification pass complete");
    Ok(())
}

async fn build_read_backend(desc: &BackendDescriptor, local: &Arc<LocalBackend>) -> Result<Arc<dyn ReadBackend>> {
    match &desc.options {
        BackendOptions::Local => Ok(local.clone() as Arc<dyn ReadBackend>),
        BackendOptions::Remote { url } => Ok(Arc::new(RemoteBackend::new(desc.name.clone(), url.clone()))),
        BackendOptions::S3 { bucket, .. } => {
            Ok(Arc::new(S3Backend::new(desc.name.clone(), bucket.clone()).await))
        }
    }
}

async fn build_write_backend(desc: &BackendDescriptor, local: &Arc<LocalBackend>) -> Result<Arc<dyn WriteBackend>> {
    match &desc.options {
        BackendOptions::Local => Ok(local.clone() as Arc<dyn WriteBackend>),
        BackendOptions::Remote { url } => Ok(Arc::new(RemoteBackend::new(desc.name.clone(), url.clone()))),
        BackendOptions::S3 { bucket, .. } => {
            Ok(Arc::new(S3Backend::new(desc.name.clone(), bucket.clone()).await))
        }
    }
}
