//! Vitals Monitoring Service
//!
//! Builds the pipeline from settings and runs its background work: the
//! ingest hub's flush and idle sweeps, and the periodic escalation sweep.
//! Request handling lives in the adapters that embed [`Service`].

mod settings;
mod telemetry;

pub use settings::{
    LoggingSettings, MetricsSettings, Settings, StorageBackend, StorageSettings, SweepSettings,
};
pub use telemetry::{init_logging, init_metrics};

use anyhow::Context;
use chrono::Utc;
use notifier::LogSender;
use pipeline::{Pipeline, StreamGateway};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use storage::{FamilyDirectory, MemoryRepository, SqliteRepository, Storage};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// A running pipeline with its background tasks
pub struct Service {
    pub pipeline: Arc<Pipeline>,
    pub gateway: StreamGateway,
    hub_task: JoinHandle<()>,
    sweep_task: JoinHandle<()>,
    stop: watch::Sender<bool>,
}

impl Service {
    /// Open storage, build the pipeline, and start the background tasks
    pub async fn start(settings: &Settings) -> anyhow::Result<Self> {
        let (storage, family) = open_storage(settings).await?;
        let pipeline = Arc::new(Pipeline::new(
            settings.pipeline.clone(),
            storage,
            family,
            Arc::new(LogSender),
        ));

        let (gateway, hub_task) = StreamGateway::spawn(pipeline.clone(), settings.buffer.clone());
        let (stop, stopped) = watch::channel(false);
        let sweep_task = tokio::spawn(escalation_loop(
            pipeline.clone(),
            Duration::from_secs(settings.escalation.interval_secs.max(1)),
            stopped,
        ));

        info!("Vitals pipeline started");
        Ok(Self {
            pipeline,
            gateway,
            hub_task,
            sweep_task,
            stop,
        })
    }

    /// Stop the escalation sweep and drain the ingest buffer
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.stop.send(true);
        if let Err(e) = self.sweep_task.await {
            warn!("Escalation sweep ended abnormally: {}", e);
        }

        let report = self
            .gateway
            .shutdown()
            .await
            .context("failed to drain ingest buffer")?;
        if !report.written {
            error!("{} buffered readings could not be written", report.readings);
        }
        self.hub_task.await.context("ingest hub task failed")?;

        info!("Vitals pipeline stopped");
        Ok(())
    }
}

async fn open_storage(
    settings: &Settings,
) -> anyhow::Result<(Arc<dyn Storage>, Arc<dyn FamilyDirectory>)> {
    match settings.storage.backend {
        StorageBackend::Memory => {
            let repo = Arc::new(MemoryRepository::new());
            for membership in &settings.family {
                repo.add_membership(membership.clone())?;
            }
            info!("Loaded {} family memberships", settings.family.len());
            let storage: Arc<dyn Storage> = repo.clone();
            let family: Arc<dyn FamilyDirectory> = repo;
            Ok((storage, family))
        }
        StorageBackend::Sqlite => {
            let repo = Arc::new(
                SqliteRepository::connect(&settings.storage.sqlite_url)
                    .await
                    .with_context(|| format!("failed to open {}", settings.storage.sqlite_url))?,
            );
            if !settings.family.is_empty() {
                warn!("Ignoring configured family memberships for the sqlite backend");
            }
            let storage: Arc<dyn Storage> = repo.clone();
            let family: Arc<dyn FamilyDirectory> = repo;
            Ok((storage, family))
        }
    }
}

async fn escalation_loop(pipeline: Arc<Pipeline>, every: Duration, mut stopped: watch::Receiver<bool>) {
    let mut tick = tokio::time::interval(every);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                if let Err(e) = pipeline.check_escalations(Utc::now()).await {
                    error!("Escalation sweep failed: {}", e);
                }
            }
            _ = stopped.changed() => break,
        }
    }
}

/// Run until `shutdown` completes, then drain
pub async fn run_until(settings: Settings, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
    let service = Service::start(&settings).await?;
    shutdown.await;
    service.shutdown().await
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => warn!("Failed to install Ctrl+C handler: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
